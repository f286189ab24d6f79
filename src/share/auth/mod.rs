//! Public key authorization for incoming connections.
//!
//! The server accepts exactly one authentication method, `publickey`, and a
//! single policy: the offered key must equal one of the keys published by the
//! shared account.
//!
//! # Available Authorizers
//!
//! - [`GitHubKeys`]: matches against a fetched [`KeyList`](crate::share::KeyList)
//!
//! # Example
//!
//! ```ignore
//! use sharessh::share::auth::{GitHubKeys, KeyAuthorizer};
//!
//! let authorizer = GitHubKeys::new("alice", keys);
//! if authorizer.authorize(&offered_key) {
//!     // let the client in
//! }
//! ```

mod github;
mod traits;

pub use github::{GitHubKeys, authenticate};
pub use traits::KeyAuthorizer;
