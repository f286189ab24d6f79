//! Terminal sharing over SSH, authorized by a GitHub account's public keys.
//!
//! This module is organized into the following submodules:
//!
//! - `config`: Configuration resolution with environment variable support
//! - `error`: Error taxonomy for key fetching, sessions and startup
//! - `keys`: Fetching the account's published key list
//! - `auth`: Matching offered client keys against the key list
//! - `shell`: PTY-backed shell processes and the per-session byte pumps
//! - `session`: The russh server handler for one connection
//! - `server`: Host key, listener and accept loop
//! - `hint`: The "share this command" line printed at startup

pub mod auth;
pub mod config;
pub mod error;
pub mod hint;
pub mod keys;
pub mod server;
pub mod session;
pub mod shell;

#[cfg(test)]
pub(crate) mod fixtures;

pub use config::ServerConfig;
pub use error::{FetchError, SessionError, ShareError};
pub use keys::KeyList;
