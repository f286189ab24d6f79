//! Authorization policy trait definition.

use russh::keys::PublicKey;

/// Decides whether a client's public key may open a session.
///
/// Implementations must be thread-safe (`Send + Sync`): one instance is shared
/// by every connection handler for the lifetime of the process, and is never
/// mutated after construction.
pub trait KeyAuthorizer: Send + Sync {
    /// Return `true` to accept the offered key.
    fn authorize(&self, offered: &PublicKey) -> bool;

    /// Get the name of this authorizer.
    ///
    /// Used for logging and debugging purposes.
    fn name(&self) -> &'static str;
}
