//! Error taxonomy for terminal sharing.
//!
//! Errors are grouped by the scope they terminate:
//!
//! 1. **Startup errors** ([`FetchError`], [`ShareError`]): the process cannot
//!    serve at all. They propagate to `main`, are reported on one line, and the
//!    process exits with status 1 before (or instead of) accepting connections.
//!
//! 2. **Connection errors** ([`SessionError`]): returned from the russh
//!    handler callbacks. russh tears down the offending connection while the
//!    listener and every other session keep running.
//!
//! Unparsable entries in the key list and rejected keys are not errors at all;
//! they are logged and the scan continues.
//!
//! Nothing in this crate retries. Every error is terminal for its scope.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Failure to retrieve the published key list for an account.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced a response (DNS, TLS, connect, timeout).
    #[error("GET error: {0}")]
    Network(String),

    /// The endpoint answered 404: there is no such account.
    #[error("account @{0} was not found")]
    AccountNotFound(String),

    /// Any other non-success status code.
    #[error("status error: {0}")]
    BadStatus(u16),

    /// The response started but its body could not be read.
    #[error("read body: {0}")]
    BodyRead(String),
}

/// Failure scoped to a single SSH connection.
///
/// This is the russh handler error type, so returning it from a callback
/// aborts that connection only.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Ssh(#[from] russh::Error),

    #[error("failed to allocate a pseudo-terminal: {0}")]
    PtyAllocation(String),

    #[error("failed to spawn shell {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("request for a channel that was never opened")]
    UnknownChannel,
}

/// Failure that prevents the process from serving.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("host key: {0}")]
    HostKey(String),

    #[error("invalid listen address {0}")]
    Address(String),

    #[error("listener failed: {0}")]
    Listener(#[source] io::Error),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    mod fetch_error {
        use super::*;

        #[test]
        fn test_account_not_found_names_the_account() {
            let err = FetchError::AccountNotFound("ghost-user-404".to_string());
            assert_eq!(err.to_string(), "account @ghost-user-404 was not found");
        }

        #[test]
        fn test_bad_status_carries_code() {
            let err = FetchError::BadStatus(500);
            assert_eq!(err.to_string(), "status error: 500");
        }

        #[test]
        fn test_variants_are_distinguishable() {
            let not_found = FetchError::AccountNotFound("alice".to_string());
            let bad = FetchError::BadStatus(404);
            assert!(matches!(not_found, FetchError::AccountNotFound(_)));
            assert!(!matches!(bad, FetchError::AccountNotFound(_)));
        }
    }

    mod share_error {
        use super::*;

        #[test]
        fn test_fetch_error_converts() {
            let err: ShareError = FetchError::BadStatus(503).into();
            assert!(matches!(err, ShareError::Fetch(FetchError::BadStatus(503))));
            assert_eq!(err.to_string(), "status error: 503");
        }

        #[test]
        fn test_bind_error_mentions_address() {
            let addr: SocketAddr = "0.0.0.0:2222".parse().unwrap();
            let err = ShareError::Bind {
                addr,
                source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
            };
            assert!(err.to_string().contains("0.0.0.0:2222"));
            assert!(err.to_string().contains("address in use"));
        }
    }

    mod session_error {
        use super::*;

        #[test]
        fn test_spawn_error_names_program() {
            let err = SessionError::Spawn {
                program: "/bin/nope".to_string(),
                reason: "No such file or directory".to_string(),
            };
            assert_eq!(
                err.to_string(),
                "failed to spawn shell /bin/nope: No such file or directory"
            );
        }

        #[test]
        fn test_io_error_converts() {
            let err: SessionError = io::Error::other("boom").into();
            assert!(matches!(err, SessionError::Io(_)));
        }

        #[test]
        fn test_error_is_send() {
            fn assert_send<T: Send>() {}
            assert_send::<SessionError>();
        }
    }
}
