//! SSH listener.
//!
//! Binds the configured address, then accepts connections until the shutdown
//! token fires. Each connection runs in its own task with its own
//! [`ShareHandler`]; the authorizer and shell command are shared read-only, so
//! any number of clients can be connected at once.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::PrivateKey;
use russh::keys::ssh_key::Algorithm;
use russh::keys::ssh_key::rand_core::OsRng;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::share::auth::KeyAuthorizer;
use crate::share::config::{HostKeySource, ServerConfig};
use crate::share::error::ShareError;
use crate::share::session::{ShareHandler, publickey_only};
use crate::share::shell::ShellCommand;

/// Delay before answering a failed authentication attempt.
const AUTH_REJECTION_DELAY: Duration = Duration::from_secs(1);

/// Load or generate the server host key.
pub fn load_host_key(source: &HostKeySource) -> Result<PrivateKey, ShareError> {
    match source {
        HostKeySource::Ephemeral => {
            debug!("Generating ephemeral Ed25519 host key");
            PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
                .map_err(|e| ShareError::HostKey(e.to_string()))
        }
        HostKeySource::File(path) => {
            info!("Loading host key from {}", path.display());
            russh::keys::load_secret_key(path, None)
                .map_err(|e| ShareError::HostKey(format!("{}: {}", path.display(), e)))
        }
    }
}

/// Build the russh server configuration around `host_key`.
///
/// Only `publickey` is advertised. The first rejection is answered at once,
/// later ones after [`AUTH_REJECTION_DELAY`]. Idle sessions are never timed
/// out.
pub fn build_ssh_config(host_key: PrivateKey) -> Arc<russh::server::Config> {
    Arc::new(russh::server::Config {
        auth_rejection_time: AUTH_REJECTION_DELAY,
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        keys: vec![host_key],
        methods: publickey_only(),
        inactivity_timeout: None,
        ..Default::default()
    })
}

/// Bind the listening socket.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ShareError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ShareError::Bind { addr, source })
}

/// Accept connections on `listener` until `shutdown` is cancelled.
///
/// Accept errors are logged and the loop keeps going; a failing connection
/// never stops the listener.
pub async fn serve_on(
    listener: TcpListener,
    ssh_config: Arc<russh::server::Config>,
    authorizer: Arc<dyn KeyAuthorizer>,
    shell: Arc<ShellCommand>,
    shutdown: CancellationToken,
) -> Result<(), ShareError> {
    let local_addr = listener.local_addr().map_err(ShareError::Listener)?;
    info!("Listening on {}", local_addr);

    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutting down listener on {}", local_addr);
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let handler = ShareHandler::new(
            Arc::clone(&authorizer),
            Arc::clone(&shell),
            Some(peer_addr),
        );
        let span = info_span!("connection", id = %handler.connection_id(), peer = %peer_addr);
        let ssh_config = Arc::clone(&ssh_config);

        tokio::spawn(
            async move {
                debug!("Accepted connection");
                match russh::server::run_stream(ssh_config, stream, handler).await {
                    Ok(session) => {
                        if let Err(e) = session.await {
                            warn!("SSH session error: {}", e);
                        }
                    }
                    Err(e) => warn!("SSH connection error: {}", e),
                }
                debug!("Connection finished");
            }
            .instrument(span),
        );
    }
}

/// Bind the configured address and serve until `shutdown` is cancelled.
///
/// # Errors
///
/// * [`ShareError::Address`] - the bind address is not an IP address
/// * [`ShareError::HostKey`] - the host key could not be loaded or generated
/// * [`ShareError::Bind`] - the port could not be bound
pub async fn serve(
    config: &ServerConfig,
    authorizer: Arc<dyn KeyAuthorizer>,
    shutdown: CancellationToken,
) -> Result<(), ShareError> {
    let addr = config.listen_addr()?;
    let ssh_config = build_ssh_config(load_host_key(&config.host_key)?);
    let listener = bind(addr).await?;
    let shell = Arc::new(ShellCommand::new(config.shell.clone()));

    serve_on(listener, ssh_config, authorizer, shell, shutdown).await
}
