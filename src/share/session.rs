//! SSH connection handling.
//!
//! Each accepted TCP connection gets its own [`ShareHandler`], created by the
//! listener with the shared, read-only authorizer and shell command. russh
//! drives the handler through the protocol:
//!
//! 1. **Authentication**: only `publickey` is accepted. An offered key is
//!    checked against the account's key list once; a key accepted at offer
//!    time is accepted again for the signed attempt without a second scan.
//!    `none` and `password` attempts are rejected.
//! 2. **Channel setup**: `channel_open_session`, then usually `pty_request`
//!    (terminal type and size), then `shell_request` or `exec_request`.
//! 3. **Interactive use**: `data` and `window_change_request` are forwarded to
//!    the running shell through the session's streams.
//! 4. **Teardown**: client EOF closes the shell's input; channel close (or the
//!    connection dropping, which drops this handler) ends the remaining
//!    streams and hangs up the shell's terminal.
//!
//! A session without a PTY is answered with a short notice and exit status 1;
//! no process is started. Errors returned from these callbacks abort only this
//! connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use russh::keys::PublicKey;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, MethodKind, MethodSet};
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::share::auth::KeyAuthorizer;
use crate::share::error::SessionError;
use crate::share::shell::{
    ChannelWriter, PtyRequest, ShellCommand, WindowSize, run_shell, session_streams,
};

/// Per-channel state.
#[derive(Default)]
struct ChannelState {
    /// Terminal negotiated by `pty_request`, if any.
    pty: Option<PtyRequest>,
    /// Client input for the running shell. `None` before the shell starts and
    /// after client EOF.
    input: Option<mpsc::UnboundedSender<Vec<u8>>>,
    /// Window changes for the running shell.
    resizes: Option<mpsc::UnboundedSender<WindowSize>>,
    /// Hangs the shell's session up when this state is dropped.
    hangup: Option<DropGuard>,
}

impl ChannelState {
    fn shell_started(&self) -> bool {
        self.resizes.is_some()
    }

    /// Pass client bytes to the shell. Returns whether they were queued.
    fn forward_input(&mut self, data: &[u8]) -> bool {
        let Some(input) = &self.input else {
            let reason = if self.shell_started() {
                "after EOF"
            } else {
                "before the shell started"
            };
            debug!("Dropping {} bytes of client data {}", data.len(), reason);
            return false;
        };

        if input.send(data.to_vec()).is_err() {
            debug!("Shell input closed, dropping client data");
            self.input = None;
            return false;
        }
        true
    }
}

/// russh server handler for one client connection.
pub struct ShareHandler {
    authorizer: Arc<dyn KeyAuthorizer>,
    shell: Arc<ShellCommand>,
    connection_id: Uuid,
    peer_addr: Option<SocketAddr>,
    /// Key accepted when offered, so the signed attempt skips the scan.
    accepted_key: Option<PublicKey>,
    channels: HashMap<ChannelId, ChannelState>,
}

/// Method list sent with every rejection.
pub(crate) fn publickey_only() -> MethodSet {
    MethodSet::from(&[MethodKind::PublicKey][..])
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: Some(publickey_only()),
        partial_success: false,
    }
}

impl ShareHandler {
    pub fn new(
        authorizer: Arc<dyn KeyAuthorizer>,
        shell: Arc<ShellCommand>,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            authorizer,
            shell,
            connection_id: Uuid::new_v4(),
            peer_addr,
            accepted_key: None,
            channels: HashMap::new(),
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    fn was_accepted(&self, key: &PublicKey) -> bool {
        self.accepted_key
            .as_ref()
            .is_some_and(|accepted| accepted.key_data() == key.key_data())
    }

    /// Run the authorizer once for `key`, remembering an accepted key.
    fn check_key(&mut self, user: &str, key: &PublicKey) -> Auth {
        debug!(
            connection = %self.connection_id,
            "Checking {} key for user {} from {:?} with {}",
            key.algorithm(),
            user,
            self.peer_addr,
            self.authorizer.name()
        );

        if self.authorizer.authorize(key) {
            self.accepted_key = Some(key.clone());
            Auth::Accept
        } else {
            reject()
        }
    }

    fn channel(&mut self, channel_id: ChannelId) -> Result<&mut ChannelState, SessionError> {
        self.channels
            .get_mut(&channel_id)
            .ok_or(SessionError::UnknownChannel)
    }

    /// Start the shell for `channel_id`, or turn the client away when it never
    /// asked for a PTY.
    fn start_session(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
    ) -> Result<(), SessionError> {
        let connection_id = self.connection_id;
        let writer = ChannelWriter::new(session.handle(), channel_id);
        let shell = Arc::clone(&self.shell);
        let state = self.channel(channel_id)?;

        let Some(request) = state.pty.clone() else {
            warn!(
                connection = %connection_id,
                "No PTY requested on {:?}, closing session",
                channel_id
            );
            tokio::spawn(async move { writer.reject_without_pty().await });
            return Ok(());
        };

        if state.shell_started() {
            warn!(
                connection = %connection_id,
                "Ignoring second shell request on {:?}",
                channel_id
            );
            return Ok(());
        }

        let spawned = shell.spawn(&request).inspect_err(|e| {
            error!(connection = %connection_id, "Failed to start shell: {}", e);
        })?;

        let (senders, streams) = session_streams();
        state.input = Some(senders.input);
        state.resizes = Some(senders.resizes);
        state.hangup = Some(senders.hangup);

        let span = info_span!("shell", connection = %connection_id, channel = ?channel_id);
        tokio::spawn(
            async move {
                if let Err(e) = run_shell(spawned, streams, writer).await {
                    error!("Shell session failed: {}", e);
                }
            }
            .instrument(span),
        );
        Ok(())
    }
}

impl Handler for ShareHandler {
    type Error = SessionError;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        debug!(connection = %self.connection_id, "Rejecting none auth for {}", user);
        Ok(reject())
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        warn!(
            connection = %self.connection_id,
            "Rejecting password auth for {} from {:?}: only public keys are accepted",
            user,
            self.peer_addr
        );
        Ok(reject())
    }

    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(self.check_key(user, public_key))
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.was_accepted(public_key) {
            return Ok(Auth::Accept);
        }
        Ok(self.check_key(user, public_key))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(connection = %self.connection_id, "Session channel opened: {:?}", channel.id());
        self.channels.insert(channel.id(), ChannelState::default());
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel_id: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(
            connection = %self.connection_id,
            "PTY request: term={}, cols={}, rows={}",
            term, col_width, row_height
        );
        let state = self.channel(channel_id)?;
        state.pty = Some(PtyRequest {
            term: term.to_string(),
            size: WindowSize::from_request(col_width, row_height),
        });
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        info!(connection = %self.connection_id, "Shell request on {:?}", channel_id);
        self.start_session(channel_id, session)
    }

    /// Commands are not run: the request is served like a shell request.
    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        info!(
            connection = %self.connection_id,
            "Exec request on {:?} ({}), starting the shared shell instead",
            channel_id,
            String::from_utf8_lossy(data)
        );
        self.start_session(channel_id, session)
    }

    async fn window_change_request(
        &mut self,
        channel_id: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let size = WindowSize::from_request(col_width, row_height);
        let state = self.channel(channel_id)?;

        match (&state.resizes, &mut state.pty) {
            (Some(resizes), _) => {
                if resizes.send(size).is_err() {
                    debug!("Resize after shell ended on {:?}", channel_id);
                }
            }
            // Not started yet: the shell will start at the latest size.
            (None, Some(pty)) => pty.size = size,
            (None, None) => debug!("Window change without PTY on {:?}", channel_id),
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if !self.channel(channel_id)?.forward_input(data) {
            debug!(connection = %self.connection_id, "Client data on {:?} not delivered", channel_id);
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel_id: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(connection = %self.connection_id, "Channel EOF: {:?}", channel_id);
        if let Some(state) = self.channels.get_mut(&channel_id) {
            state.input = None;
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel_id: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(connection = %self.connection_id, "Channel closed: {:?}", channel_id);
        // Dropping the state hangs up a running shell.
        self.channels.remove(&channel_id);
        Ok(())
    }
}
