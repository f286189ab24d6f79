//! PTY-backed shells and the byte pumps that connect them to an SSH channel.
//!
//! Every interactive session owns exactly one shell process attached to a
//! freshly allocated pseudo-terminal. Sessions that never asked for a PTY get
//! no process at all (see [`ChannelWriter::reject_without_pty`]).
//!
//! # Architecture
//!
//! Three lines of work run concurrently for each session:
//!
//! - **Resize forwarding**: window-change events from the client are applied to
//!   the PTY in the order they arrive ([`forward_resizes`]).
//! - **Inbound copy**: client keystrokes are written to the PTY
//!   ([`copy_input`]).
//! - **Outbound copy**: shell output is sent to the client until the PTY
//!   reports end of output ([`copy_output`]). This one runs on the session task;
//!   once it ends the shell is reaped and its exit status reported.
//!
//! The first two are fed by unbounded channels whose senders live in the
//! connection handler, so they end when the handler drops them (client EOF,
//! channel close or connection teardown). The PTY write half is shared between
//! them behind a mutex: input bytes have a single writer and resizes are not
//! part of the byte stream.
//!
//! The handler also holds a hangup guard. Dropping it (channel close or the
//! connection going away) stops the outbound copy even when the shell is idle.
//!
//! The shell is never killed from here. When output ends both PTY halves are
//! released, so a shell still running on a hung-up terminal gets SIGHUP from
//! the kernel, and the session waits for the process to exit.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server;
use russh::{ChannelId, CryptoVec};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::share::error::SessionError;

/// Text sent to clients that open a session without requesting a PTY
pub const NO_PTY_NOTICE: &str = "No PTY requested.\n";

/// Exit status reported to clients that open a session without a PTY
pub const NO_PTY_EXIT_STATUS: u32 = 1;

/// Read buffer size for shell output
const OUTPUT_BUFFER_SIZE: usize = 4096;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
}

impl WindowSize {
    /// Build from the 32-bit values carried by SSH requests, saturating at
    /// `u16::MAX`.
    pub fn from_request(col_width: u32, row_height: u32) -> Self {
        Self {
            cols: u16::try_from(col_width).unwrap_or(u16::MAX),
            rows: u16::try_from(row_height).unwrap_or(u16::MAX),
        }
    }
}

impl From<WindowSize> for pty_process::Size {
    fn from(size: WindowSize) -> Self {
        // `Size::new` takes rows first.
        pty_process::Size::new(size.rows, size.cols)
    }
}

/// Terminal negotiated by the client's `pty-req`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// Value for the shell's `TERM` variable.
    pub term: String,
    pub size: WindowSize,
}

/// Something whose terminal window can be resized.
pub trait WindowResize {
    fn resize_window(&self, size: WindowSize) -> io::Result<()>;
}

impl WindowResize for pty_process::OwnedWritePty {
    fn resize_window(&self, size: WindowSize) -> io::Result<()> {
        self.resize(size.into())
            .map_err(|e| io::Error::other(e.to_string()))
    }
}

/// Destination for shell output.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Deliver one chunk of output, in order.
    async fn write(&self, data: &[u8]) -> io::Result<()>;
}

/// Write handle for one server-side SSH channel.
///
/// Wraps a cloneable `russh::server::Handle` so output can be sent from tasks
/// running outside the connection handler.
#[derive(Clone)]
pub struct ChannelWriter {
    handle: server::Handle,
    channel_id: ChannelId,
}

impl ChannelWriter {
    pub fn new(handle: server::Handle, channel_id: ChannelId) -> Self {
        Self { handle, channel_id }
    }

    /// Send the no-PTY notice and end the channel with a failing status.
    pub async fn reject_without_pty(&self) {
        if let Err(e) = self.write(NO_PTY_NOTICE.as_bytes()).await {
            debug!("Failed to send no-PTY notice: {}", e);
        }
        self.finish(NO_PTY_EXIT_STATUS).await;
    }

    /// Report `exit_status`, then send EOF and close the channel.
    ///
    /// Each step may fail when the client already went away; failures are
    /// logged and the remaining steps still run.
    pub async fn finish(&self, exit_status: u32) {
        if self
            .handle
            .exit_status_request(self.channel_id, exit_status)
            .await
            .is_err()
        {
            debug!("Sending exit status on {:?} failed", self.channel_id);
        }
        if self.handle.eof(self.channel_id).await.is_err() {
            debug!("Sending EOF on {:?} failed", self.channel_id);
        }
        if self.handle.close(self.channel_id).await.is_err() {
            debug!("Closing {:?} failed", self.channel_id);
        }
    }
}

#[async_trait]
impl OutputSink for ChannelWriter {
    async fn write(&self, data: &[u8]) -> io::Result<()> {
        self.handle
            .data(self.channel_id, CryptoVec::from_slice(data))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "SSH channel closed"))
    }
}

/// Handler-side ends of a session's event streams.
pub struct StreamSenders {
    pub input: mpsc::UnboundedSender<Vec<u8>>,
    pub resizes: mpsc::UnboundedSender<WindowSize>,
    /// Hangs the session up when dropped.
    pub hangup: DropGuard,
}

/// Shell-side ends of a session's event streams.
pub struct SessionStreams {
    input: mpsc::UnboundedReceiver<Vec<u8>>,
    resizes: mpsc::UnboundedReceiver<WindowSize>,
    hangup: CancellationToken,
}

/// Create the input, resize and hangup streams for one session.
pub fn session_streams() -> (StreamSenders, SessionStreams) {
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (resize_tx, resize_rx) = mpsc::unbounded_channel();
    let hangup = CancellationToken::new();
    (
        StreamSenders {
            input: input_tx,
            resizes: resize_tx,
            hangup: hangup.clone().drop_guard(),
        },
        SessionStreams {
            input: input_rx,
            resizes: resize_rx,
            hangup,
        },
    )
}

/// Program started for each interactive session.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    program: String,
}

/// A shell process and both halves of its PTY master.
pub struct SpawnedShell {
    pub child: tokio::process::Child,
    pub reader: pty_process::OwnedReadPty,
    pub writer: pty_process::OwnedWritePty,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Allocate a PTY and start the shell on it.
    ///
    /// The shell inherits this process's environment with `TERM` replaced by
    /// the negotiated terminal type. The requested window size is applied
    /// after the spawn; a failed resize is logged, not fatal.
    pub fn spawn(&self, request: &PtyRequest) -> Result<SpawnedShell, SessionError> {
        let pty =
            pty_process::Pty::new().map_err(|e| SessionError::PtyAllocation(e.to_string()))?;
        let pts = pty
            .pts()
            .map_err(|e| SessionError::PtyAllocation(e.to_string()))?;

        let mut command = pty_process::Command::new(&self.program);
        command.env("TERM", &request.term);
        let child = command.spawn(&pts).map_err(|e| SessionError::Spawn {
            program: self.program.clone(),
            reason: e.to_string(),
        })?;
        // The child holds its own copies of the slave side.
        drop(pts);

        info!(
            "Spawned {} (pid {:?}) with TERM={}",
            self.program,
            child.id(),
            request.term
        );

        if let Err(e) = pty.resize(request.size.into()) {
            warn!("Failed to set initial window size {:?}: {}", request.size, e);
        }

        let (reader, writer) = pty.into_split();
        Ok(SpawnedShell {
            child,
            reader,
            writer,
        })
    }
}

/// Apply resize events to the PTY in arrival order until the stream ends.
///
/// Returns the number of events received.
pub(crate) async fn forward_resizes<W>(
    pty: Arc<Mutex<W>>,
    mut resizes: mpsc::UnboundedReceiver<WindowSize>,
) -> usize
where
    W: WindowResize + Send,
{
    let mut applied = 0;
    while let Some(size) = resizes.recv().await {
        applied += 1;
        debug!("Resizing PTY to {}x{}", size.cols, size.rows);
        if let Err(e) = pty.lock().await.resize_window(size) {
            warn!("Failed to resize PTY to {:?}: {}", size, e);
        }
    }
    applied
}

/// Write client input to the PTY until the stream ends or the PTY rejects a
/// write.
///
/// Returns the number of bytes written.
pub(crate) async fn copy_input<W>(
    pty: Arc<Mutex<W>>,
    mut input: mpsc::UnboundedReceiver<Vec<u8>>,
) -> u64
where
    W: AsyncWrite + Unpin + Send,
{
    let mut written = 0u64;
    while let Some(bytes) = input.recv().await {
        let mut pty = pty.lock().await;
        if let Err(e) = pty.write_all(&bytes).await {
            debug!("PTY input closed: {}", e);
            break;
        }
        if let Err(e) = pty.flush().await {
            debug!("PTY input flush failed: {}", e);
            break;
        }
        written += bytes.len() as u64;
    }
    written
}

/// Send PTY output to `output` until end of output or hangup.
///
/// Linux reports a PTY whose shell has exited with `EIO` rather than a zero
/// read, so read errors end the copy the same way EOF does.
///
/// Returns the number of bytes delivered.
pub(crate) async fn copy_output<R, O>(
    mut reader: R,
    output: &O,
    hangup: &CancellationToken,
) -> u64
where
    R: AsyncRead + Unpin,
    O: OutputSink + ?Sized,
{
    let mut buffer = vec![0u8; OUTPUT_BUFFER_SIZE];
    let mut delivered = 0u64;
    loop {
        let read = tokio::select! {
            _ = hangup.cancelled() => {
                debug!("Client hung up, releasing PTY output");
                break;
            }
            read = reader.read(&mut buffer) => read,
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("PTY output ended: {}", e);
                break;
            }
        };
        if let Err(e) = output.write(&buffer[..n]).await {
            debug!("Client output closed: {}", e);
            break;
        }
        delivered += n as u64;
    }
    delivered
}

/// Run the three session pumps, returning once shell output has ended or the
/// client hung up.
///
/// Resize forwarding and input copying are spawned; output copying runs on the
/// calling task. When it ends the other two are stopped, so every handle on
/// the PTY has been dropped by the time this returns.
pub(crate) async fn pump<R, W, O>(
    reader: R,
    writer: W,
    streams: SessionStreams,
    output: &O,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + WindowResize + Unpin + Send + 'static,
    O: OutputSink + ?Sized,
{
    let SessionStreams {
        input,
        resizes,
        hangup,
    } = streams;
    let writer = Arc::new(Mutex::new(writer));

    let resize_task = tokio::spawn(forward_resizes(Arc::clone(&writer), resizes));
    let input_task = tokio::spawn(copy_input(writer, input));

    let delivered = copy_output(reader, output, &hangup).await;

    resize_task.abort();
    input_task.abort();
    let _ = resize_task.await;
    let _ = input_task.await;
    delivered
}

/// Map a process exit status to an SSH exit status (128 + signal when killed).
pub fn exit_code(status: ExitStatus) -> u32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => u32::try_from(code).unwrap_or(1),
        (None, Some(signal)) => 128 + signal.unsigned_abs(),
        (None, None) => 1,
    }
}

/// Drive a spawned shell to completion over `channel`.
///
/// Pumps bytes until the shell's output ends or the client hangs up, waits for
/// the process to exit, then reports its status and closes the channel.
/// Returns the reported status.
pub async fn run_shell(
    shell: SpawnedShell,
    streams: SessionStreams,
    channel: ChannelWriter,
) -> Result<u32, SessionError> {
    let SpawnedShell {
        mut child,
        reader,
        writer,
    } = shell;
    let pid = child.id();

    let sent = pump(reader, writer, streams, &channel).await;
    debug!("Shell output closed after {} bytes (pid {:?})", sent, pid);

    let status = child.wait().await?;
    let code = exit_code(status);
    info!("Shell (pid {:?}) exited with status {}", pid, code);

    channel.finish(code).await;
    Ok(code)
}
