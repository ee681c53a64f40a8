//! Connection lifecycle for one platform link.
//!
//! Each platform gets one connection task that owns its [`Transport`],
//! drives the reconnect loop (`Disconnected → Connecting → Connected`,
//! back through `Backoff` on session loss) and shuttles frames in both
//! directions. Backoff doubles per failed attempt up to a cap, with jitter
//! so restarting fleets do not stampede one gateway; a successful connect
//! resets the attempt counter.
//!
//! Credential rejections are not retried: the task parks in a degraded
//! state, fails sends fast, and only a shutdown (typically a registry
//! rebuild with new credentials) releases it.
//!
//! The manager never queues outbound messages across a disconnect. Sends
//! racing a dead connection get [`SendError::NotConnected`] immediately.

use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SwitchboardConfig;
use crate::transport::{RawFrame, Session, Transport, TransportError};
use crate::types::Platform;

pub mod backoff;

pub use backoff::BackoffSchedule;

/// Frames buffered between the connection task and the adapter pump.
const FRAME_BUFFER: usize = 64;

/// Outbound send requests buffered toward the connection task.
const SEND_BUFFER: usize = 16;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of one platform connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session, no reconnect loop running.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// A live session is established.
    Connected,
    /// Waiting before the next connect attempt.
    Backoff,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Backoff => "backoff",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of a connection's lifecycle, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last successful connect.
    pub retry_count: u32,
    /// Most recent connection failure, if any.
    pub last_error: Option<String>,
    /// Credentials were rejected; the task holds in backoff indefinitely
    /// instead of retrying.
    pub degraded: bool,
}

impl ConnectionStatus {
    /// Whether a live session is established.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry_count: 0,
            last_error: None,
            degraded: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of one outbound frame delivery, reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// No live session; the frame may not have reached the platform.
    #[error("connection to {0} is not established")]
    NotConnected(Platform),

    /// The platform refused the payload.
    #[error("platform rejected the message: {0}")]
    Rejected(String),

    /// No acknowledgment within the configured window. The platform may
    /// still have processed the frame; retrying risks a duplicate.
    #[error("timed out waiting for delivery acknowledgment")]
    Timeout,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tunables for the reconnect loop and the send path.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// First reconnect delay.
    pub initial_delay: Duration,
    /// Reconnect delay ceiling.
    pub max_delay: Duration,
    /// Interval between liveness pings on an established session.
    pub heartbeat_interval: Duration,
    /// How long a send waits for the platform acknowledgment.
    pub ack_timeout: Duration,
}

impl ConnectionSettings {
    /// Derive settings from the loaded configuration.
    pub fn from_config(config: &SwitchboardConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(config.reconnect.max_delay_ms),
            heartbeat_interval: Duration::from_millis(config.reconnect.heartbeat_interval_ms),
            ack_timeout: Duration::from_millis(config.send.ack_timeout_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

struct SendRequest {
    frame: RawFrame,
    reply: oneshot::Sender<Result<RawFrame, SendError>>,
}

/// Control handle for a spawned connection task.
///
/// Dropping the handle without calling [`ConnectionHandle::shutdown`] closes
/// the send path; the task notices the closures and stops on its own.
pub struct ConnectionHandle {
    platform: Platform,
    sends: mpsc::Sender<SendRequest>,
    status: watch::Receiver<ConnectionStatus>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionHandle {
    /// Platform this connection serves.
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Latest observed status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Watch stream of status transitions.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Deliver one raw frame and wait for the platform acknowledgment.
    ///
    /// # Errors
    ///
    /// [`SendError::NotConnected`] when no live session exists — the frame
    /// is not queued for later. [`SendError::Rejected`] and
    /// [`SendError::Timeout`] come back from the session itself.
    pub async fn send_frame(&self, frame: RawFrame) -> Result<RawFrame, SendError> {
        if !self.status().is_connected() {
            return Err(SendError::NotConnected(self.platform));
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = SendRequest {
            frame,
            reply: reply_tx,
        };
        if self.sends.send(request).await.is_err() {
            return Err(SendError::NotConnected(self.platform));
        }
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(SendError::NotConnected(self.platform)),
        }
    }

    /// Stop the task and wait until the session is closed. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(platform = %self.platform, error = %e, "connection task ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("platform", &self.platform)
            .field("status", &self.status())
            .finish()
    }
}

/// Spawn the connection task for `platform` over `transport`.
///
/// Returns the control handle and the stream of raw inbound frames. The
/// frame channel is bounded; a stalled consumer backpressures frame polling
/// rather than growing a queue.
pub fn spawn(
    platform: Platform,
    transport: Box<dyn Transport>,
    settings: ConnectionSettings,
) -> (ConnectionHandle, mpsc::Receiver<RawFrame>) {
    let (frame_tx, frame_rx) = mpsc::channel(FRAME_BUFFER);
    let (send_tx, send_rx) = mpsc::channel(SEND_BUFFER);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(run(
        platform,
        transport,
        settings,
        frame_tx,
        send_rx,
        status_tx,
        shutdown_rx,
    ));

    let handle = ConnectionHandle {
        platform,
        sends: send_tx,
        status: status_rx,
        shutdown: shutdown_tx,
        task: Mutex::new(Some(task)),
    };
    (handle, frame_rx)
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Why the connected phase ended.
enum Exit {
    Shutdown,
    Lost(String),
    Degraded(String),
}

async fn run(
    platform: Platform,
    transport: Box<dyn Transport>,
    settings: ConnectionSettings,
    frames: mpsc::Sender<RawFrame>,
    mut sends: mpsc::Receiver<SendRequest>,
    status: watch::Sender<ConnectionStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    let schedule = BackoffSchedule::new(settings.initial_delay, settings.max_delay);
    let mut retry_count: u32 = 0;
    let mut last_error: Option<String> = None;

    loop {
        set_status(
            &status,
            ConnectionStatus {
                state: ConnectionState::Connecting,
                retry_count,
                last_error: last_error.clone(),
                degraded: false,
            },
        );
        match transport.connect().await {
            Ok(session) => {
                retry_count = 0;
                last_error = None;
                set_status(
                    &status,
                    ConnectionStatus {
                        state: ConnectionState::Connected,
                        retry_count: 0,
                        last_error: None,
                        degraded: false,
                    },
                );
                info!(platform = %platform, "platform connection established");

                let exit = connected(
                    platform,
                    session.as_ref(),
                    settings,
                    &frames,
                    &mut sends,
                    &mut shutdown,
                )
                .await;
                session.close().await;

                match exit {
                    Exit::Shutdown => break,
                    Exit::Degraded(reason) => {
                        error!(
                            platform = %platform,
                            reason = %reason,
                            "credentials rejected, parking connection"
                        );
                        last_error = Some(reason);
                        set_status(&status, degraded_status(retry_count, &last_error));
                        park(platform, &mut sends, &mut shutdown).await;
                        break;
                    }
                    Exit::Lost(reason) => {
                        retry_count = retry_count.saturating_add(1);
                        let delay = schedule.jittered(retry_count);
                        warn!(
                            platform = %platform,
                            reason = %reason,
                            attempt = retry_count,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "session lost, backing off"
                        );
                        last_error = Some(reason);
                        set_status(
                            &status,
                            ConnectionStatus {
                                state: ConnectionState::Backoff,
                                retry_count,
                                last_error: last_error.clone(),
                                degraded: false,
                            },
                        );
                        if backoff_wait(platform, delay, &mut sends, &mut shutdown).await {
                            break;
                        }
                    }
                }
            }
            Err(e) if e.is_credential() => {
                error!(
                    platform = %platform,
                    error = %e,
                    "credentials rejected, parking connection"
                );
                last_error = Some(e.to_string());
                set_status(&status, degraded_status(retry_count, &last_error));
                park(platform, &mut sends, &mut shutdown).await;
                break;
            }
            Err(e) => {
                retry_count = retry_count.saturating_add(1);
                let delay = schedule.jittered(retry_count);
                warn!(
                    platform = %platform,
                    error = %e,
                    attempt = retry_count,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "connect failed, backing off"
                );
                last_error = Some(e.to_string());
                set_status(
                    &status,
                    ConnectionStatus {
                        state: ConnectionState::Backoff,
                        retry_count,
                        last_error: last_error.clone(),
                        degraded: false,
                    },
                );
                if backoff_wait(platform, delay, &mut sends, &mut shutdown).await {
                    break;
                }
            }
        }
    }

    set_status(
        &status,
        ConnectionStatus {
            state: ConnectionState::Disconnected,
            retry_count,
            last_error,
            degraded: false,
        },
    );
    drain_sends(platform, &mut sends);
    info!(platform = %platform, "connection stopped");
}

/// Runs one established session until it ends.
async fn connected(
    platform: Platform,
    session: &dyn Session,
    settings: ConnectionSettings,
    frames: &mpsc::Sender<RawFrame>,
    sends: &mut mpsc::Receiver<SendRequest>,
    shutdown: &mut watch::Receiver<bool>,
) -> Exit {
    let mut heartbeat = tokio::time::interval(settings.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; consume it so pings start one
    // interval after connect.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            frame = session.next_frame() => match frame {
                Ok(frame) => {
                    if frames.send(frame).await.is_err() {
                        return Exit::Shutdown;
                    }
                }
                Err(e) if e.is_credential() => return Exit::Degraded(e.to_string()),
                Err(e) => return Exit::Lost(e.to_string()),
            },
            request = sends.recv() => match request {
                Some(request) => {
                    if let Some(exit) =
                        handle_send(platform, session, request, settings.ack_timeout).await
                    {
                        return exit;
                    }
                }
                None => return Exit::Shutdown,
            },
            _ = heartbeat.tick() => {
                if let Err(e) = session.ping().await {
                    if e.is_credential() {
                        return Exit::Degraded(e.to_string());
                    }
                    return Exit::Lost(format!("heartbeat failed: {e}"));
                }
                debug!(platform = %platform, "heartbeat ok");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Exit::Shutdown;
                }
            }
        }
    }
}

/// Processes one send request. Returns `Some(exit)` when the session must be
/// abandoned.
async fn handle_send(
    platform: Platform,
    session: &dyn Session,
    request: SendRequest,
    ack_timeout: Duration,
) -> Option<Exit> {
    match tokio::time::timeout(ack_timeout, session.send(request.frame)).await {
        Ok(Ok(ack)) => {
            let _ = request.reply.send(Ok(ack));
            None
        }
        Ok(Err(TransportError::Rejected(reason))) => {
            // Payload refused; the session itself is still usable.
            let _ = request.reply.send(Err(SendError::Rejected(reason)));
            None
        }
        Ok(Err(TransportError::AckTimeout)) => {
            let _ = request.reply.send(Err(SendError::Timeout));
            None
        }
        Ok(Err(e)) if e.is_credential() => {
            let reason = e.to_string();
            let _ = request.reply.send(Err(SendError::Rejected(reason.clone())));
            Some(Exit::Degraded(reason))
        }
        Ok(Err(e)) => {
            let _ = request.reply.send(Err(SendError::NotConnected(platform)));
            Some(Exit::Lost(format!("send failed: {e}")))
        }
        Err(_elapsed) => {
            // The platform may still have processed the frame; at-least-once
            // delivery leaves the retry decision with the caller.
            let _ = request.reply.send(Err(SendError::Timeout));
            None
        }
    }
}

/// Waits out a backoff delay, failing sends that arrive meanwhile.
///
/// Returns `true` when shutdown was requested during the wait.
async fn backoff_wait(
    platform: Platform,
    delay: Duration,
    sends: &mut mpsc::Receiver<SendRequest>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            request = sends.recv() => match request {
                Some(request) => {
                    let _ = request.reply.send(Err(SendError::NotConnected(platform)));
                }
                None => return true,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}

/// Holds a degraded connection until shutdown, failing every send.
async fn park(
    platform: Platform,
    sends: &mut mpsc::Receiver<SendRequest>,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            request = sends.recv() => match request {
                Some(request) => {
                    let _ = request.reply.send(Err(SendError::NotConnected(platform)));
                }
                None => return,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

fn degraded_status(retry_count: u32, last_error: &Option<String>) -> ConnectionStatus {
    ConnectionStatus {
        state: ConnectionState::Backoff,
        retry_count,
        last_error: last_error.clone(),
        degraded: true,
    }
}

fn drain_sends(platform: Platform, sends: &mut mpsc::Receiver<SendRequest>) {
    while let Ok(request) = sends.try_recv() {
        let _ = request.reply.send(Err(SendError::NotConnected(platform)));
    }
}

fn set_status(status: &watch::Sender<ConnectionStatus>, next: ConnectionStatus) {
    let _ = status.send(next);
}
