//! In-memory transport pair for exercising connections without a gateway.
//!
//! [`pair`] returns a [`Transport`] to hand to a connection manager and a
//! [`MemoryController`] kept by the caller. The controller scripts connect
//! outcomes, injects inbound frames, captures outbound frames, and forces
//! session loss. The test suite (and nothing else) builds on this module.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{RawFrame, Session, Transport, TransportError, TransportFactory};
use crate::config::PlatformSection;
use crate::types::Platform;

struct Shared {
    /// Scripted connect failures, consumed one per attempt.
    connect_failures: Mutex<VecDeque<TransportError>>,
    connects: AtomicU64,
    /// Feed into the currently live session, if any.
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<RawFrame>>>,
    sent: Mutex<Vec<RawFrame>>,
    /// Scripted send outcomes, consumed one per send; empty means ack.
    send_results: Mutex<VecDeque<Result<RawFrame, TransportError>>>,
    default_ack: Mutex<RawFrame>,
    session_alive: AtomicBool,
    /// When set, the next send hangs until cancelled.
    stall_next_send: AtomicBool,
}

/// Transport half of an in-memory pair.
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// Test-side controller for an in-memory transport.
#[derive(Clone)]
pub struct MemoryController {
    shared: Arc<Shared>,
}

/// Creates a connected transport/controller pair.
pub fn pair() -> (MemoryTransport, MemoryController) {
    let shared = Arc::new(Shared {
        connect_failures: Mutex::new(VecDeque::new()),
        connects: AtomicU64::new(0),
        inbound_tx: Mutex::new(None),
        sent: Mutex::new(Vec::new()),
        send_results: Mutex::new(VecDeque::new()),
        default_ack: Mutex::new(RawFrame::Null),
        session_alive: AtomicBool::new(false),
        stall_next_send: AtomicBool::new(false),
    });
    (
        MemoryTransport {
            shared: Arc::clone(&shared),
        },
        MemoryController { shared },
    )
}

impl MemoryController {
    /// Scripts the next connect attempt to fail with `err`.
    ///
    /// Calls queue up: two calls fail the next two attempts.
    pub fn fail_next_connect(&self, err: TransportError) {
        if let Ok(mut failures) = self.shared.connect_failures.lock() {
            failures.push_back(err);
        }
    }

    /// Number of connect attempts observed so far (including failed ones).
    pub fn connect_count(&self) -> u64 {
        self.shared.connects.load(Ordering::Acquire)
    }

    /// Whether a session is currently live.
    pub fn session_alive(&self) -> bool {
        self.shared.session_alive.load(Ordering::Acquire)
    }

    /// Delivers an inbound frame to the live session.
    ///
    /// Returns `false` if no session is live (the frame is discarded).
    pub fn push_frame(&self, frame: RawFrame) -> bool {
        let guard = match self.shared.inbound_tx.lock() {
            Ok(g) => g,
            Err(_) => return false,
        };
        match guard.as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Kills the live session: pending and future `next_frame`/`ping`
    /// calls on it fail, forcing the connection manager to reconnect.
    pub fn drop_session(&self) {
        if let Ok(mut guard) = self.shared.inbound_tx.lock() {
            *guard = None;
        }
        self.shared.session_alive.store(false, Ordering::Release);
    }

    /// Frames the session has sent, oldest first.
    pub fn sent_frames(&self) -> Vec<RawFrame> {
        self.shared
            .sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Sets the ack frame returned for sends with no scripted outcome.
    pub fn set_ack(&self, ack: RawFrame) {
        if let Ok(mut guard) = self.shared.default_ack.lock() {
            *guard = ack;
        }
    }

    /// Scripts the outcome of the next send.
    pub fn push_send_result(&self, result: Result<RawFrame, TransportError>) {
        if let Ok(mut results) = self.shared.send_results.lock() {
            results.push_back(result);
        }
    }

    /// Makes the next send hang until the caller's timeout cancels it.
    ///
    /// The frame is still captured, modelling a message that reached the
    /// gateway but was never acknowledged.
    pub fn stall_next_send(&self) {
        self.shared.stall_next_send.store(true, Ordering::Release);
    }

    /// Makes liveness pings fail while leaving the frame stream open.
    ///
    /// Unlike [`MemoryController::drop_session`], a pending `next_frame`
    /// keeps waiting, so only the heartbeat notices the dead session.
    pub fn fail_pings(&self) {
        self.shared.session_alive.store(false, Ordering::Release);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<Box<dyn Session>, TransportError> {
        self.shared.connects.fetch_add(1, Ordering::AcqRel);
        if let Ok(mut failures) = self.shared.connect_failures.lock() {
            if let Some(err) = failures.pop_front() {
                return Err(err);
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut guard) = self.shared.inbound_tx.lock() {
            *guard = Some(tx);
        }
        self.shared.session_alive.store(true, Ordering::Release);

        Ok(Box::new(MemorySession {
            shared: Arc::clone(&self.shared),
            rx: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemorySession {
    shared: Arc<Shared>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RawFrame>>,
    closed: AtomicBool,
}

#[async_trait]
impl Session for MemorySession {
    async fn next_frame(&self) -> Result<RawFrame, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Lost("session closed".to_string()));
        }
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(frame) => Ok(frame),
            None => Err(TransportError::Lost("session dropped".to_string())),
        }
    }

    async fn send(&self, frame: RawFrame) -> Result<RawFrame, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Lost("session closed".to_string()));
        }
        if let Ok(mut sent) = self.shared.sent.lock() {
            sent.push(frame);
        }
        if self.shared.stall_next_send.swap(false, Ordering::AcqRel) {
            std::future::pending::<()>().await;
        }
        if let Ok(mut results) = self.shared.send_results.lock() {
            if let Some(result) = results.pop_front() {
                return result;
            }
        }
        let ack = self
            .shared
            .default_ack
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or(RawFrame::Null);
        Ok(ack)
    }

    async fn ping(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) || !self.shared.session_alive.load(Ordering::Acquire)
        {
            return Err(TransportError::Lost("session dropped".to_string()));
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut guard) = self.shared.inbound_tx.lock() {
            *guard = None;
        }
        self.shared.session_alive.store(false, Ordering::Release);
    }
}

/// Hands out prepared in-memory transports, one per registry build.
///
/// Each [`MemoryTransportFactory::prepare`] call queues one transport for a
/// platform; building an adapter consumes one. Asking for an unprepared
/// platform fails construction, which is also how tests exercise the
/// build-failure path.
#[derive(Default)]
pub struct MemoryTransportFactory {
    prepared: Mutex<HashMap<Platform, VecDeque<MemoryTransport>>>,
}

impl MemoryTransportFactory {
    /// Creates a factory with nothing prepared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one transport for `platform` and returns its controller.
    pub fn prepare(&self, platform: Platform) -> MemoryController {
        let (transport, controller) = pair();
        if let Ok(mut prepared) = self.prepared.lock() {
            prepared.entry(platform).or_default().push_back(transport);
        }
        controller
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn create(
        &self,
        platform: Platform,
        _section: &PlatformSection,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let Ok(mut prepared) = self.prepared.lock() else {
            return Err(TransportError::Connect("factory lock poisoned".to_string()));
        };
        match prepared.get_mut(&platform).and_then(|queue| queue.pop_front()) {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(TransportError::Connect(format!(
                "no transport prepared for {platform}"
            ))),
        }
    }
}
