//! Outbound dispatch and inbound fan-in.
//!
//! The router holds a snapshot of live adapters (the route table) and does
//! two things: pick the adapter for an outbound send, and forward inbound
//! messages to the event bus. It performs no transformation of its own.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::debug;

use crate::adapters::{Adapter, InboundSink, SendError};
use crate::bus::EventBus;
use crate::types::{DeliveryReceipt, NormalizedMessage, Platform};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced by [`MessageRouter::route_outbound`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// No enabled adapter serves the requested platform.
    #[error("no enabled adapter for {0}")]
    UnknownPlatform(Platform),
    /// The adapter exists but its connection is not established.
    #[error("adapter for {0} is not connected")]
    AdapterUnavailable(Platform),
    /// The send failed after dispatch: platform rejection or ack timeout.
    #[error(transparent)]
    Send(#[from] SendError),
}

// ---------------------------------------------------------------------------
// Route table
// ---------------------------------------------------------------------------

/// Immutable snapshot mapping platforms to their live adapters.
///
/// Rebuilt wholesale on every configuration change. Readers clone the whole
/// snapshot, so a reload mid-lookup never exposes a half-updated table.
#[derive(Debug, Default)]
pub struct RouteTable {
    generation: u64,
    adapters: HashMap<Platform, Arc<Adapter>>,
}

impl RouteTable {
    /// Build a table for one configuration generation.
    pub fn new(generation: u64, adapters: HashMap<Platform, Arc<Adapter>>) -> Self {
        Self { generation, adapters }
    }

    /// Configuration generation this table was built from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Adapter serving `platform`, if enabled.
    pub fn adapter(&self, platform: Platform) -> Option<&Arc<Adapter>> {
        self.adapters.get(&platform)
    }

    /// Platforms currently served.
    pub fn platforms(&self) -> Vec<Platform> {
        self.adapters.keys().copied().collect()
    }

    /// Number of live adapters.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether no adapter is enabled.
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Stateless dispatcher between callers, adapters, and the event bus.
///
/// Holds only the current [`RouteTable`] snapshot; the registry is the
/// single writer that replaces it.
#[derive(Debug)]
pub struct MessageRouter {
    table: RwLock<Arc<RouteTable>>,
    bus: Arc<EventBus>,
}

impl MessageRouter {
    /// Router with an empty route table, publishing inbound to `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            table: RwLock::new(Arc::new(RouteTable::default())),
            bus,
        }
    }

    /// Event bus inbound messages are published to.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Current route table snapshot.
    pub fn table(&self) -> Arc<RouteTable> {
        // The guarded value is a plain pointer swap, so a poisoned lock
        // cannot hold a torn table.
        Arc::clone(&self.table.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Install a freshly built table, replacing the previous snapshot.
    pub fn install_table(&self, table: RouteTable) {
        let generation = table.generation();
        let platform_count = table.len();
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
        debug!(generation, platform_count, "route table installed");
    }

    /// Dispatch one outbound message to its platform's adapter and wait
    /// for the delivery receipt.
    ///
    /// # Errors
    ///
    /// [`RouteError::UnknownPlatform`] when no adapter serves `platform`,
    /// [`RouteError::AdapterUnavailable`] when the adapter's connection is
    /// down (checked before dispatch and enforced again by the send
    /// itself), [`RouteError::Send`] for rejections and ack timeouts.
    pub async fn route_outbound(
        &self,
        platform: Platform,
        message: &NormalizedMessage,
    ) -> Result<DeliveryReceipt, RouteError> {
        let table = self.table();
        let adapter = table
            .adapter(platform)
            .cloned()
            .ok_or(RouteError::UnknownPlatform(platform))?;

        if !adapter.status().is_connected() {
            return Err(RouteError::AdapterUnavailable(platform));
        }

        match adapter.send(message).await {
            Ok(receipt) => Ok(receipt),
            Err(SendError::NotConnected(p)) => Err(RouteError::AdapterUnavailable(p)),
            Err(e) => Err(RouteError::Send(e)),
        }
    }

    /// Forward one inbound message to the event bus.
    ///
    /// Called from adapter pumps; publishes exactly once and never blocks
    /// beyond bounded queue operations.
    pub fn route_inbound(&self, message: Arc<NormalizedMessage>) {
        self.bus.publish(message);
    }
}

impl InboundSink for MessageRouter {
    fn deliver(&self, message: Arc<NormalizedMessage>) {
        self.route_inbound(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::adapters::codec_for;
    use crate::bus::{EventFilter, OverflowPolicy};
    use crate::connection::{ConnectionSettings, ConnectionState};
    use crate::transport::memory::pair;
    use crate::transport::TransportError;

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(10),
        }
    }

    fn bus() -> Arc<EventBus> {
        Arc::new(EventBus::new(8, OverflowPolicy::DropOldest))
    }

    async fn wait_connected(adapter: &Adapter) {
        let mut status = adapter.watch_status();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if status.borrow_and_update().is_connected() {
                    break;
                }
                status.changed().await.expect("status channel should stay open");
            }
        })
        .await
        .expect("adapter should connect");
    }

    #[test]
    fn table_swap_replaces_snapshot_wholesale() {
        let router = MessageRouter::new(bus());
        assert_eq!(router.table().generation(), 0);
        assert!(router.table().is_empty());

        let before = router.table();
        router.install_table(RouteTable::new(7, HashMap::new()));

        assert_eq!(router.table().generation(), 7);
        // A reader holding the old snapshot keeps its consistent view.
        assert_eq!(before.generation(), 0);
    }

    #[tokio::test]
    async fn unknown_platform_fails_fast() {
        let router = MessageRouter::new(bus());
        let message = NormalizedMessage::outbound_text(Platform::Wecom, "zhangsan", "hi");
        let err = router
            .route_outbound(Platform::Wecom, &message)
            .await
            .err()
            .expect("should fail");
        assert_eq!(err, RouteError::UnknownPlatform(Platform::Wecom));
    }

    #[tokio::test]
    async fn inbound_messages_reach_bus_subscribers() {
        let bus = bus();
        let router = MessageRouter::new(Arc::clone(&bus));
        let mut sub = bus.subscribe(EventFilter::any());

        let message = Arc::new(NormalizedMessage::outbound_text(
            Platform::Feishu,
            "ou_1",
            "ping",
        ));
        router.route_inbound(Arc::clone(&message));

        let got = sub.recv().await.expect("should deliver");
        assert_eq!(got.id, message.id);
    }

    #[tokio::test]
    async fn routes_send_to_connected_adapter() {
        let router = Arc::new(MessageRouter::new(bus()));

        let (transport, controller) = pair();
        controller.set_ack(json!({ "code": 0, "data": { "message_id": "om_routed" } }));
        let adapter = Arc::new(Adapter::start(
            codec_for(Platform::Feishu),
            Box::new(transport),
            settings(),
            Arc::clone(&router) as Arc<dyn InboundSink>,
        ));
        wait_connected(&adapter).await;

        let mut adapters = HashMap::new();
        adapters.insert(Platform::Feishu, Arc::clone(&adapter));
        router.install_table(RouteTable::new(1, adapters));

        let message = NormalizedMessage::outbound_text(Platform::Feishu, "ou_peer", "hello");
        let receipt = router
            .route_outbound(Platform::Feishu, &message)
            .await
            .expect("should route");
        assert_eq!(receipt.platform, Platform::Feishu);
        assert_eq!(receipt.message_id, "om_routed");

        adapter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_adapter_is_unavailable() {
        let router = Arc::new(MessageRouter::new(bus()));

        let (transport, controller) = pair();
        for _ in 0..8 {
            controller.fail_next_connect(TransportError::Connect("refused".into()));
        }
        let adapter = Arc::new(Adapter::start(
            codec_for(Platform::Dingtalk),
            Box::new(transport),
            settings(),
            Arc::clone(&router) as Arc<dyn InboundSink>,
        ));

        let mut status = adapter.watch_status();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if status.borrow_and_update().state == ConnectionState::Backoff {
                    break;
                }
                status.changed().await.expect("status channel should stay open");
            }
        })
        .await
        .expect("adapter should reach backoff");

        let mut adapters = HashMap::new();
        adapters.insert(Platform::Dingtalk, Arc::clone(&adapter));
        router.install_table(RouteTable::new(1, adapters));

        let message = NormalizedMessage::outbound_text(Platform::Dingtalk, "staff_1", "hi");
        let err = router
            .route_outbound(Platform::Dingtalk, &message)
            .await
            .err()
            .expect("should fail");
        assert_eq!(err, RouteError::AdapterUnavailable(Platform::Dingtalk));

        adapter.shutdown().await;
    }
}
