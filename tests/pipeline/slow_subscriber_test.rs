//! Slow-subscriber isolation through the live inbound path.

use std::sync::Arc;
use std::time::Duration;

use switchboard::bus::{EventFilter, OverflowPolicy};
use switchboard::registry::AdapterRegistry;
use switchboard::transport::memory::MemoryTransportFactory;
use switchboard::types::Platform;

use crate::support;

const TOTAL: usize = 200;
const SLOW_CAPACITY: usize = 8;

#[tokio::test]
async fn stalled_subscriber_never_delays_a_draining_one() {
    let (bus, router) = support::harness(64, OverflowPolicy::DropOldest);
    let factory = MemoryTransportFactory::new();
    let feishu = factory.prepare(Platform::Feishu);
    let registry = AdapterRegistry::new(Arc::clone(&router), Box::new(factory));

    let mut fast = bus.subscribe_with(
        "fast",
        EventFilter::any(),
        512,
        OverflowPolicy::DropOldest,
    );
    // Never drained until the end.
    let slow = bus.subscribe_with(
        "slow",
        EventFilter::any(),
        SLOW_CAPACITY,
        OverflowPolicy::DropOldest,
    );

    registry
        .apply(&support::enabled_config(&[Platform::Feishu]))
        .await;
    support::wait_connected(&router, Platform::Feishu).await;

    for i in 0..TOTAL {
        assert!(feishu.push_frame(support::feishu_group_frame(
            &format!("om_{i}"),
            "oc_room",
            "ou_sender",
            &format!("n{i}"),
        )));
    }

    // The fast subscriber sees every message, in order, while the slow one
    // sits full the whole time.
    for i in 0..TOTAL {
        let message = tokio::time::timeout(Duration::from_secs(10), fast.recv())
            .await
            .expect("fast delivery should not stall")
            .expect("bus should stay open");
        assert_eq!(message.content.text(), Some(format!("n{i}").as_str()));
    }

    assert!(slow.pending_count() <= SLOW_CAPACITY);
    let dropped = slow.dropped_count();
    let floor = u64::try_from(TOTAL.saturating_sub(SLOW_CAPACITY)).expect("fits in u64");
    assert!(
        dropped >= floor,
        "slow subscriber should have shed overflow, dropped {dropped}"
    );

    registry.shutdown().await;
}
