//! Hot configuration apply observed from the outside.

use std::sync::Arc;
use std::time::Duration;

use switchboard::adapters::SendError;
use switchboard::bus::OverflowPolicy;
use switchboard::registry::AdapterRegistry;
use switchboard::router::RouteError;
use switchboard::transport::memory::MemoryTransportFactory;
use switchboard::transport::TransportError;
use switchboard::types::{NormalizedMessage, Platform};

use crate::support;

#[tokio::test]
async fn in_flight_send_resolves_across_disable() {
    let (_bus, router) = support::harness(16, OverflowPolicy::DropOldest);
    let factory = MemoryTransportFactory::new();
    let feishu = factory.prepare(Platform::Feishu);
    let registry = AdapterRegistry::new(Arc::clone(&router), Box::new(factory));

    let mut config = support::enabled_config(&[Platform::Feishu]);
    config.send.ack_timeout_ms = 300;
    registry.apply(&config).await;
    support::wait_connected(&router, Platform::Feishu).await;

    // First send reaches the session and then hangs awaiting its ack.
    feishu.stall_next_send();
    let sender = Arc::clone(&router);
    let in_flight = tokio::spawn(async move {
        let message = NormalizedMessage::outbound_text(Platform::Feishu, "ou_peer", "going out");
        sender.route_outbound(Platform::Feishu, &message).await
    });
    support::wait_sent_count(&feishu, 1).await;

    // Disable the platform while the send is outstanding.
    registry.apply(&support::enabled_config(&[])).await;

    // The caller gets a definite outcome, not silence.
    let result = in_flight.await.expect("send task should finish");
    assert_eq!(result.err(), Some(RouteError::Send(SendError::Timeout)));

    // After the swap the platform is gone.
    let message = NormalizedMessage::outbound_text(Platform::Feishu, "ou_peer", "too late");
    let err = router
        .route_outbound(Platform::Feishu, &message)
        .await
        .err()
        .expect("should fail");
    assert_eq!(err, RouteError::UnknownPlatform(Platform::Feishu));
}

#[tokio::test]
async fn degraded_platform_does_not_block_others() {
    let (_bus, router) = support::harness(16, OverflowPolicy::DropOldest);
    let factory = MemoryTransportFactory::new();
    let feishu = factory.prepare(Platform::Feishu);
    let wecom = factory.prepare(Platform::Wecom);
    feishu.fail_next_connect(TransportError::Denied("app credentials revoked".into()));
    wecom.set_ack(serde_json::json!({ "errcode": 0, "msgid": "WM1" }));
    let registry = AdapterRegistry::new(Arc::clone(&router), Box::new(factory));

    registry
        .apply(&support::enabled_config(&[Platform::Feishu, Platform::Wecom]))
        .await;
    support::wait_connected(&router, Platform::Wecom).await;

    // The healthy platform keeps serving sends.
    let message = NormalizedMessage::outbound_text(Platform::Wecom, "zhangsan", "still up");
    let receipt = router
        .route_outbound(Platform::Wecom, &message)
        .await
        .expect("wecom send should work");
    assert_eq!(receipt.message_id, "WM1");

    // The parked platform fails fast and never retries its credentials.
    let message = NormalizedMessage::outbound_text(Platform::Feishu, "ou_peer", "hello?");
    let err = router
        .route_outbound(Platform::Feishu, &message)
        .await
        .err()
        .expect("feishu should be unavailable");
    assert_eq!(err, RouteError::AdapterUnavailable(Platform::Feishu));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(feishu.connect_count(), 1);

    registry.shutdown().await;
}
