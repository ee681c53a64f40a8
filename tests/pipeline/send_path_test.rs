//! Outbound sends and the inbound/outbound address round trip.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use switchboard::adapters::SendError;
use switchboard::bus::{EventFilter, OverflowPolicy};
use switchboard::registry::AdapterRegistry;
use switchboard::router::RouteError;
use switchboard::transport::memory::MemoryTransportFactory;
use switchboard::transport::TransportError;
use switchboard::types::{NormalizedMessage, Platform};

use crate::support;

#[tokio::test]
async fn outbound_send_returns_platform_receipt() {
    let (_bus, router) = support::harness(16, OverflowPolicy::DropOldest);
    let factory = MemoryTransportFactory::new();
    let feishu = factory.prepare(Platform::Feishu);
    feishu.set_ack(support::feishu_ack("om_confirmed"));
    let registry = AdapterRegistry::new(Arc::clone(&router), Box::new(factory));

    registry
        .apply(&support::enabled_config(&[Platform::Feishu]))
        .await;
    support::wait_connected(&router, Platform::Feishu).await;

    let message = NormalizedMessage::outbound_text(Platform::Feishu, "ou_peer", "你好");
    let receipt = router
        .route_outbound(Platform::Feishu, &message)
        .await
        .expect("send should succeed");
    assert_eq!(receipt.platform, Platform::Feishu);
    assert_eq!(receipt.message_id, "om_confirmed");

    // The frame on the wire is the platform's send format.
    let sent = feishu.sent_frames();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].get("receive_id_type").and_then(Value::as_str),
        Some("open_id")
    );
    assert_eq!(
        sent[0].get("receive_id").and_then(Value::as_str),
        Some("ou_peer")
    );

    registry.shutdown().await;
}

#[tokio::test]
async fn platform_rejection_reaches_caller_and_keeps_session() {
    let (_bus, router) = support::harness(16, OverflowPolicy::DropOldest);
    let factory = MemoryTransportFactory::new();
    let feishu = factory.prepare(Platform::Feishu);
    feishu.push_send_result(Err(TransportError::Rejected("invalid recipient".into())));
    feishu.set_ack(support::feishu_ack("om_second"));
    let registry = AdapterRegistry::new(Arc::clone(&router), Box::new(factory));

    registry
        .apply(&support::enabled_config(&[Platform::Feishu]))
        .await;
    support::wait_connected(&router, Platform::Feishu).await;

    let message = NormalizedMessage::outbound_text(Platform::Feishu, "ou_missing", "nope");
    let err = router
        .route_outbound(Platform::Feishu, &message)
        .await
        .err()
        .expect("first send should be rejected");
    assert!(matches!(err, RouteError::Send(SendError::Rejected(_))));

    // Rejection is per-payload; the session still carries the next send.
    let message = NormalizedMessage::outbound_text(Platform::Feishu, "ou_peer", "better");
    let receipt = router
        .route_outbound(Platform::Feishu, &message)
        .await
        .expect("second send should succeed");
    assert_eq!(receipt.message_id, "om_second");

    registry.shutdown().await;
}

#[tokio::test]
async fn reply_addresses_the_original_sender() {
    let (bus, router) = support::harness(16, OverflowPolicy::DropOldest);
    let factory = MemoryTransportFactory::new();
    let feishu = factory.prepare(Platform::Feishu);
    feishu.set_ack(support::feishu_ack("om_reply"));
    let registry = AdapterRegistry::new(Arc::clone(&router), Box::new(factory));
    let mut sub = bus.subscribe(EventFilter::any());

    registry
        .apply(&support::enabled_config(&[Platform::Feishu]))
        .await;
    support::wait_connected(&router, Platform::Feishu).await;

    assert!(feishu.push_frame(support::feishu_direct_frame(
        "om_inbound",
        "ou_visitor",
        "有人在吗"
    )));
    let inbound = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("delivery should not stall")
        .expect("bus should stay open");
    assert_eq!(inbound.conversation_id, "ou_visitor");

    // Reply into the conversation the inbound message established.
    let reply = NormalizedMessage::outbound_text(
        inbound.platform,
        inbound.conversation_id.clone(),
        "在的",
    );
    router
        .route_outbound(inbound.platform, &reply)
        .await
        .expect("reply should send");

    let sent = feishu.sent_frames();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].get("receive_id").and_then(Value::as_str),
        Some("ou_visitor")
    );
    assert_eq!(
        sent[0].get("receive_id_type").and_then(Value::as_str),
        Some("open_id")
    );

    registry.shutdown().await;
}

#[tokio::test]
async fn qq_reply_threads_onto_the_inbound_message() {
    let (bus, router) = support::harness(16, OverflowPolicy::DropOldest);
    let factory = MemoryTransportFactory::new();
    let qq = factory.prepare(Platform::Qq);
    qq.set_ack(support::qq_ack("ROBOT1.0_sent!!"));
    let registry = AdapterRegistry::new(Arc::clone(&router), Box::new(factory));
    let mut sub = bus.subscribe(EventFilter::any());

    registry
        .apply(&support::enabled_config(&[Platform::Qq]))
        .await;
    support::wait_connected(&router, Platform::Qq).await;

    assert!(qq.push_frame(support::qq_group_frame(
        "ROBOT1.0_inbound!!",
        "67E3A0BB2F19C83D54A6E2B91C07D8E2",
        "87E2F1D54C1A9F6E11FB2B5C3A08D4F1",
        " 值班表发一下"
    )));
    let inbound = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("delivery should not stall")
        .expect("bus should stay open");
    assert_eq!(inbound.platform, Platform::Qq);
    assert_eq!(inbound.conversation_id, "67E3A0BB2F19C83D54A6E2B91C07D8E2");

    let mut reply = NormalizedMessage::outbound_text(
        inbound.platform,
        inbound.conversation_id.clone(),
        "值班表在置顶",
    );
    reply.conversation_kind = inbound.conversation_kind;
    let receipt = router
        .route_outbound(inbound.platform, &reply)
        .await
        .expect("reply should send");
    assert_eq!(receipt.message_id, "ROBOT1.0_sent!!");

    // The wire frame addresses the group and threads onto the inbound id,
    // so the platform takes the send as a passive reply.
    let sent = qq.sent_frames();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].get("group_openid").and_then(Value::as_str),
        Some("67E3A0BB2F19C83D54A6E2B91C07D8E2")
    );
    assert_eq!(
        sent[0].get("msg_id").and_then(Value::as_str),
        Some("ROBOT1.0_inbound!!")
    );

    registry.shutdown().await;
}
