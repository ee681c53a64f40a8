//! Inbound ordering through the adapter, router, and bus.

use std::sync::Arc;
use std::time::Duration;

use switchboard::bus::{EventFilter, OverflowPolicy};
use switchboard::registry::AdapterRegistry;
use switchboard::transport::memory::MemoryTransportFactory;
use switchboard::types::Platform;

use crate::support;

#[tokio::test]
async fn per_conversation_order_survives_the_full_path() {
    let (bus, router) = support::harness(64, OverflowPolicy::DropOldest);
    let factory = MemoryTransportFactory::new();
    let feishu = factory.prepare(Platform::Feishu);
    let registry = AdapterRegistry::new(Arc::clone(&router), Box::new(factory));
    let mut sub = bus.subscribe(EventFilter::any());

    registry
        .apply(&support::enabled_config(&[Platform::Feishu]))
        .await;
    support::wait_connected(&router, Platform::Feishu).await;

    // Interleave two conversations on one session.
    for i in 0..10 {
        assert!(feishu.push_frame(support::feishu_group_frame(
            &format!("om_a_{i}"),
            "oc_alpha",
            "ou_sender",
            &format!("alpha {i}"),
        )));
        assert!(feishu.push_frame(support::feishu_group_frame(
            &format!("om_b_{i}"),
            "oc_beta",
            "ou_sender",
            &format!("beta {i}"),
        )));
    }

    let mut alpha = Vec::new();
    let mut beta = Vec::new();
    for _ in 0..20 {
        let message = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("delivery should not stall")
            .expect("bus should stay open");
        let text = message.content.text().unwrap_or("").to_string();
        match message.conversation_id.as_str() {
            "oc_alpha" => alpha.push(text),
            "oc_beta" => beta.push(text),
            other => panic!("unexpected conversation {other}"),
        }
    }

    let want_alpha: Vec<String> = (0..10).map(|i| format!("alpha {i}")).collect();
    let want_beta: Vec<String> = (0..10).map(|i| format!("beta {i}")).collect();
    assert_eq!(alpha, want_alpha);
    assert_eq!(beta, want_beta);

    registry.shutdown().await;
}

#[tokio::test]
async fn conversation_filter_limits_delivery() {
    let (bus, router) = support::harness(64, OverflowPolicy::DropOldest);
    let factory = MemoryTransportFactory::new();
    let feishu = factory.prepare(Platform::Feishu);
    let registry = AdapterRegistry::new(Arc::clone(&router), Box::new(factory));

    let mut all = bus.subscribe(EventFilter::any());
    let mut filtered = bus.subscribe(EventFilter::conversation(Platform::Feishu, "oc_alpha"));

    registry
        .apply(&support::enabled_config(&[Platform::Feishu]))
        .await;
    support::wait_connected(&router, Platform::Feishu).await;

    for i in 0..2 {
        assert!(feishu.push_frame(support::feishu_group_frame(
            &format!("om_a_{i}"),
            "oc_alpha",
            "ou_sender",
            "keep",
        )));
        assert!(feishu.push_frame(support::feishu_group_frame(
            &format!("om_b_{i}"),
            "oc_beta",
            "ou_sender",
            "skip",
        )));
    }

    // Once the unfiltered subscriber saw all four, the pump is drained.
    for _ in 0..4 {
        tokio::time::timeout(Duration::from_secs(5), all.recv())
            .await
            .expect("delivery should not stall")
            .expect("bus should stay open");
    }

    let mut kept = Vec::new();
    while let Some(message) = filtered.try_recv() {
        kept.push(message.conversation_id.clone());
    }
    assert_eq!(kept, vec!["oc_alpha".to_string(), "oc_alpha".to_string()]);

    registry.shutdown().await;
}
