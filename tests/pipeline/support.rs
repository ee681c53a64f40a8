//! Shared helpers for pipeline tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use switchboard::bus::{EventBus, OverflowPolicy};
use switchboard::config::SwitchboardConfig;
use switchboard::router::MessageRouter;
use switchboard::transport::memory::MemoryController;
use switchboard::types::Platform;

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Bus and router wired the way the `start` subcommand does it.
pub fn harness(capacity: usize, policy: OverflowPolicy) -> (Arc<EventBus>, Arc<MessageRouter>) {
    let bus = Arc::new(EventBus::new(capacity, policy));
    let router = Arc::new(MessageRouter::new(Arc::clone(&bus)));
    (bus, router)
}

/// Config enabling the given platforms, with reconnect delays short enough
/// for tests.
pub fn enabled_config(platforms: &[Platform]) -> SwitchboardConfig {
    let mut config = SwitchboardConfig::default();
    config.reconnect.initial_delay_ms = 50;
    config.reconnect.max_delay_ms = 500;
    for platform in platforms {
        match platform {
            Platform::Feishu => {
                config.platforms.feishu.enabled = true;
                config.platforms.feishu.app_id = "cli_app".to_string();
                config.platforms.feishu.app_secret = "s1".to_string();
            }
            Platform::Wecom => {
                config.platforms.wecom.enabled = true;
                config.platforms.wecom.corp_id = "ww_corp".to_string();
                config.platforms.wecom.agent_id = "1000002".to_string();
                config.platforms.wecom.secret = "s2".to_string();
            }
            Platform::Dingtalk => {
                config.platforms.dingtalk.enabled = true;
                config.platforms.dingtalk.app_key = "ding_key".to_string();
                config.platforms.dingtalk.app_secret = "s3".to_string();
            }
            Platform::Qq => {
                config.platforms.qq.enabled = true;
                config.platforms.qq.app_id = "102034567".to_string();
                config.platforms.qq.token = "s4".to_string();
            }
        }
    }
    config
}

// ---------------------------------------------------------------------------
// Waiting
// ---------------------------------------------------------------------------

/// Waits until the routed adapter for `platform` reports connected.
pub async fn wait_connected(router: &MessageRouter, platform: Platform) {
    let table = router.table();
    let adapter = table.adapter(platform).expect("adapter should be routed");
    let mut status = adapter.watch_status();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if status.borrow_and_update().is_connected() {
                break;
            }
            status
                .changed()
                .await
                .expect("status channel should stay open");
        }
    })
    .await
    .expect("adapter should connect");
}

/// Waits until `controller` has captured `count` outbound frames.
pub async fn wait_sent_count(controller: &MemoryController, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while controller.sent_frames().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("outbound frame should reach the session");
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Feishu group-chat text event.
pub fn feishu_group_frame(message_id: &str, chat_id: &str, sender: &str, text: &str) -> Value {
    json!({
        "header": { "event_type": "im.message.receive_v1", "create_time": "1693565432000" },
        "event": {
            "sender": { "sender_id": { "open_id": sender } },
            "message": {
                "message_id": message_id,
                "chat_id": chat_id,
                "chat_type": "group",
                "message_type": "text",
                "content": serde_json::to_string(&json!({ "text": text }))
                    .expect("content should serialize"),
            }
        }
    })
}

/// Feishu direct-chat text event.
pub fn feishu_direct_frame(message_id: &str, sender: &str, text: &str) -> Value {
    json!({
        "header": { "event_type": "im.message.receive_v1", "create_time": "1693565432000" },
        "event": {
            "sender": { "sender_id": { "open_id": sender } },
            "message": {
                "message_id": message_id,
                "chat_id": "p2p_chat_1",
                "chat_type": "p2p",
                "message_type": "text",
                "content": serde_json::to_string(&json!({ "text": text }))
                    .expect("content should serialize"),
            }
        }
    })
}

/// Standard feishu send acknowledgment carrying `message_id`.
pub fn feishu_ack(message_id: &str) -> Value {
    json!({ "code": 0, "msg": "success", "data": { "message_id": message_id } })
}

/// QQ group @-message dispatch.
pub fn qq_group_frame(message_id: &str, group_openid: &str, sender: &str, text: &str) -> Value {
    json!({
        "op": 0,
        "s": 11,
        "t": "GROUP_AT_MESSAGE_CREATE",
        "d": {
            "id": message_id,
            "content": text,
            "timestamp": "2023-12-06T15:29:34+08:00",
            "group_openid": group_openid,
            "author": { "member_openid": sender }
        }
    })
}

/// QQ send acknowledgment carrying the platform-assigned id.
pub fn qq_ack(message_id: &str) -> Value {
    json!({ "id": message_id, "timestamp": "2023-12-06T15:29:40+08:00" })
}
