//! Core message model shared by every stage of the pipeline.
//!
//! A `NormalizedMessage` is the single internal representation of a chat
//! message or event, regardless of which platform produced or will receive
//! it. Instances are immutable once constructed and shared read-only
//! (`Arc`) between the router and all bus subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported chat platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Lark / Feishu.
    Feishu,
    /// WeCom (WeChat Work).
    Wecom,
    /// DingTalk.
    Dingtalk,
    /// QQ bot open platform.
    Qq,
}

impl Platform {
    /// Every supported platform, in registry iteration order.
    pub const ALL: [Platform; 4] = [
        Platform::Feishu,
        Platform::Wecom,
        Platform::Dingtalk,
        Platform::Qq,
    ];

    /// Stable lowercase identifier used in config sections and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Feishu => "feishu",
            Platform::Wecom => "wecom",
            Platform::Dingtalk => "dingtalk",
            Platform::Qq => "qq",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a message flows from a platform into the core or out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Produced by a platform, consumed by local subscribers.
    Inbound,
    /// Produced locally, delivered to a platform.
    Outbound,
}

/// Conversation shape, needed to address an outbound reply correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// One-to-one chat with a single user.
    Direct,
    /// Group chat.
    Group,
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    /// Plain text.
    Text {
        /// The text body.
        text: String,
    },
    /// Non-text platform content (cards, rich posts, membership events)
    /// carried as parsed JSON under a platform-reported kind.
    Structured {
        /// Platform-reported content kind (e.g. `"interactive"`, `"richText"`).
        kind: String,
        /// Parsed content payload.
        data: serde_json::Value,
    },
}

impl MessageContent {
    /// Text body if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text { text } => Some(text),
            MessageContent::Structured { .. } => None,
        }
    }

    /// Short name of the content variant, for logging.
    pub fn kind_name(&self) -> &str {
        match self {
            MessageContent::Text { .. } => "text",
            MessageContent::Structured { kind, .. } => kind,
        }
    }
}

/// Platform-agnostic representation of one chat message or event.
///
/// Immutable once constructed. `(platform, id)` is the global dedup key:
/// `id` is unique within its platform (platform-assigned for inbound,
/// locally generated for outbound).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Platform-scoped unique message id.
    pub id: String,
    /// Originating (inbound) or target (outbound) platform.
    pub platform: Platform,
    /// Flow direction.
    pub direction: Direction,
    /// Conversation this message belongs to.
    pub conversation_id: String,
    /// Direct or group conversation.
    pub conversation_kind: ConversationKind,
    /// Platform-scoped sender id. For outbound messages this is the local
    /// service identity and may be empty.
    pub sender_id: String,
    /// Target user for outbound direct messages.
    pub recipient_id: Option<String>,
    /// Message body.
    pub content: MessageContent,
    /// Platform event time (inbound) or construction time (outbound).
    pub timestamp: DateTime<Utc>,
    /// Original platform payload, untouched. `Null` for locally built
    /// outbound messages.
    pub raw: serde_json::Value,
}

impl NormalizedMessage {
    /// Builds an outbound text message to a direct conversation.
    pub fn outbound_text(
        platform: Platform,
        conversation_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        NormalizedMessage {
            id: Uuid::new_v4().to_string(),
            platform,
            direction: Direction::Outbound,
            conversation_id: conversation_id.into(),
            conversation_kind: ConversationKind::Direct,
            sender_id: String::new(),
            recipient_id: None,
            content: MessageContent::Text { text: text.into() },
            timestamp: Utc::now(),
            raw: serde_json::Value::Null,
        }
    }

    /// Global dedup key: platform plus platform-scoped id.
    pub fn dedup_key(&self) -> (Platform, &str) {
        (self.platform, &self.id)
    }

    /// First `max` characters of the text body, for log lines.
    pub fn text_preview(&self, max: usize) -> String {
        match self.content.text() {
            Some(text) => text.chars().take(max).collect(),
            None => format!("<{}>", self.content.kind_name()),
        }
    }
}

/// Acknowledgment for one delivered outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Platform that accepted the message.
    pub platform: Platform,
    /// Message id assigned by the platform, or the local id when the
    /// platform's ack carries none.
    pub message_id: String,
    /// When the acknowledgment arrived.
    pub acked_at: DateTime<Utc>,
}
