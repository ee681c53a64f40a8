//! Feishu codec: IM event frames ⇄ normalized messages.
//!
//! Inbound frames are Feishu event envelopes (`header` + `event`). Only the
//! message events become [`NormalizedMessage`]s; membership and other
//! notification events decode to `None`. Outbound frames follow the message
//! create API: `receive_id_type` picks between a user `open_id` and a group
//! `chat_id`, and `content` is Feishu's JSON-in-a-string convention.

use serde_json::{json, Value};

use super::{NormalizeError, PlatformCodec};
use crate::transport::RawFrame;
use crate::types::{
    ConversationKind, Direction, MessageContent, NormalizedMessage, Platform,
};
use chrono::{DateTime, Utc};

/// Event types that carry a chat message.
const MESSAGE_EVENTS: [&str; 2] = ["im.message.receive_v1", "im.message.group_at_v1"];

/// Millisecond/second boundary for `create_time` values.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Stateless codec for Feishu.
pub struct FeishuCodec;

impl PlatformCodec for FeishuCodec {
    fn platform(&self) -> Platform {
        Platform::Feishu
    }

    fn decode(&self, frame: &RawFrame) -> Result<Option<NormalizedMessage>, NormalizeError> {
        let event_type = frame
            .pointer("/header/event_type")
            .and_then(Value::as_str)
            .unwrap_or("");
        if !MESSAGE_EVENTS.contains(&event_type) {
            return Ok(None);
        }

        let event = frame
            .get("event")
            .ok_or(NormalizeError::MissingField("event"))?;

        // The message object sits at event.message on the long connection,
        // or event.data.message when relayed from a webhook.
        let message = event
            .get("message")
            .or_else(|| event.pointer("/data/message"))
            .unwrap_or(event);

        let message_id = string_field(message, "message_id")
            .ok_or(NormalizeError::MissingField("message_id"))?;
        let chat_id = string_field(message, "chat_id").unwrap_or_default();
        let message_type = string_field(message, "message_type")
            .or_else(|| string_field(message, "msg_type"))
            .unwrap_or_default();

        let sender = event
            .get("sender")
            .or_else(|| event.pointer("/data/sender"));
        let sender_id = sender.map(sender_open_id).unwrap_or_default();

        let kind = conversation_kind(message, &chat_id);
        let conversation_id = match kind {
            ConversationKind::Group => chat_id,
            // Direct chats key on the peer so replies address the sender.
            ConversationKind::Direct => sender_id.clone(),
        };
        if conversation_id.is_empty() {
            return Err(NormalizeError::MissingField("chat_id"));
        }

        Ok(Some(NormalizedMessage {
            id: message_id,
            platform: Platform::Feishu,
            direction: Direction::Inbound,
            conversation_id,
            conversation_kind: kind,
            sender_id,
            recipient_id: None,
            content: parse_content(message, &message_type),
            timestamp: event_timestamp(message, frame),
            raw: frame.clone(),
        }))
    }

    fn encode(&self, message: &NormalizedMessage) -> Result<RawFrame, NormalizeError> {
        let (receive_id_type, receive_id) = match message.conversation_kind {
            ConversationKind::Group => ("chat_id", message.conversation_id.as_str()),
            ConversationKind::Direct => (
                "open_id",
                message
                    .recipient_id
                    .as_deref()
                    .unwrap_or(message.conversation_id.as_str()),
            ),
        };
        if receive_id.is_empty() {
            return Err(NormalizeError::MissingField("conversation_id"));
        }

        let (msg_type, body) = match &message.content {
            MessageContent::Text { text } => ("text".to_string(), json!({ "text": text })),
            MessageContent::Structured { kind, data } => (kind.clone(), data.clone()),
        };
        // Feishu wants `content` as a JSON-encoded string.
        let content = serde_json::to_string(&body)
            .map_err(|e| NormalizeError::Malformed(e.to_string()))?;

        Ok(json!({
            "receive_id_type": receive_id_type,
            "receive_id": receive_id,
            "msg_type": msg_type,
            "content": content,
        }))
    }

    fn ack_message_id(&self, ack: &RawFrame) -> Option<String> {
        ack.pointer("/data/message_id")
            .or_else(|| ack.get("message_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Sender ids appear as `sender.sender_id.open_id`, a bare `open_id`, or a
/// `user_id`, depending on the event's origin.
fn sender_open_id(sender: &Value) -> String {
    if let Some(id) = sender.pointer("/sender_id/open_id").and_then(Value::as_str) {
        if !id.is_empty() {
            return id.to_string();
        }
    }
    if let Some(id) = sender.get("open_id").and_then(Value::as_str) {
        if !id.is_empty() {
            return id.to_string();
        }
    }
    sender
        .get("user_id")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// `chat_type` when meaningful, else the id prefix: group chats start `oc_`.
fn conversation_kind(message: &Value, chat_id: &str) -> ConversationKind {
    match message.get("chat_type").and_then(Value::as_str) {
        Some("group") => ConversationKind::Group,
        Some("p2p") => ConversationKind::Direct,
        _ if chat_id.starts_with("oc_") => ConversationKind::Group,
        _ => ConversationKind::Direct,
    }
}

/// Message bodies come as a JSON string; unparseable bodies fall back to
/// `{"text": raw}`.
fn parse_content(message: &Value, message_type: &str) -> MessageContent {
    let data = match message.get("content") {
        Some(Value::String(s)) => {
            serde_json::from_str::<Value>(s).unwrap_or_else(|_| json!({ "text": s }))
        }
        Some(value) => value.clone(),
        None => json!({}),
    };
    if message_type == "text" {
        let text = data
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        MessageContent::Text { text }
    } else {
        let kind = if message_type.is_empty() {
            "unknown".to_string()
        } else {
            message_type.to_string()
        };
        MessageContent::Structured { kind, data }
    }
}

/// `create_time` from the message, falling back to the event header.
/// Current events stamp in milliseconds; second-scale values from older
/// relays are scaled up.
fn event_timestamp(message: &Value, frame: &Value) -> DateTime<Utc> {
    let raw = int_field(message, "create_time")
        .or_else(|| frame.pointer("/header/create_time").and_then(int_value));
    match raw {
        Some(v) if v >= MILLIS_THRESHOLD => {
            DateTime::from_timestamp_millis(v).unwrap_or_else(Utc::now)
        }
        Some(v) if v > 0 => DateTime::from_timestamp(v, 0).unwrap_or_else(Utc::now),
        _ => Utc::now(),
    }
}

fn int_field(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(int_value)
}

fn int_value(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
