//! WeCom codec: callback frames ⇄ normalized messages.
//!
//! Inbound frames use the callback field names (`MsgId`, `FromUserName`,
//! `CreateTime`, ...) after the transport has unwrapped the envelope into
//! JSON. A `ChatId` marks a group chat; without one the message is a direct
//! chat keyed on the sender. Outbound frames follow the message-send API
//! where the payload sits under a key matching `msgtype`.

use serde_json::{json, Map, Value};

use super::{NormalizeError, PlatformCodec};
use crate::transport::RawFrame;
use crate::types::{
    ConversationKind, Direction, MessageContent, NormalizedMessage, Platform,
};
use chrono::{DateTime, Utc};

/// Stateless codec for WeCom.
pub struct WecomCodec;

impl PlatformCodec for WecomCodec {
    fn platform(&self) -> Platform {
        Platform::Wecom
    }

    fn decode(&self, frame: &RawFrame) -> Result<Option<NormalizedMessage>, NormalizeError> {
        let msg_type = string_field(frame, "MsgType").unwrap_or_default();
        // Subscription and menu events carry no chat message.
        if msg_type.is_empty() || msg_type == "event" {
            return Ok(None);
        }

        let message_id =
            id_field(frame, "MsgId").ok_or(NormalizeError::MissingField("MsgId"))?;
        let sender_id = string_field(frame, "FromUserName")
            .ok_or(NormalizeError::MissingField("FromUserName"))?;

        let chat_id = string_field(frame, "ChatId");
        let (kind, conversation_id) = match chat_id {
            Some(chat) => (ConversationKind::Group, chat),
            None => (ConversationKind::Direct, sender_id.clone()),
        };

        let content = if msg_type == "text" {
            let text = string_field(frame, "Content")
                .ok_or(NormalizeError::MissingField("Content"))?;
            MessageContent::Text { text }
        } else {
            MessageContent::Structured {
                kind: msg_type,
                data: frame.clone(),
            }
        };

        Ok(Some(NormalizedMessage {
            id: message_id,
            platform: Platform::Wecom,
            direction: Direction::Inbound,
            conversation_id,
            conversation_kind: kind,
            sender_id,
            recipient_id: string_field(frame, "ToUserName"),
            content,
            timestamp: callback_timestamp(frame),
            raw: frame.clone(),
        }))
    }

    fn encode(&self, message: &NormalizedMessage) -> Result<RawFrame, NormalizeError> {
        if message.conversation_id.is_empty() {
            return Err(NormalizeError::MissingField("conversation_id"));
        }

        let mut frame = Map::new();
        match message.conversation_kind {
            ConversationKind::Group => {
                frame.insert("chatid".into(), Value::String(message.conversation_id.clone()));
            }
            ConversationKind::Direct => {
                let to = message
                    .recipient_id
                    .clone()
                    .unwrap_or_else(|| message.conversation_id.clone());
                frame.insert("touser".into(), Value::String(to));
            }
        }

        match &message.content {
            MessageContent::Text { text } => {
                frame.insert("msgtype".into(), Value::String("text".into()));
                frame.insert("text".into(), json!({ "content": text }));
            }
            MessageContent::Structured { kind, data } => {
                frame.insert("msgtype".into(), Value::String(kind.clone()));
                frame.insert(kind.clone(), data.clone());
            }
        }

        Ok(Value::Object(frame))
    }

    fn ack_message_id(&self, ack: &RawFrame) -> Option<String> {
        ack.get("msgid").and_then(|id| match id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }
}

/// `CreateTime` arrives in seconds, as a number or a string.
fn callback_timestamp(frame: &Value) -> DateTime<Utc> {
    let secs = match frame.get("CreateTime") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };
    secs.filter(|v| *v > 0)
        .and_then(|v| DateTime::from_timestamp(v, 0))
        .unwrap_or_else(Utc::now)
}

/// Callback ids come as numbers or strings; both surface as a string.
fn id_field(frame: &Value, key: &str) -> Option<String> {
    match frame.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_field(frame: &Value, key: &str) -> Option<String> {
    frame
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
