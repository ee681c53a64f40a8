//! DingTalk codec: robot callback frames ⇄ normalized messages.
//!
//! Inbound frames are robot callback payloads (`msgId`, `conversationType`,
//! `senderStaffId`, ...). `conversationType` `"2"` is a group chat; direct
//! chats key on the sender's staff id so replies can address them. Outbound
//! text goes out as an interactive card; structured content is treated as a
//! prebuilt card body.

use serde_json::{json, Value};

use super::{NormalizeError, PlatformCodec};
use crate::transport::RawFrame;
use crate::types::{
    ConversationKind, Direction, MessageContent, NormalizedMessage, Platform,
};
use chrono::{DateTime, Utc};

/// Card template used for all outbound sends.
const CARD_TEMPLATE_ID: &str = "StandardCard";

/// Title shown on outbound cards.
const CARD_TITLE: &str = "Switchboard";

/// Stateless codec for DingTalk.
pub struct DingtalkCodec;

impl PlatformCodec for DingtalkCodec {
    fn platform(&self) -> Platform {
        Platform::Dingtalk
    }

    fn decode(&self, frame: &RawFrame) -> Result<Option<NormalizedMessage>, NormalizeError> {
        let message_id =
            string_field(frame, "msgId").ok_or(NormalizeError::MissingField("msgId"))?;
        let sender_id = string_field(frame, "senderStaffId")
            .or_else(|| string_field(frame, "senderId"))
            .ok_or(NormalizeError::MissingField("senderStaffId"))?;

        let kind = if is_group(frame) {
            ConversationKind::Group
        } else {
            ConversationKind::Direct
        };
        let conversation_id = match kind {
            ConversationKind::Group => string_field(frame, "conversationId")
                .ok_or(NormalizeError::MissingField("conversationId"))?,
            ConversationKind::Direct => sender_id.clone(),
        };

        let msg_type = string_field(frame, "msgtype").unwrap_or_default();
        let content = if msg_type == "text" {
            let text = frame
                .pointer("/text/content")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string();
            MessageContent::Text { text }
        } else {
            let kind = if msg_type.is_empty() {
                "unknown".to_string()
            } else {
                msg_type
            };
            MessageContent::Structured {
                kind,
                data: frame.clone(),
            }
        };

        Ok(Some(NormalizedMessage {
            id: message_id,
            platform: Platform::Dingtalk,
            direction: Direction::Inbound,
            conversation_id,
            conversation_kind: kind,
            sender_id,
            recipient_id: None,
            content,
            timestamp: callback_timestamp(frame),
            raw: frame.clone(),
        }))
    }

    fn encode(&self, message: &NormalizedMessage) -> Result<RawFrame, NormalizeError> {
        if message.conversation_id.is_empty() {
            return Err(NormalizeError::MissingField("conversation_id"));
        }

        let card_body = match &message.content {
            MessageContent::Text { text } => json!({
                "config": { "autoLayout": true, "enableForward": true },
                "header": { "title": { "type": "text", "text": CARD_TITLE } },
                "contents": [
                    { "type": "markdown", "text": text, "id": "markdown_1" }
                ]
            }),
            // Structured content is a prebuilt card body.
            MessageContent::Structured { data, .. } => data.clone(),
        };
        let card_data = serde_json::to_string(&card_body)
            .map_err(|e| NormalizeError::Malformed(e.to_string()))?;

        let mut frame = json!({
            "cardTemplateId": CARD_TEMPLATE_ID,
            "cardData": card_data,
            // Card ids derive from the message id so a retried send
            // reuses the same card instead of posting a duplicate.
            "cardBizId": format!("biz_{}", message.id),
        });

        match message.conversation_kind {
            ConversationKind::Group => {
                frame["openConversationId"] = Value::String(message.conversation_id.clone());
            }
            ConversationKind::Direct => {
                let to = message
                    .recipient_id
                    .clone()
                    .unwrap_or_else(|| message.conversation_id.clone());
                let receiver = serde_json::to_string(&json!({ "userId": to }))
                    .map_err(|e| NormalizeError::Malformed(e.to_string()))?;
                frame["singleChatReceiver"] = Value::String(receiver);
            }
        }

        Ok(frame)
    }

    fn ack_message_id(&self, ack: &RawFrame) -> Option<String> {
        ack.get("processQueryKey")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// `conversationType` is `"2"` for group chats; tolerate the numeric form.
fn is_group(frame: &Value) -> bool {
    match frame.get("conversationType") {
        Some(Value::String(s)) => s == "2",
        Some(Value::Number(n)) => n.as_i64() == Some(2),
        _ => false,
    }
}

/// `createAt` is in milliseconds.
fn callback_timestamp(frame: &Value) -> DateTime<Utc> {
    frame
        .get("createAt")
        .and_then(Value::as_i64)
        .filter(|v| *v > 0)
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

fn string_field(frame: &Value, key: &str) -> Option<String> {
    frame
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
