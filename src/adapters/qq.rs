//! QQ codec: bot gateway dispatch frames ⇄ normalized messages.
//!
//! Inbound frames are gateway envelopes (`op`, `s`, `t`, `d`); only op-0
//! dispatches of the message events become [`NormalizedMessage`]s, and
//! control frames (hello, heartbeat ack) decode to `None`. Private chats,
//! group @-mentions, and guild-channel @-mentions all flow through here;
//! guild channels normalize as group conversations but keep their channel
//! addressing through the reply cache. Outbound sends are plain text and
//! thread onto the conversation's last inbound message id, which the
//! platform treats as a passive reply.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde_json::{json, Value};

use super::{NormalizeError, PlatformCodec};
use crate::transport::RawFrame;
use crate::types::{
    ConversationKind, Direction, MessageContent, NormalizedMessage, Platform,
};
use chrono::{DateTime, Utc};

/// Gateway opcode for event dispatches.
const OP_DISPATCH: i64 = 0;

/// Which send API a conversation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatScope {
    C2c,
    Group,
    Guild,
}

/// Last inbound message of a conversation, kept for reply threading.
#[derive(Clone)]
struct ReplyRef {
    scope: ChatScope,
    message_id: String,
}

/// Codec for QQ.
///
/// Carries one piece of state: the last inbound message id per
/// conversation, so outbound sends go out as passive replies instead of
/// rate-limited unprompted pushes.
#[derive(Default)]
pub struct QqCodec {
    replies: Mutex<HashMap<String, ReplyRef>>,
}

impl QqCodec {
    /// Codec with an empty reply cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn remember(&self, conversation_id: &str, scope: ChatScope, message_id: &str) {
        let mut replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        replies.insert(
            conversation_id.to_string(),
            ReplyRef {
                scope,
                message_id: message_id.to_string(),
            },
        );
    }

    fn last_reply(&self, conversation_id: &str) -> Option<ReplyRef> {
        let replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        replies.get(conversation_id).cloned()
    }
}

impl PlatformCodec for QqCodec {
    fn platform(&self) -> Platform {
        Platform::Qq
    }

    fn decode(&self, frame: &RawFrame) -> Result<Option<NormalizedMessage>, NormalizeError> {
        if let Some(op) = frame.get("op").and_then(Value::as_i64) {
            if op != OP_DISPATCH {
                return Ok(None);
            }
        }
        let scope = match frame.get("t").and_then(Value::as_str) {
            Some("C2C_MESSAGE_CREATE") => ChatScope::C2c,
            Some("GROUP_AT_MESSAGE_CREATE") => ChatScope::Group,
            Some("AT_MESSAGE_CREATE") => ChatScope::Guild,
            _ => return Ok(None),
        };

        let payload = frame.get("d").ok_or(NormalizeError::MissingField("d"))?;
        let message_id =
            string_field(payload, "id").ok_or(NormalizeError::MissingField("id"))?;
        let sender_id = author_id(payload);

        let (conversation_id, kind) = match scope {
            ChatScope::Group => (
                string_field(payload, "group_openid")
                    .ok_or(NormalizeError::MissingField("group_openid"))?,
                ConversationKind::Group,
            ),
            ChatScope::Guild => (
                string_field(payload, "channel_id")
                    .ok_or(NormalizeError::MissingField("channel_id"))?,
                ConversationKind::Group,
            ),
            ChatScope::C2c => {
                // Direct chats key on the peer so replies address the sender.
                if sender_id.is_empty() {
                    return Err(NormalizeError::MissingField("author"));
                }
                (sender_id.clone(), ConversationKind::Direct)
            }
        };

        self.remember(&conversation_id, scope, &message_id);

        // @-mention stripping leaves the text otherwise verbatim, leading
        // whitespace included.
        let text = payload
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        Ok(Some(NormalizedMessage {
            id: message_id,
            platform: Platform::Qq,
            direction: Direction::Inbound,
            conversation_id,
            conversation_kind: kind,
            sender_id,
            recipient_id: None,
            content: MessageContent::Text { text },
            timestamp: event_timestamp(payload),
            raw: frame.clone(),
        }))
    }

    fn encode(&self, message: &NormalizedMessage) -> Result<RawFrame, NormalizeError> {
        let text = message
            .content
            .text()
            .ok_or(NormalizeError::MissingField("text"))?;
        if message.conversation_id.is_empty() {
            return Err(NormalizeError::MissingField("conversation_id"));
        }

        let reply = self.last_reply(&message.conversation_id);
        let scope = reply
            .as_ref()
            .map(|r| r.scope)
            .unwrap_or(match message.conversation_kind {
                ConversationKind::Group => ChatScope::Group,
                ConversationKind::Direct => ChatScope::C2c,
            });
        // "0" marks a send with no inbound message to thread onto.
        let reply_id = reply
            .map(|r| r.message_id)
            .unwrap_or_else(|| "0".to_string());

        Ok(match scope {
            ChatScope::C2c => {
                let to = message
                    .recipient_id
                    .as_deref()
                    .unwrap_or(message.conversation_id.as_str());
                json!({
                    "openid": to,
                    "msg_type": 0,
                    "msg_id": reply_id,
                    "content": text,
                })
            }
            ChatScope::Group => json!({
                "group_openid": message.conversation_id,
                "msg_type": 0,
                "msg_id": reply_id,
                "content": text,
            }),
            // Channel sends carry no reply reference.
            ChatScope::Guild => json!({
                "channel_id": message.conversation_id,
                "content": text,
            }),
        })
    }

    fn ack_message_id(&self, ack: &RawFrame) -> Option<String> {
        string_field(ack, "id").or_else(|| string_field(ack, "msg_id"))
    }
}

/// Author ids appear as `author.id`, a `user_openid`, or a `member_openid`,
/// depending on the event; some relays flatten it to a bare `author_id`.
fn author_id(payload: &Value) -> String {
    if let Some(author) = payload.get("author") {
        for key in ["id", "user_openid", "member_openid"] {
            if let Some(id) = string_field(author, key) {
                return id;
            }
        }
    }
    string_field(payload, "author_id").unwrap_or_default()
}

/// `timestamp` is RFC 3339 on guild and private events, epoch seconds on
/// some group relays, and absent on others; those stamp at receipt.
fn event_timestamp(payload: &Value) -> DateTime<Utc> {
    match payload.get("timestamp") {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<i64>().ok().and_then(|v| DateTime::from_timestamp(v, 0)))
            .unwrap_or_else(Utc::now),
        Some(Value::Number(n)) => n
            .as_i64()
            .filter(|v| *v > 0)
            .and_then(|v| DateTime::from_timestamp(v, 0))
            .unwrap_or_else(Utc::now),
        _ => Utc::now(),
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
