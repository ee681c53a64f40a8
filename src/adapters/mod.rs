//! Platform adapters: one codec per platform behind a shared shell.
//!
//! An [`Adapter`] owns exactly one connection task and one inbound pump.
//! The pump decodes raw gateway frames through the platform's
//! [`PlatformCodec`] and pushes every normalized message into an
//! [`InboundSink`]; outbound messages take the reverse path through
//! [`Adapter::send`], which blocks until the platform acknowledges.
//!
//! Codecs are synchronous, in-process translation; the only state one may
//! carry is per-conversation reply threading. Everything that can fail
//! over time (sessions, retries, acks) lives in the connection layer.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connection::{self, ConnectionHandle, ConnectionSettings, ConnectionStatus};
use crate::transport::{RawFrame, Transport};
use crate::types::{DeliveryReceipt, NormalizedMessage, Platform};

pub mod dingtalk;
pub mod feishu;
pub mod qq;
pub mod wecom;

pub use crate::connection::SendError;

/// Errors translating between platform frames and the normalized model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// A message frame arrived without a field the model requires.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// The frame shape is not usable at all.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Translates between one platform's wire frames and the normalized model.
pub trait PlatformCodec: Send + Sync {
    /// Platform this codec speaks.
    fn platform(&self) -> Platform;

    /// Decode one inbound frame.
    ///
    /// `Ok(None)` means a recognized event that carries no chat message
    /// (membership changes, probes); such frames are dropped with a
    /// diagnostic and never reach the bus.
    ///
    /// # Errors
    ///
    /// [`NormalizeError`] when the frame claims to be a message but lacks
    /// required fields.
    fn decode(&self, frame: &RawFrame) -> Result<Option<NormalizedMessage>, NormalizeError>;

    /// Encode an outbound message into the platform's send format.
    ///
    /// # Errors
    ///
    /// [`NormalizeError`] when the message lacks addressing or content the
    /// platform requires.
    fn encode(&self, message: &NormalizedMessage) -> Result<RawFrame, NormalizeError>;

    /// Platform-assigned message id from a send acknowledgment, if present.
    fn ack_message_id(&self, ack: &RawFrame) -> Option<String>;
}

/// Receives normalized inbound messages from adapter pumps.
///
/// The router implements this; tests substitute their own collector.
/// `deliver` must not block — it runs on the adapter's pump task.
pub trait InboundSink: Send + Sync {
    /// Accepts one normalized inbound message.
    fn deliver(&self, message: Arc<NormalizedMessage>);
}

/// Codec for `platform`, selected by identifier.
pub fn codec_for(platform: Platform) -> Arc<dyn PlatformCodec> {
    match platform {
        Platform::Feishu => Arc::new(feishu::FeishuCodec),
        Platform::Wecom => Arc::new(wecom::WecomCodec),
        Platform::Dingtalk => Arc::new(dingtalk::DingtalkCodec),
        Platform::Qq => Arc::new(qq::QqCodec::new()),
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// One platform's running adapter: codec + connection + inbound pump.
///
/// Independently restartable — tearing one down never touches the others.
pub struct Adapter {
    platform: Platform,
    codec: Arc<dyn PlatformCodec>,
    connection: ConnectionHandle,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Adapter {
    /// Start an adapter: spawns the connection task and the inbound pump.
    ///
    /// Returns immediately; the connection establishes (and re-establishes)
    /// itself in the background.
    pub fn start(
        codec: Arc<dyn PlatformCodec>,
        transport: Box<dyn Transport>,
        settings: ConnectionSettings,
        sink: Arc<dyn InboundSink>,
    ) -> Self {
        let platform = codec.platform();
        let (connection, frames) = connection::spawn(platform, transport, settings);
        let pump = tokio::spawn(pump_inbound(platform, Arc::clone(&codec), frames, sink));
        Self {
            platform,
            codec,
            connection,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// Platform this adapter serves.
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Latest connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Watch stream of connection status transitions.
    pub fn watch_status(&self) -> tokio::sync::watch::Receiver<ConnectionStatus> {
        self.connection.watch_status()
    }

    /// Encode and deliver one outbound message, waiting for the platform
    /// acknowledgment.
    ///
    /// # Errors
    ///
    /// [`SendError::NotConnected`] when no live session exists (the message
    /// is not queued), [`SendError::Rejected`] when the platform or the
    /// codec refuses the payload, [`SendError::Timeout`] when no ack
    /// arrives in time.
    pub async fn send(&self, message: &NormalizedMessage) -> Result<DeliveryReceipt, SendError> {
        let frame = self
            .codec
            .encode(message)
            .map_err(|e| SendError::Rejected(e.to_string()))?;
        let ack = self.connection.send_frame(frame).await?;
        let message_id = self
            .codec
            .ack_message_id(&ack)
            .unwrap_or_else(|| message.id.clone());
        debug!(
            platform = %self.platform,
            message_id = %message_id,
            "outbound message acknowledged"
        );
        Ok(DeliveryReceipt {
            platform: self.platform,
            message_id,
            acked_at: Utc::now(),
        })
    }

    /// Stop the connection and drain the pump. Blocks until the session is
    /// closed and the last buffered frames are processed.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
        let pump = match self.pump.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                warn!(platform = %self.platform, error = %e, "inbound pump ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("platform", &self.platform)
            .field("status", &self.status())
            .finish()
    }
}

/// Decodes frames off the connection and feeds the sink until the frame
/// channel closes.
async fn pump_inbound(
    platform: Platform,
    codec: Arc<dyn PlatformCodec>,
    mut frames: mpsc::Receiver<RawFrame>,
    sink: Arc<dyn InboundSink>,
) {
    while let Some(frame) = frames.recv().await {
        match codec.decode(&frame) {
            Ok(Some(message)) => {
                debug!(
                    platform = %platform,
                    conversation = %message.conversation_id,
                    kind = message.content.kind_name(),
                    "inbound message normalized"
                );
                sink.deliver(Arc::new(message));
            }
            Ok(None) => {
                debug!(platform = %platform, "ignored platform event carrying no message");
            }
            Err(e) => {
                warn!(platform = %platform, error = %e, "dropped malformed inbound frame");
            }
        }
    }
    debug!(platform = %platform, "inbound pump stopped");
}
