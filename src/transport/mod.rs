//! Transport layer under each platform connection.
//!
//! A [`Transport`] knows how to establish one [`Session`] with a platform
//! gateway; a session moves already-decoded JSON frames in both directions.
//! Wire-level concerns (signatures, envelope encryption, SDK handshakes)
//! belong to the gateway side of this boundary, not to the core.
//!
//! Two implementations: [`http::HttpTransport`] long-polls a per-platform
//! HTTP gateway, and [`memory::MemoryTransport`] is a scriptable in-process
//! pair used by the test suite.

use async_trait::async_trait;

use crate::config::PlatformSection;
use crate::types::Platform;

pub mod http;
pub mod memory;

/// A platform frame: decoded JSON, meaning known only to the platform codec.
pub type RawFrame = serde_json::Value;

/// Errors crossing the transport boundary.
///
/// [`TransportError::Denied`] is the non-retriable credential class; every
/// other variant is treated as transient by the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Session could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The platform refused our credentials. Retrying cannot help until
    /// configuration changes.
    #[error("authorization rejected: {0}")]
    Denied(String),

    /// The platform refused this particular payload.
    #[error("payload rejected: {0}")]
    Rejected(String),

    /// An established session stopped working.
    #[error("session lost: {0}")]
    Lost(String),

    /// No acknowledgment within the configured window.
    #[error("timed out waiting for platform ack")]
    AckTimeout,

    /// Network-level failure from the HTTP client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TransportError {
    /// Whether this error means the credentials themselves are bad.
    pub fn is_credential(&self) -> bool {
        matches!(self, TransportError::Denied(_))
    }
}

/// One live session with a platform gateway.
///
/// Methods take `&self`: the owning connection task polls `next_frame` and
/// `send` concurrently in a `select!`. `next_frame` must be
/// cancellation-safe — a frame is either delivered to the caller or remains
/// with the gateway for redelivery, never silently consumed.
#[async_trait]
pub trait Session: Send + Sync {
    /// Waits for the next inbound frame.
    ///
    /// # Errors
    ///
    /// Any error means the session is no longer usable; the caller decides
    /// whether to reconnect.
    async fn next_frame(&self) -> Result<RawFrame, TransportError>;

    /// Sends an outbound frame and returns the platform's response frame
    /// (the acknowledgment).
    ///
    /// # Errors
    ///
    /// [`TransportError::Rejected`] when the platform refuses the payload;
    /// other variants for transport failure.
    async fn send(&self, frame: RawFrame) -> Result<RawFrame, TransportError>;

    /// Liveness probe.
    ///
    /// # Errors
    ///
    /// An error means the session should be treated as lost.
    async fn ping(&self) -> Result<(), TransportError>;

    /// Releases the session. Idempotent; further calls on the session
    /// return [`TransportError::Lost`].
    async fn close(&self);
}

/// Connection establishment for one platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes a fresh session.
    ///
    /// # Errors
    ///
    /// [`TransportError::Denied`] when the gateway rejects the configured
    /// credentials; other variants for transient failure.
    async fn connect(&self) -> Result<Box<dyn Session>, TransportError>;
}

/// Builds the transport for one platform from its config section.
///
/// The registry goes through this seam so tests can substitute
/// [`memory::MemoryTransport`] pairs for real gateways.
pub trait TransportFactory: Send + Sync {
    /// Creates a transport for `platform` configured per `section`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the section cannot yield a
    /// usable transport (e.g. unparseable gateway URL).
    fn create(
        &self,
        platform: Platform,
        section: &PlatformSection,
    ) -> Result<Box<dyn Transport>, TransportError>;
}
