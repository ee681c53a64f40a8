//! Switchboard — a routing and adapter core for enterprise chat platforms.
//!
//! One process speaks to feishu, wecom, dingtalk, and qq through per-platform
//! adapters, normalizes everything into a single message shape, and fans
//! inbound events out to local subscribers. Outbound sends are dispatched by
//! platform id and acknowledged end to end.
//!
//! See `DESIGN.md` for full architecture documentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod transport;

pub mod adapters;
pub mod connection;

pub mod bus;
pub mod registry;
pub mod router;
