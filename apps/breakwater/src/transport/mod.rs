//! Host glue: the seam between a session and whatever carries its bytes.
//!
//! The proxy core never owns a socket directly; it consumes [`FlowEvent`]s
//! and injects bytes through a [`ProxyFlow`]. The WebSocket relay is the
//! production implementation; tests use the in-memory mock.

use anyhow::Result;
use async_trait::async_trait;

pub mod mock;
pub mod websocket;

/// One unit of traffic delivered into a session by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    ClientBytes(Vec<u8>),
    ServerBytes(Vec<u8>),
    Closed,
}

/// Injection paths toward either peer of an intercepted session.
#[async_trait]
pub trait ProxyFlow: Send + Sync {
    async fn send_to_server(&self, bytes: &[u8]) -> Result<()>;
    async fn send_to_client(&self, bytes: &[u8]) -> Result<()>;
}
