//! Realtime socket bridge.
//!
//! A named-event, acknowledged-request socket (Socket.IO style). The host
//! implementation owns reconnection: one logical socket survives transport
//! drops and reports each reconnect as a fresh [`SocketMessage::Connected`].

use crate::{error::Result, platform::{PlatformSend, PlatformSendSync}};
use serde_json::Value;

/// Messages delivered to socket subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketMessage {
    /// Transport connected (initially or after a reconnect).
    Connected,
    /// Transport dropped; the host may be reconnecting.
    Disconnected { reason: String },
    /// Server-pushed named event.
    Event { name: String, payload: Value },
}

/// Stream of socket messages for one subscriber.
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait SocketEventStream: PlatformSend {
    /// Next message, or `None` once the socket is shut down for good.
    async fn next(&mut self) -> Option<SocketMessage>;
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait RealtimeSocket: PlatformSendSync {
    /// Open the transport. Calling this while connected is a no-op.
    async fn connect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<()>;

    /// Fire-and-forget emit.
    async fn emit(&self, event: &str, payload: Value) -> Result<()>;

    /// Emit and wait for the server acknowledgement payload.
    async fn emit_with_ack(&self, event: &str, payload: Value) -> Result<Value>;

    /// Subscribe to connection lifecycle and server events.
    fn subscribe(&self) -> Box<dyn SocketEventStream>;
}
