//! Upstream link protocol: the WebSocket envelope a Lattice broker speaks
//! when it polls a peer broker.
//!
//! Only the envelope is defined here — handshake semantics beyond
//! `link_hello`/`broker_welcome` (identity, stream negotiation) live with
//! the transport layer.

use serde::{Deserialize, Serialize};

/// Protocol revision carried in `link_hello`.
pub const PROTOCOL_VERSION: u32 = 1;

/// WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    /// Broker → upstream peer: initial handshake. `broker_name` is the
    /// name this broker wants on the peer's tree; `group` seeds the
    /// default permission group the peer grants the link.
    #[serde(rename = "link_hello")]
    LinkHello {
        protocol_version: u32,
        broker_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        group: Option<String>,
    },

    /// Upstream peer → broker: handshake accepted.
    #[serde(rename = "broker_welcome")]
    BrokerWelcome {
        session_id: String,
        version: String,
    },

    /// Bidirectional: heartbeat.
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },

    /// Bidirectional: heartbeat response.
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
}
