//! Market Data Hub Adapter
//!
//! WebSocket transport speaking the JSON hub protocol.
//!
//! - `messages`: wire frame types and target names
//! - `codec`: frame encoding/decoding and mapping to [`HubEvent`](crate::application::ports::HubEvent)
//! - `keepalive`: ping scheduling and server-silence detection
//! - `websocket`: [`StreamTransport`](crate::application::ports::StreamTransport) implementation

pub mod codec;
pub mod keepalive;
pub mod messages;
pub mod websocket;

pub use codec::{CodecError, HubCodec};
pub use keepalive::{KeepAliveConfig, KeepAliveSignal, LinkActivity};
pub use websocket::{HubConnectionConfig, LinkError, WebSocketTransport};
