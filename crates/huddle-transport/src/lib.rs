//! # huddle-transport
//!
//! Transport layer for the Huddle chat hub.
//!
//! Every connection is handed to the hub as two halves:
//!
//! - **FrameReader** - decodes inbound frames, owned by the inbound pump
//! - **FrameWriter** - encodes outbound frames and closes the connection,
//!   owned by the outbound pump
//!
//! Implementations:
//!
//! - **WebSocket** - axum WebSocket, JSON text or MessagePack binary frames
//! - **Memory** - tokio channels, for tests and benchmarks
//!
//! ```rust,ignore
//! use huddle_transport::FrameReader;
//!
//! async fn drain(mut reader: impl FrameReader) {
//!     while let Ok(Some(frame)) = reader.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{FrameReader, FrameWriter, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketReader, WebSocketWriter};
