//! # huddle-protocol
//!
//! Wire protocol definitions for the Huddle chat hub.
//!
//! Every chat line is a single [`WireMessage`] frame carrying
//! `name`, `message`, `when` and `avatarURL`. Frames travel either as JSON
//! text or as length-prefixed MessagePack binary.
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, WireMessage};
//!
//! let frame = WireMessage::new("Hello, world!");
//!
//! let text = codec::encode_json(&frame).unwrap();
//! let decoded = codec::decode_json(&text).unwrap();
//! assert_eq!(decoded.message, "Hello, world!");
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, decode_json, encode, encode_json, ProtocolError, WireFormat};
pub use frames::WireMessage;
