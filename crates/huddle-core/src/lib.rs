//! # huddle-core
//!
//! The broadcast hub behind the Huddle chat server.
//!
//! This crate provides the building blocks:
//!
//! - **Hub** - single task owning the membership set and doing fan-out
//! - **Member** - a participant's identity and bounded outbound queue
//! - **Pump** - the inbound and outbound tasks serving one connection
//! - **Admission** - session artifact to display identity
//! - **Avatar** - ordered avatar URL resolvers
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐ join  ┌─────────────┐ enqueue ┌─────────────┐
//! │ Admission  │──────▶│     Hub     │────────▶│   Outbox    │
//! └────────────┘       └─────────────┘         └─────────────┘
//!                        ▲                            │
//!                        │ broadcast / leave          ▼
//!                  ┌─────────────┐             ┌─────────────┐
//!                  │ Inbound pump│             │Outbound pump│
//!                  └─────────────┘             └─────────────┘
//! ```

pub mod admission;
pub mod avatar;
pub mod hub;
pub mod member;
pub mod message;
pub mod pump;

pub use admission::{Admission, AdmissionError, CookieSession, SessionVerifier, UserProfile};
pub use avatar::{Avatar, AvatarChain, AvatarError, AuthAvatar, FileSystemAvatar, GravatarAvatar};
pub use hub::{Hub, HubConfig, HubError, HubHandle, HubStats, SlowMemberPolicy};
pub use member::{DisplayIdentity, EnqueueError, Member, MemberId, Outbox, Removal, RemovalWatch};
pub use message::Message;
pub use pump::{admit, Disconnect, PumpConfig, PumpHandle};
