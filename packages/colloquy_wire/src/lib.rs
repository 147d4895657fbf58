//! # Colloquy Wire Protocol
//!
//! Frame types for the colloquy chat protocol: one JSON object per
//! WebSocket text frame, discriminated by a `type` field.
//!
//! The client side of the protocol sends [`ClientFrame`]s and receives
//! [`ServerFrame`]s. Both enums are internally tagged so that the JSON
//! shape matches the backend exactly:
//!
//! ```text
//! {"type": "prompt", "prompt": "hi", "provider": "openai",
//!  "model": null, "conversation_id": "c1"}
//! ```
//!
//! This crate holds pure data types only; the connection and the state
//! machine live in the `colloquy` crate.

pub mod frames;
pub mod types;

pub use frames::{ClientFrame, ServerFrame, message_id_as_i64};
pub use types::{ConversationSummary, Feedback, Role, SnapshotMessage};
