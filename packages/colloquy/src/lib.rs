//! Client engine for a conversational backend spoken over one WebSocket.
//!
//! The crate splits into a pure protocol state machine ([`session`]) and
//! a tokio actor that binds it to a live socket ([`client`]). Wire frame
//! definitions live in the `colloquy_wire` crate.

pub mod client;
pub mod config;
pub mod metrics;
pub mod session;

pub use client::{ChatClient, ClientError, ClientEvent, ClientHandle};
pub use config::{ClientConfig, load_config};
pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use session::{ChatMessage, ConnectionState, Session, SessionSnapshot};
