//! # Relay Lobby
//!
//! Host-relayed lobby synchronization: connection approval, state
//! forwarding and a ready/countdown round state machine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        RELAY LOBBY                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  lobby/          - Replicated state (no I/O)                 │
//! │  ├── user.rs     - LobbyUser, UserStatus, Emote              │
//! │  ├── local_lobby.rs - User table + round state               │
//! │  ├── countdown.rs - Lobby/CountDown/InGame machine           │
//! │  └── retry.rs    - Single join retry, lobby-id guarded       │
//! │                                                              │
//! │  network/        - Relay protocol                            │
//! │  ├── protocol.rs - Message types + wire codec                │
//! │  ├── transport.rs - Link-layer trait                         │
//! │  ├── memory.rs / ws.rs - In-process and WebSocket links      │
//! │  ├── registry.rs - Approved connections <-> user ids         │
//! │  ├── approval.rs - Async admission gate                      │
//! │  ├── forwarder.rs - Fan-out excluding the origin             │
//! │  ├── host.rs / client.rs - The two roles                     │
//! │  └── identity.rs - Sign-in token validation                  │
//! │                                                              │
//! │  bus.rs          - In-process notifications                  │
//! │  session.rs      - Owning context, UI requests, join retry   │
//! │  config.rs       - Settings + environment overrides          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling
//!
//! Everything runs on one cooperative tick. Each tick the host pumps
//! transport events, prunes dead links, accepts new ones, dispatches
//! messages, applies finished approvals and re-evaluates readiness.
//! Approvals are the only work that spans ticks.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod bus;
pub mod config;
pub mod lobby;
pub mod network;
pub mod session;

// Re-export commonly used types
pub use bus::{LobbyEvent, MessageBus};
pub use config::{ConfigError, RelayConfig};
pub use lobby::{LobbyState, LobbyUser, LocalLobby, UserId, UserStatus};
pub use network::{Approval, Envelope, RelayHost, RelayClient, RelayMessage, Transport};
pub use session::{GameState, JoinProgress, JoinRequest, LobbyError, LobbyRequest, LobbySession, RelayLink};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
