//! Network Layer
//!
//! Relay host/client protocol over a pluggable transport.
//! Host is authoritative: it admits clients, forwards their state and
//! decides the round transitions. Clients only send their own changes.

pub mod protocol;
pub mod transport;
pub mod memory;
pub mod ws;
pub mod registry;
pub mod approval;
pub mod forwarder;
pub mod client;
pub mod host;
pub mod identity;

pub use protocol::{Approval, CodecError, Envelope, MsgType, RelayMessage};
pub use transport::{ConnectionId, DynTransport, Transport, TransportError, TransportEvent};
pub use memory::{MemoryRelay, MemoryTransport};
pub use ws::{WsClientTransport, WsHostTransport};
pub use registry::ConnectionRegistry;
pub use approval::{
    ApprovalGate, ApprovalOutcome, ApprovalRequest, DirectoryGate, LobbyRulesGate,
    MemberDirectory, PendingApprovals,
};
pub use forwarder::{can_forward, forward};
pub use client::{ClientPhase, RelayClient};
pub use host::RelayHost;
pub use identity::{validate_sign_in, Identity, IdentityConfig, IdentityError};
