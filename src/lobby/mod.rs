//! Lobby State
//!
//! Replicated lobby data and the round state machine.
//! Nothing in here touches the network.

pub mod user;
pub mod local_lobby;
pub mod countdown;
pub mod retry;

pub use user::{UserId, LobbyUser, UserStatus, StatusFilter, Emote, UserField};
pub use local_lobby::{LocalLobby, DEFAULT_MAX_PLAYERS};
pub use countdown::{LobbyState, ReadyCountdown, CountdownTransition, CountdownError};
pub use retry::{JoinRetry, DEFAULT_RETRY_DELAY};
