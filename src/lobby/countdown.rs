//! Ready/Countdown State Machine
//!
//! Aggregates per-user ready state into lobby-wide start/cancel decisions.
//!
//! ```text
//!            all ready                complete_countdown
//!   Lobby ─────────────▶ CountDown ─────────────────────▶ InGame
//!     ▲  ◀─────────────     │                               │
//!     │    someone unready  │                               │
//!     └──────────────────────────────── end_game ───────────┘
//! ```
//!
//! Only the host evaluates the rule. Clients apply the host's
//! decisions through [`ReadyCountdown::apply_authoritative`].

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Lobby-wide round state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LobbyState {
    /// Waiting for everyone to ready up.
    #[default]
    Lobby,
    /// Everyone is ready, countdown running.
    CountDown,
    /// Game running.
    InGame,
}

/// Transition produced by a ready-state evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountdownTransition {
    /// Lobby -> CountDown.
    Start,
    /// CountDown -> Lobby.
    Cancel,
}

/// Trigger arrived in a state that does not accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CountdownError {
    /// `complete_countdown` outside CountDown.
    #[error("cannot complete countdown while in {0:?}")]
    NotCountingDown(LobbyState),
    /// `end_game` outside InGame.
    #[error("cannot end game while in {0:?}")]
    NotInGame(LobbyState),
}

/// The round state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadyCountdown {
    state: LobbyState,
}

impl ReadyCountdown {
    /// Start in Lobby.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> LobbyState {
        self.state
    }

    /// Evaluate after any ready-state change.
    pub fn evaluate(&mut self, all_ready: bool) -> Option<CountdownTransition> {
        match (self.state, all_ready) {
            (LobbyState::Lobby, true) => {
                self.state = LobbyState::CountDown;
                Some(CountdownTransition::Start)
            }
            (LobbyState::CountDown, false) => {
                self.state = LobbyState::Lobby;
                Some(CountdownTransition::Cancel)
            }
            _ => None,
        }
    }

    /// CountDown -> InGame. Leaves the state untouched on error.
    pub fn complete_countdown(&mut self) -> Result<(), CountdownError> {
        if self.state != LobbyState::CountDown {
            return Err(CountdownError::NotCountingDown(self.state));
        }
        self.state = LobbyState::InGame;
        Ok(())
    }

    /// InGame -> Lobby. Leaves the state untouched on error.
    pub fn end_game(&mut self) -> Result<(), CountdownError> {
        if self.state != LobbyState::InGame {
            return Err(CountdownError::NotInGame(self.state));
        }
        self.state = LobbyState::Lobby;
        Ok(())
    }

    /// Overwrite with a state decided by the host.
    pub fn apply_authoritative(&mut self, state: LobbyState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_when_all_ready() {
        let mut round = ReadyCountdown::new();
        assert_eq!(round.evaluate(false), None);
        assert_eq!(round.evaluate(true), Some(CountdownTransition::Start));
        assert_eq!(round.state(), LobbyState::CountDown);
        // Already counting down: no second start.
        assert_eq!(round.evaluate(true), None);
    }

    #[test]
    fn test_cancel_when_someone_unreadies() {
        let mut round = ReadyCountdown::new();
        round.evaluate(true);
        assert_eq!(round.evaluate(false), Some(CountdownTransition::Cancel));
        assert_eq!(round.state(), LobbyState::Lobby);
        assert_eq!(round.evaluate(false), None);
    }

    #[test]
    fn test_in_game_ignores_ready_changes() {
        let mut round = ReadyCountdown::new();
        round.evaluate(true);
        round.complete_countdown().unwrap();
        assert_eq!(round.evaluate(false), None);
        assert_eq!(round.evaluate(true), None);
        assert_eq!(round.state(), LobbyState::InGame);
    }

    #[test]
    fn test_out_of_order_triggers_leave_state() {
        let mut round = ReadyCountdown::new();
        assert_eq!(
            round.complete_countdown(),
            Err(CountdownError::NotCountingDown(LobbyState::Lobby))
        );
        assert_eq!(round.end_game(), Err(CountdownError::NotInGame(LobbyState::Lobby)));
        assert_eq!(round.state(), LobbyState::Lobby);

        round.evaluate(true);
        assert!(round.end_game().is_err());
        assert_eq!(round.state(), LobbyState::CountDown);
    }

    #[test]
    fn test_full_round() {
        let mut round = ReadyCountdown::new();
        round.evaluate(true);
        round.complete_countdown().unwrap();
        round.end_game().unwrap();
        assert_eq!(round.state(), LobbyState::Lobby);
    }
}
