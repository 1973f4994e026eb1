//! Local Lobby
//!
//! The locally observed lobby aggregate: lobby identity, the user table
//! and the round state. Uses BTreeMap so iteration (and therefore
//! snapshot order) is deterministic.

use std::collections::BTreeMap;

use crate::lobby::countdown::{LobbyState, ReadyCountdown};
use crate::lobby::user::{LobbyUser, UserId, UserStatus};

/// Default lobby capacity.
pub const DEFAULT_MAX_PLAYERS: usize = 4;

/// Lobby aggregate.
#[derive(Debug, Clone)]
pub struct LocalLobby {
    lobby_id: Option<String>,
    name: String,
    max_players: usize,
    users: BTreeMap<UserId, LobbyUser>,
    round: ReadyCountdown,
}

impl LocalLobby {
    /// Empty lobby not bound to any directory entry.
    pub fn new(max_players: usize) -> Self {
        Self {
            lobby_id: None,
            name: String::new(),
            max_players,
            users: BTreeMap::new(),
            round: ReadyCountdown::new(),
        }
    }

    /// Directory id, when in a lobby.
    pub fn lobby_id(&self) -> Option<&str> {
        self.lobby_id.as_deref()
    }

    /// Bind to a directory entry.
    pub fn set_lobby_id(&mut self, id: impl Into<String>) {
        self.lobby_id = Some(id.into());
    }

    /// Display name of the lobby.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the lobby.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Capacity.
    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Round state.
    pub fn state(&self) -> LobbyState {
        self.round.state()
    }

    /// Round state machine.
    pub fn round(&self) -> &ReadyCountdown {
        &self.round
    }

    /// Mutable round state machine.
    pub fn round_mut(&mut self) -> &mut ReadyCountdown {
        &mut self.round
    }

    /// Insert or replace a user. Returns true if the id was new.
    pub fn add_user(&mut self, user: LobbyUser) -> bool {
        self.users.insert(user.id().clone(), user).is_none()
    }

    /// Remove a user.
    pub fn remove_user(&mut self, id: &UserId) -> Option<LobbyUser> {
        self.users.remove(id)
    }

    /// Look up a user.
    pub fn user(&self, id: &UserId) -> Option<&LobbyUser> {
        self.users.get(id)
    }

    /// Look up a user mutably.
    pub fn user_mut(&mut self, id: &UserId) -> Option<&mut LobbyUser> {
        self.users.get_mut(id)
    }

    /// Whether a user is present.
    pub fn contains(&self, id: &UserId) -> bool {
        self.users.contains_key(id)
    }

    /// Whether a user is present and approved.
    pub fn is_approved(&self, id: &UserId) -> bool {
        self.users.get(id).is_some_and(|u| u.is_approved())
    }

    /// All users in id order.
    pub fn users(&self) -> impl Iterator<Item = &LobbyUser> {
        self.users.values()
    }

    /// Number of users.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Whether the lobby is at capacity.
    pub fn is_full(&self) -> bool {
        self.users.len() >= self.max_players
    }

    /// Whether every known user reports Ready.
    pub fn all_ready(&self) -> bool {
        self.users.values().all(|u| u.status() == UserStatus::Ready)
    }

    /// Drop the directory binding and every user except `keep`, and
    /// return the round to Lobby.
    pub fn reset(&mut self, keep: Option<&UserId>) {
        self.lobby_id = None;
        self.name.clear();
        self.round = ReadyCountdown::new();
        self.users.retain(|id, _| Some(id) == keep);
    }
}

impl Default for LocalLobby {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PLAYERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, status: UserStatus) -> LobbyUser {
        let mut u = LobbyUser::new(UserId::new(id), id);
        u.set_status(status);
        u
    }

    #[test]
    fn test_all_ready() {
        let mut lobby = LocalLobby::default();
        lobby.add_user(user("a", UserStatus::Ready));
        lobby.add_user(user("b", UserStatus::Lobby));
        assert!(!lobby.all_ready());

        lobby.user_mut(&UserId::new("b")).unwrap().set_status(UserStatus::Ready);
        assert!(lobby.all_ready());
    }

    #[test]
    fn test_capacity() {
        let mut lobby = LocalLobby::new(2);
        lobby.add_user(user("a", UserStatus::Lobby));
        assert!(!lobby.is_full());
        lobby.add_user(user("b", UserStatus::Lobby));
        assert!(lobby.is_full());
    }

    #[test]
    fn test_add_user_reports_new() {
        let mut lobby = LocalLobby::default();
        assert!(lobby.add_user(user("a", UserStatus::Lobby)));
        assert!(!lobby.add_user(user("a", UserStatus::Ready)));
        assert_eq!(lobby.user_count(), 1);
    }

    #[test]
    fn test_reset_keeps_local_user() {
        let mut lobby = LocalLobby::default();
        lobby.set_lobby_id("lobby-1");
        lobby.add_user(user("me", UserStatus::Ready));
        lobby.add_user(user("other", UserStatus::Ready));
        lobby.round_mut().evaluate(true);

        lobby.reset(Some(&UserId::new("me")));

        assert_eq!(lobby.lobby_id(), None);
        assert_eq!(lobby.user_count(), 1);
        assert!(lobby.contains(&UserId::new("me")));
        assert_eq!(lobby.state(), LobbyState::Lobby);
    }
}
