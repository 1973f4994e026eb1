//! Lobby Users
//!
//! Per-participant records shared across the lobby.
//! Status is a single-valued enum for logic; UI multi-select uses
//! the separate [`StatusFilter`] flag set.

use std::fmt;
use serde::{Serialize, Deserialize};

// =============================================================================
// USER ID
// =============================================================================

/// Stable identifier for a lobby participant.
///
/// Never reused within a session. Ordered so user tables iterate
/// deterministically.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Where a user currently is. Exactly one value at a time.
///
/// Discriminants are the wire byte values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[derive(Default)]
pub enum UserStatus {
    /// Joined a lobby but not yet connected to the relay.
    Connecting = 1,
    /// In a lobby and connected to the relay.
    Lobby = 2,
    /// Pressed ready, waiting for the round to start.
    Ready = 4,
    /// Part of a running game.
    InGame = 8,
    /// Not in a lobby, browsing menus.
    #[default]
    Menu = 16,
}

impl UserStatus {
    /// Wire byte for this status.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(UserStatus::Connecting),
            2 => Some(UserStatus::Lobby),
            4 => Some(UserStatus::Ready),
            8 => Some(UserStatus::InGame),
            16 => Some(UserStatus::Menu),
            _ => None,
        }
    }
}

/// Presentation-only set of statuses (e.g. "show this panel while
/// Lobby or Ready"). Never used for runtime decisions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusFilter(u8);

impl StatusFilter {
    /// Matches nothing.
    pub const NONE: StatusFilter = StatusFilter(0);

    /// Matches every status.
    pub const ALL: StatusFilter = StatusFilter(0b1_1111);

    /// Build a filter from a list of statuses.
    pub fn of(statuses: &[UserStatus]) -> Self {
        statuses.iter().fold(Self::NONE, |f, s| f.with(*s))
    }

    /// Return a copy that also matches `status`.
    pub fn with(self, status: UserStatus) -> Self {
        StatusFilter(self.0 | status.as_byte())
    }

    /// Whether `status` is selected.
    pub fn contains(self, status: UserStatus) -> bool {
        self.0 & status.as_byte() != 0
    }
}

// =============================================================================
// EMOTE
// =============================================================================

/// Emote shown next to a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[derive(Default)]
pub enum Emote {
    /// No emote.
    #[default]
    None = 0,
    /// :)
    Smile = 1,
    /// :(
    Frown = 2,
    /// :|
    Unamused = 3,
    /// :P
    Tongue = 4,
}

impl Emote {
    /// Parse a wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Emote::None),
            1 => Some(Emote::Smile),
            2 => Some(Emote::Frown),
            3 => Some(Emote::Unamused),
            4 => Some(Emote::Tongue),
            _ => None,
        }
    }
}

// =============================================================================
// LOBBY USER
// =============================================================================

/// Which member of a [`LobbyUser`] a change touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserField {
    /// Host flag.
    IsHost,
    /// Display name.
    DisplayName,
    /// Emote.
    Emote,
    /// Status.
    Status,
    /// Approval flag.
    Approved,
    /// Turn order.
    Order,
    /// Money balance.
    Money,
}

/// One participant's replicated state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyUser {
    id: UserId,
    display_name: String,
    is_host: bool,
    emote: Emote,
    status: UserStatus,
    approved: bool,
    order: Option<u32>,
    money: i64,
}

impl LobbyUser {
    /// Create a user in the menu with no lobby-specific state.
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            is_host: false,
            emote: Emote::None,
            status: UserStatus::Menu,
            approved: false,
            order: None,
            money: 0,
        }
    }

    /// Identifier.
    pub fn id(&self) -> &UserId {
        &self.id
    }

    /// Display name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Whether this user hosts the relay.
    pub fn is_host(&self) -> bool {
        self.is_host
    }

    /// Current emote.
    pub fn emote(&self) -> Emote {
        self.emote
    }

    /// Current status.
    pub fn status(&self) -> UserStatus {
        self.status
    }

    /// Whether the host has admitted this user.
    pub fn is_approved(&self) -> bool {
        self.approved
    }

    /// Turn order, once assigned.
    pub fn order(&self) -> Option<u32> {
        self.order
    }

    /// Money balance.
    pub fn money(&self) -> i64 {
        self.money
    }

    /// Set the host flag. Hosts are implicitly approved.
    pub fn set_host(&mut self, is_host: bool) -> Option<UserField> {
        if self.is_host == is_host {
            return None;
        }
        self.is_host = is_host;
        if is_host {
            self.approved = true;
        }
        Some(UserField::IsHost)
    }

    /// Rename. Returns the changed field, if any.
    pub fn set_display_name(&mut self, name: impl Into<String>) -> Option<UserField> {
        let name = name.into();
        if self.display_name == name {
            return None;
        }
        self.display_name = name;
        Some(UserField::DisplayName)
    }

    /// Change emote.
    pub fn set_emote(&mut self, emote: Emote) -> Option<UserField> {
        if self.emote == emote {
            return None;
        }
        self.emote = emote;
        Some(UserField::Emote)
    }

    /// Change status.
    pub fn set_status(&mut self, status: UserStatus) -> Option<UserField> {
        if self.status == status {
            return None;
        }
        self.status = status;
        Some(UserField::Status)
    }

    /// Mark approved. Approval is one-way until [`LobbyUser::reset`].
    pub fn approve(&mut self) -> Option<UserField> {
        if self.approved {
            return None;
        }
        self.approved = true;
        Some(UserField::Approved)
    }

    /// Assign a turn order. Only an unassigned order can be set, and
    /// `None` always clears it.
    pub fn set_order(&mut self, order: Option<u32>) -> Option<UserField> {
        if self.order.is_some() && order.is_some() {
            return None;
        }
        if self.order == order {
            return None;
        }
        self.order = order;
        Some(UserField::Order)
    }

    /// Set the money balance.
    pub fn set_money(&mut self, money: i64) -> Option<UserField> {
        if self.money == money {
            return None;
        }
        self.money = money;
        Some(UserField::Money)
    }

    /// Reset after leaving a lobby. Id and display name persist.
    pub fn reset(&mut self) {
        *self = LobbyUser::new(self.id.clone(), std::mem::take(&mut self.display_name));
    }
}
