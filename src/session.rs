//! Lobby Session
//!
//! The owning context for one local user: identity, the local lobby,
//! the active relay role and the join retry. The driver (binary, game
//! loop, tests) feeds it lobby-service callbacks, relay join results,
//! UI requests and ticks; it hands back join requests when the relay
//! needs (re)connecting.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bus::{LobbyEvent, MessageBus};
use crate::config::RelayConfig;
use crate::lobby::countdown::{CountdownError, LobbyState};
use crate::lobby::local_lobby::LocalLobby;
use crate::lobby::retry::JoinRetry;
use crate::lobby::user::{Emote, LobbyUser, UserField, UserId, UserStatus};
use crate::network::approval::{ApprovalGate, DirectoryGate, LobbyRulesGate, MemberDirectory};
use crate::network::client::{ClientPhase, RelayClient};
use crate::network::host::RelayHost;
use crate::network::identity::Identity;
use crate::network::transport::{ConnectionId, DynTransport, TransportError};

/// Popup text for a rejected rename.
pub const EMPTY_NAME_MESSAGE: &str = "Empty Name not allowed.";

/// Top-level screen the local user is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GameState {
    /// Main menu.
    #[default]
    Menu,
    /// Inside a lobby.
    Lobby,
    /// Lobby browser / join screen.
    JoinMenu,
}

/// Session errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LobbyError {
    /// Rename to an empty or whitespace-only name.
    #[error("display name must not be empty")]
    EmptyName,
    /// No local user yet.
    #[error("no user signed in")]
    NotSignedIn,
    /// Operation needs a relay link.
    #[error("not connected to the relay")]
    NotConnected,
    /// Operation is reserved for the host.
    #[error("only the host can do that")]
    NotHost,
    /// Round trigger out of order.
    #[error(transparent)]
    Countdown(#[from] CountdownError),
}

/// What the UI can ask of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyRequest {
    /// Change the local display name.
    Rename(String),
    /// Change the local emote.
    SetEmote(Emote),
    /// Change the local status (ready/unready).
    SetStatus(UserStatus),
    /// Host: countdown elapsed, start the game.
    CompleteCountdown,
    /// Host: game over.
    EndGame,
    /// Switch screens. Leaving for a menu leaves the lobby.
    SetGameState(GameState),
}

/// The driver should open a relay link for this lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Directory id of the lobby.
    pub lobby_id: String,
    /// Open a host endpoint rather than a client link.
    pub as_host: bool,
}

/// A freshly opened relay link.
pub enum RelayLink {
    /// Host endpoint.
    Host(DynTransport),
    /// Client link to the host.
    Client {
        /// Transport carrying the link.
        transport: DynTransport,
        /// The link itself.
        link: ConnectionId,
    },
}

/// Result of handing a join attempt to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinProgress {
    /// Role installed.
    Joined,
    /// Failed; one retry is scheduled.
    RetryScheduled,
    /// Failed for good; back to the join menu.
    Failed,
    /// The lobby was left while joining; the link was dropped.
    Stale,
}

/// Active relay role.
pub enum Role {
    /// Hosting.
    Host(RelayHost<DynTransport>),
    /// Joined as client.
    Client(RelayClient<DynTransport>),
}

/// Per-user lobby session.
pub struct LobbySession {
    config: RelayConfig,
    bus: MessageBus,
    gate: Arc<dyn ApprovalGate>,
    lobby: LocalLobby,
    local_id: Option<UserId>,
    game_state: GameState,
    role: Option<Role>,
    hosting: bool,
    retry: JoinRetry,
    countdown_started: Option<Instant>,
}

impl LobbySession {
    /// New session in the main menu.
    pub fn new(config: RelayConfig, bus: MessageBus) -> Self {
        Self {
            lobby: LocalLobby::new(config.max_players),
            retry: JoinRetry::new(config.retry_delay),
            config,
            bus,
            gate: Arc::new(LobbyRulesGate),
            local_id: None,
            game_state: GameState::Menu,
            role: None,
            hosting: false,
            countdown_started: None,
        }
    }

    /// Use a different approval gate when hosting.
    pub fn with_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.gate = gate;
        self
    }

    /// When hosting, admit only users the directory lists in this lobby,
    /// waiting up to the configured approval timeout for them to appear.
    pub fn with_directory<D: MemberDirectory + 'static>(self, directory: Arc<D>) -> Self {
        let gate = DirectoryGate::new(directory, self.config.approval_timeout);
        self.with_gate(Arc::new(gate))
    }

    /// Notification bus.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Local lobby view.
    pub fn lobby(&self) -> &LocalLobby {
        &self.lobby
    }

    /// Current screen.
    pub fn game_state(&self) -> GameState {
        self.game_state
    }

    /// Local user id, once signed in.
    pub fn local_id(&self) -> Option<&UserId> {
        self.local_id.as_ref()
    }

    /// Local user record.
    pub fn local_user(&self) -> Option<&LobbyUser> {
        self.lobby.user(self.local_id.as_ref()?)
    }

    /// Active role, if a relay link is up.
    pub fn role(&self) -> Option<&Role> {
        self.role.as_ref()
    }

    /// Whether this session hosts (or is about to host) the lobby.
    pub fn is_host(&self) -> bool {
        self.hosting
    }

    /// Whether a join retry is waiting.
    pub fn retry_pending(&self) -> bool {
        self.retry.is_pending()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Install the local user.
    pub fn sign_in(&mut self, identity: Identity) {
        if let Some(old) = self.local_id.take() {
            self.lobby.remove_user(&old);
        }
        info!("signed in as {} ({})", identity.display_name, identity.user_id.short());
        self.lobby.add_user(LobbyUser::new(identity.user_id.clone(), identity.display_name));
        self.local_id = Some(identity.user_id);
    }

    /// The lobby service created a lobby for us.
    pub fn on_lobby_created(&mut self, lobby_id: &str) -> Result<JoinRequest, LobbyError> {
        self.enter_lobby(lobby_id, true)
    }

    /// The lobby service put us into an existing lobby.
    pub fn on_lobby_joined(&mut self, lobby_id: &str, is_host: bool) -> Result<JoinRequest, LobbyError> {
        self.enter_lobby(lobby_id, is_host)
    }

    fn enter_lobby(&mut self, lobby_id: &str, as_host: bool) -> Result<JoinRequest, LobbyError> {
        let id = self.local_id.clone().ok_or(LobbyError::NotSignedIn)?;
        if self.lobby.lobby_id().is_some() {
            self.leave_lobby();
        }

        self.lobby.set_lobby_id(lobby_id);
        self.game_state = GameState::Lobby;
        self.hosting = as_host;
        self.retry.reset();
        self.set_status_locally(&id, UserStatus::Connecting);
        info!("entered lobby {} as {}", lobby_id, if as_host { "host" } else { "client" });

        Ok(JoinRequest {
            lobby_id: lobby_id.to_string(),
            as_host,
        })
    }

    /// Outcome of a relay join started from a [`JoinRequest`].
    pub fn on_relay_join_result(
        &mut self,
        result: Result<RelayLink, TransportError>,
        now: Instant,
    ) -> JoinProgress {
        let Some(lobby_id) = self.lobby.lobby_id().map(str::to_string) else {
            return JoinProgress::Stale;
        };
        let Some(local_id) = self.local_id.clone() else {
            return JoinProgress::Stale;
        };

        match result {
            Ok(RelayLink::Host(transport)) => {
                let mut host = RelayHost::new(transport, local_id, self.gate.clone(), self.bus.clone());
                host.start(&mut self.lobby);
                self.role = Some(Role::Host(host));
                self.hosting = true;
                self.retry.reset();
                JoinProgress::Joined
            }
            Ok(RelayLink::Client { transport, link }) => {
                let client = RelayClient::new(transport, link, local_id, self.bus.clone());
                self.role = Some(Role::Client(client));
                self.retry.reset();
                JoinProgress::Joined
            }
            Err(e) => {
                warn!("relay join for lobby {} failed: {}", lobby_id, e);
                if self.retry.schedule(&lobby_id, now) {
                    self.bus.publish(LobbyEvent::JoinRetryScheduled);
                    JoinProgress::RetryScheduled
                } else {
                    self.fail_join();
                    JoinProgress::Failed
                }
            }
        }
    }

    /// A join request when the scheduled retry is due and the lobby is
    /// still the one it was scheduled for.
    pub fn poll_retry(&mut self, now: Instant) -> Option<JoinRequest> {
        if !self.retry.poll(now, self.lobby.lobby_id()) {
            return None;
        }
        let lobby_id = self.lobby.lobby_id()?.to_string();
        info!("retrying relay join for lobby {}", lobby_id);
        Some(JoinRequest {
            lobby_id,
            as_host: self.hosting,
        })
    }

    fn fail_join(&mut self) {
        self.bus.publish(LobbyEvent::JoinFailed);
        self.leave_lobby();
        self.game_state = GameState::JoinMenu;
    }

    /// Leave the current lobby. Id and display name survive.
    pub fn leave_lobby(&mut self) {
        match self.role.take() {
            Some(Role::Host(mut host)) => host.leave(),
            Some(Role::Client(mut client)) => client.leave(),
            None => {}
        }

        if let Some(id) = self.local_id.clone() {
            if let Some(user) = self.lobby.user_mut(&id) {
                user.reset();
            }
            self.lobby.reset(Some(&id));
        } else {
            self.lobby.reset(None);
        }
        self.hosting = false;
        self.countdown_started = None;
        info!("left lobby");
    }

    // =========================================================================
    // REQUESTS
    // =========================================================================

    /// Apply a UI request.
    pub fn handle_request(&mut self, request: LobbyRequest) -> Result<(), LobbyError> {
        let id = self.local_id.clone().ok_or(LobbyError::NotSignedIn)?;

        match request {
            LobbyRequest::Rename(name) => {
                if name.trim().is_empty() {
                    self.bus.publish(LobbyEvent::DisplayErrorPopup(EMPTY_NAME_MESSAGE.to_string()));
                    return Err(LobbyError::EmptyName);
                }
                match &mut self.role {
                    Some(Role::Host(host)) => host.set_local_name(&mut self.lobby, &name),
                    Some(Role::Client(client)) => client.set_local_name(&mut self.lobby, &name),
                    None => {
                        let field = self.lobby.user_mut(&id).and_then(|u| u.set_display_name(name));
                        publish_change(&self.bus, &id, field);
                    }
                }
            }
            LobbyRequest::SetEmote(emote) => match &mut self.role {
                Some(Role::Host(host)) => host.set_local_emote(&mut self.lobby, emote),
                Some(Role::Client(client)) => client.set_local_emote(&mut self.lobby, emote),
                None => {
                    let field = self.lobby.user_mut(&id).and_then(|u| u.set_emote(emote));
                    publish_change(&self.bus, &id, field);
                }
            },
            LobbyRequest::SetStatus(status) => match &mut self.role {
                Some(Role::Host(host)) => host.set_local_status(&mut self.lobby, status),
                Some(Role::Client(client)) => client.set_local_status(&mut self.lobby, status),
                None => {
                    let field = self.lobby.user_mut(&id).and_then(|u| u.set_status(status));
                    publish_change(&self.bus, &id, field);
                }
            },
            LobbyRequest::CompleteCountdown => {
                host_of(&mut self.role, self.hosting)?.complete_countdown(&mut self.lobby)?;
                self.countdown_started = None;
            }
            LobbyRequest::EndGame => {
                host_of(&mut self.role, self.hosting)?.end_game(&mut self.lobby)?;
            }
            LobbyRequest::SetGameState(state) => {
                if state != GameState::Lobby && self.lobby.lobby_id().is_some() {
                    self.leave_lobby();
                }
                self.game_state = state;
            }
        }
        Ok(())
    }

    fn set_status_locally(&mut self, id: &UserId, status: UserStatus) {
        let field = self.lobby.user_mut(id).and_then(|u| u.set_status(status));
        publish_change(&self.bus, id, field);
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Run one scheduling step of the active role.
    pub fn tick(&mut self, now: Instant) {
        let mut dropped = false;
        match &mut self.role {
            Some(Role::Host(host)) => {
                host.tick(&mut self.lobby);

                if self.lobby.state() == LobbyState::CountDown {
                    let started = *self.countdown_started.get_or_insert(now);
                    if now.duration_since(started) >= self.config.countdown {
                        self.countdown_started = None;
                        if let Err(e) = host.complete_countdown(&mut self.lobby) {
                            debug!("countdown timer fired out of turn: {}", e);
                        }
                    }
                } else {
                    self.countdown_started = None;
                }
            }
            Some(Role::Client(client)) => {
                client.tick(&mut self.lobby);
                dropped = matches!(client.phase(), ClientPhase::Rejected(_) | ClientPhase::Closed);
            }
            None => {}
        }

        if dropped {
            // Refused or host gone: back to the lobby browser.
            self.leave_lobby();
            self.game_state = GameState::JoinMenu;
        }
    }
}

fn host_of(role: &mut Option<Role>, hosting: bool) -> Result<&mut RelayHost<DynTransport>, LobbyError> {
    match role {
        Some(Role::Host(host)) => Ok(host),
        Some(Role::Client(_)) => Err(LobbyError::NotHost),
        None if hosting => Err(LobbyError::NotConnected),
        None => Err(LobbyError::NotHost),
    }
}

fn publish_change(bus: &MessageBus, id: &UserId, field: Option<UserField>) {
    if let Some(field) = field {
        bus.publish(LobbyEvent::UserChanged { id: id.clone(), field });
    }
}
