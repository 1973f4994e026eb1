//! Relay Client
//!
//! Client role: announces itself, waits for approval, then sends its own
//! state changes and applies whatever the host broadcasts. Never
//! evaluates the ready rule.

use tracing::{debug, info, warn};

use crate::bus::{LobbyEvent, MessageBus};
use crate::lobby::countdown::LobbyState;
use crate::lobby::local_lobby::LocalLobby;
use crate::lobby::user::{Emote, LobbyUser, UserField, UserId, UserStatus};
use crate::network::forwarder::send_to;
use crate::network::protocol::{Approval, Envelope, RelayMessage};
use crate::network::transport::{ConnectionId, Transport, TransportEvent};

/// Link lifecycle as seen by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientPhase {
    /// Waiting for the relay to report the link up.
    Connecting,
    /// `NewPlayer` sent, no answer yet.
    AwaitingApproval,
    /// Admitted by the host.
    Approved,
    /// Refused by the host.
    Rejected(Approval),
    /// Link gone.
    Closed,
}

/// Client side of the relay.
pub struct RelayClient<T: Transport> {
    transport: T,
    link: ConnectionId,
    local_id: UserId,
    bus: MessageBus,
    phase: ClientPhase,
}

impl<T: Transport> RelayClient<T> {
    /// Wrap a transport whose only link leads to the host.
    pub fn new(transport: T, link: ConnectionId, local_id: UserId, bus: MessageBus) -> Self {
        Self {
            transport,
            link,
            local_id,
            bus,
            phase: ClientPhase::Connecting,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    /// Whether the host admitted us.
    pub fn is_approved(&self) -> bool {
        self.phase == ClientPhase::Approved
    }

    /// Local user id.
    pub fn local_id(&self) -> &UserId {
        &self.local_id
    }

    /// Link to the host.
    pub fn link(&self) -> ConnectionId {
        self.link
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Process everything the transport has queued.
    pub fn tick(&mut self, lobby: &mut LocalLobby) {
        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::Connected(conn) if conn == self.link => self.on_connected(),
                TransportEvent::Connected(_) => {}
                TransportEvent::Data(_, data) => match Envelope::from_bytes(&data) {
                    Ok(envelope) => self.apply(lobby, envelope),
                    Err(e) => warn!("undecodable datagram from host: {}", e),
                },
                TransportEvent::Disconnected(conn) if conn == self.link => self.on_host_lost(),
                TransportEvent::Disconnected(_) => {}
            }
        }
    }

    fn on_connected(&mut self) {
        if self.phase != ClientPhase::Connecting {
            return;
        }
        debug!("link to host up, requesting approval");
        self.send(RelayMessage::NewPlayer);
        self.phase = ClientPhase::AwaitingApproval;
    }

    fn on_host_lost(&mut self) {
        match self.phase {
            ClientPhase::Closed | ClientPhase::Rejected(_) => {}
            _ => {
                warn!("lost connection to host");
                self.phase = ClientPhase::Closed;
                self.bus.publish(LobbyEvent::HostDisconnected);
            }
        }
    }

    fn send(&mut self, message: RelayMessage) {
        let envelope = Envelope::new(self.local_id.clone(), message);
        send_to(&mut self.transport, self.link, &envelope);
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    fn apply(&mut self, lobby: &mut LocalLobby, envelope: Envelope) {
        if envelope.sender == self.local_id {
            return;
        }
        let msg_type = envelope.msg_type();
        let sender = envelope.sender;

        match envelope.message {
            RelayMessage::PlayerApprovalState(approval) => self.on_approval(lobby, approval),
            RelayMessage::PlayerName(name) => {
                let field = remote_user(lobby, &self.bus, &sender).and_then(|u| u.set_display_name(name));
                self.publish_change(&sender, field);
            }
            RelayMessage::Emote(emote) => {
                let field = remote_user(lobby, &self.bus, &sender).and_then(|u| u.set_emote(emote));
                self.publish_change(&sender, field);
            }
            RelayMessage::ReadyState(status) => {
                let field = remote_user(lobby, &self.bus, &sender).and_then(|u| u.set_status(status));
                self.publish_change(&sender, field);
            }
            RelayMessage::StartCountdown => {
                lobby.round_mut().apply_authoritative(LobbyState::CountDown);
                self.bus.publish(LobbyEvent::StartCountdown);
            }
            RelayMessage::CancelCountdown => {
                lobby.round_mut().apply_authoritative(LobbyState::Lobby);
                self.bus.publish(LobbyEvent::CancelCountdown);
            }
            RelayMessage::ConfirmInGame => {
                lobby.round_mut().apply_authoritative(LobbyState::InGame);
                self.bus.publish(LobbyEvent::ConfirmInGameState);
                self.set_local_status(lobby, UserStatus::InGame);
            }
            RelayMessage::EndInGame => {
                lobby.round_mut().apply_authoritative(LobbyState::Lobby);
                self.bus.publish(LobbyEvent::EndGame);
                self.set_local_status(lobby, UserStatus::Lobby);
            }
            RelayMessage::NewPlayer | RelayMessage::PlayerDisconnect => {
                debug!("ignoring {:?} from {}", msg_type, sender.short());
            }
        }
    }

    fn on_approval(&mut self, lobby: &mut LocalLobby, approval: Approval) {
        if self.phase != ClientPhase::AwaitingApproval {
            debug!("approval {:?} in phase {:?} ignored", approval, self.phase);
            return;
        }

        if !approval.is_ok() {
            info!("host rejected us: {:?}", approval);
            self.phase = ClientPhase::Rejected(approval);
            self.bus.publish(LobbyEvent::ApprovalRejected(approval));
            if let Some(text) = approval.rejection_text() {
                self.bus.publish(LobbyEvent::DisplayErrorPopup(text.to_string()));
            }
            self.transport.disconnect(self.link);
            return;
        }

        info!("approved by host");
        self.phase = ClientPhase::Approved;
        let id = self.local_id.clone();
        let Some(me) = lobby.user_mut(&id) else {
            warn!("local user {} missing from lobby table", id.short());
            return;
        };
        let approved = me.approve();
        let status = me.set_status(UserStatus::Lobby);
        let (name, emote, current) = (me.display_name().to_string(), me.emote(), me.status());

        self.publish_change(&id, approved);
        self.bus.publish(LobbyEvent::ClientUserApproved);
        self.publish_change(&id, status);

        self.send(RelayMessage::PlayerName(name));
        self.send(RelayMessage::Emote(emote));
        self.send(RelayMessage::ReadyState(current));
    }

    fn publish_change(&self, id: &UserId, field: Option<UserField>) {
        if let Some(field) = field {
            self.bus.publish(LobbyEvent::UserChanged { id: id.clone(), field });
        }
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Change the local status and, once approved, tell the host.
    pub fn set_local_status(&mut self, lobby: &mut LocalLobby, status: UserStatus) {
        let id = self.local_id.clone();
        let field = lobby.user_mut(&id).and_then(|u| u.set_status(status));
        if field.is_some() {
            self.publish_change(&id, field);
            if self.is_approved() {
                self.send(RelayMessage::ReadyState(status));
            }
        }
    }

    /// Rename the local user.
    pub fn set_local_name(&mut self, lobby: &mut LocalLobby, name: &str) {
        let id = self.local_id.clone();
        let field = lobby.user_mut(&id).and_then(|u| u.set_display_name(name));
        if field.is_some() {
            self.publish_change(&id, field);
            if self.is_approved() {
                self.send(RelayMessage::PlayerName(name.to_string()));
            }
        }
    }

    /// Change the local emote.
    pub fn set_local_emote(&mut self, lobby: &mut LocalLobby, emote: Emote) {
        let id = self.local_id.clone();
        let field = lobby.user_mut(&id).and_then(|u| u.set_emote(emote));
        if field.is_some() {
            self.publish_change(&id, field);
            if self.is_approved() {
                self.send(RelayMessage::Emote(emote));
            }
        }
    }

    /// Tell the host we are leaving, then close the link.
    pub fn leave(&mut self) {
        if self.transport.is_alive(self.link) {
            self.send(RelayMessage::PlayerDisconnect);
            self.transport.disconnect(self.link);
        }
        self.phase = ClientPhase::Closed;
    }
}

/// Entry for a remote user, created on first sight.
fn remote_user<'a>(
    lobby: &'a mut LocalLobby,
    bus: &MessageBus,
    id: &UserId,
) -> Option<&'a mut LobbyUser> {
    if !lobby.contains(id) {
        let mut user = LobbyUser::new(id.clone(), id.short());
        user.approve();
        lobby.add_user(user);
        bus.publish(LobbyEvent::UserJoined(id.clone()));
    }
    lobby.user_mut(id)
}
