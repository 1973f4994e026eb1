//! Relay Host
//!
//! Host role: admits clients through the approval gate, relays their
//! state changes to everyone else and owns the round state. Everything
//! runs inside [`RelayHost::tick`]; only approvals span ticks.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::bus::{LobbyEvent, MessageBus};
use crate::lobby::countdown::{CountdownError, CountdownTransition};
use crate::lobby::local_lobby::LocalLobby;
use crate::lobby::user::{Emote, LobbyUser, UserField, UserId, UserStatus};
use crate::network::approval::{
    ApprovalGate, ApprovalOutcome, ApprovalRequest, LobbyRulesGate, PendingApprovals,
};
use crate::network::forwarder::{can_forward, forward, send_to};
use crate::network::protocol::{Approval, Envelope, RelayMessage};
use crate::network::registry::ConnectionRegistry;
use crate::network::transport::{ConnectionId, Transport, TransportEvent};

/// Host side of the relay.
pub struct RelayHost<T: Transport> {
    transport: T,
    local_id: UserId,
    bus: MessageBus,
    gate: Arc<dyn ApprovalGate>,
    registry: ConnectionRegistry,
    pending: PendingApprovals,
    /// Every accepted link, approved or not.
    links: BTreeSet<ConnectionId>,
    ready_dirty: bool,
}

impl<T: Transport> RelayHost<T> {
    /// Create a host. The local user must already be in the lobby table.
    pub fn new(transport: T, local_id: UserId, gate: Arc<dyn ApprovalGate>, bus: MessageBus) -> Self {
        Self {
            transport,
            local_id,
            bus,
            gate,
            registry: ConnectionRegistry::new(),
            pending: PendingApprovals::new(),
            links: BTreeSet::new(),
            ready_dirty: false,
        }
    }

    /// Mark the local user as host and move it into the lobby.
    pub fn start(&mut self, lobby: &mut LocalLobby) {
        let id = self.local_id.clone();
        let Some(user) = lobby.user_mut(&id) else {
            warn!("host {} is not in the lobby table", id.short());
            return;
        };
        let host_changed = user.set_host(true);
        let status_changed = user.set_status(UserStatus::Lobby);
        for field in [host_changed, status_changed].into_iter().flatten() {
            self.bus.publish(LobbyEvent::UserChanged { id: id.clone(), field });
        }
        info!("hosting lobby {}", lobby.lobby_id().unwrap_or("<unbound>"));
    }

    /// Local user id.
    pub fn local_id(&self) -> &UserId {
        &self.local_id
    }

    /// Approved connections.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Approvals still in flight.
    pub fn pending_approvals(&self) -> usize {
        self.pending.len()
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Run one scheduling step.
    ///
    /// Pumps transport events, prunes dead links, accepts new ones,
    /// dispatches messages, applies finished approvals and finally
    /// re-evaluates the ready rule if anything changed.
    pub fn tick(&mut self, lobby: &mut LocalLobby) {
        let inbox = self.pump();
        let leaving: BTreeSet<ConnectionId> = inbox
            .iter()
            .filter(|(_, envelope)| envelope.message == RelayMessage::PlayerDisconnect)
            .map(|(conn, _)| *conn)
            .collect();
        self.prune(lobby, &leaving);
        self.accept();

        for (conn, envelope) in inbox {
            self.dispatch(lobby, conn, envelope);
        }

        for outcome in self.pending.poll_ready() {
            self.finish_approval(lobby, outcome);
        }

        if std::mem::take(&mut self.ready_dirty) {
            self.evaluate(lobby);
        }
    }

    fn pump(&mut self) -> Vec<(ConnectionId, Envelope)> {
        let mut inbox = Vec::new();
        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::Connected(conn) => {
                    self.links.insert(conn);
                }
                TransportEvent::Data(conn, data) => match Envelope::from_bytes(&data) {
                    Ok(envelope) => inbox.push((conn, envelope)),
                    Err(e) => warn!("undecodable datagram from {}: {}", conn, e),
                },
                TransportEvent::Disconnected(conn) => {
                    debug!("{} reported closed", conn);
                }
            }
        }
        inbox
    }

    /// Drop dead links. `leaving` said goodbye first, so their closing is
    /// expected.
    fn prune(&mut self, lobby: &mut LocalLobby, leaving: &BTreeSet<ConnectionId>) {
        let transport = &self.transport;
        let dead = self.registry.prune(|conn| transport.is_alive(conn));
        let closed: Vec<ConnectionId> = self.links
            .iter()
            .copied()
            .filter(|conn| !transport.is_alive(*conn))
            .collect();
        // Let the transport release whatever it still holds for them.
        for conn in closed.iter().chain(dead.iter().map(|(conn, _)| conn)) {
            self.transport.disconnect(*conn);
            self.links.remove(conn);
        }

        for (conn, user) in dead {
            if leaving.contains(&conn) {
                info!("client {} on {} left", user.short(), conn);
            } else {
                error!("client {} on {} disconnected unexpectedly", user.short(), conn);
            }
            self.drop_user(lobby, &user);
        }
    }

    fn accept(&mut self) {
        while let Some(conn) = self.transport.accept() {
            debug!("accepted {}", conn);
            self.links.insert(conn);
        }
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    fn dispatch(&mut self, lobby: &mut LocalLobby, conn: ConnectionId, envelope: Envelope) {
        let msg_type = envelope.msg_type();
        if msg_type.is_host_only() {
            warn!("{} sent host-only {:?}; dropped", conn, msg_type);
            return;
        }
        if !can_forward(lobby, &self.registry, &self.local_id, conn, msg_type, &envelope.sender) {
            debug!("{:?} from {} ({}) not forwardable", msg_type, envelope.sender.short(), conn);
            return;
        }

        let sender = envelope.sender.clone();
        match &envelope.message {
            RelayMessage::NewPlayer => self.begin_approval(lobby, conn, sender),
            RelayMessage::PlayerName(name) => {
                let field = lobby.user_mut(&sender).and_then(|u| u.set_display_name(name.as_str()));
                self.publish_change(&sender, field);
                forward(&mut self.transport, &self.registry, Some(conn), &envelope);
            }
            RelayMessage::Emote(emote) => {
                let field = lobby.user_mut(&sender).and_then(|u| u.set_emote(*emote));
                self.publish_change(&sender, field);
                forward(&mut self.transport, &self.registry, Some(conn), &envelope);
            }
            RelayMessage::ReadyState(status) => {
                let field = lobby.user_mut(&sender).and_then(|u| u.set_status(*status));
                self.publish_change(&sender, field);
                forward(&mut self.transport, &self.registry, Some(conn), &envelope);
                self.ready_dirty = true;
            }
            RelayMessage::PlayerDisconnect => {
                info!("client {} on {} is leaving", sender.short(), conn);
                self.transport.disconnect(conn);
                self.links.remove(&conn);
                if self.registry.remove(conn).is_some() {
                    self.drop_user(lobby, &sender);
                }
            }
            RelayMessage::PlayerApprovalState(_)
            | RelayMessage::StartCountdown
            | RelayMessage::CancelCountdown
            | RelayMessage::ConfirmInGame
            | RelayMessage::EndInGame => {}
        }
    }

    fn begin_approval(&mut self, lobby: &LocalLobby, conn: ConnectionId, user_id: UserId) {
        if self.registry.contains(conn) || self.pending.is_pending(conn) {
            debug!("duplicate NewPlayer on {}", conn);
            return;
        }
        if self.registry.connection_for(&user_id).is_some() || self.pending.is_claimed(&user_id) {
            warn!("user {} already claimed by another link; refusing {}", user_id.short(), conn);
            self.refuse(conn, &user_id, Approval::UnknownUser);
            return;
        }

        let request = ApprovalRequest {
            connection: conn,
            user_id,
            lobby_id: lobby.lobby_id().map(str::to_string),
            lobby_state: lobby.state(),
            user_count: lobby.user_count(),
            max_players: lobby.max_players(),
        };
        debug!("approving {} on {}", request.user_id.short(), conn);
        self.pending.start(self.gate.as_ref(), request);
    }

    fn finish_approval(&mut self, lobby: &mut LocalLobby, outcome: ApprovalOutcome) {
        let ApprovalOutcome { connection: conn, user_id, approval } = outcome;

        if !self.transport.is_alive(conn) {
            debug!("approval for closed {} discarded", conn);
            return;
        }
        if self.registry.contains(conn) {
            return;
        }

        // The lobby may have filled or started, or the id been taken,
        // while the gate was busy.
        let approval = if approval.is_ok() && self.registry.connection_for(&user_id).is_some() {
            Approval::UnknownUser
        } else if approval.is_ok() {
            LobbyRulesGate::check(&ApprovalRequest {
                connection: conn,
                user_id: user_id.clone(),
                lobby_id: lobby.lobby_id().map(str::to_string),
                lobby_state: lobby.state(),
                user_count: lobby.user_count(),
                max_players: lobby.max_players(),
            })
        } else {
            approval
        };

        if !approval.is_ok() {
            self.refuse(conn, &user_id, approval);
            return;
        }

        let reply = Envelope::new(self.local_id.clone(), RelayMessage::PlayerApprovalState(approval));
        send_to(&mut self.transport, conn, &reply);

        for user in lobby.users() {
            for message in snapshot(user) {
                send_to(&mut self.transport, conn, &Envelope::new(user.id().clone(), message));
            }
        }

        let mut user = lobby.user(&user_id)
            .cloned()
            .unwrap_or_else(|| LobbyUser::new(user_id.clone(), user_id.short()));
        user.approve();
        user.set_status(UserStatus::Lobby);
        let joined = lobby.add_user(user);

        self.registry.add(conn, user_id.clone());
        info!("admitted {} on {}", user_id.short(), conn);
        if joined {
            self.bus.publish(LobbyEvent::UserJoined(user_id));
        }
    }

    /// Tell the link why it was refused, then close it. A link that is
    /// already closed gets nothing.
    fn refuse(&mut self, conn: ConnectionId, user_id: &UserId, approval: Approval) {
        if !self.transport.is_alive(conn) {
            debug!("{} already closed; rejection of {} dropped", conn, user_id.short());
            self.links.remove(&conn);
            return;
        }
        let reply = Envelope::new(self.local_id.clone(), RelayMessage::PlayerApprovalState(approval));
        send_to(&mut self.transport, conn, &reply);

        info!("rejected {} on {}: {:?}", user_id.short(), conn, approval);
        self.transport.disconnect(conn);
        self.links.remove(&conn);
    }

    fn drop_user(&mut self, lobby: &mut LocalLobby, user: &UserId) {
        if lobby.remove_user(user).is_some() {
            self.bus.publish(LobbyEvent::UserLeft(user.clone()));
        }
    }

    fn publish_change(&self, id: &UserId, field: Option<UserField>) {
        if let Some(field) = field {
            self.bus.publish(LobbyEvent::UserChanged { id: id.clone(), field });
        }
    }

    fn broadcast(&mut self, message: RelayMessage) -> usize {
        let envelope = Envelope::new(self.local_id.clone(), message);
        forward(&mut self.transport, &self.registry, None, &envelope)
    }

    // =========================================================================
    // ROUND AUTHORITY
    // =========================================================================

    fn evaluate(&mut self, lobby: &mut LocalLobby) {
        let all_ready = lobby.all_ready();
        match lobby.round_mut().evaluate(all_ready) {
            Some(CountdownTransition::Start) => {
                info!("all {} users ready, starting countdown", lobby.user_count());
                self.bus.publish(LobbyEvent::StartCountdown);
                self.broadcast(RelayMessage::StartCountdown);
            }
            Some(CountdownTransition::Cancel) => {
                info!("countdown cancelled");
                self.bus.publish(LobbyEvent::CancelCountdown);
                self.broadcast(RelayMessage::CancelCountdown);
            }
            None => {}
        }
    }

    /// Change the host's own status, tell everyone and re-check readiness.
    pub fn set_local_status(&mut self, lobby: &mut LocalLobby, status: UserStatus) {
        let id = self.local_id.clone();
        let field = lobby.user_mut(&id).and_then(|u| u.set_status(status));
        if field.is_none() {
            return;
        }
        self.publish_change(&id, field);
        self.broadcast(RelayMessage::ReadyState(status));
        self.evaluate(lobby);
    }

    /// Rename the host.
    pub fn set_local_name(&mut self, lobby: &mut LocalLobby, name: &str) {
        let id = self.local_id.clone();
        let field = lobby.user_mut(&id).and_then(|u| u.set_display_name(name));
        if field.is_some() {
            self.publish_change(&id, field);
            self.broadcast(RelayMessage::PlayerName(name.to_string()));
        }
    }

    /// Change the host's emote.
    pub fn set_local_emote(&mut self, lobby: &mut LocalLobby, emote: Emote) {
        let id = self.local_id.clone();
        let field = lobby.user_mut(&id).and_then(|u| u.set_emote(emote));
        if field.is_some() {
            self.publish_change(&id, field);
            self.broadcast(RelayMessage::Emote(emote));
        }
    }

    /// CountDown -> InGame. Out-of-order calls are logged and leave the
    /// round untouched.
    pub fn complete_countdown(&mut self, lobby: &mut LocalLobby) -> Result<(), CountdownError> {
        if let Err(e) = lobby.round_mut().complete_countdown() {
            warn!("inconsistent state: {}", e);
            return Err(e);
        }
        info!("countdown complete, game running");
        self.broadcast(RelayMessage::ConfirmInGame);
        self.bus.publish(LobbyEvent::ConfirmInGameState);
        self.set_local_status(lobby, UserStatus::InGame);
        Ok(())
    }

    /// InGame -> Lobby.
    pub fn end_game(&mut self, lobby: &mut LocalLobby) -> Result<(), CountdownError> {
        if let Err(e) = lobby.round_mut().end_game() {
            warn!("inconsistent state: {}", e);
            return Err(e);
        }
        info!("game ended, back to lobby");
        self.broadcast(RelayMessage::EndInGame);
        self.bus.publish(LobbyEvent::EndGame);
        self.set_local_status(lobby, UserStatus::Lobby);
        Ok(())
    }

    /// Close every link and forget all pending approvals.
    pub fn leave(&mut self) {
        let mut closing: BTreeSet<ConnectionId> = self.registry.clear().into_iter().collect();
        closing.append(&mut self.links);
        for conn in closing {
            self.transport.disconnect(conn);
        }
        self.pending.clear();
        info!("host left; all links closed");
    }
}

/// Messages that describe one user to a newcomer.
fn snapshot(user: &LobbyUser) -> [RelayMessage; 3] {
    [
        RelayMessage::PlayerName(user.display_name().to_string()),
        RelayMessage::Emote(user.emote()),
        RelayMessage::ReadyState(user.status()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::drain;
    use crate::lobby::countdown::LobbyState;
    use crate::network::memory::{MemoryRelay, MemoryTransport};

    fn setup() -> (MemoryRelay, RelayHost<MemoryTransport>, LocalLobby, MessageBus) {
        let relay = MemoryRelay::new();
        let bus = MessageBus::default();
        let host_id = UserId::new("host");
        let mut lobby = LocalLobby::default();
        lobby.set_lobby_id("lobby-1");
        lobby.add_user(LobbyUser::new(host_id.clone(), "Host"));
        let mut host = RelayHost::new(relay.host(), host_id, Arc::new(LobbyRulesGate), bus.clone());
        host.start(&mut lobby);
        (relay, host, lobby, bus)
    }

    fn send(client: &mut MemoryTransport, sender: &str, message: RelayMessage) {
        let link = client.link().unwrap();
        let bytes = Envelope::new(UserId::new(sender), message).to_bytes().unwrap();
        client.send(link, bytes).unwrap();
    }

    fn received(client: &mut MemoryTransport) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Some(event) = client.poll_event() {
            if let TransportEvent::Data(_, data) = event {
                out.push(Envelope::from_bytes(&data).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_host_starts_approved_in_lobby() {
        let (_relay, _host, lobby, _bus) = setup();
        let me = lobby.user(&UserId::new("host")).unwrap();
        assert!(me.is_host());
        assert!(me.is_approved());
        assert_eq!(me.status(), UserStatus::Lobby);
    }

    #[tokio::test]
    async fn test_admission_sends_snapshot_then_registers() {
        let (relay, mut host, mut lobby, bus) = setup();
        let mut rx = bus.subscribe();
        let mut client = relay.connect().unwrap();

        send(&mut client, "alice", RelayMessage::NewPlayer);
        host.tick(&mut lobby);

        let messages = received(&mut client);
        assert_eq!(messages[0].message, RelayMessage::PlayerApprovalState(Approval::Ok));
        assert_eq!(
            messages[1..].iter().map(|e| e.message.clone()).collect::<Vec<_>>(),
            vec![
                RelayMessage::PlayerName("Host".into()),
                RelayMessage::Emote(Emote::None),
                RelayMessage::ReadyState(UserStatus::Lobby),
            ]
        );
        assert!(messages[1..].iter().all(|e| e.sender == UserId::new("host")));

        assert_eq!(host.registry().len(), 1);
        assert!(lobby.is_approved(&UserId::new("alice")));
        assert!(drain(&mut rx).contains(&LobbyEvent::UserJoined(UserId::new("alice"))));
    }

    #[tokio::test]
    async fn test_duplicate_new_player_ignored() {
        let (relay, mut host, mut lobby, _bus) = setup();
        let mut client = relay.connect().unwrap();

        send(&mut client, "alice", RelayMessage::NewPlayer);
        send(&mut client, "alice", RelayMessage::NewPlayer);
        host.tick(&mut lobby);
        send(&mut client, "alice", RelayMessage::NewPlayer);
        host.tick(&mut lobby);

        let approvals = received(&mut client)
            .into_iter()
            .filter(|e| e.msg_type() == crate::network::protocol::MsgType::PlayerApprovalState)
            .count();
        assert_eq!(approvals, 1);
        assert_eq!(host.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_full_lobby_rejects_and_disconnects() {
        let relay = MemoryRelay::new();
        let bus = MessageBus::default();
        let mut lobby = LocalLobby::new(1);
        lobby.add_user(LobbyUser::new(UserId::new("host"), "Host"));
        let mut host = RelayHost::new(relay.host(), UserId::new("host"), Arc::new(LobbyRulesGate), bus);
        host.start(&mut lobby);

        let mut client = relay.connect().unwrap();
        let link = client.link().unwrap();
        send(&mut client, "alice", RelayMessage::NewPlayer);
        host.tick(&mut lobby);

        let messages = received(&mut client);
        assert_eq!(messages[0].message, RelayMessage::PlayerApprovalState(Approval::LobbyFull));
        assert!(!host.transport().is_alive(link));
        assert!(host.registry().is_empty());
        assert!(!lobby.contains(&UserId::new("alice")));
    }

    #[tokio::test]
    async fn test_rejection_repeated_on_same_link() {
        let relay = MemoryRelay::new();
        let mut lobby = LocalLobby::new(1);
        lobby.add_user(LobbyUser::new(UserId::new("host"), "Host"));
        let mut host = RelayHost::new(
            relay.host(),
            UserId::new("host"),
            Arc::new(LobbyRulesGate),
            MessageBus::default(),
        );
        host.start(&mut lobby);

        let mut client = relay.connect().unwrap();
        let link = client.link().unwrap();
        send(&mut client, "alice", RelayMessage::NewPlayer);
        host.tick(&mut lobby);

        host.refuse(link, &UserId::new("alice"), Approval::LobbyFull);
        host.tick(&mut lobby);
        host.refuse(link, &UserId::new("alice"), Approval::LobbyFull);

        let approvals: Vec<_> = received(&mut client)
            .into_iter()
            .map(|e| e.message)
            .filter(|m| matches!(m, RelayMessage::PlayerApprovalState(_)))
            .collect();
        assert_eq!(approvals, vec![RelayMessage::PlayerApprovalState(Approval::LobbyFull)]);
        assert!(!host.transport().is_alive(link));
        assert!(host.registry().is_empty());
        assert_eq!(relay.open_links(), 0);
    }

    #[tokio::test]
    async fn test_same_user_on_two_links() {
        let (relay, mut host, mut lobby, bus) = setup();
        let mut rx = bus.subscribe();
        let mut first = relay.connect().unwrap();
        let mut second = relay.connect().unwrap();
        let first_link = first.link().unwrap();
        let second_link = second.link().unwrap();

        send(&mut first, "alice", RelayMessage::NewPlayer);
        send(&mut second, "alice", RelayMessage::NewPlayer);
        host.tick(&mut lobby);

        let to_first = received(&mut first);
        assert_eq!(to_first[0].message, RelayMessage::PlayerApprovalState(Approval::Ok));
        assert_eq!(host.registry().connection_for(&UserId::new("alice")), Some(first_link));

        let to_second = received(&mut second);
        assert_eq!(
            to_second.iter().map(|e| e.message.clone()).collect::<Vec<_>>(),
            vec![RelayMessage::PlayerApprovalState(Approval::UnknownUser)]
        );
        assert!(!host.transport().is_alive(second_link));
        assert_eq!(host.registry().len(), 1);
        assert_eq!(
            drain(&mut rx).iter().filter(|e| matches!(e, LobbyEvent::UserJoined(_))).count(),
            1
        );

        // A later claim of an id that is already admitted is refused too.
        let mut third = relay.connect().unwrap();
        let third_link = third.link().unwrap();
        send(&mut third, "alice", RelayMessage::NewPlayer);
        host.tick(&mut lobby);
        assert_eq!(
            received(&mut third)[0].message,
            RelayMessage::PlayerApprovalState(Approval::UnknownUser)
        );
        assert!(!host.transport().is_alive(third_link));
        assert!(host.transport().is_alive(first_link));
    }

    #[tokio::test]
    async fn test_approval_for_vanished_client_is_noop() {
        let (relay, mut host, mut lobby, _bus) = setup();
        let mut client = relay.connect().unwrap();
        let link = client.link().unwrap();

        send(&mut client, "alice", RelayMessage::NewPlayer);
        // Gone before the host gets to the request.
        drop(client);
        host.tick(&mut lobby);

        assert!(!host.transport().is_alive(link));
        assert!(host.registry().is_empty());
        assert!(!lobby.contains(&UserId::new("alice")));
    }

    #[tokio::test]
    async fn test_host_only_types_from_clients_dropped() {
        let (relay, mut host, mut lobby, bus) = setup();
        let mut rx = bus.subscribe();
        let mut client = relay.connect().unwrap();
        send(&mut client, "alice", RelayMessage::NewPlayer);
        host.tick(&mut lobby);
        drain(&mut rx);

        send(&mut client, "alice", RelayMessage::StartCountdown);
        host.tick(&mut lobby);

        assert_eq!(lobby.state(), LobbyState::Lobby);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_player_disconnect_closes_link() {
        let (relay, mut host, mut lobby, bus) = setup();
        let mut rx = bus.subscribe();
        let mut client = relay.connect().unwrap();
        let link = client.link().unwrap();
        send(&mut client, "alice", RelayMessage::NewPlayer);
        host.tick(&mut lobby);

        send(&mut client, "alice", RelayMessage::PlayerDisconnect);
        host.tick(&mut lobby);

        assert!(!host.transport().is_alive(link));
        assert!(host.registry().is_empty());
        assert!(!lobby.contains(&UserId::new("alice")));
        assert!(drain(&mut rx).contains(&LobbyEvent::UserLeft(UserId::new("alice"))));
    }

    #[tokio::test]
    async fn test_out_of_order_complete_is_reported() {
        let (_relay, mut host, mut lobby, _bus) = setup();
        assert_eq!(
            host.complete_countdown(&mut lobby),
            Err(CountdownError::NotCountingDown(LobbyState::Lobby))
        );
        assert_eq!(lobby.state(), LobbyState::Lobby);
    }

    #[tokio::test]
    async fn test_solo_host_round() {
        let (_relay, mut host, mut lobby, bus) = setup();
        let mut rx = bus.subscribe();

        host.set_local_status(&mut lobby, UserStatus::Ready);
        assert_eq!(lobby.state(), LobbyState::CountDown);
        host.complete_countdown(&mut lobby).unwrap();
        assert_eq!(lobby.state(), LobbyState::InGame);
        host.end_game(&mut lobby).unwrap();
        assert_eq!(lobby.state(), LobbyState::Lobby);
        assert_eq!(lobby.user(&UserId::new("host")).unwrap().status(), UserStatus::Lobby);

        let events: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| !matches!(e, LobbyEvent::UserChanged { .. }))
            .collect();
        assert_eq!(
            events,
            vec![LobbyEvent::StartCountdown, LobbyEvent::ConfirmInGameState, LobbyEvent::EndGame]
        );
    }

    #[tokio::test]
    async fn test_leave_closes_everything() {
        let (relay, mut host, mut lobby, _bus) = setup();
        let mut a = relay.connect().unwrap();
        let _b = relay.connect().unwrap();
        send(&mut a, "alice", RelayMessage::NewPlayer);
        host.tick(&mut lobby);

        host.leave();
        assert_eq!(relay.open_links(), 0);
        assert!(host.registry().is_empty());
    }
}
