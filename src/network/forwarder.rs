//! Forwarder
//!
//! Host-side fan-out. Decides whether an inbound message may be relayed
//! and re-sends it, with the original sender id, to every other
//! registered connection.

use tracing::{debug, warn};

use crate::lobby::local_lobby::LocalLobby;
use crate::lobby::user::UserId;
use crate::network::protocol::{Envelope, MsgType};
use crate::network::registry::ConnectionRegistry;
use crate::network::transport::{ConnectionId, Transport};

/// Whether a message received on `conn` may be acted on and relayed.
///
/// The sender must be an approved lobby user owning `conn`. `NewPlayer`
/// is exempt because it is what starts approval. Messages claiming to
/// come from the local user are never accepted from the wire.
pub fn can_forward(
    lobby: &LocalLobby,
    registry: &ConnectionRegistry,
    local_id: &UserId,
    conn: ConnectionId,
    msg_type: MsgType,
    sender: &UserId,
) -> bool {
    if sender == local_id {
        return false;
    }
    if msg_type == MsgType::NewPlayer {
        return true;
    }
    lobby.is_approved(sender) && registry.user_for(conn) == Some(sender)
}

/// Encode once and send to every registered connection except `origin`.
/// Returns how many connections the frame was queued on.
pub fn forward<T: Transport>(
    transport: &mut T,
    registry: &ConnectionRegistry,
    origin: Option<ConnectionId>,
    envelope: &Envelope,
) -> usize {
    let bytes = match envelope.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("failed to encode {:?}: {}", envelope.msg_type(), e);
            return 0;
        }
    };

    let targets: Vec<ConnectionId> = registry.connections()
        .filter(|conn| Some(*conn) != origin)
        .collect();

    let mut sent = 0;
    for conn in targets {
        match transport.send(conn, bytes.clone()) {
            Ok(()) => sent += 1,
            Err(e) => debug!("dropped {:?} to {}: {}", envelope.msg_type(), conn, e),
        }
    }
    sent
}

/// Send one message to one connection, logging failures.
pub fn send_to<T: Transport>(transport: &mut T, conn: ConnectionId, envelope: &Envelope) -> bool {
    let bytes = match envelope.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("failed to encode {:?}: {}", envelope.msg_type(), e);
            return false;
        }
    };
    match transport.send(conn, bytes) {
        Ok(()) => true,
        Err(e) => {
            debug!("dropped {:?} to {}: {}", envelope.msg_type(), conn, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::user::LobbyUser;
    use crate::network::memory::MemoryRelay;
    use crate::network::protocol::RelayMessage;
    use crate::network::transport::TransportEvent;
    use proptest::prelude::*;

    fn approved(id: &str) -> LobbyUser {
        let mut user = LobbyUser::new(UserId::new(id), id);
        user.approve();
        user
    }

    #[test]
    fn test_new_player_bypasses_approval() {
        let lobby = LocalLobby::default();
        let registry = ConnectionRegistry::new();
        let host = UserId::new("host");

        assert!(can_forward(
            &lobby, &registry, &host, ConnectionId(1), MsgType::NewPlayer, &UserId::new("x")
        ));
        assert!(!can_forward(
            &lobby, &registry, &host, ConnectionId(1), MsgType::PlayerName, &UserId::new("x")
        ));
    }

    #[test]
    fn test_sender_must_own_connection() {
        let mut lobby = LocalLobby::default();
        lobby.add_user(approved("a"));
        lobby.add_user(approved("b"));
        let mut registry = ConnectionRegistry::new();
        registry.add(ConnectionId(1), UserId::new("a"));
        registry.add(ConnectionId(2), UserId::new("b"));
        let host = UserId::new("host");

        assert!(can_forward(
            &lobby, &registry, &host, ConnectionId(1), MsgType::Emote, &UserId::new("a")
        ));
        // b spoofed on a's link.
        assert!(!can_forward(
            &lobby, &registry, &host, ConnectionId(1), MsgType::Emote, &UserId::new("b")
        ));
    }

    #[test]
    fn test_unapproved_user_rejected() {
        let mut lobby = LocalLobby::default();
        lobby.add_user(LobbyUser::new(UserId::new("a"), "a"));
        let mut registry = ConnectionRegistry::new();
        registry.add(ConnectionId(1), UserId::new("a"));

        assert!(!can_forward(
            &lobby, &registry, &UserId::new("host"), ConnectionId(1), MsgType::ReadyState, &UserId::new("a")
        ));
    }

    #[test]
    fn test_local_sender_rejected() {
        let mut lobby = LocalLobby::default();
        lobby.add_user(approved("host"));
        let registry = ConnectionRegistry::new();
        let host = UserId::new("host");

        assert!(!can_forward(&lobby, &registry, &host, ConnectionId(1), MsgType::NewPlayer, &host));
    }

    fn drain_data(client: &mut crate::network::memory::MemoryTransport) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(event) = client.poll_event() {
            if let TransportEvent::Data(_, data) = event {
                out.push(data);
            }
        }
        out
    }

    proptest! {
        #[test]
        fn prop_forward_never_echoes(clients in 1usize..6, origin_index in 0usize..6) {
            let relay = MemoryRelay::new();
            let mut host = relay.host();
            let mut registry = ConnectionRegistry::new();
            let mut endpoints = Vec::new();

            for i in 0..clients {
                let endpoint = relay.connect().unwrap();
                let link = endpoint.link().unwrap();
                registry.add(link, UserId::new(format!("user-{i}")));
                endpoints.push(endpoint);
            }

            let origin_index = origin_index % clients;
            let origin = endpoints[origin_index].link().unwrap();
            let envelope = Envelope::new(
                UserId::new(format!("user-{origin_index}")),
                RelayMessage::PlayerName("renamed".into()),
            );

            let sent = forward(&mut host, &registry, Some(origin), &envelope);
            prop_assert_eq!(sent, clients - 1);

            for (i, endpoint) in endpoints.iter_mut().enumerate() {
                let received = drain_data(endpoint);
                if i == origin_index {
                    prop_assert!(received.is_empty());
                } else {
                    prop_assert_eq!(received.len(), 1);
                    prop_assert_eq!(Envelope::from_bytes(&received[0]).unwrap(), envelope.clone());
                }
            }
        }
    }
}
