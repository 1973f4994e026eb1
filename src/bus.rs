//! In-Process Message Bus
//!
//! Decoupled notifications from the relay core to whatever observes it
//! (UI, game flow). One closed enum, one variant per notification, each
//! with its own typed payload.

use tokio::sync::broadcast;

use crate::lobby::user::{UserField, UserId};
use crate::network::protocol::Approval;

/// Notifications published by the relay core and session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    /// All users ready; countdown started.
    StartCountdown,
    /// Someone unreadied during the countdown.
    CancelCountdown,
    /// Countdown completed; game is running.
    ConfirmInGameState,
    /// Game ended; back to the lobby.
    EndGame,
    /// The host admitted the local user.
    ClientUserApproved,
    /// The host refused the local user.
    ApprovalRejected(Approval),
    /// A user appeared in the lobby table.
    UserJoined(UserId),
    /// A user left the lobby table.
    UserLeft(UserId),
    /// A replicated user member changed.
    UserChanged {
        /// Which user.
        id: UserId,
        /// Which member.
        field: UserField,
    },
    /// Message for an error popup.
    DisplayErrorPopup(String),
    /// The link to the host was lost.
    HostDisconnected,
    /// A failed relay join will be retried.
    JoinRetryScheduled,
    /// Joining failed for good; back to the join menu.
    JoinFailed,
}

/// Broadcast bus. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct MessageBus {
    tx: broadcast::Sender<LobbyEvent>,
}

impl MessageBus {
    /// Create with the given backlog per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to every current subscriber. Having none is fine.
    pub fn publish(&self, event: LobbyEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<LobbyEvent> {
        self.tx.subscribe()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Drain everything currently queued on a receiver.
pub fn drain(rx: &mut broadcast::Receiver<LobbyEvent>) -> Vec<LobbyEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = MessageBus::default();
        bus.publish(LobbyEvent::StartCountdown);
    }

    #[test]
    fn test_subscribers_see_events_in_order() {
        let bus = MessageBus::default();
        let mut rx = bus.subscribe();
        bus.publish(LobbyEvent::StartCountdown);
        bus.publish(LobbyEvent::CancelCountdown);

        assert_eq!(
            drain(&mut rx),
            vec![LobbyEvent::StartCountdown, LobbyEvent::CancelCountdown]
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_clones_share_channel() {
        let bus = MessageBus::default();
        let mut rx = bus.subscribe();
        bus.clone().publish(LobbyEvent::EndGame);
        assert_eq!(drain(&mut rx), vec![LobbyEvent::EndGame]);
    }
}
