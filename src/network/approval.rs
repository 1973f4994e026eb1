//! Approval Gate
//!
//! Decides whether a newly connected client may join the forwarding
//! set. A decision can depend on slow external state (the lobby
//! directory), so it is a future. The host keeps in-flight decisions in
//! [`PendingApprovals`] and collects finished ones each tick without
//! blocking.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tracing::debug;

use crate::lobby::countdown::LobbyState;
use crate::lobby::user::UserId;
use crate::network::protocol::Approval;
use crate::network::transport::ConnectionId;

/// Everything a gate may look at.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    /// Link asking to join.
    pub connection: ConnectionId,
    /// User the client claims to be.
    pub user_id: UserId,
    /// Directory id of the lobby.
    pub lobby_id: Option<String>,
    /// Round state at request time.
    pub lobby_state: LobbyState,
    /// Users currently in the table.
    pub user_count: usize,
    /// Capacity.
    pub max_players: usize,
}

/// Produces exactly one [`Approval`] per request.
pub trait ApprovalGate: Send + Sync {
    /// Decide on a request.
    fn approve(&self, request: ApprovalRequest) -> BoxFuture<'static, Approval>;
}

/// Local rules only: round not started, room left.
#[derive(Debug, Clone, Copy, Default)]
pub struct LobbyRulesGate;

impl LobbyRulesGate {
    /// Apply the rules synchronously.
    pub fn check(request: &ApprovalRequest) -> Approval {
        if request.lobby_state != LobbyState::Lobby {
            return Approval::GameAlreadyStarted;
        }
        if request.user_count >= request.max_players {
            return Approval::LobbyFull;
        }
        Approval::Ok
    }
}

impl ApprovalGate for LobbyRulesGate {
    fn approve(&self, request: ApprovalRequest) -> BoxFuture<'static, Approval> {
        let result = Self::check(&request);
        async move { result }.boxed()
    }
}

// =============================================================================
// DIRECTORY-BACKED GATE
// =============================================================================

/// External lobby directory, queried for membership.
pub trait MemberDirectory: Send + Sync {
    /// Whether the directory lists `user` in `lobby_id`.
    fn is_member(&self, lobby_id: &str, user: &UserId) -> BoxFuture<'static, bool>;
}

/// Local rules, then wait until the directory lists the user.
///
/// Directory membership can lag the relay connection, so the gate polls
/// until the user shows up or the timeout elapses.
pub struct DirectoryGate<D> {
    directory: Arc<D>,
    timeout: Duration,
    poll_interval: Duration,
}

impl<D: MemberDirectory + 'static> DirectoryGate<D> {
    /// Create with a membership timeout.
    pub fn new(directory: Arc<D>, timeout: Duration) -> Self {
        Self {
            directory,
            timeout,
            poll_interval: Duration::from_millis(250),
        }
    }

    /// Override how often the directory is re-queried.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl<D: MemberDirectory + 'static> ApprovalGate for DirectoryGate<D> {
    fn approve(&self, request: ApprovalRequest) -> BoxFuture<'static, Approval> {
        let rules = LobbyRulesGate::check(&request);
        let directory = self.directory.clone();
        let timeout = self.timeout;
        let poll_interval = self.poll_interval;

        async move {
            if !rules.is_ok() {
                return rules;
            }
            let Some(lobby_id) = request.lobby_id else {
                return Approval::UnknownUser;
            };

            let wait_for_member = async {
                loop {
                    if directory.is_member(&lobby_id, &request.user_id).await {
                        return;
                    }
                    tokio::time::sleep(poll_interval).await;
                }
            };

            match tokio::time::timeout(timeout, wait_for_member).await {
                Ok(()) => Approval::Ok,
                Err(_) => {
                    debug!("user {} never appeared in lobby {}", request.user_id.short(), lobby_id);
                    Approval::UnknownUser
                }
            }
        }
        .boxed()
    }
}

// =============================================================================
// PENDING APPROVALS
// =============================================================================

/// A finished approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    /// Link that asked.
    pub connection: ConnectionId,
    /// User it claimed.
    pub user_id: UserId,
    /// Decision.
    pub approval: Approval,
}

/// In-flight approvals, at most one per connection and one per claimed
/// user id.
#[derive(Default)]
pub struct PendingApprovals {
    in_flight: FuturesUnordered<BoxFuture<'static, ApprovalOutcome>>,
    connections: BTreeMap<ConnectionId, UserId>,
}

impl PendingApprovals {
    /// Nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an approval. Returns false if one is already running for
    /// this connection or for the user it claims.
    pub fn start(&mut self, gate: &dyn ApprovalGate, request: ApprovalRequest) -> bool {
        if self.is_pending(request.connection) || self.is_claimed(&request.user_id) {
            return false;
        }
        self.connections.insert(request.connection, request.user_id.clone());
        let connection = request.connection;
        let user_id = request.user_id.clone();
        let decision = gate.approve(request);
        self.in_flight.push(
            async move {
                ApprovalOutcome {
                    connection,
                    user_id,
                    approval: decision.await,
                }
            }
            .boxed(),
        );
        true
    }

    /// Whether a connection is waiting for a decision.
    pub fn is_pending(&self, conn: ConnectionId) -> bool {
        self.connections.contains_key(&conn)
    }

    /// Whether some connection is waiting for a decision on `user`.
    pub fn is_claimed(&self, user: &UserId) -> bool {
        self.connections.values().any(|claimed| claimed == user)
    }

    /// Number of decisions outstanding.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Collect every decision that is ready now, without waiting.
    pub fn poll_ready(&mut self) -> Vec<ApprovalOutcome> {
        let mut done = Vec::new();
        while let Some(Some(outcome)) = self.in_flight.next().now_or_never() {
            self.connections.remove(&outcome.connection);
            done.push(outcome);
        }
        done
    }

    /// Wait for the next decision. Returns `None` when nothing is pending.
    pub async fn next_ready(&mut self) -> Option<ApprovalOutcome> {
        let outcome = self.in_flight.next().await?;
        self.connections.remove(&outcome.connection);
        Some(outcome)
    }

    /// Abandon everything in flight.
    pub fn clear(&mut self) {
        self.in_flight = FuturesUnordered::new();
        self.connections.clear();
    }
}
