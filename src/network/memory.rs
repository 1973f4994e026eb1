//! In-Process Relay
//!
//! A relay hub that lives in memory. One host endpoint, any number of
//! client endpoints, each client owning exactly one link to the host.
//! Used by the demo binary and by tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::network::transport::{ConnectionId, Transport, TransportError, TransportEvent};

#[derive(Debug, Default)]
struct Hub {
    next_link: u64,
    host_online: bool,
    links: BTreeMap<ConnectionId, bool>,
    host_accepts: VecDeque<ConnectionId>,
    host_inbox: VecDeque<TransportEvent>,
    client_inboxes: BTreeMap<ConnectionId, VecDeque<TransportEvent>>,
}

impl Hub {
    fn is_open(&self, conn: ConnectionId) -> bool {
        self.links.get(&conn).copied().unwrap_or(false)
    }

    /// Close a link and tell the listed sides about it.
    fn close(&mut self, conn: ConnectionId, notify_host: bool, notify_client: bool) -> bool {
        if !self.is_open(conn) {
            return false;
        }
        self.links.insert(conn, false);
        if notify_host {
            self.host_inbox.push_back(TransportEvent::Disconnected(conn));
        }
        if notify_client {
            if let Some(inbox) = self.client_inboxes.get_mut(&conn) {
                inbox.push_back(TransportEvent::Disconnected(conn));
            }
        }
        true
    }
}

/// Handle to an in-memory relay. Cloning shares the hub.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bring the host endpoint online.
    pub fn host(&self) -> MemoryTransport {
        self.lock().host_online = true;
        MemoryTransport {
            hub: self.hub.clone(),
            role: Role::Host,
        }
    }

    /// Open a link to the host.
    pub fn connect(&self) -> Result<MemoryTransport, TransportError> {
        let mut hub = self.lock();
        if !hub.host_online {
            return Err(TransportError::Unreachable("no host on this relay".into()));
        }
        let link = ConnectionId(hub.next_link);
        hub.next_link += 1;
        hub.links.insert(link, true);
        hub.host_accepts.push_back(link);
        hub.client_inboxes
            .entry(link)
            .or_default()
            .push_back(TransportEvent::Connected(link));
        debug!("memory relay opened {}", link);

        Ok(MemoryTransport {
            hub: self.hub.clone(),
            role: Role::Client(link),
        })
    }

    /// Kill a link from the relay side, as if it timed out.
    pub fn sever(&self, conn: ConnectionId) {
        self.lock().close(conn, true, true);
    }

    /// Number of open links.
    pub fn open_links(&self) -> usize {
        self.lock().links.values().filter(|open| **open).count()
    }
}

#[derive(Debug, Clone, Copy)]
enum Role {
    Host,
    Client(ConnectionId),
}

/// One endpoint of a [`MemoryRelay`].
#[derive(Debug)]
pub struct MemoryTransport {
    hub: Arc<Mutex<Hub>>,
    role: Role,
}

impl MemoryTransport {
    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The client's link to the host. `None` on the host endpoint.
    pub fn link(&self) -> Option<ConnectionId> {
        match self.role {
            Role::Host => None,
            Role::Client(link) => Some(link),
        }
    }
}

impl Transport for MemoryTransport {
    fn accept(&mut self) -> Option<ConnectionId> {
        match self.role {
            Role::Host => self.lock().host_accepts.pop_front(),
            Role::Client(_) => None,
        }
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        let mut hub = self.lock();
        match self.role {
            Role::Host => hub.host_inbox.pop_front(),
            Role::Client(link) => hub.client_inboxes.get_mut(&link)?.pop_front(),
        }
    }

    fn send(&mut self, conn: ConnectionId, data: Vec<u8>) -> Result<(), TransportError> {
        let mut hub = self.lock();
        if !hub.is_open(conn) {
            return Err(TransportError::ConnectionClosed(conn));
        }
        match self.role {
            Role::Host => {
                hub.client_inboxes
                    .entry(conn)
                    .or_default()
                    .push_back(TransportEvent::Data(conn, data));
            }
            Role::Client(link) => {
                if link != conn {
                    return Err(TransportError::ConnectionClosed(conn));
                }
                hub.host_inbox.push_back(TransportEvent::Data(conn, data));
            }
        }
        Ok(())
    }

    fn disconnect(&mut self, conn: ConnectionId) {
        let mut hub = self.lock();
        match self.role {
            Role::Host => {
                hub.close(conn, false, true);
            }
            Role::Client(link) if link == conn => {
                hub.close(conn, true, false);
            }
            Role::Client(_) => {}
        }
    }

    fn is_alive(&self, conn: ConnectionId) -> bool {
        self.lock().is_open(conn)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let mut hub = self.lock();
        match self.role {
            Role::Host => {
                hub.host_online = false;
                let open: Vec<_> = hub.links.iter()
                    .filter(|(_, open)| **open)
                    .map(|(id, _)| *id)
                    .collect();
                for conn in open {
                    hub.close(conn, false, true);
                }
            }
            Role::Client(link) => {
                hub.close(link, true, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_requires_host() {
        let relay = MemoryRelay::new();
        assert!(matches!(relay.connect(), Err(TransportError::Unreachable(_))));
    }

    #[test]
    fn test_client_to_host_roundtrip() {
        let relay = MemoryRelay::new();
        let mut host = relay.host();
        let mut client = relay.connect().unwrap();
        let link = client.link().unwrap();

        assert_eq!(client.poll_event(), Some(TransportEvent::Connected(link)));
        assert_eq!(host.accept(), Some(link));
        assert_eq!(host.accept(), None);

        client.send(link, vec![1, 2, 3]).unwrap();
        assert_eq!(host.poll_event(), Some(TransportEvent::Data(link, vec![1, 2, 3])));

        host.send(link, vec![9]).unwrap();
        assert_eq!(client.poll_event(), Some(TransportEvent::Data(link, vec![9])));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let relay = MemoryRelay::new();
        let mut host = relay.host();
        let mut client = relay.connect().unwrap();
        let link = client.link().unwrap();
        client.poll_event();

        host.disconnect(link);
        host.disconnect(link);
        assert!(!host.is_alive(link));
        assert_eq!(client.poll_event(), Some(TransportEvent::Disconnected(link)));
        assert_eq!(client.poll_event(), None);
        assert!(host.send(link, vec![1]).is_err());
    }

    #[test]
    fn test_dropping_client_closes_link() {
        let relay = MemoryRelay::new();
        let mut host = relay.host();
        let client = relay.connect().unwrap();
        let link = client.link().unwrap();
        drop(client);

        assert!(!host.is_alive(link));
        assert_eq!(host.poll_event(), Some(TransportEvent::Disconnected(link)));
        assert_eq!(relay.open_links(), 0);
    }

    #[test]
    fn test_sever_notifies_both_sides() {
        let relay = MemoryRelay::new();
        let mut host = relay.host();
        let mut client = relay.connect().unwrap();
        let link = client.link().unwrap();
        client.poll_event();

        relay.sever(link);
        assert_eq!(host.poll_event(), Some(TransportEvent::Disconnected(link)));
        assert_eq!(client.poll_event(), Some(TransportEvent::Disconnected(link)));
    }
}
