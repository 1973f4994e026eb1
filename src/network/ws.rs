//! WebSocket Relay Transport
//!
//! Relay links over WebSockets. Each link gets a reader and a writer
//! task; the sync [`Transport`] side only touches channels, so the tick
//! loop never awaits I/O.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info};

use crate::network::transport::{ConnectionId, Transport, TransportError, TransportEvent};

enum Outgoing {
    Frame(Vec<u8>),
    Close,
}

/// Sync handle to one running link.
struct LinkHandle {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    alive: Arc<AtomicBool>,
}

impl LinkHandle {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn send(&self, conn: ConnectionId, data: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ConnectionClosed(conn));
        }
        self.outgoing
            .send(Outgoing::Frame(data))
            .map_err(|_| TransportError::ConnectionClosed(conn))
    }

    fn close(&self) {
        self.alive.store(false, Ordering::Release);
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

/// Spawn reader and writer tasks for an established WebSocket.
fn spawn_link<S>(
    ws_stream: WebSocketStream<S>,
    conn: ConnectionId,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> LinkHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
    let alive = Arc::new(AtomicBool::new(true));

    tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            match out {
                Outgoing::Frame(data) => {
                    if ws_sender.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Outgoing::Close => {
                    let _ = ws_sender.close().await;
                    break;
                }
            }
        }
    });

    let reader_alive = alive.clone();
    tokio::spawn(async move {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Binary(data))) => {
                    if events.send(TransportEvent::Data(conn, data)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("{} closed by peer", conn);
                    break;
                }
                Some(Err(e)) => {
                    error!("websocket error on {}: {}", conn, e);
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
        reader_alive.store(false, Ordering::Release);
        let _ = events.send(TransportEvent::Disconnected(conn));
    });

    LinkHandle { outgoing: out_tx, alive }
}

// =============================================================================
// HOST
// =============================================================================

/// Host endpoint: accepts relay links on a TCP listener.
pub struct WsHostTransport {
    local_addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<(ConnectionId, LinkHandle)>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    links: BTreeMap<ConnectionId, LinkHandle>,
    listener_task: JoinHandle<()>,
}

impl WsHostTransport {
    /// Bind and start accepting.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("relay host listening on {}", local_addr);

        let (accepted_tx, accepted) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        let listener_task = tokio::spawn(async move {
            let mut next_id = 0u64;
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("accept error: {}", e);
                        continue;
                    }
                };
                let conn = ConnectionId(next_id);
                next_id += 1;

                let accepted_tx = accepted_tx.clone();
                let events_tx = events_tx.clone();
                tokio::spawn(async move {
                    let ws_stream = match accept_async(stream).await {
                        Ok(ws) => ws,
                        Err(e) => {
                            error!("websocket handshake failed for {}: {}", peer, e);
                            return;
                        }
                    };
                    debug!("{} is {}", peer, conn);
                    let handle = spawn_link(ws_stream, conn, events_tx);
                    let _ = accepted_tx.send((conn, handle));
                });
            }
        });

        Ok(Self {
            local_addr,
            accepted,
            events,
            links: BTreeMap::new(),
            listener_task,
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of links still held.
    pub fn open_links(&self) -> usize {
        self.links.len()
    }
}

impl Transport for WsHostTransport {
    fn accept(&mut self) -> Option<ConnectionId> {
        loop {
            let (conn, handle) = self.accepted.try_recv().ok()?;
            if handle.is_alive() {
                self.links.insert(conn, handle);
                return Some(conn);
            }
            debug!("{} closed before it was accepted", conn);
        }
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        let event = self.events.try_recv().ok()?;
        if let TransportEvent::Disconnected(conn) = event {
            self.links.remove(&conn);
        }
        Some(event)
    }

    fn send(&mut self, conn: ConnectionId, data: Vec<u8>) -> Result<(), TransportError> {
        match self.links.get(&conn) {
            Some(handle) => handle.send(conn, data),
            None => Err(TransportError::ConnectionClosed(conn)),
        }
    }

    fn disconnect(&mut self, conn: ConnectionId) {
        if let Some(handle) = self.links.remove(&conn) {
            handle.close();
        }
    }

    fn is_alive(&self, conn: ConnectionId) -> bool {
        self.links.get(&conn).is_some_and(LinkHandle::is_alive)
    }
}

impl Drop for WsHostTransport {
    fn drop(&mut self) {
        self.listener_task.abort();
        for handle in self.links.values() {
            handle.close();
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Client endpoint: one link to the relay host.
pub struct WsClientTransport {
    link: ConnectionId,
    handle: LinkHandle,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl WsClientTransport {
    /// Connect to a relay host, e.g. `ws://127.0.0.1:7777`.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws_stream, _) = connect_async(url).await?;
        let link = ConnectionId(0);
        let (events_tx, events) = mpsc::unbounded_channel();
        let _ = events_tx.send(TransportEvent::Connected(link));
        let handle = spawn_link(ws_stream, link, events_tx);
        info!("connected to relay {}", url);
        Ok(Self { link, handle, events })
    }

    /// The link to the host.
    pub fn link(&self) -> ConnectionId {
        self.link
    }
}

impl Transport for WsClientTransport {
    fn accept(&mut self) -> Option<ConnectionId> {
        None
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }

    fn send(&mut self, conn: ConnectionId, data: Vec<u8>) -> Result<(), TransportError> {
        if conn != self.link {
            return Err(TransportError::ConnectionClosed(conn));
        }
        self.handle.send(conn, data)
    }

    fn disconnect(&mut self, conn: ConnectionId) {
        if conn == self.link {
            self.handle.close();
        }
    }

    fn is_alive(&self, conn: ConnectionId) -> bool {
        conn == self.link && self.handle.is_alive()
    }
}

impl Drop for WsClientTransport {
    fn drop(&mut self) {
        self.handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_for<T: Transport>(transport: &mut T) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(event) = transport.poll_event() {
                    return event;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no transport event within 5s")
    }

    async fn wait_accept(host: &mut WsHostTransport) -> ConnectionId {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(conn) = host.accept() {
                    return conn;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no connection within 5s")
    }

    #[tokio::test]
    async fn test_websocket_exchange() {
        let mut host = WsHostTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let url = format!("ws://{}", host.local_addr());
        let mut client = WsClientTransport::connect(&url).await.unwrap();
        let link = client.link();

        assert_eq!(wait_for(&mut client).await, TransportEvent::Connected(link));
        let conn = wait_accept(&mut host).await;
        assert!(host.is_alive(conn));

        client.send(link, vec![1, 2, 3]).unwrap();
        assert_eq!(wait_for(&mut host).await, TransportEvent::Data(conn, vec![1, 2, 3]));

        host.send(conn, vec![7]).unwrap();
        assert_eq!(wait_for(&mut client).await, TransportEvent::Data(link, vec![7]));
    }

    #[tokio::test]
    async fn test_host_disconnect_reaches_client() {
        let mut host = WsHostTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let url = format!("ws://{}", host.local_addr());
        let mut client = WsClientTransport::connect(&url).await.unwrap();
        let link = client.link();
        wait_for(&mut client).await;
        let conn = wait_accept(&mut host).await;

        host.disconnect(conn);
        host.disconnect(conn);
        assert!(!host.is_alive(conn));
        assert!(host.send(conn, vec![1]).is_err());
        assert_eq!(wait_for(&mut client).await, TransportEvent::Disconnected(link));
        assert!(!client.is_alive(link));
        assert_eq!(host.open_links(), 0);
    }

    #[tokio::test]
    async fn test_closed_links_are_released() {
        let mut host = WsHostTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let url = format!("ws://{}", host.local_addr());

        for _ in 0..3 {
            let mut client = WsClientTransport::connect(&url).await.unwrap();
            wait_for(&mut client).await;
            let conn = wait_accept(&mut host).await;
            assert_eq!(host.open_links(), 1);

            drop(client);
            assert_eq!(wait_for(&mut host).await, TransportEvent::Disconnected(conn));
            assert!(!host.is_alive(conn));
            assert_eq!(host.open_links(), 0);
        }
    }
}
