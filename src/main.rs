//! Relay Lobby Host
//!
//! Serves a lobby relay over WebSockets. With `RELAY_JOIN=<lobby>` it
//! joins a host at `RELAY_URL` as a client instead, and with
//! `RELAY_DEMO=1` it plays one scripted round between in-memory
//! participants.

use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use relay_lobby::{
    bus::drain,
    network::{
        identity::{validate_sign_in, Identity, IdentityConfig},
        MemoryRelay, TransportError, WsClientTransport, WsHostTransport,
    },
    session::{GameState, JoinProgress, LobbySession, LobbyRequest, RelayLink},
    LobbyEvent, MessageBus, RelayConfig, UserStatus, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let default_level = if cfg!(feature = "debug-tracing") { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    info!("Relay Lobby v{}", VERSION);
    info!("Tick rate: {} Hz, max players: {}", config.tick_rate, config.max_players);

    if config.demo {
        demo_round(config);
        Ok(())
    } else if let Some(lobby_id) = config.join_lobby.clone() {
        join(config, lobby_id).await
    } else {
        serve(config).await
    }
}

/// Local identity: a verified sign-in token if one is supplied, else a
/// random offline identity.
fn local_identity() -> anyhow::Result<Identity> {
    match std::env::var("RELAY_SIGN_IN_TOKEN") {
        Ok(token) => validate_sign_in(&token, &IdentityConfig::from_env())
            .context("sign-in token rejected"),
        Err(_) => Ok(Identity::anonymous()),
    }
}

fn log_events(who: &str, rx: &mut broadcast::Receiver<LobbyEvent>) {
    for event in drain(rx) {
        match event {
            LobbyEvent::UserChanged { .. } => {}
            other => info!("[{}] {:?}", who, other),
        }
    }
}

/// Host a lobby on a WebSocket listener until Ctrl-C.
async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let identity = local_identity()?;
    let transport = WsHostTransport::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    let lobby_id = format!("relay-{}", identity.user_id.short());
    let tick_interval = config.tick_interval();
    let mut session = LobbySession::new(config, MessageBus::default());
    let mut events = session.bus().subscribe();
    session.sign_in(identity);
    session.on_lobby_created(&lobby_id)?;
    session.on_relay_join_result(Ok(RelayLink::Host(Box::new(transport))), Instant::now());
    info!("hosting lobby {}", lobby_id);

    let mut ticker = tokio::time::interval(tick_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                session.tick(Instant::now());
                log_events("host", &mut events);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    session.leave_lobby();
    Ok(())
}

async fn dial(url: &str) -> Result<RelayLink, TransportError> {
    let transport = WsClientTransport::connect(url).await?;
    let link = transport.link();
    Ok(RelayLink::Client { transport: Box::new(transport), link })
}

/// Join a hosted lobby as a client until Ctrl-C or until the session
/// drops back to the join menu.
async fn join(config: RelayConfig, lobby_id: String) -> anyhow::Result<()> {
    let identity = local_identity()?;
    let url = config.relay_url.clone();
    let tick_interval = config.tick_interval();
    let mut session = LobbySession::new(config, MessageBus::default());
    let mut events = session.bus().subscribe();
    session.sign_in(identity);
    let mut pending = Some(session.on_lobby_joined(&lobby_id, false)?);

    let mut ticker = tokio::time::interval(tick_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(request) = pending.take() {
                    info!("joining lobby {} via {}", request.lobby_id, url);
                    let link = dial(&url).await;
                    if session.on_relay_join_result(link, Instant::now()) == JoinProgress::Failed {
                        warn!("could not reach the relay host");
                    }
                }
                let now = Instant::now();
                pending = session.poll_retry(now);
                session.tick(now);
                log_events("client", &mut events);

                if session.game_state() == GameState::JoinMenu {
                    info!("back at the join menu");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    session.leave_lobby();
    Ok(())
}

/// Three participants over the in-memory relay: ready up, count down,
/// play, end.
fn demo_round(config: RelayConfig) {
    info!("=== Starting Demo Round ===");
    let relay = MemoryRelay::new();
    let lobby_id = "demo-lobby";
    let step = config.tick_interval();
    let countdown = config.countdown;

    let mut host = LobbySession::new(config.clone(), MessageBus::default());
    let mut host_events = host.bus().subscribe();
    host.sign_in(Identity::anonymous());
    if let Err(e) = host.on_lobby_created(lobby_id) {
        warn!("host could not enter the lobby: {}", e);
        return;
    }
    let mut now = Instant::now();
    host.on_relay_join_result(Ok(RelayLink::Host(Box::new(relay.host()))), now);

    let mut clients: Vec<LobbySession> = (0..2)
        .map(|_| {
            let mut session = LobbySession::new(config.clone(), MessageBus::default());
            session.sign_in(Identity::anonymous());
            session
        })
        .collect();

    for client in &mut clients {
        if client.on_lobby_joined(lobby_id, false).is_err() {
            continue;
        }
        let link = relay.connect().and_then(|transport| match transport.link() {
            Some(link) => Ok(RelayLink::Client { transport: Box::new(transport), link }),
            None => Err(TransportError::Unreachable("not a client endpoint".into())),
        });
        client.on_relay_join_result(link, now);
    }

    run_ticks(&mut host, &mut clients, 5, &mut now, step);
    log_events("host", &mut host_events);
    info!("{} users in lobby", host.lobby().user_count());

    for client in &mut clients {
        let _ = client.handle_request(LobbyRequest::SetStatus(UserStatus::Ready));
    }
    let _ = host.handle_request(LobbyRequest::SetStatus(UserStatus::Ready));
    run_ticks(&mut host, &mut clients, 3, &mut now, step);
    log_events("host", &mut host_events);

    let countdown_ticks = (countdown.as_millis() / step.as_millis().max(1)) as u32 + 2;
    run_ticks(&mut host, &mut clients, countdown_ticks, &mut now, step);
    log_events("host", &mut host_events);
    info!("round state: {:?}", host.lobby().state());

    if let Err(e) = host.handle_request(LobbyRequest::EndGame) {
        warn!("could not end game: {}", e);
    }
    run_ticks(&mut host, &mut clients, 3, &mut now, step);
    log_events("host", &mut host_events);

    for client in &mut clients {
        client.leave_lobby();
    }
    run_ticks(&mut host, &mut clients, 2, &mut now, step);
    log_events("host", &mut host_events);
    info!("{} users left in lobby", host.lobby().user_count());

    host.leave_lobby();
    info!("=== Demo Round Complete ===");
}

fn run_ticks(
    host: &mut LobbySession,
    clients: &mut [LobbySession],
    ticks: u32,
    now: &mut Instant,
    step: Duration,
) {
    for _ in 0..ticks {
        *now += step;
        for client in clients.iter_mut() {
            client.tick(*now);
        }
        host.tick(*now);
    }
}
