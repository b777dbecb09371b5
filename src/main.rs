//! Courir Net Demo
//!
//! Runs a host and a guest portal over the in-memory transport, plays a few
//! game changes between them, then walks the previous-runs list.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::info;
use tracing_subscriber::EnvFilter;

use courir::network::MemoryNetwork;
use courir::records::{MemoryRunStore, RunList, RunRecord, RunRecordStore};
use courir::{
    ConnectionListener, DeliveryMode, GameChange, GameEvent, GameNetworkPortal, GameSetupData,
    GameStateListener, InvitationResponder, Payload, PeerId, PortalConfig, VERSION,
};

/// Logs every callback and reports milestones to the demo driver.
struct DemoListener {
    name: &'static str,
    milestones: mpsc::UnboundedSender<&'static str>,
}

impl ConnectionListener for DemoListener {
    fn found_hosts_changed(&self, hosts: &[PeerId]) {
        info!("[{}] {} hosts nearby", self.name, hosts.len());
        if !hosts.is_empty() {
            let _ = self.milestones.send("hosts");
        }
    }

    fn player_wants_to_join_room(&self, peer: &PeerId, responder: InvitationResponder) {
        info!("[{}] {} asks to join, accepting", self.name, peer);
        responder.respond(true);
    }

    fn players_in_room_changed(&self, peers: &[PeerId], host: &PeerId) {
        info!("[{}] room of {}: {} peers", self.name, host, peers.len());
        if !peers.is_empty() {
            let _ = self.milestones.send("room");
        }
    }

    fn disconnected_from_room(&self) {
        info!("[{}] disconnected, searching again", self.name);
        let _ = self.milestones.send("disconnected");
    }
}

impl GameStateListener for DemoListener {
    fn jump_action_received(&self, data: &Payload, peer: &PeerId) {
        info!("[{}] {} jumped {:?}", self.name, peer, data.get_int("height"));
        let _ = self.milestones.send("jump");
    }

    fn duck_action_received(&self, _data: &Payload, peer: &PeerId) {
        info!("[{}] {} ducked", self.name, peer);
        let _ = self.milestones.send("duck");
    }

    fn collide_action_received(&self, data: &Payload, peer: &PeerId) {
        info!("[{}] {} hit {:?}", self.name, peer, data.get_text("obstacle"));
        let _ = self.milestones.send("collide");
    }

    fn game_start_signal_received(&self, data: &Payload, peer: &PeerId) {
        info!("[{}] {} started the game, seed {:?}", self.name, peer, data.get_int("seed"));
        let _ = self.milestones.send("start");
    }

    fn game_end_signal_received(&self, data: &Payload, peer: &PeerId) {
        info!("[{}] {} ended the game, score {:?}", self.name, peer, data.get_int("score"));
        let _ = self.milestones.send("end");
    }
}

async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<&'static str>,
    milestone: &'static str,
) -> anyhow::Result<()> {
    loop {
        let next = timeout(Duration::from_secs(2), rx.recv())
            .await
            .with_context(|| format!("timed out waiting for {milestone}"))?;
        match next {
            Some(m) if m == milestone => return Ok(()),
            Some(_) => continue,
            None => bail!("listener channel closed before {milestone}"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Courir Net v{}", VERSION);

    multiplayer_demo().await?;
    previous_runs_demo()?;
    Ok(())
}

/// Host and guest find each other, exchange game changes, then split up.
async fn multiplayer_demo() -> anyhow::Result<()> {
    info!("=== Multiplayer ===");

    let base = PortalConfig::from_env()?;
    let host_config = PortalConfig {
        display_name: format!("{}-host", base.display_name),
        auto_accept_guests: false,
        ..base.clone()
    };
    let guest_config = PortalConfig {
        display_name: format!("{}-guest", base.display_name),
        ..base
    };

    let network = MemoryNetwork::new();
    let (transport, events) = network.join(&host_config);
    let host = GameNetworkPortal::new(host_config, transport, events)?;
    let (transport, events) = network.join(&guest_config);
    let guest = GameNetworkPortal::new(guest_config, transport, events)?;

    let (host_tx, mut host_rx) = mpsc::unbounded_channel();
    let host_listener = Arc::new(DemoListener { name: "host", milestones: host_tx });
    host.subscribe_connection(host_listener.clone()).await;
    host.subscribe_game_state(host_listener).await;

    let (guest_tx, mut guest_rx) = mpsc::unbounded_channel();
    let guest_listener = Arc::new(DemoListener { name: "guest", milestones: guest_tx });
    guest.subscribe_connection(guest_listener.clone()).await;
    guest.subscribe_game_state(guest_listener).await;

    host.open().await?;
    guest.open().await?;

    host.begin_hosting().await;
    guest.begin_searching_for_hosts().await;
    wait_for(&mut guest_rx, "hosts").await?;

    let Some(target) = guest.found_hosts().await.into_iter().next() else {
        bail!("guest found no hosts");
    };
    guest.connect_to_host(&target).await;
    wait_for(&mut host_rx, "room").await?;
    wait_for(&mut guest_rx, "room").await?;

    let Some(room) = host.room().await else {
        bail!("host has no room");
    };
    let setup = GameSetupData::multiplayer(&room, 0xC0FFEE);
    info!("Starting {:?} match with {} peers", setup.mode, setup.peers.len());

    host.send_game_change(
        &GameChange::new(GameEvent::GameStarted).with("seed", 0xC0FFEE_i64),
        DeliveryMode::Reliable,
    )
    .await?;
    wait_for(&mut guest_rx, "start").await?;

    guest
        .send_game_change(
            &GameChange::new(GameEvent::PlayerJumped).with("height", 12),
            DeliveryMode::Unreliable,
        )
        .await?;
    wait_for(&mut host_rx, "jump").await?;

    guest
        .send_game_change(
            &GameChange::new(GameEvent::PlayerCollided).with("obstacle", "log"),
            DeliveryMode::Reliable,
        )
        .await?;
    wait_for(&mut host_rx, "collide").await?;

    // Garbage is logged and dropped.
    guest.send_data(vec![0xde, 0xad, 0xbe, 0xef], DeliveryMode::Reliable).await;

    host.send_game_change(
        &GameChange::new(GameEvent::GameEnded).with("score", 980),
        DeliveryMode::Reliable,
    )
    .await?;
    wait_for(&mut guest_rx, "end").await?;

    host.disconnect_from_room().await;
    wait_for(&mut guest_rx, "disconnected").await?;

    host.close().await;
    guest.close().await;
    Ok(())
}

/// Store a few runs and walk the previous-runs list.
fn previous_runs_demo() -> anyhow::Result<()> {
    info!("=== Previous Runs ===");

    let store = Arc::new(MemoryRunStore::new());
    let now = Utc::now();
    for (days_ago, score) in [(3, 420), (1, 610), (0, 380)] {
        let mut run = RunRecord::new(now - ChronoDuration::days(days_ago), score);
        run.push_frame(45, GameChange::new(GameEvent::PlayerJumped).with("height", 10));
        run.push_frame(90, GameChange::new(GameEvent::PlayerDucked));
        store.save(run)?;
    }

    let mut list = RunList::load(store)?;
    for index in 0..list.len() {
        if let Some(row) = list.row(index)? {
            info!("{:>2}. {}  {}", index + 1, row.date_label, row.score_label);
        }
    }

    let setup = list.select(1)?;
    if let Some(ghost) = &setup.ghost {
        info!("Racing ghost scoring {} with {} recorded actions", ghost.score, ghost.ghost.len());
    }

    list.delete(0)?;
    info!("{} runs left after delete", list.len());
    Ok(())
}
