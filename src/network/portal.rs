//! Game Network Portal
//!
//! Owns one transport and turns its events into listener callbacks.
//!
//! All callbacks run on the portal's event task, one at a time, in the order
//! the transport reported the events. A panicking listener is logged and
//! skipped; later events are still delivered. Outbound calls never block on
//! the network.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use thiserror::Error;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ConfigError, PortalConfig};
use crate::network::listener::{
    ConnectionListener, GameStateListener, ListenerId, ListenerRegistry,
};
use crate::network::peer::{PeerId, RoomMembership};
use crate::network::protocol::{GameChange, GameEvent, MessageCodec, ProtocolError};
use crate::network::transport::{DeliveryMode, EventReceiver, Transport, TransportEvent};

/// Bytes of a rejected packet shown in logs.
const LOGGED_PACKET_PREFIX: usize = 16;

/// Portal errors.
#[derive(Debug, Error)]
pub enum PortalError {
    /// Configuration rejected at construction.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Outbound message could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// `open` called on an open portal.
    #[error("Portal is already open")]
    AlreadyOpen,

    /// The transport event stream was lost with a failed event task.
    #[error("Transport event stream unavailable")]
    EventStreamUnavailable,
}

/// Discovery and room state as seen by the portal.
#[derive(Debug, Default)]
struct PortalState {
    hosting: bool,
    searching: bool,
    found_hosts: Vec<PeerId>,
    room: Option<RoomMembership>,
}

/// Running event task.
struct Worker {
    handle: JoinHandle<EventReceiver>,
    shutdown: oneshot::Sender<()>,
}

/// Peer session service for one device.
pub struct GameNetworkPortal {
    config: PortalConfig,
    codec: MessageCodec,
    transport: Box<dyn Transport>,
    state: RwLock<PortalState>,
    listeners: RwLock<ListenerRegistry>,
    /// Parked while the portal is closed.
    events: Mutex<Option<EventReceiver>>,
    worker: Mutex<Option<Worker>>,
}

impl GameNetworkPortal {
    /// Create a closed portal over `transport`, whose events arrive on
    /// `events`.
    pub fn new(
        config: PortalConfig,
        transport: impl Transport + 'static,
        events: EventReceiver,
    ) -> Result<Arc<Self>, PortalError> {
        config.validate()?;

        info!(
            "Portal for {} (service {:?}, auto-accept {})",
            transport.local_peer(),
            config.service_type,
            config.auto_accept_guests
        );

        Ok(Arc::new(Self {
            codec: MessageCodec::new(config.max_message_size),
            config,
            transport: Box::new(transport),
            state: RwLock::new(PortalState::default()),
            listeners: RwLock::new(ListenerRegistry::new()),
            events: Mutex::new(Some(events)),
            worker: Mutex::new(None),
        }))
    }

    /// Configuration in use.
    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    /// Identity of this device.
    pub fn local_peer(&self) -> &PeerId {
        self.transport.local_peer()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Start draining transport events.
    #[instrument(skip(self), fields(peer = %self.local_peer()))]
    pub async fn open(self: &Arc<Self>) -> Result<(), PortalError> {
        let mut worker = self.worker.lock().await;
        if let Some(running) = worker.take() {
            if !running.handle.is_finished() {
                *worker = Some(running);
                return Err(PortalError::AlreadyOpen);
            }
            self.reclaim(running).await;
        }

        let events = self
            .events
            .lock()
            .await
            .take()
            .ok_or(PortalError::EventStreamUnavailable)?;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_event_loop(Arc::downgrade(self), events, shutdown_rx));

        *worker = Some(Worker { handle, shutdown });
        info!("Portal open");
        Ok(())
    }

    /// Stop the event task, stop hosting and searching, leave the room.
    /// Closing a closed portal does nothing.
    #[instrument(skip(self), fields(peer = %self.local_peer()))]
    pub async fn close(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            debug!("Portal already closed");
            return;
        };

        self.reclaim(worker).await;

        self.stop_hosting().await;
        self.stop_searching_for_hosts().await;
        self.disconnect_from_room().await;
        info!("Portal closed");
    }

    /// Whether the event task is running. False once the transport event
    /// stream has ended.
    pub async fn is_open(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Stop `worker` and park its event receiver.
    async fn reclaim(&self, worker: Worker) {
        let _ = worker.shutdown.send(());
        match worker.handle.await {
            Ok(events) => *self.events.lock().await = Some(events),
            Err(e) => error!("Portal event task failed: {}", e),
        }
    }

    // =========================================================================
    // LISTENERS
    // =========================================================================

    /// Register a connection listener.
    pub async fn subscribe_connection(&self, listener: Arc<dyn ConnectionListener>) -> ListenerId {
        self.listeners.write().await.add_connection(listener)
    }

    /// Register a game-state listener.
    pub async fn subscribe_game_state(&self, listener: Arc<dyn GameStateListener>) -> ListenerId {
        self.listeners.write().await.add_game_state(listener)
    }

    /// Remove a listener. Returns false if `id` was not subscribed.
    pub async fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.write().await.remove(id)
    }

    async fn connection_listeners(&self) -> Vec<Arc<dyn ConnectionListener>> {
        self.listeners.read().await.connection_listeners()
    }

    async fn game_state_listeners(&self) -> Vec<Arc<dyn GameStateListener>> {
        self.listeners.read().await.game_state_listeners()
    }

    // =========================================================================
    // HOSTING & DISCOVERY
    // =========================================================================

    /// Advertise this device as a host.
    pub async fn begin_hosting(&self) {
        let mut state = self.state.write().await;
        if state.hosting {
            debug!("Already hosting");
            return;
        }
        state.hosting = true;
        self.transport.start_advertising_host();
        info!("Hosting as {}", self.local_peer());
    }

    /// Stop advertising.
    pub async fn stop_hosting(&self) {
        let mut state = self.state.write().await;
        if !state.hosting {
            debug!("Not hosting");
            return;
        }
        state.hosting = false;
        self.transport.stop_advertising_host();
        info!("Stopped hosting");
    }

    /// Browse for hosts.
    pub async fn begin_searching_for_hosts(&self) {
        let mut state = self.state.write().await;
        if state.searching {
            debug!("Already searching for hosts");
            return;
        }
        state.searching = true;
        self.transport.start_searching_for_hosts();
        info!("Searching for hosts");
    }

    /// Stop browsing. Clears the cached host list.
    pub async fn stop_searching_for_hosts(&self) {
        let mut state = self.state.write().await;
        if !state.searching {
            debug!("Not searching for hosts");
            return;
        }
        state.searching = false;
        state.found_hosts.clear();
        self.transport.stop_searching_for_hosts();
        info!("Stopped searching for hosts");
    }

    /// Ask `host` to let us in. The result arrives as a membership change.
    pub async fn connect_to_host(&self, host: &PeerId) {
        info!("Connecting to {}", host);
        self.transport.connect_to_host(host);
    }

    /// Leave the current room.
    pub async fn disconnect_from_room(&self) {
        let mut state = self.state.write().await;
        if let Some(room) = state.room.take() {
            info!("Leaving room hosted by {}", room.host);
        }
        self.transport.disconnect();
    }

    /// Whether this device is advertising.
    pub async fn is_hosting(&self) -> bool {
        self.state.read().await.hosting
    }

    /// Whether this device is browsing.
    pub async fn is_searching(&self) -> bool {
        self.state.read().await.searching
    }

    /// Hosts from the latest discovery update.
    pub async fn found_hosts(&self) -> Vec<PeerId> {
        self.state.read().await.found_hosts.clone()
    }

    /// Latest room membership with a known host.
    pub async fn room(&self) -> Option<RoomMembership> {
        self.state.read().await.room.clone()
    }

    // =========================================================================
    // DATA TRANSFER
    // =========================================================================

    /// Send raw bytes to everyone in the room.
    pub async fn send_data(&self, bytes: Vec<u8>, mode: DeliveryMode) {
        debug!("Sending {} bytes ({:?})", bytes.len(), mode);
        self.transport.send_data(bytes, mode);
    }

    /// Encode `change` and send it to everyone in the room.
    pub async fn send_game_change(
        &self,
        change: &GameChange,
        mode: DeliveryMode,
    ) -> Result<(), PortalError> {
        let bytes = self.codec.encode(change)?;
        debug!("Sending {:?}", change.event);
        self.send_data(bytes, mode).await;
        Ok(())
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Process one transport event. Never fails; bad input is logged and
    /// dropped.
    pub async fn handle_event(&self, event: TransportEvent) {
        #[cfg(feature = "debug-tracing")]
        tracing::trace!(?event, "Transport event");

        match event {
            TransportEvent::FoundHostsChanged(hosts) => {
                debug!("{} hosts visible", hosts.len());
                {
                    // Updates queued before a stop must not refill the cache.
                    let mut state = self.state.write().await;
                    if state.searching {
                        state.found_hosts = hosts.clone();
                    }
                }
                for listener in self.connection_listeners().await {
                    notify("found_hosts_changed", || listener.found_hosts_changed(&hosts));
                }
            }

            TransportEvent::InvitationReceived { peer, responder } => {
                let listeners = self.connection_listeners().await;
                if listeners.is_empty() {
                    warn!("No connection listener to answer {}, declining", peer);
                    responder.respond(false);
                    return;
                }
                info!("{} wants to join", peer);
                for listener in listeners {
                    let responder = responder.clone();
                    notify("player_wants_to_join_room", || {
                        listener.player_wants_to_join_room(&peer, responder)
                    });
                }
            }

            TransportEvent::PeersChanged { peers, host } => {
                let Some(host) = host else {
                    debug!("Membership change without a host ({} peers), dropping", peers.len());
                    return;
                };
                info!("Room of {} now has {} peers", host, peers.len());
                self.state.write().await.room = Some(RoomMembership::new(host.clone(), peers.clone()));
                for listener in self.connection_listeners().await {
                    notify("players_in_room_changed", || {
                        listener.players_in_room_changed(&peers, &host)
                    });
                }
            }

            TransportEvent::ConnectedToPeer(peer) => {
                debug!("Connected to {}", peer);
            }

            TransportEvent::Disconnected => {
                info!("Disconnected from room");
                // Discoverable again before anyone hears about it.
                self.stop_hosting().await;
                self.begin_searching_for_hosts().await;
                self.state.write().await.room = None;
                for listener in self.connection_listeners().await {
                    notify("disconnected_from_room", || listener.disconnected_from_room());
                }
            }

            TransportEvent::DataReceived { bytes, from } => {
                self.handle_packet(&bytes, &from).await;
            }
        }
    }

    async fn handle_packet(&self, bytes: &[u8], from: &PeerId) {
        let change = match self.codec.decode(bytes) {
            Ok(change) => change,
            Err(e) => {
                let prefix = &bytes[..bytes.len().min(LOGGED_PACKET_PREFIX)];
                warn!("Dropping packet from {}: {} [{}]", from, e, hex::encode(prefix));
                return;
            }
        };

        debug!("{:?} from {}", change.event, from);
        let data = &change.data;
        for listener in self.game_state_listeners().await {
            notify("game state listener", || match change.event {
                GameEvent::GameStarted => listener.game_start_signal_received(data, from),
                GameEvent::GameEnded => listener.game_end_signal_received(data, from),
                GameEvent::PlayerJumped => listener.jump_action_received(data, from),
                GameEvent::PlayerDucked => listener.duck_action_received(data, from),
                GameEvent::PlayerCollided => listener.collide_action_received(data, from),
            });
        }
    }
}

/// Run one listener callback, logging a panic instead of unwinding into the
/// event task.
fn notify(callback: &str, call: impl FnOnce()) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(call)) {
        error!("Listener panicked in {}: {}", callback, panic_message(panic.as_ref()));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic"
    }
}

/// Drain `events` into the portal until shut down. Hands the receiver back so
/// the portal can be reopened.
async fn run_event_loop(
    portal: Weak<GameNetworkPortal>,
    mut events: EventReceiver,
    mut shutdown: oneshot::Receiver<()>,
) -> EventReceiver {
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,

            event = events.recv() => {
                let Some(event) = event else {
                    debug!("Transport event stream ended");
                    break;
                };
                let Some(portal) = portal.upgrade() else {
                    break;
                };
                portal.handle_event(event).await;
            }
        }
    }
    events
}
