//! In-Memory Transport
//!
//! A local hub that behaves like a nearby-device connectivity library:
//! hosts advertise, guests browse and connect, rooms form around a host,
//! packets fan out to room members. Used by tests and the demo binary.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::PortalConfig;
use crate::network::peer::PeerId;
use crate::network::transport::{
    DeliveryMode, EventReceiver, EventSender, InvitationResponder, Transport, TransportEvent,
};

/// A registered device.
struct Endpoint {
    events: EventSender,
    service_type: String,
    auto_accept: bool,
}

#[derive(Default)]
struct HubState {
    endpoints: BTreeMap<PeerId, Endpoint>,
    advertising: BTreeSet<PeerId>,
    searching: BTreeSet<PeerId>,
    /// Host -> guests.
    rooms: BTreeMap<PeerId, BTreeSet<PeerId>>,
}

impl HubState {
    fn emit(&self, peer: &PeerId, event: TransportEvent) {
        if let Some(endpoint) = self.endpoints.get(peer) {
            // Receiver gone means the portal was dropped.
            let _ = endpoint.events.send(event);
        }
    }

    fn service_type(&self, peer: &PeerId) -> Option<&str> {
        self.endpoints.get(peer).map(|e| e.service_type.as_str())
    }

    fn visible_hosts(&self, searcher: &PeerId) -> Vec<PeerId> {
        let service = self.service_type(searcher);
        self.advertising
            .iter()
            .filter(|host| *host != searcher && self.service_type(host) == service)
            .cloned()
            .collect()
    }

    fn notify_searchers(&self) {
        for searcher in &self.searching {
            self.emit(searcher, TransportEvent::FoundHostsChanged(self.visible_hosts(searcher)));
        }
    }

    /// Host of the room `peer` is in.
    fn room_of(&self, peer: &PeerId) -> Option<PeerId> {
        if self.rooms.contains_key(peer) {
            return Some(peer.clone());
        }
        self.rooms
            .iter()
            .find(|(_, guests)| guests.contains(peer))
            .map(|(host, _)| host.clone())
    }

    fn members(&self, host: &PeerId) -> Vec<PeerId> {
        let mut members = vec![host.clone()];
        if let Some(guests) = self.rooms.get(host) {
            members.extend(guests.iter().cloned());
        }
        members
    }

    fn announce_room(&self, host: &PeerId) {
        let members = self.members(host);
        for member in &members {
            let peers = members.iter().filter(|p| *p != member).cloned().collect();
            self.emit(
                member,
                TransportEvent::PeersChanged {
                    peers,
                    host: Some(host.clone()),
                },
            );
        }
    }

    fn admit(&mut self, host: &PeerId, guest: &PeerId) {
        if !self.endpoints.contains_key(host) || !self.endpoints.contains_key(guest) {
            warn!("Cannot admit {} to {}: peer is gone", guest, host);
            return;
        }

        if host == guest || self.room_of(guest).as_ref() == Some(host) {
            debug!("{} is already in {}'s room", guest, host);
            return;
        }
        self.leave(guest);

        let existing = self.members(host);
        self.rooms.entry(host.clone()).or_default().insert(guest.clone());

        for member in &existing {
            self.emit(member, TransportEvent::ConnectedToPeer(guest.clone()));
            self.emit(guest, TransportEvent::ConnectedToPeer(member.clone()));
        }
        self.announce_room(host);
        debug!("{} joined {}'s room", guest, host);
    }

    fn leave(&mut self, peer: &PeerId) {
        let Some(host) = self.room_of(peer) else {
            return;
        };

        if &host == peer {
            let guests = self.rooms.remove(&host).unwrap_or_default();
            for guest in &guests {
                let peers = guests.iter().filter(|p| *p != guest).cloned().collect();
                self.emit(guest, TransportEvent::PeersChanged { peers, host: None });
                self.emit(guest, TransportEvent::Disconnected);
            }
            debug!("{} closed a room with {} guests", host, guests.len());
        } else {
            if let Some(guests) = self.rooms.get_mut(&host) {
                guests.remove(peer);
            }
            self.announce_room(&host);
            debug!("{} left {}'s room", peer, host);
        }
    }
}

/// Shared hub connecting every [`MemoryTransport`] created from it.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<HubState>>,
    loss: f64,
}

impl MemoryNetwork {
    /// Lossless network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Network that drops unreliable packets with probability `loss`,
    /// clamped to `0.0..=1.0`. NaN means no loss.
    pub fn with_loss(loss: f64) -> Self {
        let loss = if loss.is_nan() { 0.0 } else { loss.clamp(0.0, 1.0) };
        Self {
            loss,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a device and get its transport and event stream.
    pub fn join(&self, config: &PortalConfig) -> (MemoryTransport, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let local = PeerId::new(config.display_name.clone());

        self.lock().endpoints.insert(
            local.clone(),
            Endpoint {
                events: tx,
                service_type: config.service_type.clone(),
                auto_accept: config.auto_accept_guests,
            },
        );

        let transport = MemoryTransport {
            local,
            network: self.clone(),
        };
        (transport, rx)
    }

    /// Registered device count.
    pub fn peer_count(&self) -> usize {
        self.lock().endpoints.len()
    }

    /// Current room of `peer`, as (host, guests).
    pub fn room_of(&self, peer: &PeerId) -> Option<(PeerId, Vec<PeerId>)> {
        let state = self.lock();
        let host = state.room_of(peer)?;
        let guests = state
            .rooms
            .get(&host)
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default();
        Some((host, guests))
    }

    fn unregister(&self, peer: &PeerId) {
        let mut state = self.lock();
        state.leave(peer);
        state.searching.remove(peer);
        if state.advertising.remove(peer) {
            state.notify_searchers();
        }
        state.endpoints.remove(peer);
    }
}

/// One device's view of a [`MemoryNetwork`].
pub struct MemoryTransport {
    local: PeerId,
    network: MemoryNetwork,
}

impl Transport for MemoryTransport {
    fn local_peer(&self) -> &PeerId {
        &self.local
    }

    fn start_advertising_host(&self) {
        let mut state = self.network.lock();
        if state.advertising.insert(self.local.clone()) {
            state.notify_searchers();
        }
    }

    fn stop_advertising_host(&self) {
        let mut state = self.network.lock();
        if state.advertising.remove(&self.local) {
            state.notify_searchers();
        }
    }

    fn start_searching_for_hosts(&self) {
        let mut state = self.network.lock();
        if state.searching.insert(self.local.clone()) {
            let hosts = state.visible_hosts(&self.local);
            state.emit(&self.local, TransportEvent::FoundHostsChanged(hosts));
        }
    }

    fn stop_searching_for_hosts(&self) {
        self.network.lock().searching.remove(&self.local);
    }

    fn connect_to_host(&self, host: &PeerId) {
        let mut state = self.network.lock();

        if !state.advertising.contains(host) {
            warn!("{} is not advertising, dropping connection request", host);
            return;
        }

        let auto_accept = state.endpoints.get(host).map(|e| e.auto_accept).unwrap_or(false);
        if auto_accept {
            state.admit(host, &self.local);
            return;
        }

        let (responder, decision) = InvitationResponder::pair();
        state.emit(
            host,
            TransportEvent::InvitationReceived {
                peer: self.local.clone(),
                responder,
            },
        );
        drop(state);

        let network = self.network.clone();
        let host = host.clone();
        let guest = self.local.clone();
        tokio::spawn(async move {
            match decision.await {
                Ok(true) => network.lock().admit(&host, &guest),
                Ok(false) => debug!("{} declined {}", host, guest),
                Err(_) => debug!("Invitation from {} to {} dropped", guest, host),
            }
        });
    }

    fn disconnect(&self) {
        self.network.lock().leave(&self.local);
    }

    fn send_data(&self, bytes: Vec<u8>, mode: DeliveryMode) {
        let state = self.network.lock();

        let Some(host) = state.room_of(&self.local) else {
            debug!("{} is not in a room, dropping {} bytes", self.local, bytes.len());
            return;
        };

        for member in state.members(&host) {
            if member == self.local {
                continue;
            }
            if mode == DeliveryMode::Unreliable && rand::thread_rng().gen_bool(self.network.loss) {
                debug!("Lost unreliable packet to {}", member);
                continue;
            }
            state.emit(
                &member,
                TransportEvent::DataReceived {
                    bytes: bytes.clone(),
                    from: self.local.clone(),
                },
            );
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.unregister(&self.local);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, auto_accept: bool) -> PortalConfig {
        PortalConfig {
            display_name: name.to_string(),
            auto_accept_guests: auto_accept,
            ..Default::default()
        }
    }

    fn drain(rx: &mut EventReceiver) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn last_hosts(events: &[TransportEvent]) -> Option<Vec<PeerId>> {
        events.iter().rev().find_map(|e| match e {
            TransportEvent::FoundHostsChanged(hosts) => Some(hosts.clone()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_searcher_sees_hosts() {
        let network = MemoryNetwork::new();
        let (host, _host_rx) = network.join(&config("host", true));
        let (guest, mut guest_rx) = network.join(&config("guest", true));

        guest.start_searching_for_hosts();
        assert_eq!(last_hosts(&drain(&mut guest_rx)), Some(vec![]));

        host.start_advertising_host();
        assert_eq!(
            last_hosts(&drain(&mut guest_rx)),
            Some(vec![host.local_peer().clone()])
        );

        // Repeat is silent.
        host.start_advertising_host();
        assert!(drain(&mut guest_rx).is_empty());

        host.stop_advertising_host();
        assert_eq!(last_hosts(&drain(&mut guest_rx)), Some(vec![]));
    }

    #[tokio::test]
    async fn test_service_types_are_isolated() {
        let network = MemoryNetwork::new();
        let other = PortalConfig {
            service_type: "other".to_string(),
            ..config("host", true)
        };
        let (host, _host_rx) = network.join(&other);
        let (guest, mut guest_rx) = network.join(&config("guest", true));

        host.start_advertising_host();
        guest.start_searching_for_hosts();
        assert_eq!(last_hosts(&drain(&mut guest_rx)), Some(vec![]));
    }

    #[tokio::test]
    async fn test_auto_accept_join() {
        let network = MemoryNetwork::new();
        let (host, mut host_rx) = network.join(&config("host", true));
        let (guest, mut guest_rx) = network.join(&config("guest", true));

        host.start_advertising_host();
        guest.connect_to_host(host.local_peer());

        let (room_host, guests) = network.room_of(guest.local_peer()).unwrap();
        assert_eq!(&room_host, host.local_peer());
        assert_eq!(guests, vec![guest.local_peer().clone()]);

        let host_events = drain(&mut host_rx);
        assert!(host_events.iter().any(|e| matches!(
            e,
            TransportEvent::PeersChanged { peers, host: Some(h) }
                if peers == &vec![guest.local_peer().clone()] && h == host.local_peer()
        )));

        let guest_events = drain(&mut guest_rx);
        assert!(guest_events.iter().any(|e| matches!(e, TransportEvent::ConnectedToPeer(_))));
    }

    #[tokio::test]
    async fn test_connect_to_non_advertising_host() {
        let network = MemoryNetwork::new();
        let (host, _host_rx) = network.join(&config("host", true));
        let (guest, mut guest_rx) = network.join(&config("guest", true));

        guest.connect_to_host(host.local_peer());
        assert!(network.room_of(guest.local_peer()).is_none());
        assert!(drain(&mut guest_rx).is_empty());
    }

    #[tokio::test]
    async fn test_invitation_accept() {
        let network = MemoryNetwork::new();
        let (host, mut host_rx) = network.join(&config("host", false));
        let (guest, _guest_rx) = network.join(&config("guest", true));

        host.start_advertising_host();
        guest.connect_to_host(host.local_peer());
        assert!(network.room_of(guest.local_peer()).is_none());

        let responder = match host_rx.recv().await.unwrap() {
            TransportEvent::InvitationReceived { peer, responder } => {
                assert_eq!(&peer, guest.local_peer());
                responder
            }
            other => panic!("Unexpected event: {other:?}"),
        };
        assert!(responder.respond(true));

        // Admission happens on a spawned task.
        loop {
            match host_rx.recv().await.unwrap() {
                TransportEvent::PeersChanged { .. } => break,
                _ => continue,
            }
        }
        assert!(network.room_of(guest.local_peer()).is_some());
    }

    #[tokio::test]
    async fn test_invitation_decline() {
        let network = MemoryNetwork::new();
        let (host, mut host_rx) = network.join(&config("host", false));
        let (guest, _guest_rx) = network.join(&config("guest", true));

        host.start_advertising_host();
        guest.connect_to_host(host.local_peer());

        if let Some(TransportEvent::InvitationReceived { responder, .. }) = host_rx.recv().await {
            responder.respond(false);
        } else {
            panic!("Expected invitation");
        }

        tokio::task::yield_now().await;
        assert!(network.room_of(guest.local_peer()).is_none());
    }

    #[tokio::test]
    async fn test_host_leaving_dissolves_room() {
        let network = MemoryNetwork::new();
        let (host, _host_rx) = network.join(&config("host", true));
        let (guest, mut guest_rx) = network.join(&config("guest", true));

        host.start_advertising_host();
        guest.connect_to_host(host.local_peer());
        drain(&mut guest_rx);

        host.disconnect();
        let events = drain(&mut guest_rx);
        assert!(matches!(
            events.as_slice(),
            [
                TransportEvent::PeersChanged { host: None, .. },
                TransportEvent::Disconnected
            ]
        ));
        assert!(network.room_of(guest.local_peer()).is_none());
    }

    #[tokio::test]
    async fn test_guest_leaving_updates_host() {
        let network = MemoryNetwork::new();
        let (host, mut host_rx) = network.join(&config("host", true));
        let (guest, _guest_rx) = network.join(&config("guest", true));

        host.start_advertising_host();
        guest.connect_to_host(host.local_peer());
        drain(&mut host_rx);

        guest.disconnect();
        let events = drain(&mut host_rx);
        assert!(matches!(
            events.as_slice(),
            [TransportEvent::PeersChanged { peers, host: Some(_) }] if peers.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_send_reaches_other_members() {
        let network = MemoryNetwork::new();
        let (host, mut host_rx) = network.join(&config("host", true));
        let (a, mut a_rx) = network.join(&config("a", true));
        let (b, mut b_rx) = network.join(&config("b", true));

        host.start_advertising_host();
        a.connect_to_host(host.local_peer());
        b.connect_to_host(host.local_peer());
        drain(&mut host_rx);
        drain(&mut a_rx);
        drain(&mut b_rx);

        a.send_data(vec![1, 2, 3], DeliveryMode::Reliable);

        for rx in [&mut host_rx, &mut b_rx] {
            let events = drain(rx);
            assert!(matches!(
                events.as_slice(),
                [TransportEvent::DataReceived { bytes, from }]
                    if bytes == &vec![1, 2, 3] && from == a.local_peer()
            ));
        }
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn test_total_loss_only_drops_unreliable() {
        let network = MemoryNetwork::with_loss(1.0);
        let (host, mut host_rx) = network.join(&config("host", true));
        let (guest, _guest_rx) = network.join(&config("guest", true));

        host.start_advertising_host();
        guest.connect_to_host(host.local_peer());
        drain(&mut host_rx);

        guest.send_data(vec![9], DeliveryMode::Unreliable);
        assert!(drain(&mut host_rx).is_empty());

        guest.send_data(vec![9], DeliveryMode::Reliable);
        assert_eq!(drain(&mut host_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_nan_loss_means_no_loss() {
        let network = MemoryNetwork::with_loss(f64::NAN);
        let (host, mut host_rx) = network.join(&config("host", true));
        let (guest, _guest_rx) = network.join(&config("guest", true));

        host.start_advertising_host();
        guest.connect_to_host(host.local_peer());
        drain(&mut host_rx);

        for _ in 0..20 {
            guest.send_data(vec![7], DeliveryMode::Unreliable);
        }
        assert_eq!(drain(&mut host_rx).len(), 20);
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let network = MemoryNetwork::new();
        let (host, _host_rx) = network.join(&config("host", true));
        let (guest, mut guest_rx) = network.join(&config("guest", true));

        host.start_advertising_host();
        guest.start_searching_for_hosts();
        drain(&mut guest_rx);

        drop(host);
        assert_eq!(network.peer_count(), 1);
        assert_eq!(last_hosts(&drain(&mut guest_rx)), Some(vec![]));
    }
}
