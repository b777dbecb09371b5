//! Portal Listeners
//!
//! Capability traits for the two listener roles and the registry the portal
//! uses to fan notifications out to subscribers.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::network::peer::PeerId;
use crate::network::protocol::Payload;
use crate::network::transport::InvitationResponder;

/// Connection lifecycle callbacks. All methods default to no-ops.
pub trait ConnectionListener: Send + Sync {
    /// Visible hosts changed.
    fn found_hosts_changed(&self, _hosts: &[PeerId]) {}

    /// A guest asked to join the room we host.
    fn player_wants_to_join_room(&self, _peer: &PeerId, _responder: InvitationResponder) {}

    /// Room membership changed.
    fn players_in_room_changed(&self, _peers: &[PeerId], _host: &PeerId) {}

    /// We were dropped from the room. The portal is searching again by now.
    fn disconnected_from_room(&self) {}
}

/// In-game callbacks. All methods default to no-ops.
pub trait GameStateListener: Send + Sync {
    /// A runner jumped.
    fn jump_action_received(&self, _data: &Payload, _peer: &PeerId) {}

    /// A runner ducked.
    fn duck_action_received(&self, _data: &Payload, _peer: &PeerId) {}

    /// A runner collided.
    fn collide_action_received(&self, _data: &Payload, _peer: &PeerId) {}

    /// The host started the match.
    fn game_start_signal_received(&self, _data: &Payload, _peer: &PeerId) {}

    /// The match ended.
    fn game_end_signal_received(&self, _data: &Payload, _peer: &PeerId) {}
}

/// Handle returned by a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Subscribed listeners, notified in subscription order.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    connection: BTreeMap<ListenerId, Arc<dyn ConnectionListener>>,
    game_state: BTreeMap<ListenerId, Arc<dyn GameStateListener>>,
}

impl ListenerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Add a connection listener.
    pub fn add_connection(&mut self, listener: Arc<dyn ConnectionListener>) -> ListenerId {
        let id = self.allocate();
        self.connection.insert(id, listener);
        id
    }

    /// Add a game-state listener.
    pub fn add_game_state(&mut self, listener: Arc<dyn GameStateListener>) -> ListenerId {
        let id = self.allocate();
        self.game_state.insert(id, listener);
        id
    }

    /// Remove a listener of either role.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        self.connection.remove(&id).is_some() || self.game_state.remove(&id).is_some()
    }

    /// Snapshot of connection listeners.
    pub fn connection_listeners(&self) -> Vec<Arc<dyn ConnectionListener>> {
        self.connection.values().cloned().collect()
    }

    /// Snapshot of game-state listeners.
    pub fn game_state_listeners(&self) -> Vec<Arc<dyn GameStateListener>> {
        self.game_state.values().cloned().collect()
    }

    /// Total subscriptions.
    pub fn len(&self) -> usize {
        self.connection.len() + self.game_state.len()
    }

    /// True if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
