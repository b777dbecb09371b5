//! Peer Identity and Room Membership
//!
//! Identities are handed out by the transport. Two peers are the same
//! participant iff their UUIDs match; the display name is presentation only.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a participant in a connectivity session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerId {
    id: Uuid,
    display_name: String,
}

impl PeerId {
    /// Create a fresh identity for a device.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self::from_parts(Uuid::new_v4(), display_name)
    }

    /// Rebuild an identity from a known UUID.
    pub fn from_parts(id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }

    /// Unique identifier.
    pub fn uuid(&self) -> Uuid {
        self.id
    }

    /// Name shown in peer lists.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// First eight hex digits of the UUID, for logs.
    pub fn short_id(&self) -> String {
        hex::encode(&self.id.as_bytes()[..4])
    }
}

impl PartialEq for PeerId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerId {}

impl Hash for PeerId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for PeerId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.short_id())
    }
}

/// Peers currently in a room together with its host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMembership {
    /// The peer hosting the room.
    pub host: PeerId,
    /// Connected peers as reported by the transport (local peer excluded).
    pub peers: BTreeSet<PeerId>,
}

impl RoomMembership {
    /// Build a membership snapshot.
    pub fn new(host: PeerId, peers: impl IntoIterator<Item = PeerId>) -> Self {
        Self {
            host,
            peers: peers.into_iter().collect(),
        }
    }

    /// Whether `peer` is the host.
    pub fn is_host(&self, peer: &PeerId) -> bool {
        &self.host == peer
    }

    /// Whether `peer` is in the room, host included.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.is_host(peer) || self.peers.contains(peer)
    }

    /// Number of remote peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}
