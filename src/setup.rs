//! Game Setup
//!
//! What a match is started with: who is playing, who hosts, the shared seed,
//! and an optional ghost run to race against.

use serde::{Deserialize, Serialize};

use crate::network::peer::{PeerId, RoomMembership};
use crate::records::RunRecord;

/// How the match is played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Local run, optionally against a ghost.
    SinglePlayer,
    /// Networked run in a room.
    Multiplayer,
}

/// Everything a game needs to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSetupData {
    /// Match mode.
    pub mode: GameMode,
    /// Room host, multiplayer only.
    pub host: Option<PeerId>,
    /// Remote players.
    pub peers: Vec<PeerId>,
    /// Shared obstacle seed, chosen by the host.
    pub seed: Option<u64>,
    /// Previous run replayed alongside the player.
    pub ghost: Option<RunRecord>,
}

impl GameSetupData {
    /// Solo run with a fresh course.
    pub fn single_player() -> Self {
        Self {
            mode: GameMode::SinglePlayer,
            host: None,
            peers: Vec::new(),
            seed: None,
            ghost: None,
        }
    }

    /// Solo run against a stored run.
    pub fn ghost_run(record: RunRecord) -> Self {
        Self {
            ghost: Some(record),
            ..Self::single_player()
        }
    }

    /// Networked run for everyone in `room`.
    pub fn multiplayer(room: &RoomMembership, seed: u64) -> Self {
        Self {
            mode: GameMode::Multiplayer,
            host: Some(room.host.clone()),
            peers: room.peers.iter().cloned().collect(),
            seed: Some(seed),
            ghost: None,
        }
    }

    /// True if a ghost run is attached.
    pub fn has_ghost(&self) -> bool {
        self.ghost.is_some()
    }
}
