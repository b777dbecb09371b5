//! # Courir Net
//!
//! Peer session management and game-change messaging for Courir, a
//! multiplayer runner game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        COURIR NET                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  network/          - Peer-to-peer session layer              │
//! │  ├── portal.rs     - Hosting, discovery, event dispatch      │
//! │  ├── protocol.rs   - Game change messages and codec          │
//! │  ├── transport.rs  - Connectivity library seam               │
//! │  ├── memory.rs     - In-process transport                    │
//! │  ├── listener.rs   - Listener traits and registry            │
//! │  └── peer.rs       - Peer identity and room membership       │
//! │                                                              │
//! │  records/          - Stored single-player runs               │
//! │  ├── store.rs      - Memory and JSON file stores             │
//! │  └── list.rs       - Previous runs list model                │
//! │                                                              │
//! │  setup.rs          - Match setup data                        │
//! │  config.rs         - Portal configuration                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Event Delivery
//!
//! A [`GameNetworkPortal`] drains its transport's events on a single tokio
//! task, so listeners are never called concurrently by one portal. Sends are
//! fire-and-forget: delivery mode picks reliability, never blocking.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod network;
pub mod records;
pub mod setup;

// Re-export commonly used types
pub use config::{ConfigError, PortalConfig};
pub use network::listener::{ConnectionListener, GameStateListener, ListenerId};
pub use network::peer::{PeerId, RoomMembership};
pub use network::portal::{GameNetworkPortal, PortalError};
pub use network::protocol::{GameChange, GameEvent, Payload, PayloadValue, ProtocolError};
pub use network::transport::{DeliveryMode, InvitationResponder, Transport, TransportEvent};
pub use records::{RunList, RunRecord, RunRecordStore};
pub use setup::{GameMode, GameSetupData};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
