//! Network Layer
//!
//! Peer-to-peer session management over an abstract connectivity transport.

pub mod listener;
pub mod memory;
pub mod peer;
pub mod portal;
pub mod protocol;
pub mod transport;

pub use listener::{ConnectionListener, GameStateListener, ListenerId, ListenerRegistry};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use peer::{PeerId, RoomMembership};
pub use portal::{GameNetworkPortal, PortalError};
pub use protocol::{
    GameChange, GameEvent, MalformedReason, MessageCodec, Payload, PayloadValue, ProtocolError,
    PROTOCOL_VERSION,
};
pub use transport::{
    DeliveryMode, EventReceiver, EventSender, InvitationResponder, Transport, TransportEvent,
};
