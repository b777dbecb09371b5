//! Transport Seam
//!
//! What the portal needs from a connectivity library. Outbound operations are
//! non-blocking; inbound activity arrives as [`TransportEvent`]s on a channel
//! handed to the portal at construction.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::network::peer::PeerId;

/// Delivery guarantee requested for an outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Ordered and retried until delivered.
    Reliable,
    /// Best effort, may be dropped or reordered.
    Unreliable,
}

/// Connectivity operations used by the portal.
///
/// Implementations must tolerate calls that do not apply in the current
/// state (stop advertising while not advertising, sending with no room) by
/// doing nothing.
pub trait Transport: Send + Sync {
    /// Identity of the local device.
    fn local_peer(&self) -> &PeerId;

    /// Advertise the local peer as a host.
    fn start_advertising_host(&self);

    /// Stop advertising.
    fn stop_advertising_host(&self);

    /// Start browsing for hosts.
    fn start_searching_for_hosts(&self);

    /// Stop browsing.
    fn stop_searching_for_hosts(&self);

    /// Ask `host` to let us join its room.
    fn connect_to_host(&self, host: &PeerId);

    /// Leave the current room.
    fn disconnect(&self);

    /// Broadcast bytes to every other room member. Never blocks.
    fn send_data(&self, bytes: Vec<u8>, mode: DeliveryMode);
}

/// Sending half of a transport event stream.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of a transport event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Inbound activity reported by a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// The set of advertising hosts visible to us changed.
    FoundHostsChanged(Vec<PeerId>),

    /// A guest asked to join the room we host.
    InvitationReceived {
        /// Who wants to join.
        peer: PeerId,
        /// Accept/decline handle.
        responder: InvitationResponder,
    },

    /// Room membership changed.
    PeersChanged {
        /// Connected peers, local peer excluded.
        peers: Vec<PeerId>,
        /// Host, if one is known.
        host: Option<PeerId>,
    },

    /// A link to `peer` came up.
    ConnectedToPeer(PeerId),

    /// We were dropped from the room.
    Disconnected,

    /// A packet arrived.
    DataReceived {
        /// Raw packet.
        bytes: Vec<u8>,
        /// Sender.
        from: PeerId,
    },
}

/// Decision handle for a join request. Only the first decision counts.
///
/// Clones share the same decision, so several listeners may hold one.
/// Dropping every clone without deciding declines the request.
#[derive(Clone)]
pub struct InvitationResponder {
    slot: Arc<Mutex<Option<oneshot::Sender<bool>>>>,
}

impl InvitationResponder {
    /// Create a responder and the receiver the transport waits on.
    pub fn pair() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let responder = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (responder, rx)
    }

    /// Accept or decline. Returns false if a decision was already made.
    pub fn respond(&self, accept: bool) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            // The transport may have given up waiting; the decision still
            // counts as made.
            Some(tx) => {
                let _ = tx.send(accept);
                true
            }
            None => false,
        }
    }

    /// Whether a decision has been made.
    pub fn is_decided(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for InvitationResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvitationResponder")
            .field("decided", &self.is_decided())
            .finish()
    }
}
