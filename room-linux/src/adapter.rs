//! Narrow interfaces the detection actor drives. One concrete adapter per real radio/transport;
//! each normalizes its callbacks into `DetectionEvent`s on the shared channel.

use std::time::Duration;

use async_trait::async_trait;
use room_core::{FrameEncodeError, NetworkMessage, PeerIdentity};
use tokio::sync::mpsc;

use crate::detection::DetectionEvent;

pub type EventSender = mpsc::UnboundedSender<DetectionEvent>;

#[derive(Debug, thiserror::Error)]
pub enum ProximityError {
    #[error("proximity unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("mesh unavailable: {0}")]
    Unavailable(String),
    #[error("no connected peers")]
    NoConnectedPeers,
    #[error("no address known for peer {0}")]
    UnknownPeer(PeerIdentity),
    #[error("encode error: {0}")]
    Encode(#[from] FrameEncodeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("invitation rejected")]
    Rejected,
    #[error("invitation timed out")]
    Timeout,
}

/// Announces this device's major value. `start` is a no-op when already active.
#[async_trait]
pub trait ProximityBroadcaster: Send + Sync {
    async fn start(&mut self) -> Result<(), ProximityError>;
    async fn stop(&mut self);
    fn is_active(&self) -> bool;
}

/// Ranges for beacons in the application namespace, self excluded.
#[async_trait]
pub trait ProximityScanner: Send + Sync {
    async fn start(&mut self, events: EventSender) -> Result<(), ProximityError>;
    async fn stop(&mut self);
    fn is_active(&self) -> bool;
}

/// Advertise, browse, invite, and exchange messages with connected peers.
#[async_trait]
pub trait MeshSession: Send + Sync {
    async fn start(&mut self, events: EventSender) -> Result<(), MeshError>;
    /// Tear down advertiser, browser and every session.
    async fn stop(&mut self);
    /// Fire off an invitation. The outcome arrives later as `Connected` or `InviteFailed`.
    fn invite(&self, identity: &PeerIdentity, timeout: Duration) -> Result<(), MeshError>;
    /// Fire-and-forget send. Fails only if none of `peers` is connected or encoding fails.
    async fn send(&self, message: &NetworkMessage, peers: &[PeerIdentity]) -> Result<(), MeshError>;
    fn is_active(&self) -> bool;
}
