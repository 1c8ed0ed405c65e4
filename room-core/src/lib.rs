//! Room detection protocol core.
//! Host-driven: no I/O; host passes proximity and mesh events and receives actions.

pub mod crypto;
pub mod identity;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod wire;

pub mod core;
pub mod ffi;

pub use crate::core::{
    Action, MeshEvent, MessageError, ProximityEvent, RangedBeacon, RoomCore, DEFAULT_INVITE_TIMEOUT,
    DEFAULT_SWEEP_INTERVAL,
};
pub use identity::{PeerIdentity, ProfileError, ProximityMajor, UserProfile};
pub use peer::{DetectedPeer, MeshHandle, PeerPhase, PeerSummary, ProximityLevel};
pub use protocol::{MessageKind, NetworkMessage, PROTOCOL_VERSION};
pub use registry::{PeerRegistry, DEFAULT_EVICTION_TIMEOUT};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
