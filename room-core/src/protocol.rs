//! Room detection wire protocol: namespace constants and message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
pub use uuid::Uuid;

use crate::crypto::PublicKey;
use crate::identity::{PeerIdentity, ProfileError, UserProfile};

/// Current protocol version. Carried in the mesh invite handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// Application-wide proximity namespace. Beacons with any other UUID are ignored.
pub const PROXIMITY_UUID: Uuid = Uuid::from_bytes([
    0xE2, 0xC5, 0x6D, 0xB5, 0xDF, 0xFB, 0x48, 0xD2, 0xB0, 0x60, 0xD0, 0xF5, 0xA7, 0x10, 0x96, 0xE0,
]);

/// Mesh service name (at most 15 lowercase characters).
pub const MESH_SERVICE_NAME: &str = "testbetaroom";

/// Discovery metadata key holding the advertiser's identity.
pub const DISCOVERY_USER_ID_KEY: &str = "userId";

/// Minor value is unused by the correlator; every broadcaster sends 0.
pub const BEACON_MINOR: u16 = 0;

/// Calibrated signal strength at one metre, as advertised by broadcasters.
pub const MEASURED_POWER: i8 = -59;

/// Proximity beacon payload: namespace, major, minor, calibrated power.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconFrame {
    pub namespace: Uuid,
    pub major: u16,
    pub minor: u16,
    pub measured_power: i8,
}

impl BeaconFrame {
    pub fn new(major: u16) -> Self {
        Self {
            namespace: PROXIMITY_UUID,
            major,
            minor: BEACON_MINOR,
            measured_power: MEASURED_POWER,
        }
    }

    pub fn in_namespace(&self) -> bool {
        self.namespace == PROXIMITY_UUID
    }
}

/// Plaintext invitation handshake exchanged before a mesh session is encrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Handshake {
    /// Inviter announces itself. The receiver decides accept/reject.
    Invite {
        protocol_version: u8,
        identity: PeerIdentity,
        public_key: PublicKey,
    },
    /// Answer to an invite. `public_key` is only meaningful when accepted.
    InviteReply {
        accepted: bool,
        identity: PeerIdentity,
        public_key: PublicKey,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Profile,
    Chat,
    /// Reserved. Received heartbeats are ignored.
    Heartbeat,
}

/// Envelope exchanged between connected mesh peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMessage {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl NetworkMessage {
    pub fn profile(profile: &UserProfile) -> Result<Self, ProfileError> {
        Ok(Self {
            kind: MessageKind::Profile,
            payload: profile.to_json()?,
            timestamp: Utc::now(),
        })
    }

    pub fn chat(text: &str) -> Self {
        Self {
            kind: MessageKind::Chat,
            payload: text.as_bytes().to_vec(),
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            kind: MessageKind::Heartbeat,
            payload: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}
