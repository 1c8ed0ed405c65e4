//! Peer identity, the proximity major value derived from it, and the local user profile.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Prefix for identities fabricated from a bare major value (no mesh metadata yet).
pub const PSEUDO_IDENTITY_PREFIX: &str = "beacon-";

/// Opaque user identity. Generated once per install and never changed.
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        PeerIdentity(id.into())
    }

    /// Fresh random identity for a new install.
    pub fn generate() -> Self {
        PeerIdentity(uuid::Uuid::new_v4().to_string())
    }

    /// Placeholder identity for a beacon whose real identity is not known yet.
    pub fn pseudo(major: ProximityMajor) -> Self {
        PeerIdentity(format!("{}{}", PSEUDO_IDENTITY_PREFIX, major.0))
    }

    pub fn is_pseudo(&self) -> bool {
        self.0.starts_with(PSEUDO_IDENTITY_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Major value this identity broadcasts under.
    pub fn major(&self) -> ProximityMajor {
        ProximityMajor::for_identity(self)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerIdentity {
    fn from(s: &str) -> Self {
        PeerIdentity(s.to_string())
    }
}

/// 16-bit beacon sub-identifier. Two identities may share one; that is accepted.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProximityMajor(pub u16);

impl ProximityMajor {
    /// First 8 bytes (big endian) of SHA-256(identity), modulo 65536.
    pub fn for_identity(identity: &PeerIdentity) -> Self {
        let digest = Sha256::digest(identity.as_str().as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        ProximityMajor((u64::from_be_bytes(head) % 65536) as u16)
    }
}

impl fmt::Display for ProximityMajor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local user profile. `id` is fixed at creation; only the display name changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: PeerIdentity,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: PeerIdentity::generate(),
            display_name: display_name.into(),
            joined_at: Utc::now(),
        }
    }

    pub fn with_identity(id: PeerIdentity, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            joined_at: Utc::now(),
        }
    }

    pub fn rename(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
    }

    /// JSON with RFC 3339 `joinedAt`. Used both on the wire and in the local store.
    pub fn to_json(&self) -> Result<Vec<u8>, ProfileError> {
        serde_json::to_vec(self).map_err(ProfileError::Json)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, ProfileError> {
        let profile: UserProfile = serde_json::from_slice(bytes).map_err(ProfileError::Json)?;
        if profile.id.as_str().is_empty() {
            return Err(ProfileError::EmptyId);
        }
        Ok(profile)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("profile has an empty id")]
    EmptyId,
}
