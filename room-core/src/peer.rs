//! Detected peer model.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::identity::{PeerIdentity, ProximityMajor, UserProfile};

/// Coarse distance bucket reported by ranging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProximityLevel {
    Immediate,
    Near,
    Far,
    Unknown,
}

impl ProximityLevel {
    /// Map the host platform's numeric proximity code (0 unknown, 1 immediate, 2 near, 3 far).
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ProximityLevel::Immediate,
            2 => ProximityLevel::Near,
            3 => ProximityLevel::Far,
            _ => ProximityLevel::Unknown,
        }
    }
}

impl std::str::FromStr for ProximityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "immediate" => Ok(ProximityLevel::Immediate),
            "near" => Ok(ProximityLevel::Near),
            "far" => Ok(ProximityLevel::Far),
            "unknown" => Ok(ProximityLevel::Unknown),
            other => Err(format!("unknown proximity level: {other}")),
        }
    }
}

/// Opaque transport-level handle assigned by the mesh adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshHandle(pub u64);

/// Where a peer is in the detection handshake. Eviction removes the entry outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerPhase {
    /// Seen by proximity ranging only.
    Detected,
    /// Found by mesh browsing and proximity-confirmed; no invitation in flight.
    MeshVisible,
    Invited,
    Connected,
    /// Session dropped. Entry kept until the staleness sweep removes it.
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct DetectedPeer {
    pub id: PeerIdentity,
    pub major: ProximityMajor,
    pub profile: Option<UserProfile>,
    pub proximity_level: ProximityLevel,
    /// Refreshed by proximity ranging only, never by mesh traffic.
    pub last_seen: Instant,
    pub phase: PeerPhase,
    pub is_connected: bool,
    pub mesh_handle: Option<MeshHandle>,
}

impl DetectedPeer {
    pub fn new(id: PeerIdentity, major: ProximityMajor, level: ProximityLevel, now: Instant) -> Self {
        Self {
            id,
            major,
            profile: None,
            proximity_level: level,
            last_seen: now,
            phase: PeerPhase::Detected,
            is_connected: false,
            mesh_handle: None,
        }
    }

    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    pub fn display_name(&self) -> &str {
        self.profile
            .as_ref()
            .map(|p| p.display_name.as_str())
            .unwrap_or_else(|| self.id.as_str())
    }

    /// Serializable view with `last_seen` expressed relative to `now`.
    pub fn summary(&self, now: Instant) -> PeerSummary {
        PeerSummary {
            id: self.id.clone(),
            display_name: self.profile.as_ref().map(|p| p.display_name.clone()),
            proximity_level: self.proximity_level,
            phase: self.phase,
            is_connected: self.is_connected,
            last_seen_ms_ago: now.saturating_duration_since(self.last_seen).as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub id: PeerIdentity,
    pub display_name: Option<String>,
    pub proximity_level: ProximityLevel,
    pub phase: PeerPhase,
    pub is_connected: bool,
    pub last_seen_ms_ago: u64,
}
