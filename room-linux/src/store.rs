//! Simple key-value store: one JSON object file. Holds the local profile.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use room_core::UserProfile;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Key the local profile lives under.
pub const PROFILE_KEY: &str = "roomdetect.local_profile";

const STATE_FILE: &str = "state.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file json: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct KeyValueStore {
    path: PathBuf,
}

impl KeyValueStore {
    pub fn open(dir: &Path) -> Self {
        Self {
            path: dir.join(STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, serde_json::Value>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.read_all()?.remove(key) {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    /// Write through a temp file so a crash never leaves a torn state file.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let mut all = self.read_all()?;
        all.insert(key.to_string(), serde_json::to_value(value)?);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&all)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn load_profile(&self) -> Result<Option<UserProfile>, StoreError> {
        self.get(PROFILE_KEY)
    }

    pub fn save_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        self.set(PROFILE_KEY, profile)
    }

    /// Load the stored profile, or create and persist one named `display_name`.
    /// An unreadable store yields a fresh profile rather than an error.
    pub fn load_or_create_profile(&self, display_name: &str) -> UserProfile {
        match self.load_profile() {
            Ok(Some(profile)) => {
                tracing::info!(id = %profile.id, "loaded local profile");
                return profile;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("failed to read {}: {}", self.path.display(), e),
        }
        let profile = UserProfile::new(display_name);
        if let Err(e) = self.save_profile(&profile) {
            tracing::warn!("failed to persist new profile: {}", e);
        }
        tracing::info!(id = %profile.id, "created local profile");
        profile
    }
}
