//! Peer registry: one entry per remote peer, keyed by identity, with staleness eviction.
//!
//! Ranging only carries a 16-bit major value. Until mesh discovery metadata tells us
//! which identity broadcasts a given major, the entry is keyed by a pseudo identity
//! (`beacon-<major>`). Learning the real identity re-keys that entry in place.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::identity::{PeerIdentity, ProximityMajor};
use crate::peer::{DetectedPeer, ProximityLevel};

/// Default eviction timeout.
pub const DEFAULT_EVICTION_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PeerRegistry {
    peers: HashMap<PeerIdentity, DetectedPeer>,
    resolved: HashMap<ProximityMajor, PeerIdentity>,
    eviction_timeout: Duration,
}

impl PeerRegistry {
    pub fn new(eviction_timeout: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            resolved: HashMap::new(),
            eviction_timeout,
        }
    }

    pub fn eviction_timeout(&self) -> Duration {
        self.eviction_timeout
    }

    /// Best-effort reverse mapping: a learned identity, else a pseudo identity.
    pub fn resolve(&self, major: ProximityMajor) -> PeerIdentity {
        self.resolved
            .get(&major)
            .cloned()
            .unwrap_or_else(|| PeerIdentity::pseudo(major))
    }

    /// Upsert from a ranging event. Returns the entry's key and whether it was created.
    pub fn record_ranging(
        &mut self,
        major: ProximityMajor,
        level: ProximityLevel,
        now: Instant,
    ) -> (PeerIdentity, bool) {
        let id = self.resolve(major);
        match self.peers.get_mut(&id) {
            Some(peer) => {
                peer.proximity_level = level;
                peer.last_seen = now;
                (id, false)
            }
            None => {
                self.peers
                    .insert(id.clone(), DetectedPeer::new(id.clone(), major, level, now));
                (id, true)
            }
        }
    }

    /// Record that `identity` broadcasts under its major value and fold any pseudo entry
    /// for that major into it. Returns whether `identity` is now a member.
    ///
    /// A major already mapped to a different identity that is still a member keeps its
    /// mapping.
    pub fn learn_identity(&mut self, identity: &PeerIdentity) -> bool {
        let major = identity.major();
        if let Some(current) = self.resolved.get(&major) {
            if current != identity && self.peers.contains_key(current) {
                tracing::debug!(%major, %current, %identity, "major value collision, keeping current member");
                return self.peers.contains_key(identity);
            }
        }
        self.resolved.insert(major, identity.clone());
        let pseudo = PeerIdentity::pseudo(major);
        if let Some(mut placeholder) = self.peers.remove(&pseudo) {
            match self.peers.get_mut(identity) {
                Some(existing) => {
                    if placeholder.last_seen > existing.last_seen {
                        existing.last_seen = placeholder.last_seen;
                        existing.proximity_level = placeholder.proximity_level;
                    }
                }
                None => {
                    tracing::debug!(%pseudo, %identity, "resolved beacon to identity");
                    placeholder.id = identity.clone();
                    self.peers.insert(identity.clone(), placeholder);
                }
            }
        }
        self.peers.contains_key(identity)
    }

    /// Membership check for an identity an inbound invitation claims. Only an existing
    /// member or an unresolved `beacon-<major>` placeholder counts; nothing else is recorded.
    pub fn confirm_identity(&mut self, identity: &PeerIdentity) -> bool {
        if self.peers.contains_key(identity) {
            return true;
        }
        if !self.peers.contains_key(&PeerIdentity::pseudo(identity.major())) {
            return false;
        }
        self.learn_identity(identity)
    }

    pub fn contains(&self, id: &PeerIdentity) -> bool {
        self.peers.contains_key(id)
    }

    pub fn get(&self, id: &PeerIdentity) -> Option<&DetectedPeer> {
        self.peers.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &PeerIdentity) -> Option<&mut DetectedPeer> {
        self.peers.get_mut(id)
    }

    /// Remove every entry not refreshed within the timeout, connected or not.
    pub fn sweep(&mut self, now: Instant) -> Vec<PeerIdentity> {
        let timeout = self.eviction_timeout;
        let stale: Vec<PeerIdentity> = self
            .peers
            .values()
            .filter(|p| p.is_stale(now, timeout))
            .map(|p| p.id.clone())
            .collect();
        for id in &stale {
            self.peers.remove(id);
        }
        stale
    }

    /// All entries, most recently seen first.
    pub fn snapshot(&self) -> Vec<DetectedPeer> {
        let mut out: Vec<DetectedPeer> = self.peers.values().cloned().collect();
        out.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn connected(&self) -> Vec<PeerIdentity> {
        let mut out: Vec<PeerIdentity> = self
            .peers
            .values()
            .filter(|p| p.is_connected)
            .map(|p| p.id.clone())
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

/// Find an identity whose major value equals `target`'s.
#[cfg(test)]
pub(crate) fn colliding_identity(target: &PeerIdentity) -> PeerIdentity {
    (0u32..)
        .map(|i| PeerIdentity::from(format!("m{i}").as_str()))
        .find(|id| id != target && id.major() == target.major())
        .expect("16-bit major space is small")
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_EVICTION_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_major_gets_pseudo_key() {
        let mut reg = PeerRegistry::default();
        let (id, created) = reg.record_ranging(ProximityMajor(77), ProximityLevel::Far, Instant::now());
        assert!(created);
        assert_eq!(id.as_str(), "beacon-77");
    }

    #[test]
    fn learning_identity_rekeys_pseudo_entry() {
        let mut reg = PeerRegistry::default();
        let alice = PeerIdentity::from("alice");
        let t0 = Instant::now();
        reg.record_ranging(alice.major(), ProximityLevel::Near, t0);

        assert!(reg.learn_identity(&alice));
        assert!(!reg.contains(&PeerIdentity::pseudo(alice.major())));
        let peer = reg.get(&alice).unwrap();
        assert_eq!(peer.id, alice);
        assert_eq!(peer.last_seen, t0);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn learning_unranged_identity_creates_nothing() {
        let mut reg = PeerRegistry::default();
        let carol = PeerIdentity::from("carol");
        assert!(!reg.learn_identity(&carol));
        assert!(reg.is_empty());

        // Later ranging resolves straight to the learned identity.
        let (id, created) = reg.record_ranging(carol.major(), ProximityLevel::Near, Instant::now());
        assert!(created);
        assert_eq!(id, carol);
    }

    #[test]
    fn sweep_ignores_connection_state() {
        let mut reg = PeerRegistry::new(Duration::from_secs(10));
        let t0 = Instant::now();
        let (id, _) = reg.record_ranging(ProximityMajor(5), ProximityLevel::Near, t0);
        reg.get_mut(&id).unwrap().is_connected = true;
        assert!(reg.sweep(t0 + Duration::from_secs(10)).is_empty());
        assert_eq!(reg.sweep(t0 + Duration::from_secs(11)), vec![id]);
        assert!(reg.is_empty());
    }

    #[test]
    fn snapshot_most_recent_first() {
        let mut reg = PeerRegistry::default();
        let t0 = Instant::now();
        reg.record_ranging(ProximityMajor(1), ProximityLevel::Near, t0);
        reg.record_ranging(ProximityMajor(2), ProximityLevel::Near, t0 + Duration::from_secs(2));
        reg.record_ranging(ProximityMajor(3), ProximityLevel::Near, t0 + Duration::from_secs(1));
        let order: Vec<u16> = reg.snapshot().iter().map(|p| p.major.0).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn placeholder_folds_into_existing_entry() {
        let mut reg = PeerRegistry::default();
        let alice = PeerIdentity::from("alice");
        let major = alice.major();
        let t0 = Instant::now();

        reg.record_ranging(major, ProximityLevel::Far, t0);
        assert!(reg.learn_identity(&alice));
        assert!(reg.sweep(t0 + Duration::from_secs(11)).contains(&alice));
        assert!(reg.is_empty());

        // Both a stale real entry and a fresher placeholder for the same major.
        reg.resolved.clear();
        reg.peers
            .insert(alice.clone(), DetectedPeer::new(alice.clone(), major, ProximityLevel::Far, t0));
        let t1 = t0 + Duration::from_secs(12);
        let (pseudo, created) = reg.record_ranging(major, ProximityLevel::Immediate, t1);
        assert!(created && pseudo.is_pseudo());
        assert_eq!(reg.len(), 2);

        assert!(reg.learn_identity(&alice));
        assert_eq!(reg.len(), 1);
        let peer = reg.get(&alice).unwrap();
        assert_eq!(peer.last_seen, t1);
        assert_eq!(peer.proximity_level, ProximityLevel::Immediate);
    }

    #[test]
    fn older_placeholder_does_not_rewind_entry() {
        let mut reg = PeerRegistry::default();
        let alice = PeerIdentity::from("alice");
        let major = alice.major();
        let t0 = Instant::now();
        reg.record_ranging(major, ProximityLevel::Far, t0);
        let t1 = t0 + Duration::from_secs(3);
        reg.peers
            .insert(alice.clone(), DetectedPeer::new(alice.clone(), major, ProximityLevel::Near, t1));

        assert!(reg.learn_identity(&alice));
        assert_eq!(reg.len(), 1);
        let peer = reg.get(&alice).unwrap();
        assert_eq!(peer.last_seen, t1);
        assert_eq!(peer.proximity_level, ProximityLevel::Near);
    }

    #[test]
    fn colliding_identity_cannot_take_over_member() {
        let mut reg = PeerRegistry::default();
        let alice = PeerIdentity::from("alice");
        let mallory = colliding_identity(&alice);
        assert_eq!(mallory.major(), alice.major());
        let t0 = Instant::now();
        reg.record_ranging(alice.major(), ProximityLevel::Near, t0);
        assert!(reg.learn_identity(&alice));

        assert!(!reg.learn_identity(&mallory));
        assert!(!reg.confirm_identity(&mallory));
        assert_eq!(reg.resolve(alice.major()), alice);
        let (id, created) = reg.record_ranging(alice.major(), ProximityLevel::Near, t0 + Duration::from_secs(1));
        assert_eq!(id, alice);
        assert!(!created);
    }

    #[test]
    fn confirm_records_nothing_without_placeholder() {
        let mut reg = PeerRegistry::default();
        let carol = PeerIdentity::from("carol");
        assert!(!reg.confirm_identity(&carol));
        assert!(reg.resolved.is_empty());

        reg.record_ranging(carol.major(), ProximityLevel::Near, Instant::now());
        assert!(reg.confirm_identity(&carol));
        assert_eq!(reg.resolve(carol.major()), carol);
        assert!(reg.confirm_identity(&carol));
    }
}
