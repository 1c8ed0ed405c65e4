//! Host-driven API: RoomCore receives proximity and mesh events from the host, returns actions.
//!
//! The core owns the peer registry and makes the gating decision: a mesh peer is only
//! invited, or allowed to connect, once proximity ranging has already put it in the registry.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::identity::{PeerIdentity, ProfileError, ProximityMajor, UserProfile};
use crate::peer::{DetectedPeer, MeshHandle, PeerPhase, ProximityLevel};
use crate::protocol::{MessageKind, NetworkMessage};
use crate::registry::{PeerRegistry, DEFAULT_EVICTION_TIMEOUT};
use crate::wire::{self, FrameDecodeError};

/// Invitations not answered within this window are abandoned by the transport.
pub const DEFAULT_INVITE_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the host should call [`RoomCore::sweep`].
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangedBeacon {
    pub major: ProximityMajor,
    pub level: ProximityLevel,
}

/// Normalized scanner output. One event per ranging cycle.
#[derive(Debug, Clone)]
pub enum ProximityEvent {
    Ranged(Vec<RangedBeacon>),
}

/// Normalized mesh session callbacks.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// Browser resolved an advertiser carrying `identity` in its discovery metadata.
    PeerFound { identity: PeerIdentity },
    /// An invitation we sent was rejected, timed out, or failed to connect.
    InviteFailed { identity: PeerIdentity },
    Connected {
        identity: PeerIdentity,
        handle: MeshHandle,
    },
    Disconnected { identity: PeerIdentity },
    /// Decrypted frame bytes from a connected peer.
    Received { from: PeerIdentity, bytes: Vec<u8> },
}

/// Action for host to perform.
#[derive(Debug, Clone)]
pub enum Action {
    /// A previously unknown peer entered the registry.
    PeerDetected(PeerIdentity),
    /// Send a mesh invitation; the transport enforces `timeout`.
    Invite {
        identity: PeerIdentity,
        timeout: Duration,
    },
    Send {
        to: Vec<PeerIdentity>,
        message: NetworkMessage,
    },
    ProfileAttached(PeerIdentity),
    ChatReceived {
        from: PeerIdentity,
        text: String,
        sent_at: DateTime<Utc>,
    },
    /// Registry contents after a sweep, most recently seen first.
    PeersUpdated(Vec<DetectedPeer>),
    /// Local profile changed and should be written to the store.
    PersistProfile(UserProfile),
}

/// Main coordinator. Host passes events; core returns actions.
pub struct RoomCore {
    local: UserProfile,
    local_major: ProximityMajor,
    registry: PeerRegistry,
    /// Identities the mesh browser has reported. Browsing does not report a peer again,
    /// so ranging invites these itself.
    browsed: HashSet<PeerIdentity>,
    invite_timeout: Duration,
}

impl RoomCore {
    pub fn new(local: UserProfile) -> Self {
        Self::with_timeouts(local, DEFAULT_EVICTION_TIMEOUT, DEFAULT_INVITE_TIMEOUT)
    }

    pub fn with_timeouts(
        local: UserProfile,
        eviction_timeout: Duration,
        invite_timeout: Duration,
    ) -> Self {
        let local_major = local.id.major();
        Self {
            local,
            local_major,
            registry: PeerRegistry::new(eviction_timeout),
            browsed: HashSet::new(),
            invite_timeout,
        }
    }

    pub fn local_profile(&self) -> &UserProfile {
        &self.local
    }

    /// Major value this device broadcasts.
    pub fn local_major(&self) -> ProximityMajor {
        self.local_major
    }

    pub fn handle_proximity(&mut self, event: ProximityEvent, now: Instant) -> Vec<Action> {
        match event {
            ProximityEvent::Ranged(beacons) => beacons
                .into_iter()
                .flat_map(|b| self.on_proximity_ranged(b.major, b.level, now))
                .collect(),
        }
    }

    pub fn handle_mesh(&mut self, event: MeshEvent) -> Vec<Action> {
        match event {
            MeshEvent::PeerFound { identity } => self.on_mesh_peer_found(&identity),
            MeshEvent::InviteFailed { identity } => {
                self.on_invite_failed(&identity);
                vec![]
            }
            MeshEvent::Connected { identity, handle } => self.on_mesh_connected(&identity, handle),
            MeshEvent::Disconnected { identity } => {
                self.on_mesh_disconnected(&identity);
                vec![]
            }
            MeshEvent::Received { from, bytes } => match self.on_message_received(&from, &bytes) {
                Ok(actions) => actions,
                Err(e) => {
                    warn!(peer = %from, error = %e, "dropping undecodable mesh message");
                    vec![]
                }
            },
        }
    }

    /// Ranging reported `major` at `level`. Refreshes `last_seen`; self is ignored.
    /// A browsed peer still in `Detected` is invited here.
    pub fn on_proximity_ranged(
        &mut self,
        major: ProximityMajor,
        level: ProximityLevel,
        now: Instant,
    ) -> Vec<Action> {
        if major == self.local_major || self.registry.resolve(major) == self.local.id {
            return vec![];
        }
        let (id, created) = self.registry.record_ranging(major, level, now);
        let mut actions = Vec::new();
        if created {
            info!(peer = %id, ?level, "peer detected");
            actions.push(Action::PeerDetected(id.clone()));
        } else {
            debug!(peer = %id, ?level, "peer ranged");
        }
        let detected = self
            .registry
            .get(&id)
            .is_some_and(|p| p.phase == PeerPhase::Detected);
        if detected && self.browsed.contains(&id) {
            actions.extend(self.invite(&id));
        }
        actions
    }

    /// Browser found an advertiser. Invite it only if proximity already confirmed it.
    pub fn on_mesh_peer_found(&mut self, identity: &PeerIdentity) -> Vec<Action> {
        if *identity == self.local.id {
            return vec![];
        }
        self.browsed.insert(identity.clone());
        if !self.registry.learn_identity(identity) {
            info!(peer = %identity, "mesh peer not proximity-confirmed, not inviting yet");
            return vec![];
        }
        self.invite(identity).into_iter().collect()
    }

    fn invite(&mut self, identity: &PeerIdentity) -> Option<Action> {
        let timeout = self.invite_timeout;
        let peer = self.registry.get_mut(identity)?;
        match peer.phase {
            PeerPhase::Invited | PeerPhase::Connected => {
                debug!(peer = %identity, phase = ?peer.phase, "mesh peer already invited or connected");
                None
            }
            PeerPhase::Detected | PeerPhase::MeshVisible | PeerPhase::Disconnected => {
                // The returned action is the invitation.
                info!(peer = %identity, "inviting proximity-confirmed mesh peer");
                peer.phase = PeerPhase::Invited;
                Some(Action::Invite {
                    identity: identity.clone(),
                    timeout,
                })
            }
        }
    }

    /// Advertiser received an invitation. Accept only proximity-confirmed, not yet connected peers.
    pub fn should_accept_invitation(&mut self, identity: &PeerIdentity) -> bool {
        if *identity == self.local.id {
            return false;
        }
        if !self.registry.confirm_identity(identity) {
            info!(peer = %identity, "rejecting invitation from peer not proximity-confirmed");
            return false;
        }
        match self.registry.get(identity) {
            Some(peer) if peer.is_connected => {
                info!(peer = %identity, "rejecting invitation from already connected peer");
                false
            }
            Some(_) => {
                info!(peer = %identity, "accepting invitation");
                true
            }
            None => false,
        }
    }

    /// Invitation rejected or timed out. A later browse callback is the retry.
    pub fn on_invite_failed(&mut self, identity: &PeerIdentity) {
        if let Some(peer) = self.registry.get_mut(identity) {
            if peer.phase == PeerPhase::Invited {
                peer.phase = PeerPhase::MeshVisible;
            }
        }
        info!(peer = %identity, "invitation failed");
    }

    /// Session connected: mark the peer and send it our profile.
    pub fn on_mesh_connected(&mut self, identity: &PeerIdentity, handle: MeshHandle) -> Vec<Action> {
        self.registry.learn_identity(identity);
        match self.registry.get_mut(identity) {
            Some(peer) => {
                peer.is_connected = true;
                peer.phase = PeerPhase::Connected;
                peer.mesh_handle = Some(handle);
                info!(peer = %identity, handle = handle.0, "mesh peer connected");
            }
            None => warn!(peer = %identity, "connected peer is not in the registry"),
        }
        match NetworkMessage::profile(&self.local) {
            Ok(message) => vec![Action::Send {
                to: vec![identity.clone()],
                message,
            }],
            Err(e) => {
                warn!(error = %e, "failed to encode local profile");
                vec![]
            }
        }
    }

    /// Session dropped. The entry stays until the sweep evicts it.
    pub fn on_mesh_disconnected(&mut self, identity: &PeerIdentity) {
        if let Some(peer) = self.registry.get_mut(identity) {
            peer.is_connected = false;
            peer.phase = PeerPhase::Disconnected;
            peer.mesh_handle = None;
            info!(peer = %identity, "mesh peer disconnected");
        }
    }

    /// Decode and dispatch one envelope. Errors leave peer state untouched.
    pub fn on_message_received(
        &mut self,
        from: &PeerIdentity,
        bytes: &[u8],
    ) -> Result<Vec<Action>, MessageError> {
        let (message, _) = wire::decode_frame::<NetworkMessage>(bytes)?;
        match message.kind {
            MessageKind::Profile => {
                let profile = UserProfile::from_json(&message.payload)?;
                Ok(self.on_profile_received(profile))
            }
            MessageKind::Chat => {
                let text = String::from_utf8(message.payload)
                    .map_err(|_| MessageError::InvalidText)?;
                Ok(vec![Action::ChatReceived {
                    from: from.clone(),
                    text,
                    sent_at: message.timestamp,
                }])
            }
            MessageKind::Heartbeat => Ok(vec![]),
        }
    }

    /// Attach a received profile to the entry keyed by `profile.id`, not by the sender's handle.
    pub fn on_profile_received(&mut self, profile: UserProfile) -> Vec<Action> {
        if profile.id == self.local.id {
            return vec![];
        }
        match self.registry.get_mut(&profile.id) {
            Some(peer) => {
                info!(peer = %profile.id, name = %profile.display_name, "profile received");
                let id = profile.id.clone();
                peer.profile = Some(profile);
                vec![Action::ProfileAttached(id)]
            }
            None => {
                warn!(peer = %profile.id, "profile for unknown peer dropped");
                vec![]
            }
        }
    }

    /// Evict stale peers and report what is left.
    pub fn sweep(&mut self, now: Instant) -> Vec<Action> {
        for id in self.registry.sweep(now) {
            info!(peer = %id, "peer evicted");
        }
        vec![Action::PeersUpdated(self.registry.snapshot())]
    }

    pub fn snapshot(&self) -> Vec<DetectedPeer> {
        self.registry.snapshot()
    }

    pub fn peer(&self, id: &PeerIdentity) -> Option<&DetectedPeer> {
        self.registry.get(id)
    }

    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.registry.connected()
    }

    /// Rename the local profile, persist it and push it to connected peers.
    pub fn update_profile(&mut self, display_name: &str) -> Result<Vec<Action>, MessageError> {
        self.local.rename(display_name);
        let mut actions = vec![Action::PersistProfile(self.local.clone())];
        let connected = self.registry.connected();
        if !connected.is_empty() {
            actions.push(Action::Send {
                to: connected,
                message: NetworkMessage::profile(&self.local)?,
            });
        }
        Ok(actions)
    }

    /// Detection stopped: forget every peer.
    pub fn reset(&mut self) {
        self.registry.clear();
        self.browsed.clear();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("failed to decode message: {0}")]
    Decode(#[from] FrameDecodeError),
    #[error("invalid profile payload: {0}")]
    Profile(#[from] ProfileError),
    #[error("chat payload is not utf-8")]
    InvalidText,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::encode_frame;

    fn core_for(id: &str) -> RoomCore {
        RoomCore::new(UserProfile::with_identity(id.into(), id.to_uppercase()))
    }

    fn ranged(core: &mut RoomCore, id: &str, level: ProximityLevel, now: Instant) -> Vec<Action> {
        core.on_proximity_ranged(PeerIdentity::from(id).major(), level, now)
    }

    #[test]
    fn ranging_creates_peer_once() {
        let mut b = core_for("bob");
        let t0 = Instant::now();
        let actions = ranged(&mut b, "alice", ProximityLevel::Near, t0);
        assert!(matches!(actions.as_slice(), [Action::PeerDetected(_)]));
        assert!(ranged(&mut b, "alice", ProximityLevel::Far, t0 + Duration::from_secs(1)).is_empty());
        let snap = b.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].proximity_level, ProximityLevel::Far);
        assert_eq!(snap[0].last_seen, t0 + Duration::from_secs(1));
    }

    #[test]
    fn self_ranging_is_ignored() {
        let mut b = core_for("bob");
        assert!(ranged(&mut b, "bob", ProximityLevel::Immediate, Instant::now()).is_empty());
        assert!(b.snapshot().is_empty());
    }

    #[test]
    fn alice_found_after_ranging_is_invited() {
        let mut b = core_for("bob");
        let alice = PeerIdentity::from("alice");
        ranged(&mut b, "alice", ProximityLevel::Near, Instant::now());

        let actions = b.on_mesh_peer_found(&alice);
        assert!(matches!(
            actions.as_slice(),
            [Action::Invite { identity, timeout }] if *identity == alice && *timeout == DEFAULT_INVITE_TIMEOUT
        ));
        let peer = b.peer(&alice).unwrap();
        assert_eq!(peer.phase, PeerPhase::Invited);
        assert_eq!(peer.proximity_level, ProximityLevel::Near);
        assert_eq!(b.snapshot().len(), 1);
    }

    #[test]
    fn unranged_mesh_peer_is_not_invited() {
        let mut c = core_for("cheryl");
        let carol = PeerIdentity::from("carol");
        assert!(c.on_mesh_peer_found(&carol).is_empty());
        assert!(c.peer(&carol).is_none());
        assert!(c.snapshot().is_empty());
        assert!(!c.should_accept_invitation(&carol));
    }

    #[test]
    fn repeated_found_does_not_reinvite_until_failure() {
        let mut b = core_for("bob");
        let alice = PeerIdentity::from("alice");
        ranged(&mut b, "alice", ProximityLevel::Near, Instant::now());
        assert_eq!(b.on_mesh_peer_found(&alice).len(), 1);
        assert!(b.on_mesh_peer_found(&alice).is_empty());

        b.handle_mesh(MeshEvent::InviteFailed {
            identity: alice.clone(),
        });
        assert_eq!(b.peer(&alice).unwrap().phase, PeerPhase::MeshVisible);
        assert_eq!(b.on_mesh_peer_found(&alice).len(), 1);
    }

    #[test]
    fn invitation_acceptance_is_gated() {
        let mut a = core_for("alice");
        let bob = PeerIdentity::from("bob");
        assert!(!a.should_accept_invitation(&bob));
        ranged(&mut a, "bob", ProximityLevel::Immediate, Instant::now());
        assert!(a.should_accept_invitation(&bob));
        a.on_mesh_connected(&bob, MeshHandle(1));
        assert!(!a.should_accept_invitation(&bob));
    }

    #[test]
    fn mesh_events_never_refresh_last_seen() {
        let mut b = core_for("bob");
        let alice = PeerIdentity::from("alice");
        let t0 = Instant::now();
        ranged(&mut b, "alice", ProximityLevel::Near, t0);
        b.on_mesh_peer_found(&alice);
        b.on_mesh_connected(&alice, MeshHandle(9));
        let frame = encode_frame(&NetworkMessage::chat("hi")).unwrap();
        b.handle_mesh(MeshEvent::Received {
            from: alice.clone(),
            bytes: frame,
        });
        b.on_mesh_disconnected(&alice);
        assert_eq!(b.peer(&alice).unwrap().last_seen, t0);
    }

    #[test]
    fn connect_sends_profile_and_disconnect_retains_entry() {
        let mut b = core_for("bob");
        let alice = PeerIdentity::from("alice");
        ranged(&mut b, "alice", ProximityLevel::Near, Instant::now());
        b.on_mesh_peer_found(&alice);

        let actions = b.on_mesh_connected(&alice, MeshHandle(3));
        match actions.as_slice() {
            [Action::Send { to, message }] => {
                assert_eq!(to, &vec![alice.clone()]);
                assert_eq!(message.kind, MessageKind::Profile);
                let sent = UserProfile::from_json(&message.payload).unwrap();
                assert_eq!(sent.id, PeerIdentity::from("bob"));
            }
            other => panic!("expected profile send, got {other:?}"),
        }
        let peer = b.peer(&alice).unwrap();
        assert!(peer.is_connected);
        assert_eq!(peer.mesh_handle, Some(MeshHandle(3)));

        b.on_mesh_disconnected(&alice);
        let peer = b.peer(&alice).unwrap();
        assert!(!peer.is_connected);
        assert_eq!(peer.phase, PeerPhase::Disconnected);
    }

    #[test]
    fn received_profile_attaches_by_payload_id() {
        let mut b = core_for("bob");
        let alice = PeerIdentity::from("alice");
        ranged(&mut b, "alice", ProximityLevel::Near, Instant::now());
        b.on_mesh_peer_found(&alice);
        b.on_mesh_connected(&alice, MeshHandle(1));

        let profile = UserProfile::with_identity(alice.clone(), "Alice Liddell");
        let frame = encode_frame(&NetworkMessage::profile(&profile).unwrap()).unwrap();
        // Sender label is irrelevant; the payload id decides.
        let actions = b.handle_mesh(MeshEvent::Received {
            from: PeerIdentity::from("some-transport-name"),
            bytes: frame,
        });
        assert!(matches!(actions.as_slice(), [Action::ProfileAttached(id)] if *id == alice));
        assert_eq!(b.peer(&alice).unwrap().display_name(), "Alice Liddell");
    }

    #[test]
    fn chat_forwarded_and_heartbeat_ignored() {
        let mut b = core_for("bob");
        let alice = PeerIdentity::from("alice");
        let chat = encode_frame(&NetworkMessage::chat("hello")).unwrap();
        let actions = b.on_message_received(&alice, &chat).unwrap();
        assert!(matches!(actions.as_slice(), [Action::ChatReceived { text, .. }] if text == "hello"));

        let hb = encode_frame(&NetworkMessage::heartbeat()).unwrap();
        assert!(b.on_message_received(&alice, &hb).unwrap().is_empty());
    }

    #[test]
    fn malformed_message_is_dropped_without_state_change() {
        let mut b = core_for("bob");
        let alice = PeerIdentity::from("alice");
        ranged(&mut b, "alice", ProximityLevel::Near, Instant::now());
        let before = b.snapshot();
        assert!(b.on_message_received(&alice, &[1, 0, 0, 0, 0xff]).is_err());
        let actions = b.handle_mesh(MeshEvent::Received {
            from: alice.clone(),
            bytes: vec![9, 9],
        });
        assert!(actions.is_empty());
        let after = b.snapshot();
        assert_eq!(before.len(), after.len());
        assert!(after[0].profile.is_none());
    }

    #[test]
    fn stale_connected_peer_is_evicted() {
        let mut b = core_for("bob");
        let alice = PeerIdentity::from("alice");
        let t0 = Instant::now();
        ranged(&mut b, "alice", ProximityLevel::Near, t0);
        b.on_mesh_peer_found(&alice);
        b.on_mesh_connected(&alice, MeshHandle(1));

        // No pings for 11s; the 5s sweep cadence catches it at t0+15s at the latest.
        let after_five = b.sweep(t0 + Duration::from_secs(5));
        assert!(matches!(after_five.as_slice(), [Action::PeersUpdated(p)] if p.len() == 1));
        let actions = b.sweep(t0 + Duration::from_secs(11));
        assert!(matches!(actions.as_slice(), [Action::PeersUpdated(p)] if p.is_empty()));
        assert!(b.peer(&alice).is_none());
    }

    #[test]
    fn update_profile_persists_and_pushes() {
        let mut b = core_for("bob");
        let alice = PeerIdentity::from("alice");
        let only_persist = b.update_profile("Bobby").unwrap();
        assert!(matches!(only_persist.as_slice(), [Action::PersistProfile(p)] if p.display_name == "Bobby"));

        ranged(&mut b, "alice", ProximityLevel::Near, Instant::now());
        b.on_mesh_peer_found(&alice);
        b.on_mesh_connected(&alice, MeshHandle(1));
        let actions = b.update_profile("Robert").unwrap();
        assert_eq!(actions.len(), 2);
        assert!(matches!(&actions[1], Action::Send { to, .. } if to == &vec![alice.clone()]));
        assert_eq!(b.local_profile().id, PeerIdentity::from("bob"));
    }

    #[test]
    fn reset_clears_registry() {
        let mut b = core_for("bob");
        ranged(&mut b, "alice", ProximityLevel::Near, Instant::now());
        b.reset();
        assert!(b.snapshot().is_empty());
    }

    #[test]
    fn batch_ranging_event() {
        let mut b = core_for("bob");
        let event = ProximityEvent::Ranged(vec![
            RangedBeacon {
                major: PeerIdentity::from("alice").major(),
                level: ProximityLevel::Near,
            },
            RangedBeacon {
                major: b.local_major(),
                level: ProximityLevel::Immediate,
            },
        ]);
        let actions = b.handle_proximity(event, Instant::now());
        assert_eq!(actions.len(), 1);
        assert_eq!(b.snapshot().len(), 1);
    }

    #[test]
    fn browsed_peer_is_invited_once_ranged() {
        let mut b = core_for("bob");
        let alice = PeerIdentity::from("alice");
        let t0 = Instant::now();
        assert!(b.on_mesh_peer_found(&alice).is_empty());

        let actions = ranged(&mut b, "alice", ProximityLevel::Near, t0);
        assert!(matches!(
            actions.as_slice(),
            [Action::PeerDetected(id), Action::Invite { identity, .. }] if *id == alice && *identity == alice
        ));
        assert_eq!(b.peer(&alice).unwrap().phase, PeerPhase::Invited);

        // Further ranging while invited or after a failure does not re-invite.
        for i in 1..5 {
            assert!(ranged(&mut b, "alice", ProximityLevel::Near, t0 + Duration::from_secs(i)).is_empty());
        }
        b.on_invite_failed(&alice);
        assert!(ranged(&mut b, "alice", ProximityLevel::Near, t0 + Duration::from_secs(6)).is_empty());
        assert_eq!(b.peer(&alice).unwrap().phase, PeerPhase::MeshVisible);
    }

    #[test]
    fn browsed_peer_is_reinvited_after_eviction() {
        let mut b = core_for("bob");
        let alice = PeerIdentity::from("alice");
        let t0 = Instant::now();
        ranged(&mut b, "alice", ProximityLevel::Near, t0);
        assert_eq!(b.on_mesh_peer_found(&alice).len(), 1);
        b.sweep(t0 + Duration::from_secs(11));
        assert!(b.peer(&alice).is_none());

        let actions = ranged(&mut b, "alice", ProximityLevel::Far, t0 + Duration::from_secs(12));
        assert!(matches!(actions.as_slice(), [Action::PeerDetected(_), Action::Invite { .. }]));
    }

    #[test]
    fn ranging_unbrowsed_peer_does_not_invite() {
        let mut a = core_for("alice");
        let bob = PeerIdentity::from("bob");
        ranged(&mut a, "bob", ProximityLevel::Near, Instant::now());
        assert!(a.should_accept_invitation(&bob));
        let actions = ranged(&mut a, "bob", ProximityLevel::Near, Instant::now());
        assert!(actions.is_empty());
    }

    #[test]
    fn rejected_colliding_invitation_keeps_mapping() {
        let mut b = core_for("bob");
        let alice = PeerIdentity::from("alice");
        let mallory = crate::registry::colliding_identity(&alice);
        assert_eq!(mallory.major(), alice.major());
        let t0 = Instant::now();

        assert!(!b.should_accept_invitation(&mallory));
        ranged(&mut b, "alice", ProximityLevel::Near, t0);
        assert!(b.should_accept_invitation(&alice));
        assert!(!b.should_accept_invitation(&mallory));
        ranged(&mut b, "alice", ProximityLevel::Near, t0 + Duration::from_secs(1));
        assert!(b.should_accept_invitation(&alice));

        let ids: Vec<PeerIdentity> = b.snapshot().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![alice]);
    }
}
