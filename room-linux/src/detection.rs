//! Detection actor: the single writer over `RoomCore`.
//!
//! Proximity and mesh adapters, the invitation handler, the console and the sweep timer all
//! feed one channel. The actor applies each event to the core in arrival order and carries out
//! the returned actions; peers, status and chats are published on watch/broadcast channels.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use room_core::{
    Action, MeshEvent, MessageError, NetworkMessage, PeerIdentity, PeerSummary, ProximityEvent,
    RoomCore,
};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::adapter::{EventSender, MeshError, MeshSession, ProximityBroadcaster, ProximityScanner};
use crate::store::KeyValueStore;

const CHAT_CAPACITY: usize = 64;

pub enum DetectionEvent {
    Proximity(ProximityEvent),
    Mesh(MeshEvent),
    /// Incoming invitation; the actor answers on `reply`.
    Invitation {
        identity: PeerIdentity,
        reply: oneshot::Sender<bool>,
    },
    Command(Command),
}

pub enum Command {
    Start(oneshot::Sender<DetectionStatus>),
    Stop(oneshot::Sender<()>),
    SendChat {
        text: String,
        reply: oneshot::Sender<Result<(), DetectionError>>,
    },
    Rename {
        name: String,
        reply: oneshot::Sender<Result<(), DetectionError>>,
    },
    Snapshot(oneshot::Sender<Vec<PeerSummary>>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("detection actor is gone")]
    Closed,
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Which components are up. `running` with a component down means detection is degraded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectionStatus {
    pub running: bool,
    pub broadcasting: bool,
    pub scanning: bool,
    pub mesh: bool,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub from: PeerIdentity,
    pub display_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

pub struct Adapters {
    pub broadcaster: Box<dyn ProximityBroadcaster>,
    pub scanner: Box<dyn ProximityScanner>,
    pub mesh: Box<dyn MeshSession>,
}

pub struct RoomDetection {
    core: RoomCore,
    adapters: Adapters,
    store: KeyValueStore,
    sweep_interval: Duration,
    status: DetectionStatus,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<DetectionEvent>,
    peers_tx: watch::Sender<Vec<PeerSummary>>,
    status_tx: watch::Sender<DetectionStatus>,
    chat_tx: broadcast::Sender<ChatMessage>,
}

impl RoomDetection {
    pub fn new(
        core: RoomCore,
        adapters: Adapters,
        store: KeyValueStore,
        sweep_interval: Duration,
    ) -> (Self, DetectionHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (peers_tx, peers_rx) = watch::channel(Vec::new());
        let (status_tx, status_rx) = watch::channel(DetectionStatus::default());
        let (chat_tx, _) = broadcast::channel(CHAT_CAPACITY);
        let handle = DetectionHandle {
            events: events_tx.clone(),
            peers: peers_rx,
            status: status_rx,
            chats: chat_tx.clone(),
        };
        let actor = Self {
            core,
            adapters,
            store,
            sweep_interval,
            status: DetectionStatus::default(),
            events_tx,
            events_rx,
            peers_tx,
            status_tx,
            chat_tx,
        };
        (actor, handle)
    }

    /// Process events until `Shutdown`. Stops every adapter on the way out.
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                ev = self.events_rx.recv() => {
                    let Some(ev) = ev else { break };
                    if !self.handle(ev).await {
                        break;
                    }
                }
                _ = sweep.tick(), if self.status.running => {
                    let actions = self.core.sweep(Instant::now());
                    self.execute(actions).await;
                }
            }
        }
        self.stop().await;
        info!("detection actor exited");
    }

    /// Returns false on shutdown.
    async fn handle(&mut self, event: DetectionEvent) -> bool {
        match event {
            DetectionEvent::Proximity(ev) => {
                if !self.status.running {
                    return true;
                }
                let actions = self.core.handle_proximity(ev, Instant::now());
                self.execute(actions).await;
            }
            DetectionEvent::Mesh(ev) => {
                if !self.status.running {
                    debug!(?ev, "mesh event while stopped");
                    return true;
                }
                let actions = self.core.handle_mesh(ev);
                self.execute(actions).await;
            }
            DetectionEvent::Invitation { identity, reply } => {
                let accepted = self.status.running && self.core.should_accept_invitation(&identity);
                let _ = reply.send(accepted);
            }
            DetectionEvent::Command(cmd) => match cmd {
                Command::Start(reply) => {
                    self.start().await;
                    let _ = reply.send(self.status);
                }
                Command::Stop(reply) => {
                    self.stop().await;
                    let _ = reply.send(());
                }
                Command::SendChat { text, reply } => {
                    let _ = reply.send(self.send_chat(&text).await);
                }
                Command::Rename { name, reply } => {
                    let result = match self.core.update_profile(&name) {
                        Ok(actions) => {
                            self.execute(actions).await;
                            Ok(())
                        }
                        Err(e) => Err(e.into()),
                    };
                    let _ = reply.send(result);
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.summaries());
                }
                Command::Shutdown(reply) => {
                    self.stop().await;
                    let _ = reply.send(());
                    return false;
                }
            },
        }
        self.publish_peers();
        true
    }

    /// Start broadcaster, scanner and mesh. A component that fails to start leaves detection degraded.
    async fn start(&mut self) {
        if self.status.running {
            debug!("detection already running");
            return;
        }
        if let Err(e) = self.adapters.broadcaster.start().await {
            warn!("{}; detection degraded", e);
        }
        if let Err(e) = self.adapters.scanner.start(self.events_tx.clone()).await {
            warn!("{}; detection degraded", e);
        }
        if let Err(e) = self.adapters.mesh.start(self.events_tx.clone()).await {
            warn!("{}; detection degraded", e);
        }
        self.status = DetectionStatus {
            running: true,
            broadcasting: self.adapters.broadcaster.is_active(),
            scanning: self.adapters.scanner.is_active(),
            mesh: self.adapters.mesh.is_active(),
        };
        info!(
            id = %self.core.local_profile().id,
            major = %self.core.local_major(),
            status = ?self.status,
            "detection started"
        );
        self.status_tx.send_replace(self.status);
    }

    async fn stop(&mut self) {
        if !self.status.running {
            return;
        }
        self.adapters.broadcaster.stop().await;
        self.adapters.scanner.stop().await;
        self.adapters.mesh.stop().await;
        self.core.reset();
        self.status = DetectionStatus::default();
        self.status_tx.send_replace(self.status);
        info!("detection stopped");
    }

    async fn send_chat(&mut self, text: &str) -> Result<(), DetectionError> {
        let peers = self.core.connected_peers();
        if peers.is_empty() {
            return Err(MeshError::NoConnectedPeers.into());
        }
        self.adapters
            .mesh
            .send(&NetworkMessage::chat(text), &peers)
            .await?;
        Ok(())
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::PeerDetected(id) | Action::ProfileAttached(id) => {
                    debug!(peer = %id, "registry changed");
                }
                Action::Invite { identity, timeout } => {
                    if let Err(e) = self.adapters.mesh.invite(&identity, timeout) {
                        warn!(peer = %identity, "invite failed: {}", e);
                        self.core.on_invite_failed(&identity);
                    }
                }
                Action::Send { to, message } => {
                    if let Err(e) = self.adapters.mesh.send(&message, &to).await {
                        warn!(kind = ?message.kind, "send failed: {}", e);
                    }
                }
                Action::ChatReceived {
                    from,
                    text,
                    sent_at,
                } => {
                    let display_name = self
                        .core
                        .peer(&from)
                        .map(|p| p.display_name().to_string())
                        .unwrap_or_else(|| from.to_string());
                    // No subscribers is fine.
                    let _ = self.chat_tx.send(ChatMessage {
                        from,
                        display_name,
                        text,
                        sent_at,
                    });
                }
                Action::PeersUpdated(_) => self.publish_peers(),
                Action::PersistProfile(profile) => {
                    if let Err(e) = self.store.save_profile(&profile) {
                        warn!("failed to persist profile: {}", e);
                    }
                }
            }
        }
    }

    fn summaries(&self) -> Vec<PeerSummary> {
        let now = Instant::now();
        self.core.snapshot().iter().map(|p| p.summary(now)).collect()
    }

    fn publish_peers(&self) {
        self.peers_tx.send_replace(self.summaries());
    }
}

/// Cloneable front door to the actor.
#[derive(Clone)]
pub struct DetectionHandle {
    events: EventSender,
    peers: watch::Receiver<Vec<PeerSummary>>,
    status: watch::Receiver<DetectionStatus>,
    chats: broadcast::Sender<ChatMessage>,
}

impl DetectionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, DetectionError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(DetectionEvent::Command(make(tx)))
            .map_err(|_| DetectionError::Closed)?;
        rx.await.map_err(|_| DetectionError::Closed)
    }

    pub async fn start(&self) -> Result<DetectionStatus, DetectionError> {
        self.request(Command::Start).await
    }

    pub async fn stop(&self) -> Result<(), DetectionError> {
        self.request(Command::Stop).await
    }

    /// Send chat text to every connected peer.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), DetectionError> {
        let text = text.into();
        self.request(|reply| Command::SendChat { text, reply }).await?
    }

    pub async fn rename(&self, name: impl Into<String>) -> Result<(), DetectionError> {
        let name = name.into();
        self.request(|reply| Command::Rename { name, reply }).await?
    }

    pub async fn snapshot(&self) -> Result<Vec<PeerSummary>, DetectionError> {
        self.request(Command::Snapshot).await
    }

    pub async fn shutdown(&self) -> Result<(), DetectionError> {
        self.request(Command::Shutdown).await
    }

    pub fn peers(&self) -> watch::Receiver<Vec<PeerSummary>> {
        self.peers.clone()
    }

    pub fn status(&self) -> watch::Receiver<DetectionStatus> {
        self.status.clone()
    }

    pub fn subscribe_chats(&self) -> broadcast::Receiver<ChatMessage> {
        self.chats.subscribe()
    }

    #[cfg(test)]
    fn events(&self) -> EventSender {
        self.events.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use room_core::{
        encode_frame, MeshHandle, MessageKind, PeerPhase, ProximityLevel, RangedBeacon, UserProfile,
    };

    use crate::adapter::ProximityError;

    #[derive(Default)]
    struct FakeRadio {
        starts: Arc<AtomicUsize>,
        fail: bool,
        /// Starts without error but never comes up.
        inert: bool,
        active: bool,
    }

    #[async_trait]
    impl ProximityBroadcaster for FakeRadio {
        async fn start(&mut self) -> Result<(), ProximityError> {
            if self.fail {
                return Err(ProximityError::Unavailable("bluetooth off".into()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.active = !self.inert;
            Ok(())
        }
        async fn stop(&mut self) {
            self.active = false;
        }
        fn is_active(&self) -> bool {
            self.active
        }
    }

    #[async_trait]
    impl ProximityScanner for FakeRadio {
        async fn start(&mut self, _events: EventSender) -> Result<(), ProximityError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.active = !self.inert;
            Ok(())
        }
        async fn stop(&mut self) {
            self.active = false;
        }
        fn is_active(&self) -> bool {
            self.active
        }
    }

    #[derive(Default, Clone)]
    struct MeshLog {
        invites: Arc<Mutex<Vec<PeerIdentity>>>,
        sent: Arc<Mutex<Vec<(MessageKind, Vec<PeerIdentity>)>>>,
        stops: Arc<AtomicUsize>,
    }

    struct FakeMesh {
        log: MeshLog,
        active: bool,
    }

    #[async_trait]
    impl MeshSession for FakeMesh {
        async fn start(&mut self, _events: EventSender) -> Result<(), MeshError> {
            self.active = true;
            Ok(())
        }
        async fn stop(&mut self) {
            self.active = false;
            self.log.stops.fetch_add(1, Ordering::SeqCst);
        }
        fn invite(&self, identity: &PeerIdentity, _timeout: Duration) -> Result<(), MeshError> {
            self.log.invites.lock().unwrap().push(identity.clone());
            Ok(())
        }
        async fn send(&self, message: &NetworkMessage, peers: &[PeerIdentity]) -> Result<(), MeshError> {
            self.log
                .sent
                .lock()
                .unwrap()
                .push((message.kind, peers.to_vec()));
            Ok(())
        }
        fn is_active(&self) -> bool {
            self.active
        }
    }

    struct Harness {
        handle: DetectionHandle,
        mesh: MeshLog,
        broadcaster_starts: Arc<AtomicUsize>,
        _dir: tempfile::TempDir,
        store_dir: std::path::PathBuf,
    }

    fn spawn(fail_broadcast: bool) -> Harness {
        let broadcaster = FakeRadio {
            fail: fail_broadcast,
            ..FakeRadio::default()
        };
        spawn_with(broadcaster, FakeRadio::default())
    }

    fn spawn_with(broadcaster: FakeRadio, scanner: FakeRadio) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().to_path_buf();
        let broadcaster_starts = broadcaster.starts.clone();
        let mesh = MeshLog::default();
        let adapters = Adapters {
            broadcaster: Box::new(broadcaster),
            scanner: Box::new(scanner),
            mesh: Box::new(FakeMesh {
                log: mesh.clone(),
                active: false,
            }),
        };
        let core = RoomCore::new(UserProfile::with_identity("bob".into(), "Bob"));
        let (actor, handle) = RoomDetection::new(
            core,
            adapters,
            KeyValueStore::open(&store_dir),
            Duration::from_secs(5),
        );
        tokio::spawn(actor.run());
        Harness {
            handle,
            mesh,
            broadcaster_starts,
            _dir: dir,
            store_dir,
        }
    }

    fn range(h: &Harness, id: &str) {
        let beacon = RangedBeacon {
            major: PeerIdentity::from(id).major(),
            level: ProximityLevel::Near,
        };
        h.handle
            .events()
            .send(DetectionEvent::Proximity(ProximityEvent::Ranged(vec![beacon])))
            .unwrap();
    }

    fn mesh_event(h: &Harness, ev: MeshEvent) {
        h.handle.events().send(DetectionEvent::Mesh(ev)).unwrap();
    }

    async fn ask_invitation(h: &Harness, id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        h.handle
            .events()
            .send(DetectionEvent::Invitation {
                identity: id.into(),
                reply,
            })
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let h = spawn(false);
        let first = h.handle.start().await.unwrap();
        let second = h.handle.start().await.unwrap();
        assert_eq!(first, second);
        assert!(first.running && first.broadcasting && first.scanning && first.mesh);
        assert_eq!(h.broadcaster_starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broadcaster_failure_degrades_but_keeps_running() {
        let h = spawn(true);
        let status = h.handle.start().await.unwrap();
        assert!(status.running);
        assert!(!status.broadcasting);
        assert!(status.scanning);
        assert_eq!(*h.handle.status().borrow(), status);
    }

    #[tokio::test]
    async fn only_ranged_mesh_peers_are_invited() {
        let h = spawn(false);
        h.handle.start().await.unwrap();
        range(&h, "alice");
        mesh_event(&h, MeshEvent::PeerFound { identity: "alice".into() });
        mesh_event(&h, MeshEvent::PeerFound { identity: "carol".into() });
        let peers = h.handle.snapshot().await.unwrap();

        assert_eq!(*h.mesh.invites.lock().unwrap(), vec![PeerIdentity::from("alice")]);
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, PeerIdentity::from("alice"));
        assert_eq!(peers[0].phase, PeerPhase::Invited);
    }

    #[tokio::test]
    async fn scanner_that_never_comes_up_is_reported() {
        let scanner = FakeRadio {
            inert: true,
            ..FakeRadio::default()
        };
        let h = spawn_with(FakeRadio::default(), scanner);
        let status = h.handle.start().await.unwrap();
        assert!(status.running && status.broadcasting && status.mesh);
        assert!(!status.scanning);
    }

    #[tokio::test]
    async fn browsed_peer_is_invited_once_ranged() {
        let h = spawn(false);
        h.handle.start().await.unwrap();
        mesh_event(&h, MeshEvent::PeerFound { identity: "alice".into() });
        assert!(h.handle.snapshot().await.unwrap().is_empty());
        assert!(h.mesh.invites.lock().unwrap().is_empty());

        for _ in 0..5 {
            range(&h, "alice");
        }
        let peers = h.handle.snapshot().await.unwrap();
        assert_eq!(*h.mesh.invites.lock().unwrap(), vec![PeerIdentity::from("alice")]);
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].phase, PeerPhase::Invited);
    }

    #[tokio::test]
    async fn invitations_are_gated_on_proximity() {
        let h = spawn(false);
        h.handle.start().await.unwrap();
        assert!(!ask_invitation(&h, "alice").await);
        range(&h, "alice");
        assert!(ask_invitation(&h, "alice").await);
        assert!(!ask_invitation(&h, "carol").await);
    }

    #[tokio::test]
    async fn invitations_rejected_while_stopped() {
        let h = spawn(false);
        range(&h, "alice");
        assert!(!ask_invitation(&h, "alice").await);
        assert!(h.handle.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn connect_sends_profile_and_chat_is_delivered() {
        let h = spawn(false);
        let mut chats = h.handle.subscribe_chats();
        h.handle.start().await.unwrap();
        range(&h, "alice");
        mesh_event(
            &h,
            MeshEvent::Connected {
                identity: "alice".into(),
                handle: MeshHandle(1),
            },
        );
        let alice = UserProfile::with_identity("alice".into(), "Alice");
        let profile = encode_frame(&NetworkMessage::profile(&alice).unwrap()).unwrap();
        mesh_event(&h, MeshEvent::Received { from: "alice".into(), bytes: profile });
        let chat = encode_frame(&NetworkMessage::chat("hello")).unwrap();
        mesh_event(&h, MeshEvent::Received { from: "alice".into(), bytes: chat });

        let msg = chats.recv().await.unwrap();
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.display_name, "Alice");
        let sent = h.mesh.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![(MessageKind::Profile, vec![PeerIdentity::from("alice")])]);

        h.handle.send_chat("hi back").await.unwrap();
        let last = h.mesh.sent.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.0, MessageKind::Chat);
    }

    #[tokio::test]
    async fn chat_without_connected_peers_fails() {
        let h = spawn(false);
        h.handle.start().await.unwrap();
        range(&h, "alice");
        let err = h.handle.send_chat("anyone?").await.unwrap_err();
        assert!(matches!(err, DetectionError::Mesh(MeshError::NoConnectedPeers)));
    }

    #[tokio::test]
    async fn stop_forgets_peers_and_stops_mesh() {
        let h = spawn(false);
        h.handle.start().await.unwrap();
        range(&h, "alice");
        assert_eq!(h.handle.snapshot().await.unwrap().len(), 1);
        h.handle.stop().await.unwrap();
        assert!(h.handle.snapshot().await.unwrap().is_empty());
        assert_eq!(h.mesh.stops.load(Ordering::SeqCst), 1);
        assert!(!h.handle.status().borrow().running);
    }

    #[tokio::test]
    async fn rename_is_persisted() {
        let h = spawn(false);
        h.handle.rename("Robert").await.unwrap();
        let stored = KeyValueStore::open(&h.store_dir).load_profile().unwrap().unwrap();
        assert_eq!(stored.display_name, "Robert");
        assert_eq!(stored.id, PeerIdentity::from("bob"));
    }

    #[tokio::test]
    async fn shutdown_closes_the_handle() {
        let h = spawn(false);
        h.handle.start().await.unwrap();
        h.handle.shutdown().await.unwrap();
        assert!(matches!(h.handle.snapshot().await, Err(DetectionError::Closed)));
    }
}
