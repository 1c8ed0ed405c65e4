//! Mesh session over the LAN: mDNS advertise/browse with the identity in the TXT record,
//! invitations and encrypted sessions over TCP.

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use local_ip_address::local_ip;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use room_core::crypto::{Keypair, SessionKeys};
use room_core::protocol::{DISCOVERY_USER_ID_KEY, MESH_SERVICE_NAME};
use room_core::{encode_frame, MeshEvent, MeshHandle, NetworkMessage, PeerIdentity};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::adapter::{EventSender, MeshError, MeshSession};
use crate::detection::DetectionEvent;
use crate::transport::{answer_invite, handshake_connect, read_encrypted, read_invite, write_loop};

/// Bound on reading an incoming invite; the decision itself comes from the actor.
const INVITE_READ_TIMEOUT: Duration = Duration::from_secs(10);

fn service_type() -> String {
    format!("_{}._tcp.local.", MESH_SERVICE_NAME)
}

struct Session {
    handle: MeshHandle,
    /// Who sent the invitation that created this session.
    initiator: PeerIdentity,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    tasks: [AbortHandle; 2],
}

impl Session {
    fn close(&self) {
        for t in &self.tasks {
            t.abort();
        }
    }
}

/// Both sides may invite each other at once. Keep the session the smaller identity initiated;
/// a second session from the same initiator replaces the old one.
fn replaces(existing_initiator: &PeerIdentity, new_initiator: &PeerIdentity) -> bool {
    new_initiator <= existing_initiator
}

struct Shared {
    local: PeerIdentity,
    keypair: Keypair,
    events: EventSender,
    addresses: Mutex<HashMap<PeerIdentity, SocketAddr>>,
    sessions: Mutex<HashMap<PeerIdentity, Session>>,
    next_handle: AtomicU64,
    /// Set once by stop. Handshakes in flight end and `establish` registers nothing after it.
    stopped: watch::Sender<bool>,
}

impl Shared {
    fn new(local: PeerIdentity, events: EventSender) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            local,
            keypair: Keypair::generate(),
            events,
            addresses: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            stopped,
        }
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Spawn `work` so that it is dropped as soon as the mesh stops.
    fn spawn_until_stopped<F>(&self, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut stopped = self.stopped.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = work => {}
                _ = stopped.wait_for(|s| *s) => {}
            }
        })
    }

    /// Flag the stop, then close every registered session.
    async fn shut(&self) {
        self.stopped.send_replace(true);
        for (_, session) in self.sessions.lock().await.drain() {
            session.close();
        }
    }
}

struct Running {
    daemon: ServiceDaemon,
    fullname: String,
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct MdnsMesh {
    local: PeerIdentity,
    port: u16,
    running: Option<Running>,
}

impl MdnsMesh {
    pub fn new(local: PeerIdentity, port: u16) -> Self {
        Self {
            local,
            port,
            running: None,
        }
    }
}

#[async_trait]
impl MeshSession for MdnsMesh {
    async fn start(&mut self, events: EventSender) -> Result<(), MeshError> {
        if self.running.is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(|e| MeshError::Unavailable(format!("bind {}: {}", self.port, e)))?;
        let daemon = ServiceDaemon::new().map_err(|e| MeshError::Unavailable(e.to_string()))?;
        let ip = local_ip().map_err(|e| MeshError::Unavailable(e.to_string()))?;

        let ty = service_type();
        let host = format!("{}.local.", self.local);
        let properties = [(DISCOVERY_USER_ID_KEY, self.local.as_str())];
        let info = ServiceInfo::new(
            &ty,
            self.local.as_str(),
            &host,
            &ip.to_string(),
            self.port,
            &properties[..],
        )
        .map_err(|e| MeshError::Unavailable(e.to_string()))?;
        let fullname = info.get_fullname().to_string();
        daemon
            .register(info)
            .map_err(|e| MeshError::Unavailable(e.to_string()))?;
        let browser = daemon
            .browse(&ty)
            .map_err(|e| MeshError::Unavailable(e.to_string()))?;
        info!(%fullname, %ip, port = self.port, "mesh advertising and browsing");

        let shared = Arc::new(Shared::new(self.local.clone(), events));
        let tasks = vec![
            tokio::spawn(accept_loop(listener, shared.clone())),
            tokio::spawn(browse_loop(browser, shared.clone())),
        ];
        self.running = Some(Running {
            daemon,
            fullname,
            shared,
            tasks,
        });
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        for t in &running.tasks {
            t.abort();
        }
        running.shared.shut().await;
        if let Err(e) = running.daemon.unregister(&running.fullname) {
            warn!("failed to unregister mesh service: {}", e);
        }
        if let Err(e) = running.daemon.shutdown() {
            debug!("mdns daemon shutdown: {}", e);
        }
        info!("mesh stopped");
    }

    fn invite(&self, identity: &PeerIdentity, timeout: Duration) -> Result<(), MeshError> {
        let running = self
            .running
            .as_ref()
            .ok_or_else(|| MeshError::Unavailable("mesh not started".into()))?;
        let shared = running.shared.clone();
        let identity = identity.clone();
        running.shared.spawn_until_stopped(async move {
            let outcome = tokio::time::timeout(timeout, connect_and_handshake(&shared, &identity))
                .await
                .unwrap_or(Err(MeshError::Timeout));
            match outcome {
                Ok((stream, keys)) => {
                    let initiator = shared.local.clone();
                    establish(&shared, stream, identity, initiator, keys).await;
                }
                Err(e) => {
                    info!(peer = %identity, "invitation failed: {}", e);
                    let _ = shared
                        .events
                        .send(DetectionEvent::Mesh(MeshEvent::InviteFailed { identity }));
                }
            }
        });
        Ok(())
    }

    async fn send(&self, message: &NetworkMessage, peers: &[PeerIdentity]) -> Result<(), MeshError> {
        let running = self.running.as_ref().ok_or(MeshError::NoConnectedPeers)?;
        let frame = encode_frame(message)?;
        let sessions = running.shared.sessions.lock().await;
        let mut delivered = 0;
        for peer in peers {
            match sessions.get(peer) {
                Some(s) if s.outbound.send(frame.clone()).is_ok() => delivered += 1,
                _ => debug!(%peer, "not connected, message skipped"),
            }
        }
        if delivered == 0 {
            return Err(MeshError::NoConnectedPeers);
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for MdnsMesh {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            for t in &running.tasks {
                t.abort();
            }
            running.shared.stopped.send_replace(true);
            if let Ok(mut sessions) = running.shared.sessions.try_lock() {
                for (_, session) in sessions.drain() {
                    session.close();
                }
            }
            let _ = running.daemon.unregister(&running.fullname);
            let _ = running.daemon.shutdown();
        }
    }
}

async fn browse_loop(browser: mdns_sd::Receiver<ServiceEvent>, shared: Arc<Shared>) {
    while let Ok(event) = browser.recv_async().await {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                let Some(id) = info.get_property_val_str(DISCOVERY_USER_ID_KEY) else {
                    debug!("advertiser without identity ignored");
                    continue;
                };
                let identity = PeerIdentity::new(id);
                if identity == shared.local {
                    continue;
                }
                let Some(ip) = info
                    .get_addresses()
                    .iter()
                    .next()
                    .and_then(|ip| ip.to_string().parse::<IpAddr>().ok())
                else {
                    continue;
                };
                let addr = SocketAddr::new(ip, info.get_port());
                debug!(peer = %identity, %addr, "mesh peer resolved");
                shared.addresses.lock().await.insert(identity.clone(), addr);
                let found = DetectionEvent::Mesh(MeshEvent::PeerFound { identity });
                if shared.events.send(found).is_err() {
                    return;
                }
            }
            ServiceEvent::ServiceRemoved(_ty, fullname) => {
                debug!(%fullname, "mesh advertiser removed");
            }
            _ => {}
        }
    }
}

async fn connect_and_handshake(
    shared: &Shared,
    identity: &PeerIdentity,
) -> Result<(TcpStream, SessionKeys), MeshError> {
    let addr = shared
        .addresses
        .lock()
        .await
        .get(identity)
        .copied()
        .ok_or_else(|| MeshError::UnknownPeer(identity.clone()))?;
    let mut stream = TcpStream::connect(addr).await?;
    let (remote, keys) = handshake_connect(&mut stream, &shared.local, &shared.keypair).await?;
    if remote != *identity {
        return Err(MeshError::Handshake(format!(
            "expected {}, {} answered",
            identity, remote
        )));
    }
    Ok((stream, keys))
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "incoming mesh connection");
                let owner = shared.clone();
                shared.spawn_until_stopped(async move {
                    if let Err(e) = handle_incoming(stream, &owner).await {
                        debug!(%addr, "incoming session dropped: {}", e);
                    }
                });
            }
            Err(e) => {
                warn!("mesh accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

async fn handle_incoming(mut stream: TcpStream, shared: &Arc<Shared>) -> Result<(), MeshError> {
    let invite = tokio::time::timeout(INVITE_READ_TIMEOUT, read_invite(&mut stream))
        .await
        .map_err(|_| MeshError::Timeout)??;
    let accepted = invite.compatible && {
        let (reply, decision) = oneshot::channel();
        shared
            .events
            .send(DetectionEvent::Invitation {
                identity: invite.identity.clone(),
                reply,
            })
            .map_err(|_| MeshError::Unavailable("detection stopped".into()))?;
        decision.await.unwrap_or(false)
    };
    let keys = answer_invite(&mut stream, &invite, accepted, &shared.local, &shared.keypair).await?;
    match keys {
        Some(keys) => {
            let initiator = invite.identity.clone();
            establish(shared, stream, invite.identity, initiator, keys).await;
            Ok(())
        }
        None => Err(MeshError::Rejected),
    }
}

/// Register a handshaken stream as the session for `identity`, then start reading.
async fn establish(
    shared: &Arc<Shared>,
    stream: TcpStream,
    identity: PeerIdentity,
    initiator: PeerIdentity,
    keys: SessionKeys,
) {
    let handle = MeshHandle(shared.next_handle.fetch_add(1, Ordering::Relaxed));
    let (reader, writer) = stream.into_split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();

    let writer_task = tokio::spawn(write_loop(writer, keys.send, outbound_rx));
    let events = shared.events.clone();
    let owner = shared.clone();
    let from = identity.clone();
    let recv_key = keys.recv;
    let reader_task = tokio::spawn(async move {
        let mut reader = reader;
        if ready_rx.await.is_err() {
            return;
        }
        let mut nonce: u64 = 0;
        while let Some(bytes) = read_encrypted(&mut reader, &recv_key, nonce).await {
            nonce = nonce.saturating_add(1);
            let received = DetectionEvent::Mesh(MeshEvent::Received {
                from: from.clone(),
                bytes,
            });
            if events.send(received).is_err() {
                return;
            }
        }
        close_session(&owner, &from, handle).await;
    });

    let mut sessions = shared.sessions.lock().await;
    if shared.is_stopped() {
        debug!(peer = %identity, "mesh stopped, session discarded");
        reader_task.abort();
        writer_task.abort();
        return;
    }
    if let Some(existing) = sessions.get(&identity) {
        if !replaces(&existing.initiator, &initiator) {
            debug!(peer = %identity, "duplicate session dropped");
            reader_task.abort();
            writer_task.abort();
            return;
        }
    }
    let session = Session {
        handle,
        initiator,
        outbound,
        tasks: [reader_task.abort_handle(), writer_task.abort_handle()],
    };
    if let Some(old) = sessions.insert(identity.clone(), session) {
        debug!(peer = %identity, old = old.handle.0, "session replaced");
        old.close();
    }
    drop(sessions);

    let _ = shared
        .events
        .send(DetectionEvent::Mesh(MeshEvent::Connected { identity, handle }));
    let _ = ready_tx.send(());
}

/// Stream ended. Only the current session for `identity` reports a disconnect.
async fn close_session(shared: &Shared, identity: &PeerIdentity, handle: MeshHandle) {
    let mut sessions = shared.sessions.lock().await;
    if sessions.get(identity).map(|s| s.handle) != Some(handle) {
        return;
    }
    if let Some(session) = sessions.remove(identity) {
        session.close();
    }
    drop(sessions);
    info!(peer = %identity, "mesh session closed");
    let _ = shared.events.send(DetectionEvent::Mesh(MeshEvent::Disconnected {
        identity: identity.clone(),
    }));
}
