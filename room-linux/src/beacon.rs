//! LAN proximity: UDP multicast beacons standing in for a low-power radio beacon.
//! The broadcaster multicasts `BeaconFrame`s; the scanner batches what it hears into
//! one ranging event per cycle.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use room_core::protocol::BeaconFrame;
use room_core::wire::{decode_frame, encode_frame};
use room_core::{ProximityEvent, ProximityLevel, ProximityMajor, RangedBeacon};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::{EventSender, ProximityBroadcaster, ProximityError, ProximityScanner};
use crate::detection::DetectionEvent;

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 61, 61);
const BEACON_INTERVAL: Duration = Duration::from_secs(1);
const RANGING_CYCLE: Duration = Duration::from_secs(1);

pub struct LanBroadcaster {
    major: ProximityMajor,
    port: u16,
    task: Option<JoinHandle<()>>,
}

impl LanBroadcaster {
    pub fn new(major: ProximityMajor, port: u16) -> Self {
        Self {
            major,
            port,
            task: None,
        }
    }
}

#[async_trait]
impl ProximityBroadcaster for LanBroadcaster {
    async fn start(&mut self) -> Result<(), ProximityError> {
        if self.task.is_some() {
            return Ok(());
        }
        let socket = make_send_socket().map_err(|e| ProximityError::Unavailable(e.to_string()))?;
        let frame = encode_frame(&BeaconFrame::new(self.major.0))
            .map_err(|e| ProximityError::Unavailable(e.to_string()))?;
        let dest = SocketAddr::from((MULTICAST_GROUP, self.port));
        info!(major = %self.major, port = self.port, "broadcasting proximity beacon");
        self.task = Some(tokio::spawn(beacon_loop(socket, frame, dest)));
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("proximity beacon stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.task.is_some()
    }
}

pub struct LanScanner {
    local_major: ProximityMajor,
    port: u16,
    level: ProximityLevel,
    task: Option<JoinHandle<()>>,
}

impl LanScanner {
    pub fn new(local_major: ProximityMajor, port: u16, level: ProximityLevel) -> Self {
        Self {
            local_major,
            port,
            level,
            task: None,
        }
    }
}

#[async_trait]
impl ProximityScanner for LanScanner {
    async fn start(&mut self, events: EventSender) -> Result<(), ProximityError> {
        if self.task.is_some() {
            return Ok(());
        }
        let socket = make_multicast_socket(self.port)
            .map_err(|e| ProximityError::Unavailable(e.to_string()))?;
        info!(port = self.port, "ranging for proximity beacons");
        self.task = Some(tokio::spawn(ranging_loop(
            socket,
            self.local_major,
            self.level,
            events,
        )));
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("proximity ranging stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for LanBroadcaster {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for LanScanner {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn make_send_socket() -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

fn make_multicast_socket(port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

async fn beacon_loop(socket: UdpSocket, frame: Vec<u8>, dest: SocketAddr) {
    let mut ticker = tokio::time::interval(BEACON_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = socket.send_to(&frame, dest).await {
            debug!("beacon send failed: {}", e);
        }
    }
}

/// Major of a foreign, in-namespace beacon; `None` for self, foreign namespaces and garbage.
fn accept_beacon(bytes: &[u8], local_major: ProximityMajor) -> Option<ProximityMajor> {
    let (frame, _) = decode_frame::<BeaconFrame>(bytes).ok()?;
    if !frame.in_namespace() {
        return None;
    }
    let major = ProximityMajor(frame.major);
    (major != local_major).then_some(major)
}

async fn ranging_loop(
    socket: UdpSocket,
    local_major: ProximityMajor,
    level: ProximityLevel,
    events: EventSender,
) {
    let mut buf = vec![0u8; 512];
    let mut heard: HashMap<ProximityMajor, ProximityLevel> = HashMap::new();
    let mut cycle = tokio::time::interval(RANGING_CYCLE);
    loop {
        tokio::select! {
            recv = socket.recv_from(&mut buf) => match recv {
                Ok((n, from)) => {
                    if let Some(major) = accept_beacon(&buf[..n], local_major) {
                        debug!(%major, %from, "beacon heard");
                        heard.insert(major, level);
                    }
                }
                Err(e) => {
                    warn!("beacon socket error, ranging stopped: {}", e);
                    return;
                }
            },
            _ = cycle.tick() => {
                if heard.is_empty() {
                    continue;
                }
                let beacons = heard
                    .drain()
                    .map(|(major, level)| RangedBeacon { major, level })
                    .collect();
                let event = DetectionEvent::Proximity(ProximityEvent::Ranged(beacons));
                if events.send(event).is_err() {
                    return;
                }
            }
        }
    }
}
