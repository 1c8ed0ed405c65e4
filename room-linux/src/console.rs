//! Line-oriented stdin console: the daemon's stand-in for a chat UI.
//! Plain text is sent as chat; `/name`, `/peers`, `/start`, `/stop` and `/help` are commands.

use room_core::PeerSummary;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::detection::{DetectionError, DetectionHandle};

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Chat(&'a str),
    Rename(&'a str),
    Peers,
    Start,
    Stop,
    Help,
    Unknown(&'a str),
    Empty,
}

fn parse(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(cmd) = line.strip_prefix('/') else {
        return Input::Chat(line);
    };
    let (name, arg) = match cmd.split_once(char::is_whitespace) {
        Some((n, a)) => (n, a.trim()),
        None => (cmd, ""),
    };
    match name {
        "name" if !arg.is_empty() => Input::Rename(arg),
        "peers" => Input::Peers,
        "start" => Input::Start,
        "stop" => Input::Stop,
        "help" => Input::Help,
        _ => Input::Unknown(name),
    }
}

fn print_peers(peers: &[PeerSummary]) {
    if peers.is_empty() {
        println!("no peers in the room");
        return;
    }
    for p in peers {
        println!(
            "  {:<24} {:<10} {:<12} seen {}ms ago{}",
            p.display_name.as_deref().unwrap_or(p.id.as_str()),
            format!("{:?}", p.proximity_level),
            format!("{:?}", p.phase),
            p.last_seen_ms_ago,
            if p.is_connected { " [connected]" } else { "" },
        );
    }
}

/// Read stdin until EOF. Returns when stdin closes or the actor is gone.
pub async fn run_console(handle: DetectionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => return,
            Err(e) => {
                warn!("stdin: {}", e);
                return;
            }
        };
        let result = match parse(&line) {
            Input::Empty => Ok(()),
            Input::Chat(text) => handle.send_chat(text).await,
            Input::Rename(name) => handle.rename(name).await,
            Input::Peers => handle.snapshot().await.map(|peers| print_peers(&peers)),
            Input::Start => handle.start().await.map(|status| println!("{:?}", status)),
            Input::Stop => handle.stop().await,
            Input::Help => {
                println!("text to chat, /name <name>, /peers, /start, /stop");
                Ok(())
            }
            Input::Unknown(cmd) => {
                println!("unknown command /{}", cmd);
                Ok(())
            }
        };
        match result {
            Ok(()) => {}
            Err(DetectionError::Closed) => return,
            Err(e) => println!("error: {}", e),
        }
    }
}

/// Print incoming chats until the actor goes away.
pub async fn print_chats(handle: DetectionHandle) {
    let mut chats = handle.subscribe_chats();
    loop {
        match chats.recv().await {
            Ok(chat) => {
                debug!(peer = %chat.from, "chat received");
                println!(
                    "[{}] {}: {}",
                    chat.sent_at.format("%H:%M:%S"),
                    chat.display_name,
                    chat.text
                );
            }
            Err(RecvError::Lagged(n)) => debug!(skipped = n, "chat printer lagged"),
            Err(RecvError::Closed) => return,
        }
    }
}

/// Log when the room's membership or the detection status changes.
pub async fn log_room_changes(handle: DetectionHandle) {
    let mut peers = handle.peers();
    let mut status = handle.status();
    let mut last_count = 0;
    loop {
        tokio::select! {
            changed = peers.changed() => {
                if changed.is_err() {
                    return;
                }
                let count = peers.borrow_and_update().len();
                if count != last_count {
                    info!(peers = count, "room changed");
                    last_count = count;
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    return;
                }
                let s = *status.borrow_and_update();
                if s.running && !(s.broadcasting && s.scanning && s.mesh) {
                    warn!(status = ?s, "detection degraded");
                }
            }
        }
    }
}
