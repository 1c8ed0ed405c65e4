//! C ABI for linking room-core as a static library from iOS or other native hosts.
//! The host owns the radios (beacon ranging, mesh session) and forwards their callbacks here.
//! Time is passed in as milliseconds elapsed since `room_core_create`.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::slice;
use std::time::{Duration, Instant};

use crate::core::{Action, RoomCore};
use crate::identity::{PeerIdentity, ProximityMajor, UserProfile};
use crate::peer::{MeshHandle, PeerSummary, ProximityLevel};
use crate::protocol::PROTOCOL_VERSION;
use crate::wire::encode_frame;

struct FfiCore {
    core: RoomCore,
    epoch: Instant,
}

impl FfiCore {
    fn at(&self, elapsed_ms: u64) -> Instant {
        self.epoch + Duration::from_millis(elapsed_ms)
    }
}

unsafe fn core_mut<'a>(h: *mut c_void) -> Option<&'a mut FfiCore> {
    (h as *mut FfiCore).as_mut()
}

unsafe fn identity_arg(s: *const c_char) -> Option<PeerIdentity> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok().map(PeerIdentity::from)
}

unsafe fn write_out(bytes: &[u8], out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if out_buf.is_null() || bytes.len() > out_buf_len {
        return -1;
    }
    out_buf.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
    bytes.len() as c_int
}

#[no_mangle]
pub extern "C" fn room_core_version() -> u8 {
    PROTOCOL_VERSION
}

/// Create a core for the local profile. Returns opaque handle or null on bad arguments.
#[no_mangle]
pub extern "C" fn room_core_create(id: *const c_char, display_name: *const c_char) -> *mut c_void {
    let Some(id) = (unsafe { identity_arg(id) }) else {
        return std::ptr::null_mut();
    };
    if display_name.is_null() {
        return std::ptr::null_mut();
    }
    let name = unsafe { CStr::from_ptr(display_name) }
        .to_string_lossy()
        .into_owned();
    let core = FfiCore {
        core: RoomCore::new(UserProfile::with_identity(id, name)),
        epoch: Instant::now(),
    };
    Box::into_raw(Box::new(core)) as *mut c_void
}

/// Destroy core instance. No-op if h is null.
#[no_mangle]
pub extern "C" fn room_core_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut FfiCore) };
}

/// Major value the host should broadcast. Returns -1 if h is null.
#[no_mangle]
pub extern "C" fn room_core_local_major(h: *mut c_void) -> c_int {
    match unsafe { core_mut(h) } {
        Some(c) => c.core.local_major().0 as c_int,
        None => -1,
    }
}

/// Ranging callback. `level`: 0 unknown, 1 immediate, 2 near, 3 far.
/// Returns a bit set: 1 if a new peer was detected, 2 if the host should invite the peer whose
/// identity (UTF-8, not NUL-terminated) was copied to invite_out. -1 on error.
#[no_mangle]
pub extern "C" fn room_core_on_ranged(
    h: *mut c_void,
    major: u16,
    level: c_int,
    elapsed_ms: u64,
    invite_out: *mut u8,
    invite_out_len: usize,
) -> c_int {
    let Some(c) = (unsafe { core_mut(h) }) else {
        return -1;
    };
    let now = c.at(elapsed_ms);
    let actions = c
        .core
        .on_proximity_ranged(ProximityMajor(major), ProximityLevel::from_code(level), now);
    let mut flags = 0;
    for action in actions {
        match action {
            Action::PeerDetected(_) => flags |= 1,
            Action::Invite { identity, .. } => {
                if unsafe { write_out(identity.as_str().as_bytes(), invite_out, invite_out_len) } < 0 {
                    c.core.on_invite_failed(&identity);
                    return -1;
                }
                flags |= 2;
            }
            _ => {}
        }
    }
    flags
}

/// Browser found `identity`. Returns 1 if the host should invite it, 0 if not, -1 on error.
#[no_mangle]
pub extern "C" fn room_core_on_mesh_found(h: *mut c_void, identity: *const c_char) -> c_int {
    let (Some(c), Some(id)) = (unsafe { core_mut(h) }, unsafe { identity_arg(identity) }) else {
        return -1;
    };
    c.core
        .on_mesh_peer_found(&id)
        .iter()
        .any(|a| matches!(a, Action::Invite { .. })) as c_int
}

/// Invitation received. Returns 1 to accept, 0 to reject, -1 on error.
#[no_mangle]
pub extern "C" fn room_core_should_accept(h: *mut c_void, identity: *const c_char) -> c_int {
    let (Some(c), Some(id)) = (unsafe { core_mut(h) }, unsafe { identity_arg(identity) }) else {
        return -1;
    };
    c.core.should_accept_invitation(&id) as c_int
}

#[no_mangle]
pub extern "C" fn room_core_on_invite_failed(h: *mut c_void, identity: *const c_char) -> c_int {
    let (Some(c), Some(id)) = (unsafe { core_mut(h) }, unsafe { identity_arg(identity) }) else {
        return -1;
    };
    c.core.on_invite_failed(&id);
    0
}

/// Session connected. Fills out_buf with the framed profile message to send to the peer.
/// Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn room_core_on_connected(
    h: *mut c_void,
    identity: *const c_char,
    handle: u64,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let (Some(c), Some(id)) = (unsafe { core_mut(h) }, unsafe { identity_arg(identity) }) else {
        return -1;
    };
    for action in c.core.on_mesh_connected(&id, MeshHandle(handle)) {
        if let Action::Send { message, .. } = action {
            return match encode_frame(&message) {
                Ok(frame) => unsafe { write_out(&frame, out_buf, out_buf_len) },
                Err(_) => -1,
            };
        }
    }
    -1
}

#[no_mangle]
pub extern "C" fn room_core_on_disconnected(h: *mut c_void, identity: *const c_char) -> c_int {
    let (Some(c), Some(id)) = (unsafe { core_mut(h) }, unsafe { identity_arg(identity) }) else {
        return -1;
    };
    c.core.on_mesh_disconnected(&id);
    0
}

/// Received frame from `from`. Chat text (UTF-8, not NUL-terminated) is copied to out_text.
/// Returns chat bytes written (0 for non-chat messages), or -1 on decode error.
#[no_mangle]
pub extern "C" fn room_core_on_message(
    h: *mut c_void,
    from: *const c_char,
    bytes: *const u8,
    len: usize,
    out_text: *mut u8,
    out_text_len: usize,
) -> c_int {
    let (Some(c), Some(from)) = (unsafe { core_mut(h) }, unsafe { identity_arg(from) }) else {
        return -1;
    };
    if bytes.is_null() {
        return -1;
    }
    let frame = unsafe { slice::from_raw_parts(bytes, len) };
    let actions = match c.core.on_message_received(&from, frame) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(peer = %from, error = %e, "dropping undecodable mesh message");
            return -1;
        }
    };
    for action in actions {
        if let Action::ChatReceived { text, .. } = action {
            return unsafe { write_out(text.as_bytes(), out_text, out_text_len) };
        }
    }
    0
}

/// Evict stale peers. Returns the number of peers left, or -1 if h is null.
#[no_mangle]
pub extern "C" fn room_core_sweep(h: *mut c_void, elapsed_ms: u64) -> c_int {
    let Some(c) = (unsafe { core_mut(h) }) else {
        return -1;
    };
    let now = c.at(elapsed_ms);
    match c.core.sweep(now).into_iter().next() {
        Some(Action::PeersUpdated(peers)) => peers.len() as c_int,
        _ => 0,
    }
}

/// JSON array of peers, most recently seen first. Free with `room_core_free_string`.
#[no_mangle]
pub extern "C" fn room_core_snapshot_json(h: *mut c_void, elapsed_ms: u64) -> *mut c_char {
    let Some(c) = (unsafe { core_mut(h) }) else {
        return std::ptr::null_mut();
    };
    let now = c.at(elapsed_ms);
    let peers: Vec<PeerSummary> = c.core.snapshot().iter().map(|p| p.summary(now)).collect();
    match serde_json::to_string(&peers).ok().and_then(|s| CString::new(s).ok()) {
        Some(s) => s.into_raw(),
        None => std::ptr::null_mut(),
    }
}

#[no_mangle]
pub extern "C" fn room_core_free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    let _ = unsafe { CString::from_raw(s) };
}
