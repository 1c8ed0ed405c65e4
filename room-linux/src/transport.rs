//! Mesh session transport: TCP, plaintext invite handshake, then encrypted length-prefixed frames.

use room_core::crypto::{
    decrypt_wire, derive_session_keys, encrypt_wire, Keypair, PublicKey, SessionKeys, TAG_LEN,
};
use room_core::protocol::{Handshake, PROTOCOL_VERSION};
use room_core::wire::{decode_frame, encode_frame, frame_len, LEN_SIZE, MAX_FRAME_LEN};
use room_core::PeerIdentity;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::adapter::MeshError;

/// Largest ciphertext a session carries: one full plaintext frame plus the tag.
const MAX_CIPHER_LEN: usize = LEN_SIZE + MAX_FRAME_LEN as usize + TAG_LEN;

/// Read one length-prefixed frame, prefix included.
async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>, MeshError> {
    let mut prefix = [0u8; LEN_SIZE];
    r.read_exact(&mut prefix).await?;
    let len = frame_len(prefix).map_err(|e| MeshError::Handshake(e.to_string()))?;
    let mut frame = vec![0u8; LEN_SIZE + len];
    frame[..LEN_SIZE].copy_from_slice(&prefix);
    r.read_exact(&mut frame[LEN_SIZE..]).await?;
    Ok(frame)
}

async fn read_handshake<R: AsyncRead + Unpin>(r: &mut R) -> Result<Handshake, MeshError> {
    let frame = read_frame(r).await?;
    let (msg, _) =
        decode_frame::<Handshake>(&frame).map_err(|e| MeshError::Handshake(e.to_string()))?;
    Ok(msg)
}

async fn write_handshake<W: AsyncWrite + Unpin>(w: &mut W, msg: &Handshake) -> Result<(), MeshError> {
    let frame = encode_frame(msg)?;
    w.write_all(&frame).await?;
    w.flush().await?;
    Ok(())
}

/// Inviter side. Returns the acceptor's identity and our session keys, or `Rejected`.
pub async fn handshake_connect(
    stream: &mut TcpStream,
    local: &PeerIdentity,
    keypair: &Keypair,
) -> Result<(PeerIdentity, SessionKeys), MeshError> {
    write_handshake(
        stream,
        &Handshake::Invite {
            protocol_version: PROTOCOL_VERSION,
            identity: local.clone(),
            public_key: keypair.public_key().clone(),
        },
    )
    .await?;
    match read_handshake(stream).await? {
        Handshake::InviteReply {
            accepted: true,
            identity,
            public_key,
        } => {
            let shared = keypair.shared_secret(&public_key);
            let keys = derive_session_keys(&shared, keypair.public_key(), &public_key, true);
            Ok((identity, keys))
        }
        Handshake::InviteReply { accepted: false, .. } => Err(MeshError::Rejected),
        Handshake::Invite { .. } => Err(MeshError::Handshake("expected invite reply".into())),
    }
}

/// An invitation read off an incoming connection, awaiting a decision.
pub struct PendingInvite {
    pub identity: PeerIdentity,
    pub public_key: PublicKey,
    pub compatible: bool,
}

/// Acceptor side, step one: read the invite.
pub async fn read_invite(stream: &mut TcpStream) -> Result<PendingInvite, MeshError> {
    match read_handshake(stream).await? {
        Handshake::Invite {
            protocol_version,
            identity,
            public_key,
        } => Ok(PendingInvite {
            identity,
            public_key,
            compatible: protocol_version == PROTOCOL_VERSION,
        }),
        Handshake::InviteReply { .. } => Err(MeshError::Handshake("expected invite".into())),
    }
}

/// Acceptor side, step two: send the decision. Returns session keys when accepted.
pub async fn answer_invite(
    stream: &mut TcpStream,
    invite: &PendingInvite,
    accepted: bool,
    local: &PeerIdentity,
    keypair: &Keypair,
) -> Result<Option<SessionKeys>, MeshError> {
    write_handshake(
        stream,
        &Handshake::InviteReply {
            accepted,
            identity: local.clone(),
            public_key: keypair.public_key().clone(),
        },
    )
    .await?;
    if !accepted {
        return Ok(None);
    }
    let shared = keypair.shared_secret(&invite.public_key);
    Ok(Some(derive_session_keys(
        &shared,
        &invite.public_key,
        keypair.public_key(),
        false,
    )))
}

/// Encrypt and write every plaintext frame pushed on `rx` until the channel closes.
pub async fn write_loop(mut writer: OwnedWriteHalf, key: [u8; 32], mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    let mut nonce: u64 = 0;
    while let Some(plain) = rx.recv().await {
        let cipher = match encrypt_wire(&key, nonce, &plain) {
            Ok(c) => c,
            Err(e) => {
                debug!("encrypt failed: {}", e);
                continue;
            }
        };
        nonce = nonce.saturating_add(1);
        let len = (cipher.len() as u32).to_le_bytes();
        if writer.write_all(&len).await.is_err()
            || writer.write_all(&cipher).await.is_err()
            || writer.flush().await.is_err()
        {
            break;
        }
    }
}

/// Read and decrypt one frame. `None` when the stream ends or fails authentication.
pub async fn read_encrypted(reader: &mut OwnedReadHalf, key: &[u8; 32], nonce: u64) -> Option<Vec<u8>> {
    let mut prefix = [0u8; LEN_SIZE];
    reader.read_exact(&mut prefix).await.ok()?;
    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_CIPHER_LEN {
        debug!(len, "encrypted frame too large, closing session");
        return None;
    }
    let mut cipher = vec![0u8; len];
    reader.read_exact(&mut cipher).await.ok()?;
    match decrypt_wire(key, nonce, &cipher) {
        Ok(plain) => Some(plain),
        Err(e) => {
            debug!("decrypt failed, closing session: {}", e);
            None
        }
    }
}
