//! Framing: length-prefix (4 bytes LE) + bincode payload.

use serde::de::DeserializeOwned;
use serde::Serialize;

pub const LEN_SIZE: usize = 4;
pub const MAX_FRAME_LEN: u32 = 1024 * 1024; // 1 MiB

/// Encode a value into a single frame: 4 bytes LE length + bincode payload.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(msg).map_err(FrameEncodeError::Encode)?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the value and the number of bytes consumed.
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<(T, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = frame_len(bytes[..LEN_SIZE].try_into().map_err(|_| FrameDecodeError::NeedMore)?)?;
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let msg: T =
        bincode::deserialize(&bytes[LEN_SIZE..LEN_SIZE + len]).map_err(FrameDecodeError::Decode)?;
    Ok((msg, LEN_SIZE + len))
}

/// Validate a length prefix read off a stream.
pub fn frame_len(prefix: [u8; LEN_SIZE]) -> Result<usize, FrameDecodeError> {
    let len = u32::from_le_bytes(prefix);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    Ok(len as usize)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
