//! RFC 6455 frame codec.
//!
//! Encodes server-originated frames (never masked) and decodes client frames
//! (masked) out of a growable byte buffer. The decoder consumes nothing from
//! the buffer until a complete frame is available, so the caller can keep
//! reading off the socket and retry.

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Upper bound on a single frame's payload. Client frames above this close
/// the connection instead of buffering without limit.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn to_byte(self) -> u8 {
        match self {
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, FrameError> {
        match byte {
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

/// One decoded protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload: Vec<u8>,
}

/// Frame codec errors. Any of these closes the connection; no
/// resynchronization is attempted.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown opcode 0x{0:x}")]
    UnknownOpcode(u8),

    #[error("frame payload of {0} bytes exceeds limit")]
    PayloadTooLarge(usize),
}

/// Encode a server-originated frame: FIN set, never masked.
pub fn encode_frame(payload: &[u8], opcode: Opcode) -> Vec<u8> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(len + 10);

    frame.push(0x80 | opcode.to_byte());

    if len < 126 {
        frame.push(len as u8);
    } else if len <= 65535 {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    frame.extend_from_slice(payload);
    frame
}

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame;
/// in that case nothing is consumed and the caller should read more bytes
/// and retry. On success the frame's bytes are consumed from the buffer.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    let opcode = Opcode::from_byte(buf[0] & 0x0F)?;
    let masked = buf[1] & 0x80 != 0;
    let mut payload_len = (buf[1] & 0x7F) as usize;
    let mut header_len = 2;

    if payload_len == 126 {
        if buf.len() < 4 {
            return Ok(None);
        }
        payload_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        header_len = 4;
    } else if payload_len == 127 {
        if buf.len() < 10 {
            return Ok(None);
        }
        let len = u64::from_be_bytes([
            buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
        ]);
        if len > MAX_FRAME_BYTES as u64 {
            return Err(FrameError::PayloadTooLarge(len as usize));
        }
        payload_len = len as usize;
        header_len = 10;
    }

    if payload_len > MAX_FRAME_BYTES {
        return Err(FrameError::PayloadTooLarge(payload_len));
    }

    let mask_key = if masked {
        if buf.len() < header_len + 4 {
            return Ok(None);
        }
        let key = [
            buf[header_len],
            buf[header_len + 1],
            buf[header_len + 2],
            buf[header_len + 3],
        ];
        header_len += 4;
        Some(key)
    } else {
        None
    };

    if buf.len() < header_len + payload_len {
        return Ok(None);
    }

    buf.advance(header_len);
    let mut payload = buf.split_to(payload_len).to_vec();

    if let Some(mask) = mask_key {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok(Some(Frame {
        fin,
        opcode,
        masked,
        payload,
    }))
}
