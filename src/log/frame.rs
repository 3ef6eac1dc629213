use crc32c::crc32c;
use std::io::{self, Read};
use thiserror::Error;

pub const MAX_FRAME_BODY_BYTES: usize = 64 * 1024 * 1024;

// offset + timestamp + kind + trailing crc
const FIXED_BODY_BYTES: usize = 8 + 8 + 1 + 4;

/// One log record as laid out on disk:
/// `length(u32) | offset(u64) | timestamp_micros(u64) | kind(u8) | payload | crc32c(u32)`,
/// all big-endian, crc computed over length through payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub offset: u64,
    pub timestamp_micros: u64,
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// On-disk size of this frame including the length prefix.
    pub fn encoded_len(&self) -> u64 {
        (4 + FIXED_BODY_BYTES + self.payload.len()) as u64
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("truncated frame")]
    Truncation,
    #[error("corrupt frame")]
    Corruption,
    #[error("io error: {0}")]
    Io(String),
}

impl From<io::Error> for FrameError {
    fn from(value: io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

pub fn encode_frame(
    offset: u64,
    timestamp_micros: u64,
    kind: u8,
    payload: &[u8],
) -> Result<Vec<u8>, FrameError> {
    let body_len = FIXED_BODY_BYTES + payload.len();
    if body_len > MAX_FRAME_BODY_BYTES {
        return Err(FrameError::Corruption);
    }
    let frame_length = u32::try_from(body_len).map_err(|_| FrameError::Corruption)?;

    let mut out = Vec::with_capacity(4 + body_len);
    out.extend_from_slice(&frame_length.to_be_bytes());
    out.extend_from_slice(&offset.to_be_bytes());
    out.extend_from_slice(&timestamp_micros.to_be_bytes());
    out.push(kind);
    out.extend_from_slice(payload);
    let crc = crc32c(&out).to_be_bytes();
    out.extend_from_slice(&crc);
    Ok(out)
}

pub struct FrameReader<R: Read> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let mut len_buf = [0u8; 4];
        let first = self.inner.read(&mut len_buf[0..1])?;
        if first == 0 {
            return Ok(None);
        }
        match self.inner.read_exact(&mut len_buf[1..4]) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(FrameError::Truncation);
            }
            Err(e) => return Err(FrameError::Io(e.to_string())),
        }
        let body_len = u32::from_be_bytes(len_buf) as usize;
        if body_len < FIXED_BODY_BYTES || body_len > MAX_FRAME_BODY_BYTES {
            return Err(FrameError::Corruption);
        }

        let mut body = vec![0u8; body_len];
        match self.inner.read_exact(&mut body) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(FrameError::Truncation);
            }
            Err(e) => return Err(FrameError::Io(e.to_string())),
        }

        let crc_offset = body_len - 4;
        let stored_crc = u32::from_be_bytes(
            body[crc_offset..]
                .try_into()
                .map_err(|_| FrameError::Corruption)?,
        );
        let mut crc_input = Vec::with_capacity(4 + crc_offset);
        crc_input.extend_from_slice(&len_buf);
        crc_input.extend_from_slice(&body[..crc_offset]);
        if stored_crc != crc32c(&crc_input) {
            return Err(FrameError::Corruption);
        }

        let offset = u64::from_be_bytes(body[0..8].try_into().map_err(|_| FrameError::Corruption)?);
        let timestamp_micros =
            u64::from_be_bytes(body[8..16].try_into().map_err(|_| FrameError::Corruption)?);
        let kind = body[16];
        let payload = body[17..crc_offset].to_vec();

        Ok(Some(Frame {
            offset,
            timestamp_micros,
            kind,
            payload,
        }))
    }
}
