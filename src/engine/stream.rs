//! Multiplexed container output decoder
//!
//! The container runtime interleaves stdout and stderr into one byte stream of
//! frames. Each frame carries an 8-byte header:
//!
//! ```text
//! [stream_type, 0, 0, 0, len_b3, len_b2, len_b1, len_b0][payload ...]
//! ```
//!
//! `stream_type` is 1 for stdout and 2 for stderr; any other tag is skipped.
//! The payload length is a big-endian `u32`. Payload bytes that are not valid
//! UTF-8 are replaced with U+FFFD rather than failing the run.

use thiserror::Error;

/// Size of a frame header in bytes
pub const HEADER_SIZE: usize = 8;

/// Stream tag for stdout frames
pub const STDOUT: u8 = 1;
/// Stream tag for stderr frames
pub const STDERR: u8 = 2;

/// Decoded output of a sandbox run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedStreams {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("truncated frame header at offset {offset} ({remaining} bytes left)")]
    TruncatedHeader { offset: usize, remaining: usize },

    #[error("truncated frame payload at offset {offset}: expected {expected} bytes, found {found}")]
    TruncatedPayload {
        offset: usize,
        expected: usize,
        found: usize,
    },
}

/// Decode a complete multiplexed buffer into stdout and stderr text.
///
/// Payloads are concatenated per stream before UTF-8 decoding, so a
/// multi-byte character split across two frames decodes correctly.
pub fn decode(buffer: &[u8]) -> Result<DecodedStreams, StreamError> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut offset = 0;

    while offset < buffer.len() {
        let remaining = buffer.len() - offset;
        if remaining < HEADER_SIZE {
            return Err(StreamError::TruncatedHeader { offset, remaining });
        }

        let header = &buffer[offset..offset + HEADER_SIZE];
        let stream_type = header[0];
        let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        offset += HEADER_SIZE;

        let available = buffer.len() - offset;
        if available < length {
            return Err(StreamError::TruncatedPayload {
                offset: offset - HEADER_SIZE,
                expected: length,
                found: available,
            });
        }

        let payload = &buffer[offset..offset + length];
        match stream_type {
            STDOUT => stdout.extend_from_slice(payload),
            STDERR => stderr.extend_from_slice(payload),
            _ => {}
        }
        offset += length;
    }

    Ok(DecodedStreams {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Append one frame in wire format to `buffer`.
///
/// Payloads longer than `u32::MAX` are split over several frames.
pub fn encode_frame(buffer: &mut Vec<u8>, stream_type: u8, payload: &[u8]) {
    for chunk in payload.chunks(u32::MAX as usize) {
        buffer.push(stream_type);
        buffer.extend_from_slice(&[0, 0, 0]);
        buffer.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
        buffer.extend_from_slice(chunk);
    }
}
