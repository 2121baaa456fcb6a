//! Encoding of wire messages
//!
//! Binary position frame, little endian, no padding:
//!
//! | bytes        | content                       |
//! |--------------|-------------------------------|
//! | `[0, 4)`     | tick, u32 (truncated)         |
//! | `[4, 8)`     | body count `n`, u32           |
//! | `[8, 8+24n)` | `n × [x, y, z]` as f64        |
//!
//! JSON control messages go through serde_json.

use crate::network::protocol::{ClientMessage, ProtocolError, ServerMessage, MAX_MESSAGE_BYTES};
use crate::simulation::states::NVec3;

pub const FRAME_HEADER_LEN: usize = 8;
const BYTES_PER_BODY: usize = 3 * 8;

/// Decoded binary position frame
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFrame {
    pub tick: u32,
    pub positions: Vec<f64>, // flattened, 3 per body
}

impl PositionFrame {
    pub fn body_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn position(&self, i: usize) -> Option<NVec3> {
        let p = self.positions.get(3 * i..3 * i + 3)?;
        Some(NVec3::new(p[0], p[1], p[2]))
    }
}

/// Encode flattened positions (`3 × count` values); the tick is truncated to 32 bits
pub fn encode_positions(tick: u64, positions: &[f64]) -> Vec<u8> {
    debug_assert!(positions.len() % 3 == 0);
    let count = positions.len() / 3;
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + count * BYTES_PER_BODY);
    out.extend_from_slice(&(tick as u32).to_le_bytes());
    out.extend_from_slice(&(count as u32).to_le_bytes());
    for v in &positions[..count * 3] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode a position frame. Short buffers and trailing bytes are errors.
pub fn decode_positions(bytes: &[u8]) -> Result<PositionFrame, ProtocolError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(ProtocolError::ShortFrame(bytes.len()));
    }
    let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let tick = word(0);
    let count = word(4) as usize;

    let expected = count
        .checked_mul(BYTES_PER_BODY)
        .and_then(|n| n.checked_add(FRAME_HEADER_LEN))
        .ok_or(ProtocolError::FrameLength { expected: usize::MAX, actual: bytes.len() })?;
    if bytes.len() != expected {
        return Err(ProtocolError::FrameLength { expected, actual: bytes.len() });
    }

    let positions = bytes[FRAME_HEADER_LEN..]
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect();
    Ok(PositionFrame { tick, positions })
}

pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    if text.len() > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::TooLarge { size: text.len(), limit: MAX_MESSAGE_BYTES });
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

pub fn encode_client_message(msg: &ClientMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

pub fn encode_server_message(msg: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
