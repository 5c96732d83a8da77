//! Wire codec for stored embeddings: raw little-endian `f32`, four bytes per
//! component, no header.

use thiserror::Error;

pub const BYTES_PER_COMPONENT: usize = std::mem::size_of::<f32>();

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("embedding has {got_bytes} bytes, expected {expected_bytes}")]
    InvalidLength {
        expected_bytes: usize,
        got_bytes: usize,
    },
}

pub fn encode_embedding(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * BYTES_PER_COMPONENT);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decodes `bytes` into exactly `dimension` floats.
pub fn decode_embedding(bytes: &[u8], dimension: usize) -> Result<Vec<f32>, DecodeError> {
    let expected_bytes = dimension.saturating_mul(BYTES_PER_COMPONENT);
    if bytes.len() != expected_bytes {
        return Err(DecodeError::InvalidLength {
            expected_bytes,
            got_bytes: bytes.len(),
        });
    }

    Ok(bytes
        .chunks_exact(BYTES_PER_COMPONENT)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
