//! PCM16 codec: normalized float samples to signed 16-bit little-endian
//! integers and back.
//!
//! Conversion is deterministic so that a wire chunk can be reproduced
//! exactly in tests: floats are clamped to [-1, 1], negative values scale by
//! 32768 and non-negative values by 32767, which maps -1.0 to i16::MIN and
//! 1.0 to i16::MAX without overflow on either edge.

use super::{AudioError, AudioResult};

/// Encode normalized float samples as PCM16 little-endian bytes.
///
/// Out-of-range input saturates at the 16-bit limits. Never fails.
pub fn encode_samples(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = sample.clamp(-1.0, 1.0);
        let v = if s < 0.0 {
            (s * 32768.0).round() as i16
        } else {
            (s * 32767.0).round() as i16
        };
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode PCM16 little-endian bytes into 16-bit samples.
///
/// Fails with [`AudioError::MalformedAudioData`] if the buffer length is not
/// a multiple of 2.
pub fn decode_samples(bytes: &[u8]) -> AudioResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::MalformedAudioData { len: bytes.len() });
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Convert 16-bit samples back to normalized floats in [-1, 1).
pub fn samples_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}
