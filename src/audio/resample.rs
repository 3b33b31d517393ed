//! Linear-interpolation resampler from an arbitrary capture rate down to the
//! fixed 24 kHz wire rate.
//!
//! Linear interpolation is enough here: the input is speech headed into a
//! 16-bit codec, and the capture path already applies platform noise
//! suppression. Interpolating past the last input sample reuses that sample
//! as both endpoints, so the output never reads out of bounds.

use super::WIRE_SAMPLE_RATE;

/// Resample mono float samples from `source_rate` to the 24 kHz wire rate.
///
/// Identity when `source_rate` already matches the wire rate. Output length
/// is `round(len / (source_rate / 24000))`.
pub fn resample_to_wire(samples: &[f32], source_rate: u32) -> Vec<f32> {
    if source_rate == WIRE_SAMPLE_RATE {
        return samples.to_vec();
    }

    let ratio = source_rate as f64 / WIRE_SAMPLE_RATE as f64;
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos.floor() as usize;
        let frac = (pos - idx as f64) as f32;

        let p0 = samples.get(idx).copied().unwrap_or(0.0);
        let p1 = samples.get(idx + 1).copied().unwrap_or(p0);
        out.push(p0 + (p1 - p0) * frac);
    }

    out
}
