use crate::capture::window::AccelSample;

/// One tri-axial sample on the wire: three little-endian i16 values.
pub const FRAME_SIZE: usize = 6;

const X_OFFSET: usize = 0;
const Y_OFFSET: usize = 2;
const Z_OFFSET: usize = 4;

/// Raw accelerometer counts as sent by the firmware, before scaling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawFrame {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl RawFrame {
    pub fn to_sample(self, scale: &ScaleConfig) -> AccelSample {
        AccelSample {
            x: scale.to_g(self.x),
            y: scale.to_g(self.y),
            z: scale.to_g(self.z),
        }
    }
}

/// Splits a notification payload into whole frames.
///
/// A payload is a concatenation of zero or more 6-byte frames. A trailing
/// partial frame is dropped rather than reported as an error so the
/// notification callback path never fails; the caller counts the skip.
pub fn decode_frames(payload: &[u8]) -> Vec<RawFrame> {
    payload
        .chunks_exact(FRAME_SIZE)
        .map(|chunk| RawFrame {
            x: i16::from_le_bytes([chunk[X_OFFSET], chunk[X_OFFSET + 1]]),
            y: i16::from_le_bytes([chunk[Y_OFFSET], chunk[Y_OFFSET + 1]]),
            z: i16::from_le_bytes([chunk[Z_OFFSET], chunk[Z_OFFSET + 1]]),
        })
        .collect()
}

/// Bytes left over after `decode_frames` consumed whole frames.
pub fn trailing_len(payload: &[u8]) -> usize {
    payload.len() % FRAME_SIZE
}

/// Converts raw counts to acceleration in g for a configured resolution.
///
/// The sensor reports signed values at `resolution_bits`, so full scale is
/// `2^(R-1) - 1` counts for `gravity_ref` of acceleration in either
/// direction.
#[derive(Clone, Copy, Debug)]
pub struct ScaleConfig {
    pub resolution_bits: u32,
    pub gravity_ref: f32,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        // LIS2DH style 14-bit counts, firmware reference gravity.
        Self {
            resolution_bits: 14,
            gravity_ref: 9.8,
        }
    }
}

impl ScaleConfig {
    /// Supported widths for a signed sample that fits in an i16.
    pub const RESOLUTION_RANGE: std::ops::RangeInclusive<u32> = 2..=16;

    pub fn scale_factor(&self) -> f32 {
        // Out-of-range widths saturate to the nearest supported one
        // rather than hitting a shift overflow.
        let bits = self
            .resolution_bits
            .clamp(*Self::RESOLUTION_RANGE.start(), *Self::RESOLUTION_RANGE.end());
        let max_positive = (1u32 << (bits - 1)) - 1;
        (2.0 * self.gravity_ref) / max_positive as f32
    }

    pub fn to_g(&self, raw: i16) -> f32 {
        raw as f32 * self.scale_factor()
    }
}
