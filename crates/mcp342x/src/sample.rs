//! Decoding of raw conversion data.
//!
//! The device returns its sample as a big-endian two's-complement value
//! whose transmitted width exceeds the true sample width, followed by a
//! status byte echoing the configuration in effect.

use crate::config::{Config, Gain, Resolution};

/// One raw conversion result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Signed count recovered over the true sample width.
    pub count: i32,
    /// The status/configuration byte observed at read time.
    pub status: u8,
}

impl Sample {
    /// The configuration image the device reported for this sample.
    pub fn config(self) -> Config {
        Config::from_byte(self.status)
    }
}

/// Recover the signed count from the data bytes of a read transaction
/// (most significant first, status byte excluded).
pub(crate) fn decode_count(data: &[u8], resolution: Resolution) -> i32 {
    let mut count: u32 = 0;
    for &byte in data {
        count = (count << 8) | u32::from(byte);
    }
    let sign_bit = 1u32 << (resolution.bits() - 1);
    let data_mask = sign_bit - 1;
    if count & sign_bit != 0 {
        -(((!count) & data_mask) as i32) - 1
    } else {
        (count & data_mask) as i32
    }
}

/// Convert a signed count to a calibrated physical value.
pub(crate) fn to_volts(
    count: i32,
    resolution: Resolution,
    gain: Gain,
    scale_factor: f64,
    offset: f64,
) -> f64 {
    f64::from(count) * resolution.lsb_volts() * scale_factor / f64::from(gain.value()) + offset
}
