//! Configuration register codec for the MCP342x family.
//!
//! The device has a single 8-bit register. The low seven bits select gain,
//! resolution, conversion mode and input channel; bit 7 is the not-ready
//! status flag, which is never part of the stored configuration image.

use core::fmt;
use std::time::Duration;

use crate::error::InvalidParameter;

const GAIN_MASK: u8 = 0b0000_0011;
const RESOLUTION_MASK: u8 = 0b0000_1100;
const CONTINUOUS_MASK: u8 = 0b0001_0000;
const CHANNEL_MASK: u8 = 0b0110_0000;
const CONFIG_MASK: u8 = 0b0111_1111;

/// PGA gain setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Gain {
    X1 = 0b00,
    X2 = 0b01,
    X4 = 0b10,
    X8 = 0b11,
}

impl Gain {
    /// Look up a gain setting from its amplification factor (1, 2, 4 or 8).
    pub fn from_value(value: u8) -> Result<Self, InvalidParameter> {
        match value {
            1 => Ok(Gain::X1),
            2 => Ok(Gain::X2),
            4 => Ok(Gain::X4),
            8 => Ok(Gain::X8),
            other => Err(InvalidParameter {
                field: "gain",
                value: other,
            }),
        }
    }

    /// Amplification factor of this setting.
    pub fn value(self) -> u8 {
        match self {
            Gain::X1 => 1,
            Gain::X2 => 2,
            Gain::X4 => 4,
            Gain::X8 => 8,
        }
    }

    pub(crate) fn code(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_code(code: u8) -> Self {
        match code & GAIN_MASK {
            0b00 => Gain::X1,
            0b01 => Gain::X2,
            0b10 => Gain::X4,
            _ => Gain::X8,
        }
    }
}

/// Conversion resolution, which also fixes the sample rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Resolution {
    /// 12 bits, 240 SPS.
    Bits12 = 0b0000,
    /// 14 bits, 60 SPS.
    Bits14 = 0b0100,
    /// 16 bits, 15 SPS.
    Bits16 = 0b1000,
    /// 18 bits, 3.75 SPS. Not available on every part.
    Bits18 = 0b1100,
}

impl Resolution {
    /// Look up a resolution from its bit width (12, 14, 16 or 18).
    pub fn from_bits(bits: u8) -> Result<Self, InvalidParameter> {
        match bits {
            12 => Ok(Resolution::Bits12),
            14 => Ok(Resolution::Bits14),
            16 => Ok(Resolution::Bits16),
            18 => Ok(Resolution::Bits18),
            other => Err(InvalidParameter {
                field: "resolution",
                value: other,
            }),
        }
    }

    /// Sample width in bits, sign included.
    pub fn bits(self) -> u8 {
        match self {
            Resolution::Bits12 => 12,
            Resolution::Bits14 => 14,
            Resolution::Bits16 => 16,
            Resolution::Bits18 => 18,
        }
    }

    /// Input voltage represented by one count at gain 1.
    pub fn lsb_volts(self) -> f64 {
        match self {
            Resolution::Bits12 => 1e-3,
            Resolution::Bits14 => 250e-6,
            Resolution::Bits16 => 62.5e-6,
            Resolution::Bits18 => 15.625e-6,
        }
    }

    /// Nominal time the device needs to complete one conversion.
    pub fn conversion_time(self) -> Duration {
        match self {
            Resolution::Bits12 => Duration::from_secs_f64(1.0 / 240.0),
            Resolution::Bits14 => Duration::from_secs_f64(1.0 / 60.0),
            Resolution::Bits16 => Duration::from_secs_f64(1.0 / 15.0),
            Resolution::Bits18 => Duration::from_secs_f64(1.0 / 3.75),
        }
    }

    /// Length of one read transaction: sample bytes plus the trailing
    /// status byte. 18-bit samples need three data bytes, everything
    /// else two.
    pub(crate) fn read_len(self) -> usize {
        match self {
            Resolution::Bits18 => 4,
            _ => 3,
        }
    }

    pub(crate) fn code(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_code(code: u8) -> Self {
        match code & RESOLUTION_MASK {
            0b0000 => Resolution::Bits12,
            0b0100 => Resolution::Bits14,
            0b1000 => Resolution::Bits16,
            _ => Resolution::Bits18,
        }
    }
}

/// Input channel selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    Ch0 = 0b000_0000,
    Ch1 = 0b010_0000,
    Ch2 = 0b100_0000,
    Ch3 = 0b110_0000,
}

impl Channel {
    /// Look up a channel from its zero-based index.
    pub fn from_index(index: u8) -> Result<Self, InvalidParameter> {
        match index {
            0 => Ok(Channel::Ch0),
            1 => Ok(Channel::Ch1),
            2 => Ok(Channel::Ch2),
            3 => Ok(Channel::Ch3),
            other => Err(InvalidParameter {
                field: "channel",
                value: other,
            }),
        }
    }

    /// Zero-based channel index.
    pub fn index(self) -> u8 {
        match self {
            Channel::Ch0 => 0,
            Channel::Ch1 => 1,
            Channel::Ch2 => 2,
            Channel::Ch3 => 3,
        }
    }

    pub(crate) fn code(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_code(code: u8) -> Self {
        match code & CHANNEL_MASK {
            0b000_0000 => Channel::Ch0,
            0b010_0000 => Channel::Ch1,
            0b100_0000 => Channel::Ch2,
            _ => Channel::Ch3,
        }
    }
}

/// The 7-bit configuration register image.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Config(u8);

impl Config {
    /// Status bit signalling that a conversion is still in progress.
    /// Present in read-back bytes only, never in the stored image.
    pub const NOT_READY: u8 = 0b1000_0000;

    /// Channel 0, 12 bits, gain 1, one-shot mode.
    pub fn new() -> Self {
        Config(0)
    }

    /// Reconstruct an image from a raw register byte. The not-ready bit
    /// is discarded.
    pub fn from_byte(byte: u8) -> Self {
        Config(byte & CONFIG_MASK)
    }

    /// The raw 7-bit register byte as written to the device.
    pub fn byte(self) -> u8 {
        self.0
    }

    /// Whether a read-back status byte reports a completed conversion.
    pub fn is_ready(status: u8) -> bool {
        status & Self::NOT_READY == 0
    }

    pub fn gain(self) -> Gain {
        Gain::from_code(self.0)
    }

    pub fn resolution(self) -> Resolution {
        Resolution::from_code(self.0)
    }

    pub fn channel(self) -> Channel {
        Channel::from_code(self.0)
    }

    pub fn continuous(self) -> bool {
        self.0 & CONTINUOUS_MASK != 0
    }

    pub fn with_gain(self, gain: Gain) -> Self {
        Config((self.0 & !GAIN_MASK) | gain.code())
    }

    pub fn with_resolution(self, resolution: Resolution) -> Self {
        Config((self.0 & !RESOLUTION_MASK) | resolution.code())
    }

    pub fn with_channel(self, channel: Channel) -> Self {
        Config((self.0 & !CHANNEL_MASK) | channel.code())
    }

    pub fn with_continuous(self, continuous: bool) -> Self {
        if continuous {
            Config(self.0 | CONTINUOUS_MASK)
        } else {
            Config(self.0 & !CONTINUOUS_MASK)
        }
    }

    /// Byte written to start a one-shot conversion: the image with the
    /// continuous bit cleared and the not-ready bit set. A fresh one-shot
    /// conversion is started even if the image has continuous mode enabled.
    pub(crate) fn convert_byte(self) -> u8 {
        (self.0 & !CONTINUOUS_MASK) | Self::NOT_READY
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Config({:#010b})", self.0)
    }
}
