//! Provides a driver for the Microchip MCP342x family of delta-sigma ADCs
//! via the `embedded-hal` ecosystem.
//!
//! The family shares one 8-bit configuration register selecting gain,
//! resolution, conversion mode and input channel; samples come back as
//! big-endian two's-complement counts followed by a status byte. On top of
//! the per-device handle, [`convert_and_read_many`] batches an arbitrary
//! list of channel-read requests (spanning devices and buses) into the
//! minimum number of simultaneous conversion rounds, started with one
//! broadcast command per bus.
//!
//! The crate never opens a bus itself: handles are generic over
//! [`embedded_hal::i2c::I2c`], so anything from `rppal` to a scripted test
//! double plugs in.

#![forbid(unsafe_code)]

pub mod config;
pub mod device;
pub mod error;
pub mod sample;
pub mod scheduler;

pub use config::{Channel, Config, Gain, Resolution};
pub use device::{
    general_call_convert, general_call_latch, general_call_reset, BusId, Mcp342x, Model,
    PollPolicy,
};
pub use error::{Error, InvalidParameter, UnknownDevice, UnsupportedByModel};
pub use sample::Sample;
pub use scheduler::{convert_and_read_many, convert_and_read_many_aggregate, ReadOptions};
