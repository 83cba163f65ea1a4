//! Error types for the driver.

use thiserror::Error;

use crate::device::Model;

/// A value outside the fixed register mapping tables. Values are never
/// clamped to the nearest legal setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("invalid {field} setting: {value}")]
pub struct InvalidParameter {
    /// Which register field rejected the value.
    pub field: &'static str,
    /// The offending value, in its human-meaningful form (gain factor,
    /// bit width or channel index).
    pub value: u8,
}

/// A setting that is legal for the family but not for this part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("{model} does not support {field} {value}")]
pub struct UnsupportedByModel {
    pub model: Model,
    pub field: &'static str,
    pub value: u8,
}

/// A model name outside the enumerated part family.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown device model {name:?}")]
pub struct UnknownDevice {
    pub name: String,
}

/// Driver errors, generic over the bus transport error.
#[derive(Debug, Error)]
pub enum Error<E: std::error::Error + 'static> {
    /// The underlying I2C transaction failed.
    #[error("I2C bus error: {0}")]
    I2c(#[source] E),

    #[error(transparent)]
    InvalidParameter(#[from] InvalidParameter),

    #[error(transparent)]
    UnsupportedByModel(#[from] UnsupportedByModel),

    #[error(transparent)]
    UnknownDevice(#[from] UnknownDevice),

    /// The configuration byte read back from the device differs from the
    /// image the handle believes is active. Indicates a transport-layer or
    /// concurrent-access bug, so it is always surfaced.
    #[error("configuration mismatch: device reported {actual:#010b}, expected {expected:#010b}")]
    ConfigMismatch { expected: u8, actual: u8 },

    /// The device kept reporting not-ready for the whole poll budget.
    #[error("device 0x{address:02x} still converting after {attempts} polls")]
    PollExhausted { address: u8, attempts: u32 },
}
