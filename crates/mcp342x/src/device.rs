//! Stateful handle for one physical converter.

use core::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use embedded_hal::i2c::I2c;
use log::{debug, trace};

use crate::config::{Channel, Config, Gain, Resolution};
use crate::error::{Error, UnknownDevice, UnsupportedByModel};
use crate::sample::{decode_count, to_volts, Sample};

/// General call reset command byte.
pub const GENERAL_CALL_RESET: u8 = 0x06;
/// General call latch command byte.
pub const GENERAL_CALL_LATCH: u8 = 0x04;
/// General call conversion-start command byte.
pub const GENERAL_CALL_CONVERT: u8 = 0x08;

/// Broadcast a reset to every device on the bus.
pub fn general_call_reset<I2C: I2c>(i2c: &mut I2C) -> Result<(), I2C::Error> {
    i2c.write(0, &[GENERAL_CALL_RESET])
}

/// Broadcast an address latch to every device on the bus.
pub fn general_call_latch<I2C: I2c>(i2c: &mut I2C) -> Result<(), I2C::Error> {
    i2c.write(0, &[GENERAL_CALL_LATCH])
}

/// Broadcast a conversion start to every device on the bus.
pub fn general_call_convert<I2C: I2c>(i2c: &mut I2C) -> Result<(), I2C::Error> {
    i2c.write(0, &[GENERAL_CALL_CONVERT])
}

/// The known parts of the family.
///
/// The parts differ in channel count and maximum resolution; the register
/// layout is shared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Model {
    Mcp3421,
    Mcp3422,
    Mcp3423,
    Mcp3424,
    Mcp3425,
    Mcp3426,
}

impl Model {
    /// Number of input channels on this part.
    pub fn channels(self) -> u8 {
        match self {
            Model::Mcp3421 | Model::Mcp3425 => 1,
            Model::Mcp3422 | Model::Mcp3423 | Model::Mcp3426 => 2,
            Model::Mcp3424 => 4,
        }
    }

    /// Highest resolution this part can convert at.
    pub fn max_resolution(self) -> Resolution {
        match self {
            Model::Mcp3421 | Model::Mcp3422 | Model::Mcp3423 | Model::Mcp3424 => Resolution::Bits18,
            Model::Mcp3425 | Model::Mcp3426 => Resolution::Bits16,
        }
    }

    fn check_channel(self, channel: Channel) -> Result<(), UnsupportedByModel> {
        if channel.index() < self.channels() {
            Ok(())
        } else {
            Err(UnsupportedByModel {
                model: self,
                field: "channel",
                value: channel.index(),
            })
        }
    }

    fn check_resolution(self, resolution: Resolution) -> Result<(), UnsupportedByModel> {
        if resolution <= self.max_resolution() {
            Ok(())
        } else {
            Err(UnsupportedByModel {
                model: self,
                field: "resolution",
                value: resolution.bits(),
            })
        }
    }

    fn check_config(self, config: Config) -> Result<(), UnsupportedByModel> {
        self.check_channel(config.channel())?;
        self.check_resolution(config.resolution())
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Model::Mcp3421 => "MCP3421",
            Model::Mcp3422 => "MCP3422",
            Model::Mcp3423 => "MCP3423",
            Model::Mcp3424 => "MCP3424",
            Model::Mcp3425 => "MCP3425",
            Model::Mcp3426 => "MCP3426",
        };
        f.write_str(name)
    }
}

impl FromStr for Model {
    type Err = UnknownDevice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MCP3421" => Ok(Model::Mcp3421),
            "MCP3422" => Ok(Model::Mcp3422),
            "MCP3423" => Ok(Model::Mcp3423),
            "MCP3424" => Ok(Model::Mcp3424),
            "MCP3425" => Ok(Model::Mcp3425),
            "MCP3426" => Ok(Model::Mcp3426),
            other => Err(UnknownDevice {
                name: other.to_string(),
            }),
        }
    }
}

/// Opaque identity of a physical bus, used by the batch scheduler to tell
/// which handles share a wire. Handles created on the same bus must be
/// given the same id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BusId(pub u32);

/// Bound on the not-ready busy-poll loop.
///
/// The hardware reference design polls forever; a non-responsive device
/// would block the calling thread indefinitely, so the loop is given an
/// attempt budget instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum number of read transactions per sample before giving up.
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        // Generous enough for an 18-bit conversion polled back to back on
        // a fast bus without any pre-sleep.
        PollPolicy {
            max_attempts: 10_000,
        }
    }
}

/// Driver handle for one MCP342x device.
///
/// Owns the bus handle, the current register image and the calibration
/// pair. Not internally synchronized: callers must serialize the
/// configure/convert/read sequence per device.
pub struct Mcp342x<I2C> {
    i2c: I2C,
    bus: BusId,
    address: u8,
    model: Model,
    config: Config,
    scale_factor: f64,
    offset: f64,
    poll: PollPolicy,
}

impl<I2C, E> Mcp342x<I2C>
where
    I2C: I2c<Error = E>,
    E: std::error::Error + 'static,
{
    /// Create a handle with the default configuration: channel 0, 12 bits,
    /// gain 1, one-shot mode.
    pub fn new(i2c: I2C, bus: BusId, address: u8, model: Model) -> Self {
        Mcp342x {
            i2c,
            bus,
            address,
            model,
            config: Config::new(),
            scale_factor: 1.0,
            offset: 0.0,
            poll: PollPolicy::default(),
        }
    }

    /// Create a handle with an explicit initial configuration, validated
    /// against the model's capabilities.
    pub fn with_config(
        i2c: I2C,
        bus: BusId,
        address: u8,
        model: Model,
        config: Config,
    ) -> Result<Self, Error<E>> {
        model.check_config(config)?;
        let mut adc = Self::new(i2c, bus, address, model);
        adc.config = config;
        Ok(adc)
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Replace the whole register image, validated against the model.
    pub fn set_config(&mut self, config: Config) -> Result<(), Error<E>> {
        self.model.check_config(config)?;
        self.config = config;
        Ok(())
    }

    /// Select the input channel. Fails with `UnsupportedByModel` for
    /// channels the part does not have; the image is left unchanged.
    pub fn set_channel(&mut self, channel: Channel) -> Result<(), Error<E>> {
        self.model.check_channel(channel)?;
        self.config = self.config.with_channel(channel);
        Ok(())
    }

    /// Select the input channel by zero-based index.
    pub fn set_channel_index(&mut self, index: u8) -> Result<(), Error<E>> {
        let channel = Channel::from_index(index)?;
        self.set_channel(channel)
    }

    /// Select the conversion resolution. Fails with `UnsupportedByModel`
    /// for 18 bits on parts limited to 16; the image is left unchanged.
    pub fn set_resolution(&mut self, resolution: Resolution) -> Result<(), Error<E>> {
        self.model.check_resolution(resolution)?;
        self.config = self.config.with_resolution(resolution);
        Ok(())
    }

    /// Select the conversion resolution by bit width.
    pub fn set_resolution_bits(&mut self, bits: u8) -> Result<(), Error<E>> {
        let resolution = Resolution::from_bits(bits)?;
        self.set_resolution(resolution)
    }

    /// Select the PGA gain.
    pub fn set_gain(&mut self, gain: Gain) {
        self.config = self.config.with_gain(gain);
    }

    /// Select the PGA gain by amplification factor.
    pub fn set_gain_value(&mut self, value: u8) -> Result<(), Error<E>> {
        let gain = Gain::from_value(value)?;
        self.set_gain(gain);
        Ok(())
    }

    /// Enable or disable continuous conversion mode.
    pub fn set_continuous_mode(&mut self, continuous: bool) {
        self.config = self.config.with_continuous(continuous);
    }

    /// Scale factor applied when converting counts to physical values.
    pub fn set_scale_factor(&mut self, scale_factor: f64) {
        self.scale_factor = scale_factor;
    }

    /// Offset added when converting counts to physical values.
    pub fn set_offset(&mut self, offset: f64) {
        self.offset = offset;
    }

    pub fn set_poll_policy(&mut self, poll: PollPolicy) {
        self.poll = poll;
    }

    /// Nominal conversion time at the configured resolution.
    pub fn conversion_time(&self) -> Duration {
        self.config.resolution().conversion_time()
    }

    /// Write the current register image to the device.
    pub fn configure(&mut self) -> Result<(), Error<E>> {
        debug!(
            "configuring 0x{:02x} on bus {} with {:#010b}",
            self.address,
            self.bus.0,
            self.config.byte()
        );
        self.write_byte(self.config.byte())
    }

    /// Start a one-shot conversion with the current settings. The
    /// continuous bit is overridden for this write, so a fresh conversion
    /// starts even if the stored image enables continuous mode.
    pub fn convert(&mut self) -> Result<(), Error<E>> {
        debug!("starting conversion on 0x{:02x}", self.address);
        self.write_byte(self.config.convert_byte())
    }

    /// Poll until the device reports a completed conversion and return the
    /// raw sample. The command byte of each read transaction re-specifies
    /// the configuration; the device echoes the configuration it actually
    /// used in the trailing status byte.
    pub fn raw_read(&mut self) -> Result<Sample, Error<E>> {
        let resolution = self.config.resolution();
        let len = resolution.read_len();
        let mut buf = [0u8; 4];

        for attempt in 1..=self.poll.max_attempts {
            self.i2c
                .write_read(self.address, &[self.config.byte()], &mut buf[..len])
                .map_err(Error::I2c)?;

            let status = buf[len - 1];
            if Config::is_ready(status) {
                let count = decode_count(&buf[..len - 1], resolution);
                trace!(
                    "0x{:02x} ready after {} poll(s), count {}",
                    self.address,
                    attempt,
                    count
                );
                return Ok(Sample { count, status });
            }
            trace!("0x{:02x} not ready, poll {}", self.address, attempt);
        }

        Err(Error::PollExhausted {
            address: self.address,
            attempts: self.poll.max_attempts,
        })
    }

    /// Read the latest sample as a raw signed count.
    pub fn read_raw(&mut self) -> Result<i32, Error<E>> {
        Ok(self.checked_read()?.count)
    }

    /// Read the latest sample as a calibrated physical value.
    ///
    /// In continuous mode this alone retrieves the most recent completed
    /// sample; in one-shot mode call [`convert`](Self::convert) first.
    pub fn read(&mut self) -> Result<f64, Error<E>> {
        self.read_with(self.scale_factor, self.offset)
    }

    /// Read a calibrated value with a one-off calibration pair, leaving
    /// the stored pair untouched.
    pub fn read_with(&mut self, scale_factor: f64, offset: f64) -> Result<f64, Error<E>> {
        let sample = self.checked_read()?;
        Ok(to_volts(
            sample.count,
            self.config.resolution(),
            self.config.gain(),
            scale_factor,
            offset,
        ))
    }

    /// One-shot convenience: convert, optionally sleep out most of the
    /// nominal conversion time, then read a calibrated value.
    pub fn convert_and_read(&mut self, sleep: bool) -> Result<f64, Error<E>> {
        self.convert()?;
        if sleep {
            thread::sleep(conversion_sleep(self.conversion_time()));
        }
        self.read()
    }

    /// Repeat [`convert_and_read`](Self::convert_and_read) `samples` times.
    pub fn convert_and_read_samples(
        &mut self,
        samples: usize,
        sleep: bool,
    ) -> Result<Vec<f64>, Error<E>> {
        let mut series = Vec::with_capacity(samples);
        for _ in 0..samples {
            series.push(self.convert_and_read(sleep)?);
        }
        Ok(series)
    }

    /// Collect `samples` values and reduce them with `aggregate`.
    pub fn convert_and_read_aggregate<F>(
        &mut self,
        samples: usize,
        sleep: bool,
        aggregate: F,
    ) -> Result<f64, Error<E>>
    where
        F: FnOnce(&[f64]) -> f64,
    {
        let series = self.convert_and_read_samples(samples, sleep)?;
        Ok(aggregate(&series))
    }

    /// Release the bus handle.
    pub fn release(self) -> I2C {
        self.i2c
    }

    fn checked_read(&mut self) -> Result<Sample, Error<E>> {
        let sample = self.raw_read()?;
        if sample.status != self.config.byte() {
            return Err(Error::ConfigMismatch {
                expected: self.config.byte(),
                actual: sample.status,
            });
        }
        Ok(sample)
    }

    /// Write a raw register byte without touching the stored image. The
    /// scheduler uses this to park idle devices in a fast dummy
    /// configuration.
    pub(crate) fn write_byte(&mut self, byte: u8) -> Result<(), Error<E>> {
        self.i2c.write(self.address, &[byte]).map_err(Error::I2c)
    }

    /// Broadcast a conversion start on this handle's bus.
    pub(crate) fn broadcast_convert(&mut self) -> Result<(), Error<E>> {
        general_call_convert(&mut self.i2c).map_err(Error::I2c)
    }
}

impl<I2C> fmt::Debug for Mcp342x<I2C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mcp342x")
            .field("bus", &self.bus)
            .field("address", &format_args!("0x{:02x}", self.address))
            .field("model", &self.model)
            .field("config", &self.config)
            .finish()
    }
}

/// The device is left converting for 95% of the nominal time before the
/// first poll, trading a little blocking sleep for far fewer bus
/// transactions while still ending on a real readiness check.
pub(crate) fn conversion_sleep(nominal: Duration) -> Duration {
    nominal.mul_f64(0.95)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{Channel, Gain, Resolution};
    use crate::error::Error;

    use std::collections::VecDeque;

    use embedded_hal::i2c::{self, ErrorType, Operation};

    /// Scripted I2C bus: records every write and serves reads from a
    /// queue of canned responses.
    pub(crate) struct MockBus {
        pub writes: Vec<(u8, Vec<u8>)>,
        pub responses: VecDeque<Vec<u8>>,
    }

    impl MockBus {
        pub fn new() -> Self {
            MockBus {
                writes: Vec::new(),
                responses: VecDeque::new(),
            }
        }

        pub fn respond(&mut self, bytes: &[u8]) {
            self.responses.push_back(bytes.to_vec());
        }
    }

    #[derive(Debug, PartialEq)]
    pub(crate) struct MockError;

    impl core::fmt::Display for MockError {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.write_str("mock bus error")
        }
    }

    impl std::error::Error for MockError {}

    impl i2c::Error for MockError {
        fn kind(&self) -> i2c::ErrorKind {
            i2c::ErrorKind::Other
        }
    }

    impl ErrorType for MockBus {
        type Error = MockError;
    }

    impl i2c::I2c for MockBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(bytes) => {
                        self.writes.push((address, bytes.to_vec()));
                    }
                    Operation::Read(buf) => {
                        let response = self.responses.pop_front().expect("unscripted read");
                        assert_eq!(response.len(), buf.len(), "scripted response length");
                        buf.copy_from_slice(&response);
                    }
                }
            }
            Ok(())
        }
    }

    fn adc(model: Model) -> Mcp342x<MockBus> {
        Mcp342x::new(MockBus::new(), BusId(1), 0x68, model)
    }

    #[test]
    fn configure_writes_register_image() {
        let mut adc = adc(Model::Mcp3424);
        adc.set_channel(Channel::Ch1).unwrap();
        adc.set_resolution(Resolution::Bits16).unwrap();
        adc.set_gain(Gain::X4);
        adc.configure().unwrap();

        let expected = 0b0_01_0_10_10;
        let bus = adc.release();
        assert_eq!(bus.writes, vec![(0x68, vec![expected])]);
    }

    #[test]
    fn convert_sets_not_ready_and_clears_continuous() {
        let mut adc = adc(Model::Mcp3424);
        adc.set_continuous_mode(true);
        adc.convert().unwrap();

        let bus = adc.release();
        assert_eq!(bus.writes, vec![(0x68, vec![0b1000_0000])]);
    }

    #[test]
    fn raw_read_polls_until_ready() {
        let mut adc = adc(Model::Mcp3424);
        adc.set_resolution(Resolution::Bits18).unwrap();
        let config = adc.config().byte();

        // Two not-ready polls, then the sample.
        adc.i2c.respond(&[0x00, 0x00, 0x00, config | Config::NOT_READY]);
        adc.i2c.respond(&[0x00, 0x00, 0x00, config | Config::NOT_READY]);
        adc.i2c.respond(&[0x00, 0x00, 0x01, config]);

        let sample = adc.raw_read().unwrap();
        assert_eq!(sample.count, 1);
        assert_eq!(sample.status, config);

        // Each poll re-specified the configuration as the command byte.
        let bus = adc.release();
        assert_eq!(bus.writes, vec![(0x68, vec![config]); 3]);
    }

    #[test]
    fn raw_read_decodes_most_negative_18_bit_sample() {
        let mut adc = adc(Model::Mcp3424);
        adc.set_resolution(Resolution::Bits18).unwrap();
        let config = adc.config().byte();
        adc.i2c.respond(&[0x02, 0x00, 0x00, config]);

        assert_eq!(adc.raw_read().unwrap().count, -131072);
    }

    #[test]
    fn poll_budget_is_bounded() {
        let mut adc = adc(Model::Mcp3424);
        adc.set_poll_policy(PollPolicy { max_attempts: 3 });
        let config = adc.config().byte();
        for _ in 0..3 {
            adc.i2c.respond(&[0x00, 0x00, config | Config::NOT_READY]);
        }

        match adc.raw_read() {
            Err(Error::PollExhausted { address, attempts }) => {
                assert_eq!(address, 0x68);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected PollExhausted, got {other:?}"),
        }
    }

    #[test]
    fn read_applies_calibration() {
        let mut adc = adc(Model::Mcp3424);
        let config = adc.config().byte();
        adc.i2c.respond(&[0x00, 0x64, config]);

        let volts = adc.read().unwrap();
        assert!((volts - 0.1).abs() < 1e-12);
    }

    #[test]
    fn continuous_mode_reads_without_convert() {
        let mut adc = adc(Model::Mcp3424);
        adc.set_continuous_mode(true);
        let config = adc.config().byte();
        assert_eq!(config & 0b0001_0000, 0b0001_0000);
        // Free-running device echoes the continuous-bit image.
        adc.i2c.respond(&[0x00, 0x64, config]);

        let volts = adc.read().unwrap();
        assert!((volts - 0.1).abs() < 1e-12);

        // Only the poll's command byte went out; no conversion trigger.
        let bus = adc.release();
        assert_eq!(bus.writes, vec![(0x68, vec![config])]);
    }

    #[test]
    fn read_with_overrides_stored_calibration() {
        let mut adc = adc(Model::Mcp3424);
        adc.set_scale_factor(5.0);
        adc.set_offset(1.0);
        let config = adc.config().byte();
        adc.i2c.respond(&[0x00, 0x64, config]);

        let volts = adc.read_with(2.0, 0.5).unwrap();
        assert!((volts - (100.0 * 1e-3 * 2.0 + 0.5)).abs() < 1e-12);
    }

    #[test]
    fn read_rejects_config_mismatch() {
        let mut adc = adc(Model::Mcp3424);
        let config = adc.config().byte();
        // Device reports gain 8 instead of the configured gain 1.
        adc.i2c.respond(&[0x00, 0x64, config | 0b11]);

        match adc.read() {
            Err(Error::ConfigMismatch { expected, actual }) => {
                assert_eq!(expected, config);
                assert_eq!(actual, config | 0b11);
            }
            other => panic!("expected ConfigMismatch, got {other:?}"),
        }
    }

    #[test]
    fn convert_and_read_aggregate_reduces_series() {
        let mut adc = adc(Model::Mcp3424);
        let config = adc.config().byte();
        adc.i2c.respond(&[0x00, 0x0A, config]);
        adc.i2c.respond(&[0x00, 0x14, config]);

        let mean = adc
            .convert_and_read_aggregate(2, false, |series| {
                series.iter().sum::<f64>() / series.len() as f64
            })
            .unwrap();
        assert!((mean - 0.015).abs() < 1e-12);
    }

    #[test]
    fn model_capabilities_are_enforced() {
        let mut dual = adc(Model::Mcp3422);
        let before = dual.config();

        match dual.set_channel(Channel::Ch2) {
            Err(Error::UnsupportedByModel(err)) => {
                assert_eq!(err.model, Model::Mcp3422);
                assert_eq!(err.field, "channel");
                assert_eq!(err.value, 2);
            }
            other => panic!("expected UnsupportedByModel, got {other:?}"),
        }
        assert_eq!(dual.config(), before);

        let mut narrow = adc(Model::Mcp3425);
        let before = narrow.config();
        assert!(matches!(
            narrow.set_resolution(Resolution::Bits18),
            Err(Error::UnsupportedByModel(_))
        ));
        assert_eq!(narrow.config(), before);
    }

    #[test]
    fn numeric_setters_reject_out_of_table_values() {
        let mut adc = adc(Model::Mcp3424);
        let before = adc.config();

        assert!(matches!(
            adc.set_gain_value(3),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            adc.set_resolution_bits(13),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            adc.set_channel_index(4),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(adc.config(), before);
    }

    #[test]
    fn model_names_parse() {
        assert_eq!("MCP3424".parse::<Model>(), Ok(Model::Mcp3424));
        let err = "MCP9999".parse::<Model>().unwrap_err();
        assert_eq!(err.name, "MCP9999");
    }

    #[test]
    fn general_calls_write_to_address_zero() {
        let mut bus = MockBus::new();
        general_call_reset(&mut bus).unwrap();
        general_call_latch(&mut bus).unwrap();
        general_call_convert(&mut bus).unwrap();
        assert_eq!(
            bus.writes,
            vec![(0, vec![0x06]), (0, vec![0x04]), (0, vec![0x08])]
        );
    }
}
