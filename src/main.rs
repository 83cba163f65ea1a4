//! Batch-sample MCP342x channels on a Raspberry Pi and print the results.
//!
//! Mirrors a typical two-device setup: an MCP3424 at 0x68 and another at
//! 0x69, their channels sampled in as few conversion rounds as the
//! scheduler can manage.

#[cfg(feature = "raspberry_pi")]
fn main() -> Result<(), anyhow::Error> {
    use std::cell::RefCell;

    use anyhow::Context;
    use embedded_hal_bus::i2c::RefCellDevice;
    use mcp342x::{
        convert_and_read_many_aggregate, BusId, Mcp342x, Model, ReadOptions, Resolution,
    };
    use rppal::i2c::I2c;

    env_logger::init();

    let i2c = I2c::new().context("opening the I2C bus")?;
    let bus_id = BusId(u32::from(i2c.bus()));
    let bus = RefCell::new(i2c);

    // One handle per (address, channel, resolution) to sample.
    let signals: &[(u8, u8, u8)] = &[
        (0x68, 0, 18),
        (0x68, 1, 18),
        (0x68, 2, 18),
        (0x68, 3, 16),
        (0x69, 0, 18),
        (0x69, 1, 18),
        (0x69, 2, 18),
    ];

    let mut adcs = Vec::with_capacity(signals.len());
    for &(address, channel, bits) in signals {
        let mut adc = Mcp342x::new(RefCellDevice::new(&bus), bus_id, address, Model::Mcp3424);
        adc.set_channel_index(channel)
            .with_context(|| format!("selecting channel {channel} on 0x{address:02x}"))?;
        let resolution = Resolution::from_bits(bits).context("selecting resolution")?;
        adc.set_resolution(resolution)?;
        adcs.push(adc);
    }

    let mut requests: Vec<_> = adcs.iter_mut().collect();
    let means = convert_and_read_many_aggregate(
        &mut requests,
        ReadOptions {
            samples: 2,
            ..ReadOptions::default()
        },
        |series| series.iter().sum::<f64>() / series.len() as f64,
    )
    .context("batched read failed")?;

    for (&(address, channel, bits), mean) in signals.iter().zip(means) {
        println!("0x{address:02x} ch{channel} @ {bits} bits: {mean:.6} V");
    }

    Ok(())
}

#[cfg(not(feature = "raspberry_pi"))]
fn main() {
    eprintln!("voltpoll does nothing useful without the raspberry_pi feature");
    std::process::exit(1);
}
