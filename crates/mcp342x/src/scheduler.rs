//! Batched sampling across several devices and buses.
//!
//! A single device can only digitize one of its channels at a time, so a
//! list of channel-read requests is partitioned into sequential rounds:
//! within a round no (bus, address) pair appears twice. Each round is
//! started with one broadcast convert command per bus, letting every
//! device in the round sample simultaneously.

use std::thread;

use embedded_hal::i2c::I2c;
use log::debug;

use crate::config::Resolution;
use crate::device::{conversion_sleep, BusId, Mcp342x};
use crate::error::Error;

/// Options for a batched read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadOptions {
    /// Number of samples to collect per request.
    pub samples: usize,
    /// Sleep out most of the conversion time before polling.
    pub sleep: bool,
    /// Return raw counts instead of calibrated values.
    pub raw: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            samples: 1,
            sleep: true,
            raw: false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Batch {
    /// Request indices converting simultaneously, in input order.
    members: Vec<usize>,
    /// Device addresses claimed by this batch.
    addresses: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
struct BusPlan {
    bus: BusId,
    /// Every request index on this bus, in input order.
    requests: Vec<usize>,
    batches: Vec<Batch>,
}

/// Greedy first-fit partitioning: each request joins the first batch on
/// its bus that has not already claimed its device address, else opens a
/// new batch. Deterministic given input order; the batch count per bus
/// equals the highest multiplicity of any single device in the request
/// list.
fn plan(requests: &[(BusId, u8)]) -> Vec<BusPlan> {
    let mut plans: Vec<BusPlan> = Vec::new();
    for (index, &(bus, address)) in requests.iter().enumerate() {
        let pos = plans.iter().position(|p| p.bus == bus);
        let bus_plan = match pos {
            Some(pos) => &mut plans[pos],
            None => {
                plans.push(BusPlan {
                    bus,
                    requests: Vec::new(),
                    batches: Vec::new(),
                });
                // Buses keep first-seen order.
                let last = plans.len() - 1;
                &mut plans[last]
            }
        };
        bus_plan.requests.push(index);

        match bus_plan
            .batches
            .iter_mut()
            .find(|batch| !batch.addresses.contains(&address))
        {
            Some(batch) => {
                batch.members.push(index);
                batch.addresses.push(address);
            }
            None => bus_plan.batches.push(Batch {
                members: vec![index],
                addresses: vec![address],
            }),
        }
    }
    plans
}

/// Sample every request, batching simultaneous conversions, and return one
/// series per request in input order.
///
/// The plan is ephemeral and recomputed on every call. Any transport
/// error, configuration mismatch or poll exhaustion aborts the remaining
/// rounds; partial results are discarded.
pub fn convert_and_read_many<I2C, E>(
    adcs: &mut [&mut Mcp342x<I2C>],
    options: ReadOptions,
) -> Result<Vec<Vec<f64>>, Error<E>>
where
    I2C: I2c<Error = E>,
    E: std::error::Error + 'static,
{
    let keys: Vec<(BusId, u8)> = adcs.iter().map(|adc| (adc.bus(), adc.address())).collect();
    let plans = plan(&keys);
    let rounds = plans.iter().map(|p| p.batches.len()).max().unwrap_or(0);
    debug!(
        "sampling {} request(s) over {} bus(es) in {} round(s)",
        adcs.len(),
        plans.len(),
        rounds
    );

    let mut results: Vec<Vec<f64>> = (0..adcs.len())
        .map(|_| Vec::with_capacity(options.samples))
        .collect();

    for _ in 0..options.samples {
        for round in 0..rounds {
            for bus_plan in &plans {
                let Some(batch) = bus_plan.batches.get(round) else {
                    continue;
                };
                debug!(
                    "bus {} round {}: {} simultaneous conversion(s)",
                    bus_plan.bus.0,
                    round,
                    batch.members.len()
                );

                // Park every known device on this bus that is sitting out
                // the round in a fast 12-bit configuration, so a stale
                // long conversion never leaves its not-ready bit wedging a
                // later poll loop.
                let mut parked: Vec<u8> = Vec::new();
                for &index in &bus_plan.requests {
                    let address = adcs[index].address();
                    if batch.addresses.contains(&address) || parked.contains(&address) {
                        continue;
                    }
                    let dummy = adcs[index]
                        .config()
                        .with_resolution(Resolution::Bits12)
                        .byte();
                    adcs[index].write_byte(dummy)?;
                    parked.push(address);
                }

                for &index in &batch.members {
                    adcs[index].configure()?;
                }

                // One broadcast starts every configured device at once.
                if let Some(&first) = batch.members.first() {
                    adcs[first].broadcast_convert()?;
                }

                if options.sleep {
                    let slowest = batch
                        .members
                        .iter()
                        .map(|&index| adcs[index].conversion_time())
                        .max()
                        .unwrap_or_default();
                    thread::sleep(conversion_sleep(slowest));
                }

                for &index in &batch.members {
                    let value = if options.raw {
                        f64::from(adcs[index].read_raw()?)
                    } else {
                        adcs[index].read()?
                    };
                    results[index].push(value);
                }
            }
        }
    }

    Ok(results)
}

/// Like [`convert_and_read_many`], reducing each request's series to a
/// scalar with `aggregate`.
pub fn convert_and_read_many_aggregate<I2C, E, F>(
    adcs: &mut [&mut Mcp342x<I2C>],
    options: ReadOptions,
    mut aggregate: F,
) -> Result<Vec<f64>, Error<E>>
where
    I2C: I2c<Error = E>,
    E: std::error::Error + 'static,
    F: FnMut(&[f64]) -> f64,
{
    let series = convert_and_read_many(adcs, options)?;
    Ok(series.iter().map(|s| aggregate(s)).collect())
}
