use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

const MASTER_SNAPSHOT_STORAGE_SIZE: RangeInclusive<usize> = 100..=2000;
const NETWORK_TRACED_FRAMES: RangeInclusive<usize> = 100..=10000;
const MAX_REDUNDANT_INPUTS: RangeInclusive<usize> = 0..=254;
const SERVER_SNAPSHOT_STORAGE_SIZE: RangeInclusive<usize> = 10..=100;
const OPTIMAL_SIZE_ACCELERATION: RangeInclusive<f32> = 0.1..=20.0;
const MISSING_SNAPSHOTS_MAX_TOLLERANCE: RangeInclusive<u32> = 3..=50;
const TICK_ACCELERATION: RangeInclusive<f32> = 0.1..=20.0;
const STATE_NOTIFY_INTERVAL: RangeInclusive<f32> = 0.0001..=10.0;
const ITERATIONS_PER_SECOND: RangeInclusive<u32> = 1..=240;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{name} = {value} is outside the accepted range {low}..={high}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: f64,
    pub low: f64,
    pub high: f64,
}

/// Tunable controller parameters, persistable as part of the host's own
/// settings. Every setter rejects out-of-range values and keeps the last
/// valid one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    master_snapshot_storage_size: usize,
    network_traced_frames: usize,
    max_redundant_inputs: usize,
    server_snapshot_storage_size: usize,
    optimal_size_acceleration: f32,
    missing_snapshots_max_tollerance: u32,
    tick_acceleration: f32,
    state_notify_interval: f32,
    iterations_per_second: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            master_snapshot_storage_size: 300,
            network_traced_frames: 1200,
            max_redundant_inputs: 50,
            server_snapshot_storage_size: 30,
            optimal_size_acceleration: 2.5,
            missing_snapshots_max_tollerance: 4,
            tick_acceleration: 2.0,
            state_notify_interval: 1.0,
            iterations_per_second: 60,
        }
    }
}

macro_rules! range_setter {
    ($setter:ident, $getter:ident, $field:ident, $ty:ty, $range:expr) => {
        pub fn $getter(&self) -> $ty {
            self.$field
        }

        pub fn $setter(&mut self, value: $ty) {
            if !$range.contains(&value) {
                log::error!(
                    "{} = {} is outside the accepted range {:?}; keeping {}",
                    stringify!($field),
                    value,
                    $range,
                    self.$field
                );
                return;
            }
            self.$field = value;
        }
    };
}

impl ControllerConfig {
    range_setter!(
        set_master_snapshot_storage_size,
        master_snapshot_storage_size,
        master_snapshot_storage_size,
        usize,
        MASTER_SNAPSHOT_STORAGE_SIZE
    );
    range_setter!(
        set_network_traced_frames,
        network_traced_frames,
        network_traced_frames,
        usize,
        NETWORK_TRACED_FRAMES
    );
    range_setter!(
        set_max_redundant_inputs,
        max_redundant_inputs,
        max_redundant_inputs,
        usize,
        MAX_REDUNDANT_INPUTS
    );
    range_setter!(
        set_server_snapshot_storage_size,
        server_snapshot_storage_size,
        server_snapshot_storage_size,
        usize,
        SERVER_SNAPSHOT_STORAGE_SIZE
    );
    range_setter!(
        set_optimal_size_acceleration,
        optimal_size_acceleration,
        optimal_size_acceleration,
        f32,
        OPTIMAL_SIZE_ACCELERATION
    );
    range_setter!(
        set_missing_snapshots_max_tollerance,
        missing_snapshots_max_tollerance,
        missing_snapshots_max_tollerance,
        u32,
        MISSING_SNAPSHOTS_MAX_TOLLERANCE
    );
    range_setter!(
        set_tick_acceleration,
        tick_acceleration,
        tick_acceleration,
        f32,
        TICK_ACCELERATION
    );
    range_setter!(
        set_state_notify_interval,
        state_notify_interval,
        state_notify_interval,
        f32,
        STATE_NOTIFY_INTERVAL
    );
    range_setter!(
        set_iterations_per_second,
        iterations_per_second,
        iterations_per_second,
        u32,
        ITERATIONS_PER_SECOND
    );

    /// Range check for configurations that bypassed the setters, e.g. loaded
    /// from persisted settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check<T: PartialOrd + Copy + Into<f64>>(
            name: &'static str,
            value: T,
            range: &RangeInclusive<T>,
        ) -> Result<(), ConfigError> {
            if range.contains(&value) {
                Ok(())
            } else {
                Err(ConfigError {
                    name,
                    value: value.into(),
                    low: (*range.start()).into(),
                    high: (*range.end()).into(),
                })
            }
        }

        check(
            "master_snapshot_storage_size",
            self.master_snapshot_storage_size as u32,
            &(100..=2000u32),
        )?;
        check(
            "network_traced_frames",
            self.network_traced_frames as u32,
            &(100..=10000u32),
        )?;
        check(
            "max_redundant_inputs",
            self.max_redundant_inputs as u32,
            &(0..=254u32),
        )?;
        check(
            "server_snapshot_storage_size",
            self.server_snapshot_storage_size as u32,
            &(10..=100u32),
        )?;
        check(
            "optimal_size_acceleration",
            self.optimal_size_acceleration,
            &OPTIMAL_SIZE_ACCELERATION,
        )?;
        check(
            "missing_snapshots_max_tollerance",
            self.missing_snapshots_max_tollerance,
            &MISSING_SNAPSHOTS_MAX_TOLLERANCE,
        )?;
        check("tick_acceleration", self.tick_acceleration, &TICK_ACCELERATION)?;
        check(
            "state_notify_interval",
            self.state_notify_interval,
            &STATE_NOTIFY_INTERVAL,
        )?;
        check(
            "iterations_per_second",
            self.iterations_per_second,
            &ITERATIONS_PER_SECOND,
        )?;
        Ok(())
    }
}
