//! Simulation timing configuration.
//!
//! All durations are wall-clock stand-ins for simulated time. Only their
//! ordering matters for correctness, so tests shrink them freely.

use std::time::Duration;

/// Lowest accepted mechanic skill level.
pub const MIN_SKILL: u8 = 1;

/// Highest accepted mechanic skill level.
pub const MAX_SKILL: u8 = 10;

/// Repair takes `REPAIR_BASE_UNITS - skill` repair units. Kept above
/// [`MAX_SKILL`] so every repair lasts at least one unit.
pub const REPAIR_BASE_UNITS: u32 = 20;

/// Fraction of capacity at which a rig is ready for shipment.
pub const SHIPMENT_THRESHOLD: f64 = 0.9;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Interval between two production ticks of a rig.
    pub tick: Duration,
    /// Interval between two dispatcher scans.
    pub dispatch_interval: Duration,
    /// One unit of repair time.
    pub repair_unit: Duration,
    /// Loading time per unit of oil moved.
    pub load_time_per_unit: Duration,
    /// Fixed time a loader spends transporting its cargo.
    pub transport_time: Duration,
    /// How long `stop()` waits for in-flight actor tasks before aborting them.
    pub shutdown_grace: Duration,
    /// Buffer size of the event stream.
    pub event_capacity: usize,
    /// RNG seed. `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        let tick = Duration::from_millis(100);
        Self {
            tick,
            dispatch_interval: tick * 5,
            repair_unit: tick,
            load_time_per_unit: tick / 10,
            transport_time: tick * 5,
            shutdown_grace: Duration::from_secs(2),
            event_capacity: 1024,
            seed: None,
        }
    }
}

impl SimConfig {
    /// Create a config whose every duration is derived from `tick` using the
    /// default ratios.
    #[must_use]
    pub fn scaled(tick: Duration) -> Self {
        Self {
            tick,
            dispatch_interval: tick * 5,
            repair_unit: tick,
            load_time_per_unit: tick / 10,
            transport_time: tick * 5,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    #[must_use]
    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    #[must_use]
    pub fn with_repair_unit(mut self, unit: Duration) -> Self {
        self.repair_unit = unit;
        self
    }

    #[must_use]
    pub fn with_load_time_per_unit(mut self, per_unit: Duration) -> Self {
        self.load_time_per_unit = per_unit;
        self
    }

    #[must_use]
    pub fn with_transport_time(mut self, transport: Duration) -> Self {
        self.transport_time = transport;
        self
    }

    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Fix the RNG seed for reproducible runs.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Time a mechanic of the given skill needs for one repair.
    ///
    /// Non-increasing in `skill` and never zero for skills in range.
    #[must_use]
    pub fn repair_duration(&self, skill: u8) -> Duration {
        let skill = u32::from(skill.clamp(MIN_SKILL, MAX_SKILL));
        self.repair_unit * (REPAIR_BASE_UNITS - skill)
    }

    /// Time needed to move `amount` units of oil into a loader.
    #[must_use]
    pub fn loading_duration(&self, amount: f64) -> Duration {
        if amount.is_finite() && amount > 0.0 {
            self.load_time_per_unit.mul_f64(amount)
        } else {
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ratios() {
        let config = SimConfig::default();
        assert_eq!(config.tick, Duration::from_millis(100));
        assert_eq!(config.dispatch_interval, Duration::from_millis(500));
        assert_eq!(config.transport_time, Duration::from_millis(500));
        assert!(config.seed.is_none());
    }

    #[test]
    fn test_repair_duration_decreases_with_skill() {
        let config = SimConfig::scaled(Duration::from_secs(1));
        assert_eq!(config.repair_duration(1), Duration::from_secs(19));
        assert_eq!(config.repair_duration(10), Duration::from_secs(10));
        let mut previous = Duration::MAX;
        for skill in MIN_SKILL..=MAX_SKILL {
            let d = config.repair_duration(skill);
            assert!(d > Duration::ZERO);
            assert!(d <= previous, "skill {skill} repaired slower than {}", skill - 1);
            previous = d;
        }
    }

    #[test]
    fn test_loading_duration_grows_with_amount() {
        let config = SimConfig::default().with_load_time_per_unit(Duration::from_millis(10));
        assert_eq!(config.loading_duration(30.0), Duration::from_millis(300));
        assert!(config.loading_duration(50.0) > config.loading_duration(5.0));
        assert_eq!(config.loading_duration(0.0), Duration::ZERO);
        assert_eq!(config.loading_duration(-3.0), Duration::ZERO);
    }

    #[test]
    fn test_builder_overrides() {
        let config = SimConfig::default()
            .with_tick(Duration::from_millis(10))
            .with_seed(7)
            .with_event_capacity(0);
        assert_eq!(config.tick, Duration::from_millis(10));
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.event_capacity, 1);
    }
}
