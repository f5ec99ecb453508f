//! Randomised entity templates.
//!
//! Produces the parameters for `add_random_*` commands: sequential names
//! (`Rig-1`, `Mechanic-1`, `Loader-1`, ...) and attributes drawn uniformly
//! from fixed ranges. Rigs also get their own RNG forked from the spawner's,
//! so a seeded run stays reproducible however the rigs' tasks interleave.

use std::ops::{Range, RangeInclusive};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{MAX_SKILL, MIN_SKILL};
use crate::rig::RigSpec;

/// Units of oil per tick.
pub const RIG_RATE: Range<f64> = 10.0..30.0;
pub const RIG_CAPACITY: Range<f64> = 500.0..1000.0;
/// Per-tick fire probability.
pub const RIG_FIRE_PROBABILITY: Range<f64> = 0.001..0.01;
pub const MECHANIC_SKILL: RangeInclusive<u8> = MIN_SKILL..=MAX_SKILL;
pub const LOADER_CAPACITY: Range<f64> = 100.0..300.0;

/// Source of random entity parameters and sequential names.
#[derive(Debug)]
pub struct Spawner {
    rng: StdRng,
    rigs: u64,
    mechanics: u64,
    loaders: u64,
}

impl Spawner {
    #[must_use]
    pub fn new(rng: StdRng) -> Self {
        Self {
            rng,
            rigs: 0,
            mechanics: 0,
            loaders: 0,
        }
    }

    /// Seeded from `seed`, or from OS entropy when `None`.
    #[must_use]
    pub fn from_seed(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(rng)
    }

    /// A fresh, independent RNG derived from this one.
    pub fn fork_rng(&mut self) -> StdRng {
        StdRng::seed_from_u64(self.rng.r#gen())
    }

    pub fn rig_spec(&mut self) -> RigSpec {
        self.rigs += 1;
        RigSpec::new(
            format!("Rig-{}", self.rigs),
            self.rng.gen_range(RIG_RATE),
            self.rng.gen_range(RIG_CAPACITY),
            self.rng.gen_range(RIG_FIRE_PROBABILITY),
        )
    }

    /// Name and skill for a new mechanic.
    pub fn mechanic(&mut self) -> (String, u8) {
        self.mechanics += 1;
        (
            format!("Mechanic-{}", self.mechanics),
            self.rng.gen_range(MECHANIC_SKILL),
        )
    }

    /// Name and capacity for a new loader.
    pub fn loader(&mut self) -> (String, f64) {
        self.loaders += 1;
        (
            format!("Loader-{}", self.loaders),
            self.rng.gen_range(LOADER_CAPACITY),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_sequential_per_kind() {
        let mut spawner = Spawner::from_seed(Some(1));
        assert_eq!(spawner.rig_spec().name, "Rig-1");
        assert_eq!(spawner.rig_spec().name, "Rig-2");
        assert_eq!(spawner.mechanic().0, "Mechanic-1");
        assert_eq!(spawner.loader().0, "Loader-1");
        assert_eq!(spawner.loader().0, "Loader-2");
    }

    #[test]
    fn test_parameters_within_ranges() {
        let mut spawner = Spawner::from_seed(Some(99));
        for _ in 0..200 {
            let spec = spawner.rig_spec();
            assert!(RIG_RATE.contains(&spec.extraction_rate));
            assert!(RIG_CAPACITY.contains(&spec.capacity));
            assert!(RIG_FIRE_PROBABILITY.contains(&spec.fire_probability));
            assert!(MECHANIC_SKILL.contains(&spawner.mechanic().1));
            assert!(LOADER_CAPACITY.contains(&spawner.loader().1));
        }
    }

    #[test]
    fn test_same_seed_same_fleet() {
        let mut a = Spawner::from_seed(Some(7));
        let mut b = Spawner::from_seed(Some(7));
        assert_eq!(a.rig_spec(), b.rig_spec());
        assert_eq!(a.mechanic(), b.mechanic());
        assert_eq!(a.fork_rng().r#gen::<u64>(), b.fork_rng().r#gen::<u64>());
    }
}
