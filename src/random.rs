// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A minimal randomness abstraction.
//!
//! Grounded on `s2n-quic-core::random::Generator`: the controllers
//! themselves are fully deterministic and never draw randomness, but the
//! [`crate::red`] active-queue-management policy needs a uniform draw for
//! its probabilistic drop decision. Routing it through a trait, rather
//! than calling `rand` directly from `red`, keeps the queue policy
//! testable with a fixed sequence of draws.
pub trait Generator {
    /// Returns `true` with probability `p` (clamped to `[0, 1]`).
    fn gen_bool(&mut self, p: f64) -> bool;
}

/// A [`Generator`] backed by `rand`'s small, non-cryptographic RNG.
///
/// This is the production default for [`crate::red::RedQueue`]; nothing in
/// this crate needs a cryptographically secure source of randomness.
#[derive(Debug)]
pub struct DefaultGenerator(rand::rngs::SmallRng);

impl DefaultGenerator {
    pub fn new(seed: u64) -> Self {
        use rand::SeedableRng;
        Self(rand::rngs::SmallRng::seed_from_u64(seed))
    }

    #[cfg(feature = "std")]
    pub fn from_entropy() -> Self {
        use rand::SeedableRng;
        Self(rand::rngs::SmallRng::from_entropy())
    }
}

impl Generator for DefaultGenerator {
    #[inline]
    fn gen_bool(&mut self, p: f64) -> bool {
        use rand::Rng;
        self.0.gen_bool(p.clamp(0.0, 1.0))
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::Generator;
    use std::vec::Vec;

    /// A `Generator` that returns a fixed sequence of draws, cycling once
    /// exhausted. Useful for pinning exact RED drop/no-drop outcomes in
    /// tests without depending on `rand`'s output stream.
    #[derive(Debug, Clone)]
    pub struct ScriptedGenerator {
        draws: Vec<f64>,
        next: usize,
    }

    impl ScriptedGenerator {
        pub fn new(draws: Vec<f64>) -> Self {
            assert!(!draws.is_empty(), "ScriptedGenerator needs at least one draw");
            Self { draws, next: 0 }
        }
    }

    impl Generator for ScriptedGenerator {
        fn gen_bool(&mut self, p: f64) -> bool {
            let r = self.draws[self.next % self.draws.len()];
            self.next += 1;
            r < p.clamp(0.0, 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::testing::ScriptedGenerator;

    #[test]
    fn scripted_generator_compares_draw_to_probability() {
        let mut gen = ScriptedGenerator::new(vec![0.04, 0.5, 0.9]);
        assert!(gen.gen_bool(0.05));
        assert!(!gen.gen_bool(0.05));
        assert!(!gen.gen_bool(0.05));
    }

    #[test]
    fn default_generator_is_deterministic_for_a_fixed_seed() {
        let mut a = DefaultGenerator::new(42);
        let mut b = DefaultGenerator::new(42);
        for _ in 0..16 {
            assert_eq!(a.gen_bool(0.3), b.gen_bool(0.3));
        }
    }
}
