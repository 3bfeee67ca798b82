// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-controller tunables.
//!
//! Grounded on the kernel sources' `module_param`/`MODULE_PARM_DESC` tables
//! and on `s2n-quic-core::recovery::pacing`'s plain constructor-argument
//! configuration style: nothing here reads from a config file or
//! environment, each `*Config` is just a `pub`-field struct an embedding
//! application constructs directly, with a [`Default`] matching the kernel
//! module's parameter defaults.
//!
//! Loading tunables from strings (sysctl, `module_param`) is explicitly out
//! of scope; `validate` only clamps already-typed Rust values to the ranges
//! each algorithm assumes.

use crate::error::ControllerError;

/// A tiny, local stand-in for the `bitflags!` macro: this crate's mode mask
/// has exactly four bits and doesn't warrant pulling in the `bitflags`
/// crate, which nothing else in the dependency stack needs.
macro_rules! bitflags_like_mode {
    (
        $(#[$meta:meta])*
        pub struct $Name:ident: $Repr:ty {
            $(const $Flag:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Debug)]
        pub struct $Name($Repr);

        impl $Name {
            $(pub const $Flag: $Name = $Name($value);)*

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn bits(self) -> $Repr {
                self.0
            }
        }

        impl core::ops::BitOr for $Name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl core::ops::BitOrAssign for $Name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl core::ops::Sub for $Name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self(self.0 & !rhs.0)
            }
        }

        impl core::ops::SubAssign for $Name {
            fn sub_assign(&mut self, rhs: Self) {
                self.0 &= !rhs.0;
            }
        }
    };
}

/// Tunables for [`crate::ledbat::Ledbat`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedbatConfig {
    /// Target queuing delay, in milliseconds. Default 100.
    pub target_ms: u32,
    /// `CurrentDelayWindow` capacity. Default 2.
    pub current_filter: u32,
    /// `BaseHistory` capacity. Default 2.
    pub base_history: u32,
}

impl Default for LedbatConfig {
    fn default() -> Self {
        Self {
            target_ms: 100,
            current_filter: 2,
            base_history: 2,
        }
    }
}

impl LedbatConfig {
    /// Clamps every field to the minimum the controller can safely run
    /// with, logging each clamp through [`crate::log`].
    pub fn validate(mut self) -> Self {
        if self.target_ms == 0 {
            ControllerError::InvalidTunable {
                name: "target_ms",
                value: self.target_ms as i64,
            }
            .log();
            self.target_ms = 1;
        }
        if self.current_filter == 0 {
            ControllerError::InvalidTunable {
                name: "current_filter",
                value: 0,
            }
            .log();
            self.current_filter = 1;
        }
        if self.base_history == 0 {
            ControllerError::InvalidTunable {
                name: "base_history",
                value: 0,
            }
            .log();
            self.base_history = 1;
        }
        self
    }
}

/// Tunables for [`crate::siad::Siad`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SiadConfig {
    /// Target epoch length in RTTs. Default 20, minimum 2 (`MIN_RTT`).
    pub num_rtt: u32,
    /// Target epoch length in milliseconds; `0` means "use `num_rtt` directly".
    pub num_ms: u32,
}

impl Default for SiadConfig {
    fn default() -> Self {
        Self {
            num_rtt: 20,
            num_ms: 0,
        }
    }
}

/// Minimum legal `num_rtt`, matching the kernel source's `MIN_RTT`.
pub const SIAD_MIN_RTT: u32 = 2;

impl SiadConfig {
    pub fn validate(mut self) -> Self {
        if self.num_rtt < SIAD_MIN_RTT {
            ControllerError::InvalidTunable {
                name: "num_rtt",
                value: self.num_rtt as i64,
            }
            .log();
            self.num_rtt = SIAD_MIN_RTT;
        }
        self
    }
}

bitflags_like_mode! {
    /// LoLa's `lola_mode` bitmask, kept as a set-of-flags type rather than
    /// leaking the source's raw integer mask.
    pub struct LolaMode: u8 {
        const PRECAUTIONARY_DECONGESTION = 0b0001;
        const FAIR_FLOW_BALANCING = 0b0010;
        const FAST_CONVERGENCE = 0b0100;
        const CWND_HOLD = 0b1000;
    }
}

impl Default for LolaMode {
    fn default() -> Self {
        // default module parameter value in the source is 11 = 0b1011:
        // decongestion + balancing + hold, fast-convergence off.
        Self::PRECAUTIONARY_DECONGESTION | Self::FAIR_FLOW_BALANCING | Self::CWND_HOLD
    }
}

/// Tunables for [`crate::lola::Lola`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LolaConfig {
    pub mode: LolaMode,
    /// Queue-occupancy threshold that triggers a precautionary reduction, in microseconds.
    pub queue_max_us: u32,
    /// Fast-convergence shrink factor numerator, denominator `1024`.
    pub delta: u32,
    /// Post-reduction drain target numerator, denominator `1024`.
    pub gamma: u32,
    /// Floor below which a precautionary reduction never drives `cwnd`.
    pub cwnd_min: u32,
    /// Number of consecutive invalidation epochs before `delay_min` resets.
    pub base_timeout: u32,
    /// Noise floor below which a new RTT sample doesn't move `delay_min`, in microseconds.
    pub base_delay_epsilon_us: u32,
    /// Queuing-delay threshold that enters fair-flow balancing, in microseconds.
    pub fair_flow_balancing_start_delay_us: u32,
    /// Scales the cubic-in-time fair-flow-balancing curve.
    pub curve_factor: u32,
    /// Minimum time spent in `CWND_HOLD`, in milliseconds.
    pub hold_time_ms: u32,
    /// Minimum ACK samples per measurement interval before evaluation fires.
    pub min_samples: u32,
    /// Measurement interval length, in milliseconds.
    pub measurement_time_ms: u32,
    /// Hystart delay-increase exit threshold, in microseconds.
    pub slow_start_exit_us: u32,
    /// CUBIC multiplicative-decrease factor numerator, denominator `1024`.
    pub beta: u32,
    /// CUBIC scaling constant (`C` in RFC 8312 terms, fixed-point).
    pub bic_scale: u32,
}

impl Default for LolaConfig {
    fn default() -> Self {
        Self {
            mode: LolaMode::default(),
            queue_max_us: 5_000,
            delta: 900,
            gamma: 927,
            cwnd_min: 5,
            base_timeout: 10,
            base_delay_epsilon_us: 100,
            fair_flow_balancing_start_delay_us: 500,
            curve_factor: 75,
            hold_time_ms: 250,
            min_samples: 20,
            measurement_time_ms: 40,
            slow_start_exit_us: 1_000,
            beta: 717,
            bic_scale: 41,
        }
    }
}

impl LolaConfig {
    pub fn validate(mut self) -> Self {
        if self.cwnd_min == 0 {
            ControllerError::InvalidTunable {
                name: "cwnd_min",
                value: 0,
            }
            .log();
            self.cwnd_min = crate::MIN_CWND;
        }
        if self.measurement_time_ms == 0 {
            ControllerError::InvalidTunable {
                name: "measurement_time_ms",
                value: 0,
            }
            .log();
            self.measurement_time_ms = 1;
        }
        self
    }
}

/// Tunables for [`crate::red::RedQueue`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RedConfig {
    /// Queue size below which packets always enqueue, in bytes.
    pub min_thresh_bytes: u32,
    /// Queue size at or above which packets always drop, in bytes.
    pub max_thresh_bytes: u32,
    /// Maximum drop probability at `max_thresh`, expressed as a percentage (0-100).
    pub max_drop_probability_pct: f64,
    /// EWMA weight applied to each new queue-size sample.
    pub weight: f64,
    /// Assumed packet arrival rate while the queue is empty, used to age the average.
    pub packet_rate_per_sec: f64,
}

impl Default for RedConfig {
    fn default() -> Self {
        Self {
            min_thresh_bytes: 50_000,
            max_thresh_bytes: 150_000,
            max_drop_probability_pct: 10.0,
            weight: 0.002,
            packet_rate_per_sec: 800.0,
        }
    }
}

impl RedConfig {
    pub fn validate(mut self) -> Self {
        if self.max_thresh_bytes <= self.min_thresh_bytes {
            ControllerError::InvalidTunable {
                name: "max_thresh_bytes",
                value: self.max_thresh_bytes as i64,
            }
            .log();
            self.max_thresh_bytes = self.min_thresh_bytes.saturating_add(1);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledbat_config_clamps_zero_target() {
        let cfg = LedbatConfig {
            target_ms: 0,
            ..Default::default()
        }
        .validate();
        assert_eq!(cfg.target_ms, 1);
    }

    #[test]
    fn siad_config_clamps_below_min_rtt() {
        let cfg = SiadConfig { num_rtt: 1, num_ms: 0 }.validate();
        assert_eq!(cfg.num_rtt, SIAD_MIN_RTT);
    }

    #[test]
    fn red_config_clamps_inverted_thresholds() {
        let cfg = RedConfig {
            min_thresh_bytes: 100,
            max_thresh_bytes: 50,
            ..Default::default()
        }
        .validate();
        assert!(cfg.max_thresh_bytes > cfg.min_thresh_bytes);
    }

    #[test]
    fn lola_mode_flags_compose() {
        let mode = LolaMode::PRECAUTIONARY_DECONGESTION | LolaMode::CWND_HOLD;
        assert!(mode.contains(LolaMode::CWND_HOLD));
        assert!(!mode.contains(LolaMode::FAIR_FLOW_BALANCING));

        let without_hold = mode - LolaMode::CWND_HOLD;
        assert!(!without_hold.contains(LolaMode::CWND_HOLD));
    }

    #[test]
    fn lola_default_mode_matches_source_default_of_eleven() {
        // module default is 11 = 0b1011: decongestion + balancing + hold
        assert_eq!(LolaMode::default().bits(), 0b1011);
    }
}
