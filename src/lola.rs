// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! LoLa: low-latency congestion control on a CUBIC-style growth curve, with
//! precautionary decongestion, fair-flow balancing and a cwnd hold.
//!
//! Grounded on `tcp_lola.c`, itself a fork of the kernel's CUBIC
//! (`tcp_cubic.c`): `bictcp_update`/`cubic_root` are carried over for the
//! growth curve, `lolatcp_precautionary_decongestion` for the three
//! decongestion mechanisms, and `hystart_update`'s delay-based leg for the
//! slow-start exit.
//!
//! Two simplifications from the source, both driven by this crate's
//! narrower callback surface (no raw ACK sequence numbers and no `now`
//! parameter on `pkts_acked`/`undo_cwnd`):
//! - Hystart's ACK-train leg is dropped; only the delay-based leg is
//!   implemented. A round boundary normally tracked via
//!   `end_seq`/`after(ack, end_seq)` has no counterpart here.
//! - `undo_cwnd`'s "is this loss spurious" check and `cwnd_event`'s
//!   idle-gap shift both need a current timestamp the source gets from
//!   `tcp_time_stamp` at call time; this controller instead remembers the
//!   most recent [`crate::time::Timestamp`] it observed in `on_ack`
//!   (`last_activity`) and uses that as the reference point.
//!
//! The kernel's table-driven `cubic_root` (a lookup plus one Newton-Raphson
//! step, tuned for a hot interrupt path) is replaced with a plain
//! fixed-point Newton-Raphson loop run to convergence: this isn't a
//! per-packet hot path here, so the lookup table buys nothing.

use core::time::Duration;

use crate::{
    config::{LolaConfig, LolaMode},
    controller::{AckSample, CaEvent, CaState, CongestionController, RttSample},
    time::Timestamp,
};

pub const NAME: &str = "lola";

const BETA_SCALE: u32 = 1024;
const HYSTART_MIN_SAMPLES: u32 = 16;
const HYSTART_LOW_WINDOW: u32 = 16;
/// Recalculate the CUBIC curve at most once per this many microseconds.
const CUBIC_RECALC_INTERVAL_US: u64 = 31_250; // ~ HZ/32 at a 1kHz tick

fn cube_root(a: u64) -> u32 {
    if a == 0 {
        return 0;
    }
    let mut x: u64 = 1u64 << ((64 - a.leading_zeros() as u32) / 3 + 1);
    for _ in 0..12 {
        let xx = (x * x).max(1);
        x = (2 * x + a / xx) / 3;
        if x == 0 {
            x = 1;
        }
    }
    x as u32
}

/// LoLa congestion control state, grounded on `struct lolatcp`.
#[derive(Clone, Debug)]
pub struct Lola {
    cwnd: u32,
    ssthresh: u32,
    cwnd_clamp: u32,
    config: LolaConfig,

    cnt: u32,
    cwnd_cnt: u32,
    last_max_cwnd: u32,
    loss_cwnd: u32,
    last_time: Option<Timestamp>,
    bic_origin_point: u32,
    bic_k: u32,
    epoch_start: Option<Timestamp>,
    ack_cnt: u32,
    tcp_cwnd: u32,

    sample_cnt: u32,
    curr_rtt: Option<u32>,
    delay_min: Option<u32>,
    base_invalidation_count: u8,
    next_measurement: Option<Timestamp>,
    last_activity: Option<Timestamp>,

    loss_sampling_locked: bool,
    hystart_delay_fired: bool,
    fair_flow_balancing: bool,
    cwnd_hold: bool,
    base_reduced: bool,

    beta_scale: u32,
    cube_rtt_scale: u64,
    cube_factor: u64,
}

impl Lola {
    pub fn new(initial_cwnd: u32, initial_ssthresh: u32, config: LolaConfig) -> Self {
        let config = config.validate();
        let beta_scale = (8 * (BETA_SCALE + config.beta)) / 3 / (BETA_SCALE - config.beta).max(1);
        let cube_rtt_scale = config.bic_scale as u64 * 10;
        let cube_factor = (1u64 << 40) / (config.bic_scale as u64 * 10).max(1);

        Self {
            cwnd: initial_cwnd.max(crate::MIN_CWND),
            ssthresh: initial_ssthresh,
            cwnd_clamp: u32::MAX,
            config,
            cnt: 0,
            cwnd_cnt: 0,
            last_max_cwnd: 0,
            loss_cwnd: 0,
            last_time: None,
            bic_origin_point: 0,
            bic_k: 0,
            epoch_start: None,
            ack_cnt: 0,
            tcp_cwnd: 0,
            sample_cnt: 0,
            curr_rtt: None,
            delay_min: None,
            base_invalidation_count: 0,
            next_measurement: None,
            last_activity: None,
            loss_sampling_locked: false,
            hystart_delay_fired: false,
            fair_flow_balancing: false,
            cwnd_hold: false,
            base_reduced: false,
            beta_scale,
            cube_rtt_scale,
            cube_factor,
        }
    }

    fn in_slow_start(&self) -> bool {
        self.cwnd <= self.ssthresh
    }

    fn slow_start(&mut self, acked: u32) -> u32 {
        let room = self.ssthresh.saturating_sub(self.cwnd);
        let used = acked.min(room);
        self.cwnd = self.cwnd.saturating_add(used);
        acked - used
    }

    fn hystart_update(&mut self, delay: u32) {
        if self.sample_cnt < HYSTART_MIN_SAMPLES {
            if self.curr_rtt.is_none_or(|rtt| rtt > delay) {
                self.curr_rtt = Some(delay);
            }
            self.sample_cnt += 1;
            return;
        }
        let Some(curr_rtt) = self.curr_rtt else { return };
        let delay_min = self.delay_min.unwrap_or(delay);
        if curr_rtt > delay_min + self.config.slow_start_exit_us {
            self.fair_flow_balancing = false;
            if self.last_max_cwnd == 0 {
                self.hystart_delay_fired = true;
                self.epoch_start = None;
            }
            self.ssthresh = self.cwnd;
            crate::log::slow_start_exit(NAME, self.cwnd);
        }
    }

    fn lola_get_target(&self, reference: Timestamp, now: Timestamp) -> u64 {
        let elapsed_ms = now.saturating_duration_since(reference).as_millis() as u64;
        let cubed = elapsed_ms.saturating_mul(elapsed_ms).saturating_mul(elapsed_ms);
        let curve = self.config.curve_factor as u64;
        cubed / (curve * curve * curve).max(1)
    }

    fn measurement_due(&self, now: Timestamp) -> bool {
        self.next_measurement.is_none_or(|due| due <= now) || self.hystart_delay_fired
    }

    fn update_fair_flow_cnt(&mut self, now: Timestamp, curr_rtt: u32, queue_delay: u32, delay_min: u32) {
        let Some(epoch_start) = self.epoch_start else { return };
        let target_queue = self.lola_get_target(epoch_start, now);
        let packets_in_queue = (self.cwnd as u64 * queue_delay as u64) / curr_rtt.max(1) as u64;

        self.cnt = if packets_in_queue < target_queue {
            let earlier = epoch_start
                .checked_add(Duration::from_millis((delay_min / 1000) as u64))
                .unwrap_or(epoch_start);
            let target_prev = self.lola_get_target(earlier, now);
            let diff = target_queue.saturating_sub(target_prev) << 2;
            let prior_growth = ((self.cwnd / self.cnt.max(1)) as u64) << 1;
            let inner = diff
                .max(prior_growth)
                .min(target_queue.saturating_sub(packets_in_queue))
                .max(1);
            let numerator = self.cwnd as u64 * self.config.measurement_time_ms as u64 * 1_000;
            let denom = (inner * curr_rtt.max(1) as u64).max(1);
            (numerator / denom) as u32
        } else {
            100 * self.cwnd
        };
        self.cnt = self.cnt.max(4);
    }

    /// `lolatcp_precautionary_decongestion`: empties the queue before loss,
    /// optionally after a fair-flow-balancing growth-shaping phase and a
    /// cwnd-hold pause.
    fn precautionary_decongestion(&mut self, now: Timestamp) {
        if !self.config.mode.contains(LolaMode::PRECAUTIONARY_DECONGESTION) {
            return;
        }
        let (Some(delay_min), Some(curr_rtt)) = (self.delay_min, self.curr_rtt) else {
            return;
        };
        if delay_min == 0 || curr_rtt == 0 {
            return;
        }

        let enter_eval = if self.cwnd_hold {
            self.epoch_start.is_some_and(|epoch| {
                now.saturating_duration_since(epoch).as_millis() as u32 > self.config.hold_time_ms
            })
        } else {
            let Some(epoch_start) = self.epoch_start else {
                return;
            };
            let epoch_age_ms = now.saturating_duration_since(epoch_start).as_millis() as u32;
            self.cwnd >= self.config.cwnd_min
                && (self.fair_flow_balancing || self.hystart_delay_fired || self.base_reduced
                    || epoch_age_ms > 2 * (curr_rtt / 1000))
                && self.measurement_due(now)
                && self.sample_cnt >= self.config.min_samples
        };

        if !enter_eval {
            return;
        }

        let queue_delay = curr_rtt.saturating_sub(delay_min);

        if self.config.mode.contains(LolaMode::FAIR_FLOW_BALANCING)
            && !self.cwnd_hold
            && queue_delay > self.config.fair_flow_balancing_start_delay_us
            && !self.fair_flow_balancing
        {
            self.fair_flow_balancing = true;
            self.epoch_start = Some(now);
        }

        if self.fair_flow_balancing {
            self.update_fair_flow_cnt(now, curr_rtt, queue_delay, delay_min);
        }

        if queue_delay > self.config.queue_max_us
            || self.cwnd_hold
            || self.base_reduced
            || self.hystart_delay_fired
        {
            self.fair_flow_balancing = false;

            if self.config.mode.contains(LolaMode::CWND_HOLD)
                && !(self.cwnd_hold || self.base_reduced || self.hystart_delay_fired)
            {
                self.cwnd_hold = true;
                self.cnt = 100 * self.cwnd;
                self.epoch_start = Some(now);
                return;
            }

            if self.cwnd_hold {
                self.base_reduced = false;
            }
            if queue_delay > self.config.queue_max_us {
                self.base_reduced = false;
            }
            self.cwnd_hold = false;
            self.hystart_delay_fired = false;

            let mut new_cwnd =
                (self.cwnd as u64 * delay_min as u64 * self.config.gamma as u64) / curr_rtt as u64;
            new_cwnd >>= 10;
            let new_cwnd = (new_cwnd as u32).max(self.config.cwnd_min);

            if self.config.mode.contains(LolaMode::FAST_CONVERGENCE) && new_cwnd < self.last_max_cwnd
            {
                self.last_max_cwnd = (new_cwnd * self.config.delta) >> 10;
            } else {
                self.last_max_cwnd = new_cwnd;
            }
            self.base_reduced = false;

            let previous = self.cwnd;
            self.cwnd = new_cwnd;
            crate::log::window_reduction(NAME, "precautionary_decongestion", previous, new_cwnd);

            if self.config.base_timeout != 0 {
                self.base_invalidation_count += 1;
                if self.base_invalidation_count as u32 > self.config.base_timeout {
                    self.delay_min = None;
                    self.base_invalidation_count = 0;
                }
            }

            self.epoch_start = None;
            self.ssthresh = self.ssthresh.min(self.cwnd);
        }

        self.sample_cnt = 0;
        self.curr_rtt = None;
        self.next_measurement = now.checked_add(Duration::from_millis(self.config.measurement_time_ms as u64));
    }

    /// `bictcp_update`: the CUBIC growth-rate recalculation, gated to at
    /// most once per [`CUBIC_RECALC_INTERVAL_US`].
    fn cubic_update(&mut self, now: Timestamp, acked: u32) {
        self.ack_cnt += acked;

        if self.epoch_start.is_some()
            && self.bic_origin_point != 0
            && self
                .last_time
                .is_some_and(|t| now.saturating_duration_since(t).as_micros() as u64 <= CUBIC_RECALC_INTERVAL_US)
        {
            return;
        }
        if self.epoch_start.is_some() && self.last_time == Some(now) {
            self.tcp_friendliness_adjust();
            return;
        }
        self.last_time = Some(now);

        if self.epoch_start.is_none() {
            self.epoch_start = Some(now);
            self.ack_cnt = acked;
            self.tcp_cwnd = self.cwnd;

            if self.last_max_cwnd <= self.cwnd {
                self.bic_k = 0;
                self.bic_origin_point = self.cwnd;
            } else {
                self.bic_k = cube_root(self.cube_factor * (self.last_max_cwnd - self.cwnd) as u64);
                self.bic_origin_point = self.last_max_cwnd;
            }
        }

        let delay_min_us = self.delay_min.unwrap_or(0) as u64;
        let elapsed_us = now
            .saturating_duration_since(self.epoch_start.expect("just set"))
            .as_micros() as u64;
        let t_bictcphz = (elapsed_us + delay_min_us) * 1024 / 1_000_000;
        let bic_k = self.bic_k as u64;

        let offs = t_bictcphz.abs_diff(bic_k);
        let delta = (self.cube_rtt_scale * offs * offs * offs) >> 40;
        let bic_target = if t_bictcphz < bic_k {
            (self.bic_origin_point as u64).saturating_sub(delta)
        } else {
            self.bic_origin_point as u64 + delta
        };

        self.cnt = if bic_target > self.cwnd as u64 {
            (self.cwnd as u64 / (bic_target - self.cwnd as u64)).max(1) as u32
        } else {
            100 * self.cwnd
        };

        if self.last_max_cwnd == 0 && self.cnt > 20 {
            self.cnt = 20;
        }

        self.tcp_friendliness_adjust();
    }

    fn tcp_friendliness_adjust(&mut self) {
        let delta = ((self.cwnd * self.beta_scale) >> 3).max(1);
        while self.ack_cnt > delta {
            self.ack_cnt -= delta;
            self.tcp_cwnd += 1;
        }
        if self.tcp_cwnd > self.cwnd {
            let d = (self.tcp_cwnd - self.cwnd).max(1);
            self.cnt = self.cnt.min((self.cwnd / d).max(1));
        }
        self.cnt = self.cnt.max(2);
    }

    fn congestion_avoidance_ai(&mut self, acked: u32) {
        if self.cwnd >= self.cwnd_clamp {
            self.cwnd_cnt = 0;
            return;
        }
        self.cwnd_cnt += acked;
        if self.cwnd_cnt >= self.cnt {
            let delta = self.cwnd_cnt / self.cnt;
            self.cwnd_cnt -= delta * self.cnt;
            self.cwnd = (self.cwnd + delta).min(self.cwnd_clamp);
        }
    }
}

impl CongestionController for Lola {
    fn congestion_window(&self) -> u32 {
        self.cwnd
    }

    fn slow_start_threshold(&self) -> u32 {
        self.ssthresh
    }

    fn on_pkts_acked(&mut self, sample: RttSample) {
        if sample.rtt_us == 0 {
            return;
        }
        let delay = sample.rtt_us;

        if self.config.mode.contains(LolaMode::PRECAUTIONARY_DECONGESTION) && !self.cwnd_hold {
            if self.curr_rtt.is_none_or(|rtt| rtt > delay) {
                self.curr_rtt = Some(delay);
            }
            self.sample_cnt += sample.pkts_acked;
        }

        match self.delay_min {
            None => self.delay_min = Some(delay),
            Some(current) if current > delay => {
                if current - delay > self.config.base_delay_epsilon_us {
                    self.base_reduced = true;
                }
                self.delay_min = Some(delay);
            }
            Some(_) => {}
        }
        if let Some(delay_min) = self.delay_min {
            if delay.saturating_sub(delay_min) < self.config.base_delay_epsilon_us {
                self.base_invalidation_count = 0;
            }
        }

        if self.in_slow_start() && self.cwnd >= HYSTART_LOW_WINDOW {
            self.hystart_update(delay);
        }
    }

    fn on_ack(&mut self, sample: AckSample) {
        let last_cwnd = self.cwnd;
        let mut acked = sample.acked_bytes / sample.mss.max(1);

        if !self.in_slow_start() {
            self.precautionary_decongestion(sample.now);
        }

        if !sample.cwnd_limited && self.epoch_start.is_some() {
            if self.in_slow_start() && self.cwnd > 10 {
                let packets_out = (sample.flightsize_bytes / sample.mss.max(1)).max(crate::MIN_CWND);
                self.cwnd = packets_out;
                self.ssthresh = packets_out;
                self.epoch_start = None;
            }
            self.last_activity = Some(sample.now);
            return;
        }

        if self.in_slow_start() {
            if self.epoch_start.is_none() {
                self.epoch_start = Some(sample.now);
            }
            acked = self.slow_start(acked);
            if !self.in_slow_start() {
                self.epoch_start = None;
            }
            if acked == 0 {
                self.last_activity = Some(sample.now);
                return;
            }
        }

        if !(self.epoch_start.is_some() && (self.cwnd_hold || self.fair_flow_balancing)) {
            if self.epoch_start.is_none() {
                self.cwnd_hold = false;
                self.fair_flow_balancing = false;
            }
            self.cubic_update(sample.now, acked);
        }
        self.cnt = self.cnt.max(2);
        self.congestion_avoidance_ai(acked);

        if last_cwnd != self.cwnd {
            self.last_time = None;
        }
        self.last_activity = Some(sample.now);
    }

    fn ssthresh(&mut self) -> u32 {
        self.loss_cwnd = self.cwnd;
        self.cnt = self.cwnd * 100;

        if self.cwnd < self.last_max_cwnd && self.config.mode.contains(LolaMode::FAST_CONVERGENCE) {
            self.last_max_cwnd =
                ((self.cwnd as u64 * (BETA_SCALE + self.config.beta) as u64) / (2 * BETA_SCALE as u64)) as u32;
        } else {
            self.last_max_cwnd = self.cwnd;
        }

        self.loss_sampling_locked = true;
        self.epoch_start = None;
        self.curr_rtt = None;
        self.sample_cnt = 0;
        self.cwnd_hold = false;
        self.fair_flow_balancing = false;

        let ssthresh =
            (((self.cwnd as u64 * self.config.beta as u64) / BETA_SCALE as u64) as u32).max(crate::MIN_CWND);
        self.ssthresh = ssthresh;
        crate::log::window_reduction(NAME, "loss", self.cwnd, ssthresh);
        ssthresh
    }

    fn undo_cwnd(&mut self) -> u32 {
        let spurious = match (self.epoch_start, self.last_activity) {
            (None, _) => true,
            (Some(epoch_start), Some(now)) => {
                let elapsed_ms = now.saturating_duration_since(epoch_start).as_millis() as u32;
                let half_base_delay_ms = self.delay_min.unwrap_or(0) / 1_000 / 2;
                elapsed_ms < half_base_delay_ms
            }
            (Some(_), None) => false,
        };
        if spurious {
            self.epoch_start = None;
        }
        self.loss_sampling_locked = false;
        self.cwnd.max(self.loss_cwnd)
    }

    fn set_state(&mut self, state: CaState) {
        if state == CaState::Loss && self.in_slow_start() {
            self.epoch_start = None;
            self.curr_rtt = None;
            self.sample_cnt = 0;
            self.cwnd_hold = false;
            self.fair_flow_balancing = false;
        }
    }

    fn cwnd_event(&mut self, event: CaEvent, now: Timestamp) {
        if event != CaEvent::TxStart {
            return;
        }
        if let (Some(epoch_start), Some(last_activity)) = (self.epoch_start, self.last_activity) {
            let delta = now.saturating_duration_since(last_activity);
            if !delta.is_zero() {
                let shifted = epoch_start.checked_add(delta).unwrap_or(now);
                self.epoch_start = Some(if shifted > now { now } else { shifted });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::WallClockSecond;

    fn ack(now: Timestamp, acked_bytes: u32, rtt_us: u32, flightsize_bytes: u32) -> AckSample {
        AckSample {
            now,
            now_sec: WallClockSecond(0),
            acked_bytes,
            mss: 1,
            flightsize_bytes,
            cwnd_limited: true,
            one_way_delay_ms: None,
            rtt_us: Some(rtt_us),
            srtt_us: rtt_us,
        }
    }

    #[test]
    fn precautionary_decongestion_reduces_to_the_scenario_value() {
        // mode without CWND_HOLD isolates the reduction formula itself;
        // the two-phase hold/reduce interaction is covered separately below.
        let config = LolaConfig {
            mode: LolaMode::PRECAUTIONARY_DECONGESTION | LolaMode::FAIR_FLOW_BALANCING,
            ..LolaConfig::default()
        };
        let mut lola = Lola::new(100, 50, config);
        lola.epoch_start = Some(Timestamp::from_micros(1_000_000));
        lola.delay_min = Some(10_000);
        lola.curr_rtt = Some(20_000);
        lola.sample_cnt = lola.config.min_samples;

        let now = Timestamp::from_micros(1_000_000 + 3 * 20_000);
        lola.precautionary_decongestion(now);

        assert_eq!(lola.congestion_window(), 45);
        assert!(lola.congestion_window() >= lola.config.cwnd_min);
    }

    #[test]
    fn cwnd_hold_freezes_growth_until_hold_time_elapses() {
        let mut lola = Lola::new(100, 50, LolaConfig::default());
        lola.epoch_start = Some(Timestamp::from_micros(0));
        lola.delay_min = Some(10_000);
        lola.curr_rtt = Some(20_000);
        lola.sample_cnt = lola.config.min_samples;

        lola.precautionary_decongestion(Timestamp::from_micros(3 * 20_000));
        assert!(lola.cwnd_hold);
        assert_eq!(lola.congestion_window(), 100, "no reduction on hold entry");

        // too soon: still held
        lola.precautionary_decongestion(Timestamp::from_micros(3 * 20_000 + 100_000));
        assert_eq!(lola.congestion_window(), 100);

        // past hold_time_ms: the held reduction fires
        let past_hold = Timestamp::from_micros(3 * 20_000 + (lola.config.hold_time_ms as u64 + 1) * 1_000);
        lola.curr_rtt = Some(20_000);
        lola.sample_cnt = lola.config.min_samples;
        lola.precautionary_decongestion(past_hold);
        assert_eq!(lola.congestion_window(), 45);
    }

    #[test]
    fn cwnd_floor_is_never_violated() {
        let mut lola = Lola::new(6, 6, LolaConfig::default());
        let mut now = Timestamp::ZERO;
        for _ in 0..500 {
            now = now.checked_add(Duration::from_millis(50)).unwrap();
            lola.on_ack(ack(now, 1, 200_000, 6));
        }
        assert!(lola.congestion_window() >= crate::MIN_CWND);
    }

    #[test]
    fn slow_start_grows_cwnd_toward_ssthresh() {
        let mut lola = Lola::new(4, 100, LolaConfig::default());
        let mut now = Timestamp::ZERO;
        for _ in 0..20 {
            now = now.checked_add(Duration::from_millis(10)).unwrap();
            lola.on_pkts_acked(RttSample { pkts_acked: 1, rtt_us: 5_000 });
            lola.on_ack(ack(now, 1, 5_000, 4));
        }
        assert!(lola.congestion_window() > 4);
    }

    #[test]
    fn undo_cwnd_restores_the_larger_of_cwnd_and_loss_cwnd() {
        let mut lola = Lola::new(10, 10, LolaConfig::default());
        lola.loss_cwnd = 40;
        assert_eq!(lola.undo_cwnd(), 40);
    }

    #[test]
    fn ssthresh_applies_the_beta_multiplicative_decrease() {
        let mut lola = Lola::new(1000, 1000, LolaConfig::default());
        let ssthresh = lola.ssthresh();
        // beta = 717/1024
        assert_eq!(ssthresh, (1000u64 * 717 / 1024) as u32);
    }
}
