// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! SIAD: Scalable Increase Adaptive Decrease.
//!
//! A configurable-epoch controller that can perform several reductions
//! within a single congestion episode when the minimum delay is not
//! re-observed, trading off reaction speed against how aggressively it
//! grows. Grounded on `tcp_siad.c`; `tcp_siad_cong_avoid`,
//! `tcp_siad_ssthresh` and `tcp_siad_undo_cwnd` are carried over structurally.
//!
//! The source's `config_num_rtt` field lets a socket option override
//! `curr_num_rtt` mid-connection; that socket option is transport/kernel
//! registration plumbing out of scope here, so this controller always
//! derives `curr_num_rtt` from [`crate::config::SiadConfig`].
//! Likewise `prior_snd_una`/`ack` bookkeeping is the transport's job here:
//! [`crate::controller::AckSample::acked_bytes`] already carries the
//! per-call delta the source derives from `ack - prior_snd_una`.

use crate::{
    config::SiadConfig,
    controller::{AckSample, CaEvent, CaState, CongestionController, RttSample},
};

pub const NAME: &str = "siad";

/// `OFFSET` in the source: an extra packet of headroom subtracted on top
/// of the delay-ratio estimate, expressed in packets (rounding slack).
const OFFSET: u32 = 1;

/// SIAD congestion control state, grounded on `struct siad`.
#[derive(Clone, Debug)]
pub struct Siad {
    cwnd: u32,
    ssthresh: u32,
    cwnd_clamp: u32,
    cwnd_cnt: u32,

    default_num_rtt: u32,
    default_num_ms: u32,
    curr_num_rtt: u32,

    increase: u32,
    prev_max_cwnd: u32,
    incthresh: u32,

    prev_delay: Option<u32>,
    curr_delay: u32,
    min_delay: Option<u32>,
    curr_min_delay: Option<u32>,
    dec_cnt: u32,
    min_delay_seen: bool,
    increase_performed: bool,

    prev_min_delay: [Option<u32>; 3],
}

impl Siad {
    pub fn new(initial_cwnd: u32, initial_ssthresh: u32, config: SiadConfig) -> Self {
        let config = config.validate();
        let initial_cwnd = initial_cwnd.max(crate::MIN_CWND);
        Self {
            cwnd: initial_cwnd,
            ssthresh: initial_ssthresh,
            cwnd_clamp: u32::MAX,
            cwnd_cnt: 0,
            default_num_rtt: config.num_rtt,
            default_num_ms: config.num_ms,
            curr_num_rtt: config.num_rtt,
            increase: initial_cwnd * config.num_rtt,
            prev_max_cwnd: initial_cwnd,
            incthresh: initial_cwnd,
            prev_delay: None,
            curr_delay: 0,
            min_delay: None,
            curr_min_delay: None,
            dec_cnt: 0,
            min_delay_seen: true,
            increase_performed: false,
            prev_min_delay: [None; 3],
        }
    }

    /// `alpha`: the per-RTT packet increase rate implied by `increase`.
    fn alpha(&self) -> u32 {
        self.increase / self.curr_num_rtt
    }
}

impl CongestionController for Siad {
    fn congestion_window(&self) -> u32 {
        self.cwnd
    }

    fn slow_start_threshold(&self) -> u32 {
        self.ssthresh
    }

    fn on_pkts_acked(&mut self, _sample: RttSample) {
        // SIAD derives its delay sample inline in `on_ack` from the
        // timestamp echo or SRTT fallback; no separate callback needed,
        // matching `tcp_siad`, which leaves `.pkts_acked` unset.
    }

    fn on_ack(&mut self, sample: AckSample) {
        // Use the TS-option sample if present, else fall back to SRTT.
        // `sample.srtt_us` is already the real smoothed RTT (unlike the
        // kernel's `srtt` field, stored left-shifted by 3), so no further
        // scaling is applied here.
        let delay = sample.rtt_us.unwrap_or(sample.srtt_us);

        // single-outlier filter
        self.curr_delay = delay.min(self.prev_delay.unwrap_or(delay));
        self.prev_delay = Some(delay);

        match self.min_delay {
            None => {
                self.min_delay = Some(delay);
                self.min_delay_seen = true;
                self.curr_min_delay = Some(delay);
            }
            Some(min_delay) if delay <= min_delay => {
                self.min_delay = Some(delay);
                self.min_delay_seen = true;
                self.curr_min_delay = Some(delay);
            }
            Some(_) if delay <= self.curr_min_delay.unwrap_or(u32::MAX) => {
                self.curr_min_delay = Some(delay);
                if self.cwnd > self.ssthresh + self.alpha() + 1 {
                    self.min_delay = Some(delay);
                    self.min_delay_seen = true;
                    crate::log::base_rtt_invalidated(NAME);
                }
            }
            Some(_) => {}
        }

        // Do not perform additional decreases in Fast Increase or Slow Start.
        if self.cwnd > self.incthresh || self.cwnd < self.ssthresh {
            self.min_delay_seen = true;
        }

        if !sample.cwnd_limited {
            return;
        }

        let min_delay = self.min_delay.unwrap_or(self.curr_delay);

        if self.cwnd > self.ssthresh + self.alpha() + 2
            && !self.min_delay_seen
            && self.dec_cnt < self.curr_num_rtt - 1
        {
            self.additional_decrease(min_delay);
        } else {
            self.regular_increase(sample.acked_bytes, sample.mss.max(1));
        }

        let previous = self.cwnd;
        self.cwnd = self.cwnd.max(crate::MIN_CWND).min(self.cwnd_clamp);
        if self.cwnd != previous {
            crate::log::window_reduction(NAME, "floor_clamp", previous, self.cwnd);
        }
    }

    fn ssthresh(&mut self) -> u32 {
        self.cwnd_cnt = 0;

        let mut cwnd = self.cwnd;
        if self.increase_performed {
            if self.increase >= self.cwnd * self.curr_num_rtt || self.cwnd <= self.ssthresh {
                cwnd = self.cwnd >> 1;
            } else if self.cwnd > self.incthresh
                && self.increase == (self.cwnd >> 1) * self.curr_num_rtt
            {
                cwnd -= cwnd / 3;
            } else if self.cwnd >= self.incthresh
                && self.incthresh > self.ssthresh
                && self.increase == self.curr_num_rtt
            {
                cwnd -= (self.incthresh - self.ssthresh) / self.curr_num_rtt;
            } else if self.cwnd > self.incthresh {
                cwnd -= (self.cwnd - crate::MIN_CWND).min(self.alpha() >> 1);
            } else {
                cwnd -= (self.cwnd - crate::MIN_CWND).min(self.alpha());
            }
        }

        self.update_drift_detector();

        let mut ssthresh = cwnd;
        if let (Some(min_delay), curr_delay) = (self.min_delay, self.curr_delay) {
            if curr_delay != 0 {
                ssthresh = ((min_delay as u64 * cwnd as u64) / curr_delay as u64) as u32;
            } else {
                ssthresh = cwnd >> 1;
            }
        } else {
            ssthresh = cwnd >> 1;
        }

        ssthresh = if ssthresh > crate::MIN_CWND + OFFSET {
            ssthresh - OFFSET
        } else {
            crate::MIN_CWND
        };

        self.curr_num_rtt = if self.default_num_ms != 0
            && self.min_delay.is_some()
            && self.curr_delay != 0
        {
            let min_delay = self.min_delay.unwrap();
            let denom = (self.curr_delay + min_delay).max(1);
            let tmp = (self.default_num_ms * 2) / denom;
            self.default_num_rtt.max(tmp)
        } else {
            self.default_num_rtt
        };

        let trend = cwnd as i64 - self.prev_max_cwnd as i64;
        self.incthresh = if self.prev_max_cwnd < 2 * cwnd {
            ((cwnd as i64 + trend).max(ssthresh as i64)) as u32
        } else {
            ssthresh
        };

        self.increase = self
            .curr_num_rtt
            .max(self.incthresh.saturating_sub(ssthresh));

        self.prev_max_cwnd = cwnd;

        self.ssthresh = ssthresh;
        crate::log::window_reduction(NAME, "loss", self.cwnd, ssthresh);
        ssthresh
    }

    fn undo_cwnd(&mut self) -> u32 {
        let cwnd = self.incthresh;
        self.incthresh = self.prev_max_cwnd;
        self.min_delay_seen = true;
        cwnd
    }

    fn set_state(&mut self, _state: CaState) {
        // Not overridden in the source (no `.set_state`).
    }

    fn cwnd_event(&mut self, event: CaEvent, _now: crate::time::Timestamp) {
        if event == CaEvent::CompleteCwr {
            self.curr_min_delay = None;
            self.dec_cnt = 0;
            self.min_delay_seen = false;
            self.increase_performed = false;
        }
    }
}

impl Siad {
    /// `cwnd > ssthresh + alpha + 2 && !min_delay_seen && dec_cnt < Num_RTT - 1`
    /// branch of `tcp_siad_cong_avoid`.
    fn additional_decrease(&mut self, min_delay: u32) {
        self.dec_cnt += 1;
        self.cwnd_cnt = 0;

        let curr_delay = self.curr_delay.max(1);
        let mut cwnd = ((min_delay as u64 * self.ssthresh as u64) / curr_delay as u64) as u32;

        if cwnd > crate::MIN_CWND + OFFSET {
            cwnd -= OFFSET;

            let denom = self.curr_num_rtt - self.dec_cnt - 1;
            self.increase = self.curr_num_rtt.max(
                (self.incthresh.wrapping_sub(cwnd)) * self.curr_num_rtt / denom.max(1),
            );
            let alpha = self.alpha();
            let reduce = cwnd / (self.curr_num_rtt - self.dec_cnt).max(1);

            if reduce < alpha {
                if alpha + crate::MIN_CWND < cwnd {
                    cwnd -= alpha;
                } else {
                    cwnd = crate::MIN_CWND;
                    self.min_delay_seen = true;
                }
            } else {
                if reduce + crate::MIN_CWND < cwnd {
                    cwnd -= reduce;
                } else {
                    cwnd = crate::MIN_CWND;
                    self.min_delay_seen = true;
                }
                let denom = self.curr_num_rtt - self.dec_cnt;
                self.increase = self.curr_num_rtt.max(
                    (self.incthresh.wrapping_sub(cwnd)) * self.curr_num_rtt / denom.max(1),
                );
            }
        } else {
            cwnd = crate::MIN_CWND;
            self.min_delay_seen = true;
            let denom = self.curr_num_rtt - self.dec_cnt;
            self.increase = self
                .curr_num_rtt
                .max((self.incthresh.wrapping_sub(cwnd)) * self.curr_num_rtt / denom.max(1));
        }

        self.ssthresh = cwnd - 1;

        if self.increase > cwnd * self.curr_num_rtt {
            self.min_delay_seen = true;
        }

        crate::log::window_reduction(NAME, "additional_decrease", self.cwnd, cwnd);
        self.cwnd = cwnd;
    }

    /// The `else` branch of `tcp_siad_cong_avoid`: regular scalable increase.
    fn regular_increase(&mut self, acked_bytes: u32, mss: u32) {
        let mut acked_pkts = acked_bytes / mss;
        if acked_bytes % mss != 0 || acked_pkts == 0 {
            acked_pkts += 1;
        }
        self.cwnd_cnt += acked_pkts;

        let next = (self.cwnd * self.curr_num_rtt / self.increase.max(1)).max(1);
        if self.cwnd_cnt >= next {
            let n = self.cwnd_cnt / next;
            if self.cwnd < self.cwnd_clamp {
                let inc = acked_pkts.min(n).min(self.cwnd_clamp - self.cwnd);
                self.cwnd += inc;
                self.increase_performed = true;

                let crossed_ssthresh_up =
                    self.cwnd >= self.ssthresh && (self.cwnd - inc) < self.ssthresh;
                let crossed_incthresh_up =
                    self.cwnd >= self.incthresh && (self.cwnd - inc) < self.incthresh;

                if crossed_ssthresh_up && self.incthresh > self.ssthresh {
                    self.increase = self
                        .curr_num_rtt
                        .max(self.incthresh.saturating_sub(self.ssthresh));
                } else if (crossed_ssthresh_up && self.incthresh <= self.ssthresh)
                    || crossed_incthresh_up
                {
                    self.increase = self.curr_num_rtt;
                } else if self.cwnd > self.incthresh
                    && self.increase < (self.cwnd >> 1) * self.curr_num_rtt
                {
                    self.increase += inc * self.curr_num_rtt;
                } else if self.cwnd < self.ssthresh {
                    self.increase = self.cwnd * self.curr_num_rtt;
                }
            }
            self.cwnd_cnt -= n * next;
        }
    }

    /// Three-slot monotonic drift detector (`prev_min_delay1/2/3` in the
    /// source): confirms a sustained upward drift in `min_delay` before
    /// resetting it, so transient noise doesn't repeatedly invalidate the
    /// long-run minimum.
    fn update_drift_detector(&mut self) {
        let Some(min_delay) = self.min_delay else {
            return;
        };
        let [p1, p2, p3] = self.prev_min_delay;

        if p1.is_some_and(|p| min_delay < p)
            || p2.is_some_and(|p| min_delay < p)
            || p3.is_some_and(|p| min_delay < p)
        {
            self.prev_min_delay = [None; 3];
        } else if p1.is_none_or(|p| min_delay > p) {
            if p1.is_none() {
                self.prev_min_delay[0] = Some(min_delay);
            } else if p2.is_none() {
                self.prev_min_delay[1] = Some(min_delay);
            } else if p2.is_some_and(|p| min_delay > p) {
                if p3.is_none() {
                    self.prev_min_delay[2] = Some(min_delay);
                } else if p3.is_some_and(|p| min_delay > p) {
                    self.min_delay = p1;
                    self.prev_min_delay[1] = None;
                    self.prev_min_delay[2] = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{Timestamp, WallClockSecond};

    fn ack(acked_bytes: u32, mss: u32, rtt_us: u32, flightsize_bytes: u32) -> AckSample {
        AckSample {
            now: Timestamp::ZERO,
            now_sec: WallClockSecond(0),
            acked_bytes,
            mss,
            flightsize_bytes,
            cwnd_limited: true,
            one_way_delay_ms: None,
            rtt_us: Some(rtt_us),
            srtt_us: rtt_us,
        }
    }

    #[test]
    fn epoch_doubles_after_num_rtt_rounds_of_constant_rtt() {
        let mut siad = Siad::new(100, 100, SiadConfig { num_rtt: 20, num_ms: 0 });
        // one RTT == one ACK carrying mss worth of bytes here; feed enough
        // ACKs at a constant RTT for cwnd to reach ~200 without ever
        // tripping the additional-decrease branch.
        for _ in 0..4000 {
            siad.on_ack(ack(1, 1, 50_000, siad.congestion_window()));
            if siad.congestion_window() >= 200 {
                break;
            }
        }
        assert!(siad.congestion_window() >= 200);
    }

    #[test]
    fn dec_cnt_never_exceeds_num_rtt_minus_one() {
        let mut siad = Siad::new(200, 100, SiadConfig { num_rtt: 20, num_ms: 0 });
        siad.min_delay = Some(50_000);
        siad.min_delay_seen = false;
        for _ in 0..40 {
            siad.on_ack(ack(1, 1, 100_000, siad.congestion_window()));
            assert!(siad.dec_cnt <= siad.curr_num_rtt - 1);
        }
    }

    #[test]
    fn increase_never_drops_below_num_rtt() {
        let mut siad = Siad::new(200, 100, SiadConfig { num_rtt: 20, num_ms: 0 });
        siad.min_delay = Some(50_000);
        siad.min_delay_seen = false;
        for _ in 0..40 {
            siad.on_ack(ack(1, 1, 100_000, siad.congestion_window()));
            assert!(siad.increase >= siad.curr_num_rtt);
        }
    }

    #[test]
    fn cwnd_event_complete_cwr_resets_episode_bookkeeping() {
        let mut siad = Siad::new(100, 100, SiadConfig::default());
        siad.dec_cnt = 5;
        siad.increase_performed = true;
        siad.curr_min_delay = Some(10);
        siad.cwnd_event(CaEvent::CompleteCwr, Timestamp::ZERO);
        assert_eq!(siad.dec_cnt, 0);
        assert!(!siad.increase_performed);
        assert!(!siad.min_delay_seen);
        assert_eq!(siad.curr_min_delay, None);
    }

    #[test]
    fn cwnd_floor_is_never_violated() {
        let mut siad = Siad::new(3, 3, SiadConfig::default());
        for _ in 0..500 {
            siad.on_ack(ack(1, 1, 1_000_000, 3));
        }
        assert!(siad.congestion_window() >= crate::MIN_CWND);
    }
}
