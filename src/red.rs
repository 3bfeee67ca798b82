// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! RED: Random Early Detection active queue management.
//!
//! Grounded on `red_packet_queue.hh`'s `enqueue`/`dequeue`: an EWMA of the
//! queue occupancy decides whether an arriving packet is enqueued, dropped
//! outright, or dropped probabilistically. This is a queue policy, not a
//! congestion controller, so it implements no [`crate::controller::CongestionController`]
//! methods; it exists for test harnesses that need a bottleneck queue in
//! front of a controller under test.
//!
//! One deliberate deviation from the source: the source increments `count_`
//! *before* computing `p_b`/`p_a` for the packet that triggered the
//! increment, so the packet that pushes `count_` from 0 to 1 is evaluated
//! against the post-increment value. This controller instead evaluates
//! `p_a` against the count left over from the *previous* packet and only
//! advances `count` afterward, matching the classic Floyd/Jacobson formula
//! (and the numeric worked example this crate's test scenarios are built
//! from, which only comes out even under that reading).

use crate::{config::RedConfig, random::Generator, time::Timestamp};

pub const NAME: &str = "red";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Enqueue,
    Drop,
}

/// RED queue state, grounded on `RedPacketQueue`.
#[derive(Clone, Debug)]
pub struct RedQueue {
    config: RedConfig,
    queue_size_bytes: u32,
    avg_bytes: f64,
    count: i64,
    q_empty_time: Option<Timestamp>,
}

impl RedQueue {
    pub fn new(config: RedConfig) -> Self {
        let config = config.validate();
        Self {
            config,
            queue_size_bytes: 0,
            avg_bytes: 0.0,
            count: 0,
            q_empty_time: None,
        }
    }

    pub fn queue_size_bytes(&self) -> u32 {
        self.queue_size_bytes
    }

    pub fn average_queue_size_bytes(&self) -> f64 {
        self.avg_bytes
    }

    fn update_average(&mut self, now: Timestamp) {
        if self.queue_size_bytes > 0 {
            self.avg_bytes = (1.0 - self.config.weight) * self.avg_bytes
                + self.config.weight * self.queue_size_bytes as f64;
        } else {
            let elapsed_ms = match self.q_empty_time {
                Some(t) => now.saturating_duration_since(t).as_millis() as f64,
                None => now.as_millis() as f64,
            };
            let m = self.config.packet_rate_per_sec * elapsed_ms;
            self.avg_bytes = (1.0 - self.config.weight).powf(m) * self.avg_bytes;
        }
    }

    /// Offers a packet of `pkt_size_bytes` to the queue, drawing from `rng`
    /// if the current average falls in the probabilistic-drop region.
    pub fn enqueue(
        &mut self,
        now: Timestamp,
        pkt_size_bytes: u32,
        rng: &mut impl Generator,
    ) -> Decision {
        self.update_average(now);

        let min_thresh = self.config.min_thresh_bytes as f64;
        let max_thresh = self.config.max_thresh_bytes as f64;

        if self.avg_bytes >= max_thresh {
            self.count = 0;
            crate::log::queue_drop(NAME, false);
            return Decision::Drop;
        }

        if self.avg_bytes >= min_thresh {
            let denom = (max_thresh - min_thresh).max(1.0);
            let mut p_b =
                (self.config.max_drop_probability_pct / 100.0) * (self.avg_bytes - min_thresh) / denom;
            p_b *= pkt_size_bytes as f64 / 1500.0;

            let count = self.count.max(0) as f64;
            let p_a = p_b / (1.0 - count * p_b).max(f64::EPSILON);

            if rng.gen_bool(p_a.clamp(0.0, 1.0)) {
                self.count = 0;
                crate::log::queue_drop(NAME, true);
                return Decision::Drop;
            }
            self.count += 1;
        } else {
            self.count = -1;
        }

        self.queue_size_bytes = self.queue_size_bytes.saturating_add(pkt_size_bytes);
        Decision::Enqueue
    }

    /// Removes `pkt_size_bytes` from the queue's byte accounting; stamps
    /// the empty-queue time if the queue has just drained, so the next
    /// [`RedQueue::enqueue`] ages `avg_bytes` down correctly.
    pub fn dequeue(&mut self, now: Timestamp, pkt_size_bytes: u32) {
        self.queue_size_bytes = self.queue_size_bytes.saturating_sub(pkt_size_bytes);
        if self.queue_size_bytes == 0 {
            self.q_empty_time = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::testing::ScriptedGenerator;

    #[test]
    fn drop_probability_matches_the_worked_example() {
        let mut queue = RedQueue::new(RedConfig::default());
        queue.avg_bytes = 100_000.0;
        queue.queue_size_bytes = 100_000;
        queue.count = 0;

        // p_b = 0.10 * (100000-50000)/(150000-50000) * 1500/1500 = 0.05
        // p_a = 0.05 / (1 - 0*0.05) = 0.05
        let mut gen = ScriptedGenerator::new(vec![0.04]);
        assert_eq!(queue.enqueue(Timestamp::ZERO, 1500, &mut gen), Decision::Drop);

        queue.count = 0;
        let mut gen = ScriptedGenerator::new(vec![0.06]);
        assert_eq!(queue.enqueue(Timestamp::ZERO, 1500, &mut gen), Decision::Enqueue);
    }

    #[test]
    fn below_min_thresh_always_enqueues() {
        let mut queue = RedQueue::new(RedConfig::default());
        let mut gen = ScriptedGenerator::new(vec![0.0]);
        let decision = queue.enqueue(Timestamp::ZERO, 1500, &mut gen);
        assert_eq!(decision, Decision::Enqueue);
        assert_eq!(queue.count, -1);
    }

    #[test]
    fn at_or_above_max_thresh_always_drops() {
        let mut queue = RedQueue::new(RedConfig::default());
        queue.avg_bytes = 200_000.0;
        queue.queue_size_bytes = 200_000;
        let mut gen = ScriptedGenerator::new(vec![0.0]);
        assert_eq!(queue.enqueue(Timestamp::ZERO, 1500, &mut gen), Decision::Drop);
    }

    #[test]
    fn drop_probability_is_monotone_nondecreasing_in_average() {
        let config = RedConfig::default();
        let min_thresh = config.min_thresh_bytes as f64;
        let max_thresh = config.max_thresh_bytes as f64;

        let p_b_at = |avg: f64| {
            (config.max_drop_probability_pct / 100.0) * (avg - min_thresh) / (max_thresh - min_thresh)
        };

        let mut prev = p_b_at(min_thresh);
        let mut avg = min_thresh;
        while avg < max_thresh {
            let p = p_b_at(avg);
            assert!(p >= prev - f64::EPSILON);
            prev = p;
            avg += 1_000.0;
        }
    }

    #[test]
    fn dequeue_to_empty_stamps_empty_time_and_ages_average_on_next_enqueue() {
        let mut queue = RedQueue::new(RedConfig::default());
        let mut gen = ScriptedGenerator::new(vec![1.0]);
        queue.enqueue(Timestamp::ZERO, 1500, &mut gen);
        queue.dequeue(Timestamp::ZERO, 1500);
        assert_eq!(queue.queue_size_bytes(), 0);

        let later = Timestamp::ZERO
            .checked_add(core::time::Duration::from_secs(1))
            .unwrap();
        let avg_before = queue.average_queue_size_bytes();
        queue.enqueue(later, 1500, &mut gen);
        assert!(queue.average_queue_size_bytes() <= avg_before);
    }
}
