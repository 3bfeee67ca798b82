// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity delay filters shared by [`crate::ledbat`], [`crate::siad`]
//! and [`crate::lola`].
//!
//! Grounded on two sources: the ring-buffer-plus-cursor shape of the
//! kernel's `struct ledbat_list` (a `kmalloc`'d array with a write cursor
//! and linear-scan minimum), and the `Option`-sentinel, no-heap-growth
//! style of `s2n-quic-core::recovery::bbr::windowed_filter::WindowedFilter`.
//! Capacity is a const generic upper bound rather than a runtime-sized
//! allocation, so a controller's state block has no heap dependency after
//! construction; the tunables in [`crate::config`] (`current_filter`,
//! `base_history`) pick a logical length at or below that bound with
//! [`CurrentDelayWindow::with_len`]/[`BaseHistory::with_len`].

use crate::time::WallClockSecond;
use core::time::Duration;

/// The most recent `N` per-ACK delay samples; `min()` is the "current delay".
///
/// Slots start empty rather than holding a sentinel maximum value, since
/// `Option<u32>::min` ordering (`None < Some(_)`) would otherwise have to be
/// special-cased at every call site; the ring instead only scans populated
/// slots.
#[derive(Clone, Debug)]
pub struct CurrentDelayWindow<const N: usize> {
    samples: [Option<u32>; N],
    cursor: usize,
    len: usize,
}

impl<const N: usize> Default for CurrentDelayWindow<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> CurrentDelayWindow<N> {
    /// A window using the full compile-time capacity `N`.
    pub const fn new() -> Self {
        Self {
            samples: [None; N],
            cursor: 0,
            len: N,
        }
    }

    /// A window using `len` of the `N` available slots, clamped to `[1, N]`
    /// so a misconfigured length can never zero out the window.
    pub fn with_len(len: usize) -> Self {
        Self {
            samples: [None; N],
            cursor: 0,
            len: len.clamp(1, N),
        }
    }

    /// Overwrites the slot at the cursor with `delay` and advances the
    /// cursor modulo the configured length.
    pub fn update(&mut self, delay: u32) {
        self.samples[self.cursor] = Some(delay);
        self.cursor = (self.cursor + 1) % self.len;
    }

    /// The minimum of the populated samples, or `None` if the ring is empty.
    pub fn min(&self) -> Option<u32> {
        self.samples[..self.len].iter().filter_map(|s| *s).min()
    }

    pub fn is_empty(&self) -> bool {
        self.samples[..self.len].iter().all(Option::is_none)
    }
}

/// `K` per-minute delay minima; `min()` across all slots is the "base delay".
///
/// The currently-accumulating slot is updated in place by taking the
/// minimum of its value and each incoming sample; a rollover occurs when
/// `now_sec >= last_rollover + ROLLOVER`, which advances the cursor and
/// resets the new slot to the incoming sample rather than folding it in.
#[derive(Clone, Debug)]
pub struct BaseHistory<const K: usize> {
    slots: [Option<u32>; K],
    cursor: usize,
    len: usize,
    last_rollover: Option<WallClockSecond>,
}

/// Wall-clock interval between base-history rollovers, matching the
/// kernel source's hardcoded 60-second minute rollover.
const ROLLOVER: Duration = Duration::from_secs(60);

impl<const K: usize> Default for BaseHistory<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const K: usize> BaseHistory<K> {
    /// A history using the full compile-time capacity `K`.
    pub const fn new() -> Self {
        Self {
            slots: [None; K],
            cursor: 0,
            len: K,
            last_rollover: None,
        }
    }

    /// A history using `len` of the `K` available slots, clamped to `[1, K]`
    /// so a misconfigured length can never zero out the history.
    pub fn with_len(len: usize) -> Self {
        Self {
            slots: [None; K],
            cursor: 0,
            len: len.clamp(1, K),
            last_rollover: None,
        }
    }

    /// Folds a sample taken at wall-clock second `now_sec` into the history,
    /// rolling the cursor over at most once per call even if multiple
    /// minutes have elapsed since the previous sample.
    pub fn update(&mut self, delay: u32, now_sec: WallClockSecond) {
        let due = match self.last_rollover {
            None => true,
            Some(last) => now_sec.0.saturating_sub(last.0) >= ROLLOVER.as_secs(),
        };

        if due {
            self.last_rollover = Some(now_sec);
            self.cursor = (self.cursor + 1) % self.len;
            self.slots[self.cursor] = Some(delay);
        } else {
            let slot = &mut self.slots[self.cursor];
            *slot = Some(slot.map_or(delay, |current| current.min(delay)));
        }
    }

    pub fn min(&self) -> Option<u32> {
        self.slots[..self.len].iter().filter_map(|s| *s).min()
    }

    pub fn is_empty(&self) -> bool {
        self.slots[..self.len].iter().all(Option::is_none)
    }
}

/// Compile-time upper bound on `current_filter`/`base_history`; the kernel
/// module parameter docs recommend `current_filter` stay small (<= cwnd/2)
/// and `base_history` stay at or below 10, so 16 slots leaves headroom
/// without sizing the ring off a runtime value.
pub const MAX_FILTER_SLOTS: usize = 16;

/// Derives queuing delay from a current-delay and a base-delay filter:
/// `min(current) - min(base)`, floored at zero since a noisy current
/// sample below the base estimate never implies negative queuing.
///
/// Returns `None` if either filter is still empty; callers fall back to a
/// single-sample formula in that case.
pub fn queuing_delay<const N: usize, const K: usize>(
    current: &CurrentDelayWindow<N>,
    base: &BaseHistory<K>,
) -> Option<u32> {
    let c = current.min()?;
    let b = base.min()?;
    Some(c.saturating_sub(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_delay_window_min_is_populated_samples_only() {
        let mut w: CurrentDelayWindow<3> = CurrentDelayWindow::new();
        assert!(w.is_empty());
        assert_eq!(w.min(), None);

        w.update(50);
        assert_eq!(w.min(), Some(50));

        w.update(10);
        w.update(30);
        assert_eq!(w.min(), Some(10));
    }

    #[test]
    fn current_delay_window_wraps_and_forgets_oldest() {
        let mut w: CurrentDelayWindow<2> = CurrentDelayWindow::new();
        w.update(5);
        w.update(9);
        // capacity 2: next write overwrites the oldest slot (the 5)
        w.update(100);
        assert_eq!(w.min(), Some(9));
    }

    #[test]
    fn base_history_folds_minimum_within_a_minute() {
        let mut h: BaseHistory<2> = BaseHistory::new();
        h.update(100, WallClockSecond(0));
        h.update(80, WallClockSecond(10));
        h.update(90, WallClockSecond(20));
        assert_eq!(h.min(), Some(80));
    }

    #[test]
    fn base_history_rolls_over_after_sixty_seconds() {
        let mut h: BaseHistory<2> = BaseHistory::new();
        h.update(100, WallClockSecond(0));
        h.update(60, WallClockSecond(65));
        // rollover resets the new slot to the incoming sample, not a fold
        assert_eq!(h.min(), Some(60));

        h.update(200, WallClockSecond(130));
        // old slot (100) still present in the other half of the ring
        assert_eq!(h.min(), Some(100));
    }

    #[test]
    fn queuing_delay_is_current_minus_base_floored_at_zero() {
        let mut current: CurrentDelayWindow<2> = CurrentDelayWindow::new();
        let mut base: BaseHistory<2> = BaseHistory::new();
        assert_eq!(queuing_delay(&current, &base), None);

        current.update(120);
        base.update(100, WallClockSecond(0));
        assert_eq!(queuing_delay(&current, &base), Some(20));

        current.update(90);
        assert_eq!(queuing_delay(&current, &base), Some(0));
    }
}
