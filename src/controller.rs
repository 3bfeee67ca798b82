// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The callback surface every controller in this crate implements.
//!
//! Grounded on `s2n-quic-core::recovery::congestion_controller::CongestionController`,
//! trimmed to the narrower ack/loss/state surface the algorithms here
//! actually need (no ECN, MTU, pacing or packet-sent bookkeeping — those
//! belong to the transport, out of scope for a congestion controller). The
//! `private::Sealed` gate restricts implementations to this crate's three
//! algorithms; downstream crates can still use the trait as a bound.
//!
//! There is no Rust counterpart to a separate registration/teardown
//! callback pair here: construction (`Ledbat::new`, ...) and `Drop` already
//! give the same happens-before/happens-after guarantees, without a state
//! machine needing to track whether it's been initialized.

use crate::time::{Timestamp, WallClockSecond};

/// A per-ACK sample handed to [`CongestionController::on_ack`].
///
/// `one_way_delay_ms` and `rtt_us` are `None` when the embedding transport
/// has no timestamp-option sample for this ACK; timestamp option
/// negotiation itself is the transport's concern, this crate only consumes
/// the delay value it produces, or its absence.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct AckSample {
    pub now: Timestamp,
    pub now_sec: WallClockSecond,
    pub acked_bytes: u32,
    pub mss: u32,
    pub flightsize_bytes: u32,
    /// `false` means the flow is not currently limited by `cwnd`; most
    /// controllers skip their growth step in that case.
    pub cwnd_limited: bool,
    /// One-way queuing delay sample, in milliseconds (LEDBAT).
    pub one_way_delay_ms: Option<u32>,
    /// Round-trip-time sample, in microseconds (SIAD, LoLa).
    pub rtt_us: Option<u32>,
    /// Smoothed RTT, in microseconds; used as a fallback delay source when
    /// `rtt_us` is unavailable.
    pub srtt_us: u32,
}

impl AckSample {
    /// Builds a sample with no delay evidence attached; chain the `with_*`
    /// setters below to attach whichever samples the transport actually has.
    /// A constructor is needed here (rather than a public struct literal)
    /// because `#[non_exhaustive]` blocks literal construction outside this
    /// crate.
    pub fn new(
        now: Timestamp,
        now_sec: WallClockSecond,
        acked_bytes: u32,
        mss: u32,
        flightsize_bytes: u32,
        cwnd_limited: bool,
    ) -> Self {
        Self {
            now,
            now_sec,
            acked_bytes,
            mss,
            flightsize_bytes,
            cwnd_limited,
            one_way_delay_ms: None,
            rtt_us: None,
            srtt_us: 0,
        }
    }

    pub fn with_one_way_delay_ms(mut self, delay_ms: u32) -> Self {
        self.one_way_delay_ms = Some(delay_ms);
        self
    }

    pub fn with_rtt_us(mut self, rtt_us: u32) -> Self {
        self.rtt_us = Some(rtt_us);
        self
    }

    pub fn with_srtt_us(mut self, srtt_us: u32) -> Self {
        self.srtt_us = srtt_us;
        self
    }
}

/// A sample handed to [`CongestionController::on_pkts_acked`], delivered
/// ahead of [`CongestionController::on_ack`] for the same ACK so delay
/// filters are fresh when window decisions are made.
#[derive(Clone, Copy, Debug)]
pub struct RttSample {
    pub pkts_acked: u32,
    pub rtt_us: u32,
}

/// Mirrors the kernel's `enum tcp_ca_state` values the `set_state` callback
/// observes; only the states this crate's controllers react to are named.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CaState {
    Open,
    Disorder,
    Recovery,
    Loss,
}

/// Mirrors the kernel's `enum tcp_ca_event` values the `cwnd_event`
/// callback observes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CaEvent {
    /// Transmission resumed after being idle (`CA_EVENT_TX_START`).
    TxStart,
    /// A congestion-window-reduction round finished (`CA_EVENT_COMPLETE_CWR`).
    CompleteCwr,
}

/// An algorithm for controlling congestion.
pub trait CongestionController: private::Sealed {
    /// The current congestion window, in packets.
    fn congestion_window(&self) -> u32;

    /// The current slow-start threshold, in packets.
    fn slow_start_threshold(&self) -> u32;

    /// Delivers a round-trip-time sample ahead of the matching [`Self::on_ack`].
    fn on_pkts_acked(&mut self, sample: RttSample);

    /// Updates delay filters and, outside slow start, the congestion window.
    fn on_ack(&mut self, sample: AckSample);

    /// Computes a new `ssthresh` on a loss event; does not mutate `cwnd`.
    fn ssthresh(&mut self) -> u32;

    /// Computes a restored `cwnd` when a loss is detected as spurious.
    fn undo_cwnd(&mut self) -> u32;

    /// Observes an entry into or out of a loss-recovery TCP CA state.
    fn set_state(&mut self, state: CaState);

    /// Observes a congestion-window-relevant event outside the ACK path.
    fn cwnd_event(&mut self, event: CaEvent, now: Timestamp);
}

mod private {
    pub trait Sealed {}

    impl Sealed for crate::ledbat::Ledbat {}
    impl Sealed for crate::siad::Siad {}
    impl Sealed for crate::lola::Lola {}
    impl Sealed for super::Controller {}
}

/// A discriminated union over the three controllers, sized at compile time,
/// so a transport can hold one concrete, non-generic type regardless of
/// which algorithm a connection selected.
#[derive(Clone, Debug)]
pub enum Controller {
    Ledbat(crate::ledbat::Ledbat),
    Siad(crate::siad::Siad),
    Lola(crate::lola::Lola),
}

impl Controller {
    /// The name this controller was registered under.
    pub fn name(&self) -> &'static str {
        match self {
            Controller::Ledbat(_) => crate::ledbat::NAME,
            Controller::Siad(_) => crate::siad::NAME,
            Controller::Lola(_) => crate::lola::NAME,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            Controller::Ledbat(c) => c.$method($($arg),*),
            Controller::Siad(c) => c.$method($($arg),*),
            Controller::Lola(c) => c.$method($($arg),*),
        }
    };
}

impl CongestionController for Controller {
    fn congestion_window(&self) -> u32 {
        dispatch!(self, congestion_window)
    }

    fn slow_start_threshold(&self) -> u32 {
        dispatch!(self, slow_start_threshold)
    }

    fn on_pkts_acked(&mut self, sample: RttSample) {
        dispatch!(self, on_pkts_acked, sample)
    }

    fn on_ack(&mut self, sample: AckSample) {
        dispatch!(self, on_ack, sample)
    }

    fn ssthresh(&mut self) -> u32 {
        dispatch!(self, ssthresh)
    }

    fn undo_cwnd(&mut self) -> u32 {
        dispatch!(self, undo_cwnd)
    }

    fn set_state(&mut self, state: CaState) {
        dispatch!(self, set_state, state)
    }

    fn cwnd_event(&mut self, event: CaEvent, now: Timestamp) {
        dispatch!(self, cwnd_event, event, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ledbat::Ledbat, lola::Lola, siad::Siad};

    #[test]
    fn controller_dispatches_to_the_selected_algorithm() {
        let mut c = Controller::Ledbat(Ledbat::new(20, 20, Default::default()));
        assert_eq!(c.name(), "ledbat");
        assert_eq!(c.congestion_window(), 20);

        let mut c = Controller::Siad(Siad::new(100, 100, Default::default()));
        assert_eq!(c.name(), "siad");
        assert_eq!(c.congestion_window(), 100);

        let mut c = Controller::Lola(Lola::new(10, 10, Default::default()));
        assert_eq!(c.name(), "lola");
        assert_eq!(c.congestion_window(), 10);

        // touch the mutable path so dead_code lints don't flag dispatch! arms
        c.set_state(CaState::Open);
    }
}
