// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Structured logging hooks, compiled out when the `logging` feature is disabled.
//!
//! Grounded on `s2n-quic-core`'s `tracing`-gated event points (e.g.
//! `state.rs`'s `state-tracing` feature aliasing `tracing::debug` to a
//! no-op macro when the feature is off): every call here costs nothing in a
//! build without the `logging` feature, so none of these are guarded by an
//! extra `if` at the call site.

use crate::error::ControllerError;

#[cfg(feature = "logging")]
#[inline]
pub(crate) fn controller_error(err: &ControllerError) {
    tracing::warn!(error = %err, "controller degraded");
}

#[cfg(not(feature = "logging"))]
#[inline]
pub(crate) fn controller_error(_err: &ControllerError) {}

#[cfg(feature = "logging")]
#[inline]
pub(crate) fn slow_start_exit(controller: &'static str, cwnd: u32) {
    tracing::debug!(controller, cwnd, "slow start exit");
}

#[cfg(not(feature = "logging"))]
#[inline]
pub(crate) fn slow_start_exit(_controller: &'static str, _cwnd: u32) {}

#[cfg(feature = "logging")]
#[inline]
pub(crate) fn window_reduction(controller: &'static str, reason: &'static str, from: u32, to: u32) {
    tracing::debug!(controller, reason, from, to, "congestion window reduced");
}

#[cfg(not(feature = "logging"))]
#[inline]
pub(crate) fn window_reduction(_controller: &'static str, _reason: &'static str, _from: u32, _to: u32) {}

#[cfg(feature = "logging")]
#[inline]
pub(crate) fn base_rtt_invalidated(controller: &'static str) {
    tracing::trace!(controller, "base RTT estimate invalidated");
}

#[cfg(not(feature = "logging"))]
#[inline]
pub(crate) fn base_rtt_invalidated(_controller: &'static str) {}

#[cfg(feature = "logging")]
#[inline]
pub(crate) fn queue_drop(queue: &'static str, probabilistic: bool) {
    tracing::trace!(queue, probabilistic, "packet dropped");
}

#[cfg(not(feature = "logging"))]
#[inline]
pub(crate) fn queue_drop(_queue: &'static str, _probabilistic: bool) {}
