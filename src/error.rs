// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Diagnostic error conditions.
//!
//! No controller callback in [`crate::controller::CongestionController`]
//! returns a `Result`: the kernel and ns callback surfaces this crate is
//! grounded on are infallible too, and every failure mode here has a
//! well-defined degraded behavior (clamp, skip the sample, hold the
//! window). `ControllerError` exists so that degraded behavior can still be
//! observed, by recording it through [`crate::log`] at the point it is
//! handled rather than threading it back through the callback surface.

/// A diagnosable, non-fatal condition encountered while running a controller.
///
/// Every variant corresponds to a case a controller already handles by
/// falling back to a safe value; this type exists only so that fallback can
/// be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, displaydoc::Display)]
#[non_exhaustive]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum ControllerError {
    /// a fixed-capacity buffer was full and could not record a new sample
    AllocationFailed,

    /// an operation needed a timestamp sample that was never recorded
    MissingTimestampSample,

    /// the clock moved backwards between two samples
    ClockAnomaly,

    /// tunable `{name}` had an out-of-range value and was clamped
    InvalidTunable {
        name: &'static str,
        value: i64,
    },
}

impl ControllerError {
    /// Records this error at an appropriate level and returns it, so callers
    /// can `return self.log()` style chain logging with propagation to an
    /// internal fallback path.
    #[inline]
    pub fn log(self) -> Self {
        crate::log::controller_error(&self);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_tunable_name_and_value() {
        let err = ControllerError::InvalidTunable {
            name: "num_rtt",
            value: -1,
        };
        let rendered = std::format!("{err}");
        assert!(rendered.contains("num_rtt"));
        assert!(rendered.contains("-1"));
    }

    #[test]
    fn variants_are_copy_and_comparable() {
        let a = ControllerError::ClockAnomaly;
        let b = a;
        assert_eq!(a, b);
    }
}
