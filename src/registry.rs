// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Lookup of a controller by name.
//!
//! Grounded on the kernel's `tcp_register_congestion_control` /
//! `tcp_unregister_congestion_control` pair, but expressed as a `const`
//! table rather than a runtime-mutable list: module load/unload has no
//! analogue outside the kernel, and the set of controllers this crate
//! ships is fixed at compile time.

use crate::{
    config::{LedbatConfig, LolaConfig, SiadConfig},
    controller::Controller,
};

/// The names every controller in this crate registers under.
pub const NAMES: [&str; 3] = [crate::ledbat::NAME, crate::siad::NAME, crate::lola::NAME];

/// Constructs the named controller with its default tunables and the given
/// initial `cwnd`/`ssthresh`, or `None` if `name` is not registered.
pub fn by_name(name: &str, initial_cwnd: u32, initial_ssthresh: u32) -> Option<Controller> {
    match name {
        crate::ledbat::NAME => Some(Controller::Ledbat(crate::ledbat::Ledbat::new(
            initial_cwnd,
            initial_ssthresh,
            LedbatConfig::default().validate(),
        ))),
        crate::siad::NAME => Some(Controller::Siad(crate::siad::Siad::new(
            initial_cwnd,
            initial_ssthresh,
            SiadConfig::default().validate(),
        ))),
        crate::lola::NAME => Some(Controller::Lola(crate::lola::Lola::new(
            initial_cwnd,
            initial_ssthresh,
            LolaConfig::default().validate(),
        ))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::CongestionController;

    #[test]
    fn every_advertised_name_resolves() {
        for name in NAMES {
            let controller = by_name(name, 10, 10).expect("advertised name must resolve");
            assert_eq!(controller.congestion_window(), 10);
        }
    }

    #[test]
    fn unknown_name_returns_none() {
        assert!(by_name("reno", 10, 10).is_none());
    }
}
