// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Admission of positive update decisions
//!
//! Applied only once an update is known to exist. Both policies fail closed:
//! a suppressed update is answered exactly like "no update available".

use crate::config::GateSettings;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    SuppressedByRollout,
    SuppressedByRateLimit,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        self == Self::Admit
    }
}

pub struct RequestGate {
    rollout_fraction: f64,
    rate_limit_per_sec: Option<NonZeroU32>,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestGate")
            .field("rollout_fraction", &self.rollout_fraction)
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .finish()
    }
}

impl RequestGate {
    /// `rate_limit_per_sec == 0` disables the limiter; the burst equals the rate.
    pub fn new(rollout_fraction: f64, rate_limit_per_sec: u32) -> Self {
        let rate_limit_per_sec = NonZeroU32::new(rate_limit_per_sec);
        let limiter = rate_limit_per_sec
            .map(|rate| RateLimiter::direct(Quota::per_second(rate).allow_burst(rate)));

        Self {
            rollout_fraction: rollout_fraction.clamp(0.0, 1.0),
            rate_limit_per_sec,
            limiter,
        }
    }

    pub fn from_settings(settings: &GateSettings) -> Self {
        Self::new(settings.rollout_fraction, settings.rate_limit_per_sec)
    }

    /// Gate admitting everything
    pub fn open() -> Self {
        Self::new(1.0, 0)
    }

    pub fn admit(&self) -> Admission {
        self.admit_with_draw(rand::random::<f64>())
    }

    /// `draw` is a uniform sample from `[0, 1)`.
    pub fn admit_with_draw(&self, draw: f64) -> Admission {
        if draw >= self.rollout_fraction {
            return Admission::SuppressedByRollout;
        }
        if let Some(limiter) = &self.limiter
            && limiter.check().is_err()
        {
            return Admission::SuppressedByRateLimit;
        }
        Admission::Admit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_gate_admits_everything() {
        let gate = RequestGate::open();
        for _ in 0..1000 {
            assert_eq!(gate.admit(), Admission::Admit);
        }
    }

    #[test]
    fn test_zero_rollout_suppresses_everything() {
        let gate = RequestGate::new(0.0, 0);
        assert_eq!(gate.admit_with_draw(0.0), Admission::SuppressedByRollout);
        for _ in 0..1000 {
            assert_eq!(gate.admit(), Admission::SuppressedByRollout);
        }
    }

    #[test]
    fn test_partial_rollout_uses_draw() {
        let gate = RequestGate::new(0.25, 0);
        assert!(gate.admit_with_draw(0.1).is_admitted());
        assert_eq!(gate.admit_with_draw(0.25), Admission::SuppressedByRollout);
        assert_eq!(gate.admit_with_draw(0.9), Admission::SuppressedByRollout);
    }

    #[test]
    fn test_rate_limit_allows_burst_then_suppresses() {
        let gate = RequestGate::new(1.0, 3);
        let admitted = (0..10).filter(|_| gate.admit_with_draw(0.0).is_admitted()).count();
        assert_eq!(admitted, 3);
        assert_eq!(gate.admit_with_draw(0.0), Admission::SuppressedByRateLimit);
    }

    #[test]
    fn test_rollout_is_checked_before_rate_limit() {
        let gate = RequestGate::new(0.5, 1);
        assert_eq!(gate.admit_with_draw(0.9), Admission::SuppressedByRollout);
        // The suppressed request did not consume the only token
        assert_eq!(gate.admit_with_draw(0.1), Admission::Admit);
    }
}
