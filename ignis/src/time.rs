/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Time base shared by the scheduler and every consumer.
//!
//! One tick is one microsecond.  Timestamps are absolute and monotonic; they
//! come from the trigger decoder (edge timestamps) or the timer path.

/// Absolute timestamp or duration, in microseconds.
pub type Ticks = u64;

pub const TICKS_PER_MS: u64 = 1_000;
pub const TICKS_PER_SECOND: u64 = 1_000_000;
pub const TICKS_PER_MINUTE: u64 = 60 * TICKS_PER_SECOND;

/// Milliseconds → ticks, kept fractional for angle math.
pub fn ms_to_ticks(ms: f64) -> f64 {
    ms * TICKS_PER_MS as f64
}

/// Ticks → milliseconds.
pub fn ticks_to_ms(ticks: f64) -> f64 {
    ticks / TICKS_PER_MS as f64
}

/// Duration of one crank degree at `rpm`, in ticks.  NaN for `rpm <= 0`.
pub fn one_degree_ticks(rpm: f64) -> f64 {
    if rpm > 0.0 {
        TICKS_PER_MINUTE as f64 / (360.0 * rpm)
    } else {
        f64::NAN
    }
}

/// Inverse of [`one_degree_ticks`].
pub fn rpm_from_one_degree(one_degree: f64) -> f64 {
    TICKS_PER_MINUTE as f64 / (360.0 * one_degree)
}

/// Wrap `angle` into `[0, cycle)`.  NaN stays NaN.
pub fn wrap_angle(angle: f64, cycle: f64) -> f64 {
    let wrapped = angle.rem_euclid(cycle);
    // rem_euclid can round up to exactly `cycle` for tiny negative inputs
    if wrapped >= cycle {
        0.0
    } else {
        wrapped
    }
}
