/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Rate-limited warnings and the latched fatal firmware error.
//!
//! Warnings are advisory: they never change control flow.  Each
//! [`WarningCode`] is reported at most once per [`WARNING_RATE_LIMIT`] of
//! engine time so a fault that repeats on every edge cannot flood the log;
//! suppressed occurrences are still counted.
//!
//! A [`FatalError`] is latched once and stays set until
//! [`Diagnostics::clear_fatal`].  The trigger dispatcher refuses to schedule
//! anything while one is latched.

use std::fmt;

use thiserror::Error;
use tracing::{error, warn};

use crate::time::{Ticks, TICKS_PER_SECOND};

/// Minimum engine time between two reports of the same warning code.
pub const WARNING_RATE_LIMIT: Ticks = TICKS_PER_SECOND;

// ── Warning codes ─────────────────────────────────────────────────────────────

/// Non-fatal conditions reported by the scheduling core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningCode {
    /// Fuel model produced a NaN pulse width.
    NanInjection,
    /// Fuel model produced a negative pulse width.
    NegativeInjection,
    /// Pulse width times injections per cycle exceeds the cycle period.
    TooLongInjection,
    /// Same injector output fired twice in a row in sequential/batch mode.
    SkippedFuel,
    /// Fuel schedule could not be rebuilt.
    FuelScheduleNotReady,
    /// Ignition schedule could not be rebuilt.
    IgnitionScheduleNotReady,
    /// Insert of an event that is already pending.
    DoubleSchedule,
    /// Decoder delivered a tooth index beyond the events-per-cycle count.
    UnexpectedToothIndex,
    /// Derived RPM is above the plausibility limit.
    NoisyTrigger,
    /// Too few cam/VVT edges per 256 revolutions.
    NoCamSignal,
    /// Spark fired on a coil that was not charging.
    SparkWithoutDwell,
    /// Dwell angle does not fit into one engine cycle.
    DwellTooLong,
    /// Pulse generator misconfiguration or nesting.
    PwmFault,
}

impl WarningCode {
    pub const COUNT: usize = 13;

    pub const ALL: [WarningCode; Self::COUNT] = [
        WarningCode::NanInjection,
        WarningCode::NegativeInjection,
        WarningCode::TooLongInjection,
        WarningCode::SkippedFuel,
        WarningCode::FuelScheduleNotReady,
        WarningCode::IgnitionScheduleNotReady,
        WarningCode::DoubleSchedule,
        WarningCode::UnexpectedToothIndex,
        WarningCode::NoisyTrigger,
        WarningCode::NoCamSignal,
        WarningCode::SparkWithoutDwell,
        WarningCode::DwellTooLong,
        WarningCode::PwmFault,
    ];

    fn index(self) -> usize {
        match self {
            WarningCode::NanInjection => 0,
            WarningCode::NegativeInjection => 1,
            WarningCode::TooLongInjection => 2,
            WarningCode::SkippedFuel => 3,
            WarningCode::FuelScheduleNotReady => 4,
            WarningCode::IgnitionScheduleNotReady => 5,
            WarningCode::DoubleSchedule => 6,
            WarningCode::UnexpectedToothIndex => 7,
            WarningCode::NoisyTrigger => 8,
            WarningCode::NoCamSignal => 9,
            WarningCode::SparkWithoutDwell => 10,
            WarningCode::DwellTooLong => 11,
            WarningCode::PwmFault => 12,
        }
    }
}

// ── Fatal errors ──────────────────────────────────────────────────────────────

/// Conditions that indicate memory corruption on a safety-relevant path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FatalError {
    /// Event queue traversal exceeded its sanity bound.
    #[error("event queue corrupted: traversal exceeded {limit} entries")]
    QueueCorrupted { limit: usize },

    /// A single timer pass executed more events than the sanity bound.
    #[error("timer pass executed more than {limit} events")]
    QueueRunaway { limit: usize },
}

// ── Diagnostics ───────────────────────────────────────────────────────────────

/// Rate limiter and fatal-error latch.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    last_reported: [Option<Ticks>; WarningCode::COUNT],
    counts: [u32; WarningCode::COUNT],
    fatal: Option<FatalError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            last_reported: [None; WarningCode::COUNT],
            counts: [0; WarningCode::COUNT],
            fatal: None,
        }
    }

    /// Record a warning; emits a `tracing` event unless the code was reported
    /// within the last [`WARNING_RATE_LIMIT`].
    ///
    /// Returns `true` when the warning was actually logged.
    pub fn warn(&mut self, code: WarningCode, now: Ticks, args: fmt::Arguments<'_>) -> bool {
        let idx = code.index();
        self.counts[idx] = self.counts[idx].saturating_add(1);

        if let Some(last) = self.last_reported[idx] {
            if now.saturating_sub(last) < WARNING_RATE_LIMIT {
                return false;
            }
        }
        self.last_reported[idx] = Some(now);

        warn!(
            code = ?code,
            at_us = now,
            occurrences = self.counts[idx],
            "{}",
            args
        );
        true
    }

    /// Number of times `code` was raised (logged or suppressed).
    pub fn count(&self, code: WarningCode) -> u32 {
        self.counts[code.index()]
    }

    /// Latch a fatal error.  The first one wins.
    pub fn latch_fatal(&mut self, fatal: FatalError) {
        if self.fatal.is_none() {
            error!(error = %fatal, "fatal firmware error latched");
            self.fatal = Some(fatal);
        }
    }

    pub fn fatal(&self) -> Option<FatalError> {
        self.fatal
    }

    pub fn has_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    pub fn clear_fatal(&mut self) {
        self.fatal = None;
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
