/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Logical output pins.
//!
//! There is no hardware behind these: every level change is appended to a
//! bounded transition log that the simulator (or a board layer) drains.
//!
//! Injector pins count overlapping open requests.  Two injection windows
//! that overlap on one physical injector (batch mode, long pulses) must not
//! close it when the first window ends:
//!
//! | event | overlap_count | physical level |
//! |---|---|---|
//! | open A  | 1 | high (0→1 edge) |
//! | open B  | 2 | high (no edge) |
//! | close A | 1 | high (no edge) |
//! | close B | 0 | low (1→0 edge) |

use heapless::Deque;
use tracing::{trace, warn};

use crate::time::Ticks;

/// Upper bound on cylinders, injectors and coils.
pub const MAX_CYLINDERS: usize = 12;

/// Number of general-purpose PWM outputs.
pub const MAX_PWM_OUTPUTS: usize = 4;

/// Capacity of the transition log; the oldest entry is dropped when full.
pub const TRANSITION_LOG_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinId {
    Injector(usize),
    Coil(usize),
    Pwm(usize),
}

/// One recorded level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinTransition {
    pub pin: PinId,
    pub at: Ticks,
    pub high: bool,
}

// ── OutputPin ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct OutputPin {
    high: bool,
    transitions: u32,
}

impl OutputPin {
    /// Drive the pin; returns `true` when the level actually changed.
    pub fn set_value(&mut self, high: bool) -> bool {
        if self.high == high {
            return false;
        }
        self.high = high;
        self.transitions = self.transitions.wrapping_add(1);
        true
    }

    pub fn is_high(&self) -> bool {
        self.high
    }

    pub fn transitions(&self) -> u32 {
        self.transitions
    }
}

// ── InjectorOutputPin ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct InjectorOutputPin {
    pin: OutputPin,
    overlap_count: i8,
}

impl InjectorOutputPin {
    /// Returns `true` on the physical low→high edge.
    pub fn open(&mut self) -> bool {
        self.overlap_count = self.overlap_count.saturating_add(1);
        if self.overlap_count == 1 {
            self.pin.set_value(true)
        } else {
            false
        }
    }

    /// Returns `true` on the physical high→low edge.
    pub fn close(&mut self) -> bool {
        self.overlap_count -= 1;
        if self.overlap_count > 0 {
            return false;
        }
        if self.overlap_count < 0 {
            warn!("injector closed more often than opened");
            self.overlap_count = 0;
        }
        self.pin.set_value(false)
    }

    pub fn overlap_count(&self) -> i8 {
        self.overlap_count
    }

    pub fn is_high(&self) -> bool {
        self.pin.is_high()
    }

    pub fn transitions(&self) -> u32 {
        self.pin.transitions()
    }

    /// Force low and forget pending overlaps.
    pub fn reset(&mut self) -> bool {
        self.overlap_count = 0;
        self.pin.set_value(false)
    }
}

// ── EnginePins ────────────────────────────────────────────────────────────────

/// Every engine output plus the transition log.
#[derive(Debug)]
pub struct EnginePins {
    injectors: [InjectorOutputPin; MAX_CYLINDERS],
    coils: [OutputPin; MAX_CYLINDERS],
    pwm: [OutputPin; MAX_PWM_OUTPUTS],
    log: Deque<PinTransition, TRANSITION_LOG_CAPACITY>,
    dropped: u32,
}

impl EnginePins {
    pub fn new() -> Self {
        Self {
            injectors: Default::default(),
            coils: Default::default(),
            pwm: Default::default(),
            log: Deque::new(),
            dropped: 0,
        }
    }

    fn record(&mut self, pin: PinId, at: Ticks, high: bool) {
        trace!(pin = ?pin, at_us = at, high, "output transition");
        let entry = PinTransition { pin, at, high };
        if self.log.is_full() {
            self.log.pop_front();
            self.dropped = self.dropped.wrapping_add(1);
        }
        // room guaranteed by the pop above
        let _ = self.log.push_back(entry);
    }

    pub fn open_injector(&mut self, index: usize, at: Ticks) {
        if let Some(pin) = self.injectors.get_mut(index) {
            if pin.open() {
                self.record(PinId::Injector(index), at, true);
            }
        }
    }

    pub fn close_injector(&mut self, index: usize, at: Ticks) {
        if let Some(pin) = self.injectors.get_mut(index) {
            if pin.close() {
                self.record(PinId::Injector(index), at, false);
            }
        }
    }

    pub fn set_coil(&mut self, index: usize, high: bool, at: Ticks) {
        if let Some(pin) = self.coils.get_mut(index) {
            if pin.set_value(high) {
                self.record(PinId::Coil(index), at, high);
            }
        }
    }

    pub fn set_pwm(&mut self, index: usize, high: bool, at: Ticks) {
        if let Some(pin) = self.pwm.get_mut(index) {
            if pin.set_value(high) {
                self.record(PinId::Pwm(index), at, high);
            }
        }
    }

    pub fn injector(&self, index: usize) -> Option<&InjectorOutputPin> {
        self.injectors.get(index)
    }

    pub fn coil(&self, index: usize) -> Option<&OutputPin> {
        self.coils.get(index)
    }

    pub fn pwm(&self, index: usize) -> Option<&OutputPin> {
        self.pwm.get(index)
    }

    /// Drive everything low and clear overlap counters.
    pub fn all_low(&mut self, at: Ticks) {
        for i in 0..MAX_CYLINDERS {
            if self.injectors[i].reset() {
                self.record(PinId::Injector(i), at, false);
            }
            if self.coils[i].set_value(false) {
                self.record(PinId::Coil(i), at, false);
            }
        }
        for i in 0..MAX_PWM_OUTPUTS {
            if self.pwm[i].set_value(false) {
                self.record(PinId::Pwm(i), at, false);
            }
        }
    }

    /// Take every logged transition, oldest first.
    pub fn drain_transitions(&mut self) -> impl Iterator<Item = PinTransition> + '_ {
        core::iter::from_fn(move || self.log.pop_front())
    }

    /// Transitions lost to log overflow.
    pub fn dropped_transitions(&self) -> u32 {
        self.dropped
    }
}

impl Default for EnginePins {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
