/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Rotation / RPM state machine.
//!
//! ```text
//!            first edge            0 < rpm < cranking
//! Stopped ─────────────► SpinningUp ──────────────────► Cranking
//!    ▲                       │                           │   ▲
//!    │                       │ rpm ≥ cranking            │   │ rpm < cranking
//!    │                       ▼                           ▼   │
//!    └──── sync loss / ≥2 s without an edge ────────── Running
//! ```
//!
//! `one_degree_time` is finite exactly while the state is `Cranking` or
//! `Running`; otherwise it is NaN so every angle→time conversion that uses it
//! produces NaN and gets refused.  RPM is recomputed per edge and never
//! smoothed.

use tracing::{debug, info, warn};

use crate::time::{rpm_from_one_degree, Ticks, TICKS_PER_SECOND};
use crate::trigger::shape::TriggerShape;

/// Reported by [`RotationState::rpm`] while the last edge pair was implausible.
pub const NOISY_RPM: i32 = -1;

/// Anything above this is treated as trigger noise.
pub const UNREALISTIC_RPM: f64 = 30_000.0;

/// Edge silence after which the engine is declared stopped.
pub const NO_EDGE_TIMEOUT: Ticks = 2 * TICKS_PER_SECOND;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinningState {
    Stopped,
    SpinningUp,
    Cranking,
    Running,
}

#[derive(Debug, Clone)]
pub struct RotationState {
    state: SpinningState,
    rpm_value: f64,
    previous_rpm_value: f64,
    revolution_counter_since_boot: u32,
    revolution_counter_since_start: u32,
    one_degree_time: f64,
    last_edge: Option<(usize, Ticks)>,
    noisy: bool,
    #[cfg(test)]
    mock_rpm: Option<i32>,
}

impl RotationState {
    pub fn new() -> Self {
        Self {
            state: SpinningState::Stopped,
            rpm_value: 0.0,
            previous_rpm_value: 0.0,
            revolution_counter_since_boot: 0,
            revolution_counter_since_start: 0,
            one_degree_time: f64::NAN,
            last_edge: None,
            noisy: false,
            #[cfg(test)]
            mock_rpm: None,
        }
    }

    // ── Edge processing ──────────────────────────────────────────────────────

    /// Account for one decoded edge.
    pub fn on_edge(
        &mut self,
        tooth: usize,
        timestamp: Ticks,
        shape: &TriggerShape,
        cranking_rpm: f64,
    ) {
        let Some((prev_tooth, prev_ts)) = self.last_edge.replace((tooth, timestamp)) else {
            if self.state == SpinningState::Stopped {
                self.transition(SpinningState::SpinningUp);
            }
            return;
        };

        let delta_angle = shape.angle_between(prev_tooth, tooth);
        self.count_revolutions(shape.event_angle(prev_tooth), delta_angle);

        let dt = timestamp.saturating_sub(prev_ts);
        if dt == 0 || !(delta_angle > 0.0) {
            self.noisy = true;
            return;
        }

        let one_degree = dt as f64 / delta_angle;
        let rpm = rpm_from_one_degree(one_degree);
        if rpm > UNREALISTIC_RPM {
            debug!(rpm, tooth, "implausible edge spacing");
            self.noisy = true;
            return;
        }

        self.noisy = false;
        self.previous_rpm_value = self.rpm_value;
        self.rpm_value = rpm;
        self.one_degree_time = one_degree;

        let next = if rpm < cranking_rpm {
            SpinningState::Cranking
        } else {
            SpinningState::Running
        };
        if next != self.state {
            self.transition(next);
        }
    }

    fn count_revolutions(&mut self, prev_angle: f64, delta_angle: f64) {
        if !prev_angle.is_finite() || !delta_angle.is_finite() {
            return;
        }
        let crossed =
            ((prev_angle + delta_angle) / 360.0).floor() - (prev_angle / 360.0).floor();
        let crossed = crossed.max(0.0) as u32;
        self.revolution_counter_since_boot =
            self.revolution_counter_since_boot.wrapping_add(crossed);
        self.revolution_counter_since_start =
            self.revolution_counter_since_start.wrapping_add(crossed);
    }

    /// Explicit sync loss reported by the decoder.
    pub fn on_sync_loss(&mut self) {
        if self.state != SpinningState::Stopped {
            warn!(rpm = self.rpm_value, "trigger sync lost");
        }
        self.set_stopped();
    }

    /// Declare the engine stopped when no edge arrived for
    /// [`NO_EDGE_TIMEOUT`].  Returns `true` on that transition.
    pub fn check_timeout(&mut self, now: Ticks) -> bool {
        if self.state == SpinningState::Stopped {
            return false;
        }
        let Some((_, last_ts)) = self.last_edge else {
            return false;
        };
        if now.saturating_sub(last_ts) >= NO_EDGE_TIMEOUT {
            info!(silent_us = now - last_ts, "no trigger edges, engine stopped");
            self.set_stopped();
            return true;
        }
        false
    }

    pub fn set_stopped(&mut self) {
        self.rpm_value = 0.0;
        self.previous_rpm_value = 0.0;
        self.revolution_counter_since_start = 0;
        self.one_degree_time = f64::NAN;
        self.last_edge = None;
        self.noisy = false;
        if self.state != SpinningState::Stopped {
            self.transition(SpinningState::Stopped);
        }
    }

    fn transition(&mut self, next: SpinningState) {
        info!(from = ?self.state, to = ?next, rpm = self.rpm_value, "rotation state change");
        self.state = next;
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    /// Current RPM, [`NOISY_RPM`] while the trigger looks noisy.
    pub fn rpm(&self) -> i32 {
        #[cfg(test)]
        if let Some(mock) = self.mock_rpm {
            return mock;
        }
        if self.noisy {
            NOISY_RPM
        } else {
            self.rpm_value.round() as i32
        }
    }

    pub fn rpm_value(&self) -> f64 {
        self.rpm_value
    }

    /// Change since the previous edge.
    pub fn rpm_delta(&self) -> f64 {
        self.rpm_value - self.previous_rpm_value
    }

    pub fn one_degree_time(&self) -> f64 {
        self.one_degree_time
    }

    pub fn state(&self) -> SpinningState {
        self.state
    }

    pub fn revolution_counter_since_boot(&self) -> u32 {
        self.revolution_counter_since_boot
    }

    pub fn revolution_counter_since_start(&self) -> u32 {
        self.revolution_counter_since_start
    }

    pub fn last_edge_timestamp(&self) -> Option<Ticks> {
        self.last_edge.map(|(_, ts)| ts)
    }

    pub fn is_stopped(&self) -> bool {
        self.state == SpinningState::Stopped
    }

    pub fn is_spinning_up(&self) -> bool {
        self.state == SpinningState::SpinningUp
    }

    pub fn is_cranking(&self) -> bool {
        self.state == SpinningState::Cranking
    }

    pub fn is_running(&self) -> bool {
        self.state == SpinningState::Running
    }

    #[cfg(test)]
    pub fn set_mock_rpm(&mut self, rpm: Option<i32>) {
        self.mock_rpm = rpm;
    }

    #[cfg(test)]
    pub fn set_one_degree_time_for_test(&mut self, one_degree: f64) {
        self.one_degree_time = one_degree;
        self.rpm_value = rpm_from_one_degree(one_degree);
        self.state = SpinningState::Running;
    }
}

impl Default for RotationState {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OperationMode, TriggerConfig};

    const CRANKING: f64 = 550.0;

    fn shape() -> TriggerShape {
        TriggerShape::from_config(&TriggerConfig::default(), OperationMode::FourStroke).unwrap()
    }

    /// Feed teeth `teeth` (mod 116) spaced for `rpm`, after a last edge at
    /// `ts`.  Returns the timestamp of the final edge.
    fn spin(
        rot: &mut RotationState,
        shape: &TriggerShape,
        teeth: std::ops::Range<usize>,
        rpm: f64,
        mut ts: Ticks,
    ) -> Ticks {
        let odt = crate::time::one_degree_ticks(rpm);
        let n = shape.event_count();
        for i in teeth {
            let tooth = i % n;
            let prev = (i + n - 1) % n;
            ts += (shape.angle_between(prev, tooth) * odt).round() as Ticks;
            rot.on_edge(tooth, ts, shape, CRANKING);
        }
        ts
    }

    #[test]
    fn starts_stopped_with_nan_one_degree() {
        let rot = RotationState::new();
        assert!(rot.is_stopped());
        assert_eq!(rot.rpm(), 0);
        assert!(rot.one_degree_time().is_nan());
    }

    #[test]
    fn first_edge_spins_up_second_gives_speed() {
        let shape = shape();
        let mut rot = RotationState::new();
        rot.on_edge(0, 10_000, &shape, CRANKING);
        assert!(rot.is_spinning_up());
        assert!(rot.one_degree_time().is_nan());

        // 6° in 3000 µs → 333 RPM → cranking
        rot.on_edge(1, 13_000, &shape, CRANKING);
        assert!(rot.is_cranking());
        assert_eq!(rot.rpm(), 333);
        assert!((rot.one_degree_time() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn cranking_to_running_and_back() {
        let shape = shape();
        let mut rot = RotationState::new();
        let ts = spin(&mut rot, &shape, 0..5, 300.0, 0);
        assert!(rot.is_cranking());

        let ts = spin(&mut rot, &shape, 5..10, 1000.0, ts);
        assert!(rot.is_running());
        assert_eq!(rot.rpm(), 1000);
        assert!(rot.rpm_delta().abs() < 1.0);

        spin(&mut rot, &shape, 10..12, 400.0, ts);
        assert!(rot.is_cranking());
    }

    #[test]
    fn fast_first_pair_goes_straight_to_running() {
        let shape = shape();
        let mut rot = RotationState::new();
        spin(&mut rot, &shape, 0..2, 2000.0, 0);
        assert!(rot.is_running());
    }

    #[test]
    fn two_second_silence_stops_engine() {
        let shape = shape();
        let mut rot = RotationState::new();
        let ts = spin(&mut rot, &shape, 0..10, 1000.0, 0);
        assert!(rot.is_running());

        assert!(!rot.check_timeout(ts + NO_EDGE_TIMEOUT - 1));
        assert!(rot.is_running());
        assert!(rot.check_timeout(ts + NO_EDGE_TIMEOUT));
        assert!(rot.is_stopped());
        assert_eq!(rot.rpm(), 0);
        assert!(rot.one_degree_time().is_nan());
        assert!(!rot.check_timeout(ts + 10 * NO_EDGE_TIMEOUT));
    }

    #[test]
    fn sync_loss_stops_engine_and_next_edge_restarts() {
        let shape = shape();
        let mut rot = RotationState::new();
        let ts = spin(&mut rot, &shape, 0..10, 1000.0, 0);
        rot.on_sync_loss();
        assert!(rot.is_stopped());
        assert_eq!(rot.revolution_counter_since_start(), 0);

        rot.on_edge(0, ts + 50_000, &shape, CRANKING);
        assert!(rot.is_spinning_up());
    }

    #[test]
    fn implausible_spacing_reports_noisy_rpm() {
        let shape = shape();
        let mut rot = RotationState::new();
        let ts = spin(&mut rot, &shape, 0..5, 1000.0, 0);
        let odt = rot.one_degree_time();

        // 6° in 10 µs → 100 000 RPM
        rot.on_edge(5, ts + 10, &shape, CRANKING);
        assert_eq!(rot.rpm(), NOISY_RPM);
        assert_eq!(rot.one_degree_time(), odt, "noise must not corrupt the speed estimate");

        rot.on_edge(6, ts + 10 + 1_000, &shape, CRANKING);
        assert_eq!(rot.rpm(), 1000);
    }

    #[test]
    fn revolutions_counted_at_tooth_zero_and_second_half() {
        let shape = shape();
        let mut rot = RotationState::new();
        // two full cycles plus the return to tooth 0
        spin(&mut rot, &shape, 0..2 * 116 + 1, 1000.0, 0);
        assert_eq!(rot.revolution_counter_since_boot(), 4);
        assert_eq!(rot.revolution_counter_since_start(), 4);

        rot.on_sync_loss();
        assert_eq!(rot.revolution_counter_since_boot(), 4);
        assert_eq!(rot.revolution_counter_since_start(), 0);
    }

    #[test]
    fn mock_rpm_overrides_accessor() {
        let mut rot = RotationState::new();
        rot.set_mock_rpm(Some(4200));
        assert_eq!(rot.rpm(), 4200);
        rot.set_mock_rpm(None);
        assert_eq!(rot.rpm(), 0);
    }
}
