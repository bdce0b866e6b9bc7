/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Trigger wheel geometry: the crank angle of every decoded edge in one
//! engine cycle.
//!
//! Tooth index `i` is the `i`-th edge the decoder reports after the sync
//! gap; index 0 sits at angle 0.  A 60-2 crank wheel on a four-stroke engine
//! yields 116 rising-edge events per 720° cycle, spaced 6° apart except for
//! the 18° step across the gap.

use heapless::Vec as HVec;

use crate::config::{ConfigError, OperationMode, TriggerConfig, WheelPosition};
use crate::time::wrap_angle;

/// Upper bound on decoded events per engine cycle.
pub const MAX_TRIGGER_EVENTS: usize = 512;

/// An angle expressed relative to a trigger tooth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerPosition {
    pub tooth_index: usize,
    /// Degrees after the tooth, in `[0, next tooth)`.
    pub angle_offset: f64,
}

#[derive(Debug, Clone)]
pub struct TriggerShape {
    event_angles: HVec<f64, MAX_TRIGGER_EVENTS>,
    cycle_degrees: f64,
}

impl TriggerShape {
    /// Build the edge table for a toothed wheel with missing teeth.
    pub fn from_config(trigger: &TriggerConfig, mode: OperationMode) -> Result<Self, ConfigError> {
        let total = trigger.total_teeth;
        let missing = trigger.missing_teeth;
        if total == 0 || missing >= total {
            return Err(ConfigError::TriggerWheel { total, missing });
        }

        let cycle = mode.cycle_degrees();
        // a cam wheel turns once per four-stroke cycle
        let wheel_span = match (trigger.wheel_position, mode) {
            (WheelPosition::Camshaft, OperationMode::FourStroke) => 720.0,
            _ => 360.0,
        };
        let revolutions = (cycle / wheel_span) as usize;
        let present = (total - missing) as usize;
        let edges_per_tooth = if trigger.both_edges { 2 } else { 1 };

        let count = revolutions * present * edges_per_tooth;
        if count > MAX_TRIGGER_EVENTS {
            return Err(ConfigError::TooManyTriggerEvents {
                count,
                max: MAX_TRIGGER_EVENTS,
            });
        }

        let pitch = wheel_span / total as f64;
        let mut angles = HVec::new();
        for rev in 0..revolutions {
            let base = rev as f64 * wheel_span;
            for tooth in 0..present {
                let rising = base + tooth as f64 * pitch;
                // capacity checked above
                let _ = angles.push(rising);
                if trigger.both_edges {
                    let _ = angles.push(rising + pitch / 2.0);
                }
            }
        }

        Ok(Self {
            event_angles: angles,
            cycle_degrees: cycle,
        })
    }

    /// Explicit edge table; angles must be ascending within `[0, cycle)`.
    pub fn from_angles(angles: &[f64], cycle_degrees: f64) -> Result<Self, ConfigError> {
        let ascending = angles.windows(2).all(|w| w[0] < w[1]);
        let in_range = angles.iter().all(|a| (0.0..cycle_degrees).contains(a));
        if angles.is_empty() || !ascending || !in_range {
            return Err(ConfigError::TriggerWheel {
                total: angles.len() as u32,
                missing: 0,
            });
        }
        let event_angles = HVec::from_slice(angles).map_err(|_| {
            ConfigError::TooManyTriggerEvents {
                count: angles.len(),
                max: MAX_TRIGGER_EVENTS,
            }
        })?;
        Ok(Self {
            event_angles,
            cycle_degrees,
        })
    }

    pub fn event_count(&self) -> usize {
        self.event_angles.len()
    }

    pub fn cycle_degrees(&self) -> f64 {
        self.cycle_degrees
    }

    /// Crank angle of `tooth`; NaN for an index outside the table.
    pub fn event_angle(&self, tooth: usize) -> f64 {
        self.event_angles.get(tooth).copied().unwrap_or(f64::NAN)
    }

    /// Forward angular distance from `prev` to `current`.
    ///
    /// Seeing the same tooth again means one full cycle elapsed.
    pub fn angle_between(&self, prev: usize, current: usize) -> f64 {
        let delta = self.event_angle(current) - self.event_angle(prev);
        if delta > 0.0 {
            delta
        } else {
            delta + self.cycle_degrees
        }
    }

    /// Express `angle` (any value, wrapped into the cycle) as the last tooth
    /// at or before it plus an offset.
    pub fn find_trigger_position(&self, angle: f64) -> TriggerPosition {
        let angle = wrap_angle(angle, self.cycle_degrees);
        let after = self.event_angles.partition_point(|a| *a <= angle);
        if after == 0 {
            // before the first edge: belongs to the last tooth of the cycle
            let last = self.event_angles.len() - 1;
            return TriggerPosition {
                tooth_index: last,
                angle_offset: angle + self.cycle_degrees - self.event_angles[last],
            };
        }
        let tooth_index = after - 1;
        TriggerPosition {
            tooth_index,
            angle_offset: angle - self.event_angles[tooth_index],
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
