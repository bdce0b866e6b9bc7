/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Synthetic trigger edges for the simulator and for tests.

use thiserror::Error;

use crate::time::{one_degree_ticks, Ticks};
use crate::trigger::shape::TriggerShape;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum StimulusError {
    #[error("engine speed must be positive and finite, got {0} RPM")]
    InvalidSpeed(f64),
}

/// One decoded edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEdge {
    pub tooth: usize,
    pub timestamp: Ticks,
}

/// Edges of `cycles` full engine cycles, starting with tooth 0 at the start
/// timestamp.  Speed changes linearly from the first to the last edge when
/// built with [`EdgeStream::ramp`].
#[derive(Debug, Clone)]
pub struct EdgeStream<'a> {
    shape: &'a TriggerShape,
    from_rpm: f64,
    to_rpm: f64,
    total: usize,
    emitted: usize,
    timestamp: f64,
}

impl<'a> EdgeStream<'a> {
    pub fn constant(
        shape: &'a TriggerShape,
        rpm: f64,
        cycles: usize,
        start: Ticks,
    ) -> Result<Self, StimulusError> {
        Self::ramp(shape, rpm, rpm, cycles, start)
    }

    /// Both speeds must be positive; a stopped wheel has no edge spacing.
    pub fn ramp(
        shape: &'a TriggerShape,
        from_rpm: f64,
        to_rpm: f64,
        cycles: usize,
        start: Ticks,
    ) -> Result<Self, StimulusError> {
        for rpm in [from_rpm, to_rpm] {
            if !(rpm.is_finite() && rpm > 0.0) {
                return Err(StimulusError::InvalidSpeed(rpm));
            }
        }
        Ok(Self {
            shape,
            from_rpm,
            to_rpm,
            total: cycles * shape.event_count(),
            emitted: 0,
            timestamp: start as f64,
        })
    }

    fn rpm_at(&self, edge: usize) -> f64 {
        if self.total <= 1 {
            return self.to_rpm;
        }
        let t = edge as f64 / (self.total - 1) as f64;
        self.from_rpm + (self.to_rpm - self.from_rpm) * t
    }
}

impl Iterator for EdgeStream<'_> {
    type Item = TriggerEdge;

    fn next(&mut self) -> Option<TriggerEdge> {
        if self.emitted >= self.total {
            return None;
        }
        let count = self.shape.event_count();
        let tooth = self.emitted % count;
        if self.emitted > 0 {
            let prev = (tooth + count - 1) % count;
            let degrees = self.shape.angle_between(prev, tooth);
            self.timestamp += degrees * one_degree_ticks(self.rpm_at(self.emitted));
        }
        self.emitted += 1;
        Some(TriggerEdge {
            tooth,
            timestamp: self.timestamp.round() as Ticks,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.emitted;
        (left, Some(left))
    }
}

impl ExactSizeIterator for EdgeStream<'_> {}
