/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Time-based and angle-based event scheduling.
//!
//! # Components
//! | Item | Role |
//! |---|---|
//! | [`EventQueue`] | sorted arena-backed chain; also the poll/sleep backend |
//! | [`SingleTimerExecutor`] | queue + one hardware-style deadline, re-armed after each pass |
//! | [`Executor`] | the three operations every backend offers |
//! | [`schedule_by_angle`] | angle-from-edge → timestamp conversion on top of any backend |
//!
//! Scheduling code is written against [`Executor`] only, so swapping the
//! backend never touches fuel, ignition or PWM logic.

pub mod action;
pub mod error;
pub mod queue;

pub use action::{Action, ActionArg, ActionFn};
pub use error::ScheduleError;
pub use queue::{EventHandle, EventQueue, DEFAULT_QUEUE_CAPACITY, QUEUE_LENGTH_LIMIT};

use tracing::{debug, trace};

use crate::rotation::RotationState;
use crate::time::Ticks;

// ── Executor ──────────────────────────────────────────────────────────────────

/// Backend-neutral scheduling interface.
pub trait Executor<C> {
    /// Run `action` at absolute time `due`.
    fn schedule_by_timestamp(
        &mut self,
        event: EventHandle,
        due: Ticks,
        action: Action<C>,
    ) -> Result<(), ScheduleError>;

    /// Run `action` `delay` ticks after `now`.
    fn schedule_for_later(
        &mut self,
        event: EventHandle,
        now: Ticks,
        delay: Ticks,
        action: Action<C>,
    ) -> Result<(), ScheduleError> {
        self.schedule_by_timestamp(event, now.saturating_add(delay), action)
    }

    /// Unlink `event`; `Ok(false)` when it was not pending.
    fn cancel(&mut self, event: EventHandle) -> Result<bool, ScheduleError>;
}

impl<C, const N: usize> Executor<C> for EventQueue<C, N> {
    fn schedule_by_timestamp(
        &mut self,
        event: EventHandle,
        due: Ticks,
        action: Action<C>,
    ) -> Result<(), ScheduleError> {
        self.insert(event, due, action)
    }

    fn cancel(&mut self, event: EventHandle) -> Result<bool, ScheduleError> {
        self.remove(event)
    }
}

// ── SingleTimerExecutor ───────────────────────────────────────────────────────

/// Event queue driven by one re-armable deadline.
///
/// The deadline always tracks the queue head, except while a timer callback
/// is executing: inserts made from inside actions do not touch it and the
/// deadline is recomputed once when the pass finishes.
pub struct SingleTimerExecutor<C> {
    queue: EventQueue<C>,
    timer_deadline: Option<Ticks>,
    in_timer_callback: bool,
    timer_callback_count: u64,
    executed_count: u64,
}

impl<C> SingleTimerExecutor<C> {
    pub fn new() -> Self {
        Self {
            queue: EventQueue::new(),
            timer_deadline: None,
            in_timer_callback: false,
            timer_callback_count: 0,
            executed_count: 0,
        }
    }

    pub fn allocate(&mut self) -> Result<EventHandle, ScheduleError> {
        self.queue.allocate()
    }

    pub fn queue(&self) -> &EventQueue<C> {
        &self.queue
    }

    pub fn is_pending(&self, event: EventHandle) -> bool {
        self.queue.is_pending(event)
    }

    /// Time the hardware timer is armed for, if any.
    pub fn timer_deadline(&self) -> Option<Ticks> {
        self.timer_deadline
    }

    pub fn timer_callback_count(&self) -> u64 {
        self.timer_callback_count
    }

    pub fn executed_count(&self) -> u64 {
        self.executed_count
    }

    /// Drop every pending event and disarm the timer.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.timer_deadline = None;
    }

    fn rearm(&mut self) {
        self.timer_deadline = self.queue.peek_next_timestamp();
        trace!(deadline_us = ?self.timer_deadline, "timer re-armed");
    }

    /// Timer interrupt body: execute everything due at `now`, then re-arm.
    ///
    /// `executor` projects the host onto its executor; actions receive the
    /// whole host and may schedule through it.
    pub fn on_timer_callback(
        host: &mut C,
        now: Ticks,
        executor: fn(&mut C) -> &mut Self,
    ) -> Result<usize, ScheduleError> {
        {
            let this = executor(host);
            this.in_timer_callback = true;
            this.timer_callback_count += 1;
        }

        let result = queue::drain_due(host, now, |h| executor(h).queue.take_due(now));

        let this = executor(host);
        this.in_timer_callback = false;
        if let Ok(executed) = result {
            this.executed_count += executed as u64;
        }
        this.rearm();
        result
    }
}

impl<C> Default for SingleTimerExecutor<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Executor<C> for SingleTimerExecutor<C> {
    fn schedule_by_timestamp(
        &mut self,
        event: EventHandle,
        due: Ticks,
        action: Action<C>,
    ) -> Result<(), ScheduleError> {
        self.queue.insert(event, due, action)?;
        if !self.in_timer_callback && self.queue.head() == Some(event) {
            self.rearm();
        }
        Ok(())
    }

    fn cancel(&mut self, event: EventHandle) -> Result<bool, ScheduleError> {
        let removed = self.queue.remove(event)?;
        if removed && !self.in_timer_callback {
            self.rearm();
        }
        Ok(removed)
    }
}

// ── Angle-based scheduling ────────────────────────────────────────────────────

/// Schedule `action` at `angle` degrees after the edge seen at
/// `edge_timestamp`.
///
/// Returns `Ok(None)` without scheduling when the one-degree time is unknown
/// (engine not spinning) or the angle is negative.  On success the computed
/// due timestamp is returned.
pub fn schedule_by_angle<C, E>(
    executor: &mut E,
    rotation: &RotationState,
    event: EventHandle,
    edge_timestamp: Ticks,
    angle: f64,
    action: Action<C>,
) -> Result<Option<Ticks>, ScheduleError>
where
    E: Executor<C> + ?Sized,
{
    let one_degree = rotation.one_degree_time();
    if one_degree.is_nan() {
        return Ok(None);
    }
    if !(angle >= 0.0) {
        debug!(angle, "negative angle delay refused");
        return Ok(None);
    }

    let delay = (angle * one_degree).round() as Ticks;
    let due = edge_timestamp.saturating_add(delay);
    executor.schedule_by_timestamp(event, due, action)?;
    Ok(Some(due))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
