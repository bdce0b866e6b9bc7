/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Periodic pulse generators built on the event queue.
//!
//! A generator walks a phase table once per period.  Phase `k` holds its
//! level from the end of phase `k − 1` (0 for the first) to its own `end`,
//! both expressed as fractions of the period:
//!
//! ```text
//! duty 0.25:   [ (0.25, high), (1.0, low) ]
//!
//!  ┌──┐        ┌──┐
//!  │  │        │  │
//! ─┘  └────────┘  └──────
//!  0  .25      1
//! ```
//!
//! Every phase boundary is one queue event.  The action applies the level
//! and re-inserts the same event for the next boundary; the queue unlinks it
//! before calling, so the re-insert never collides with itself.
//!
//! Duty 0 and 1 bypass the queue entirely.  A NaN frequency pauses the
//! chain: the pending transition still fires but does not re-arm.

use heapless::Vec as HVec;
use thiserror::Error;
use tracing::{debug, info};

use crate::diagnostics::WarningCode;
use crate::engine::EngineContext;
use crate::outputs::MAX_PWM_OUTPUTS;
use crate::scheduler::{Action, ActionArg, EventHandle, Executor, ScheduleError, SingleTimerExecutor};
use crate::time::{Ticks, TICKS_PER_SECOND};

pub const MAX_PWM_PHASES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwmPhase {
    /// End of this phase as a fraction of the period, in `(0, 1]`.
    pub end: f64,
    pub high: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmMode {
    Normal,
    AlwaysOff,
    AlwaysOn,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PwmError {
    #[error("no pulse generator {id}")]
    UnknownGenerator { id: usize },
    #[error("duty cycle {duty} outside [0, 1]")]
    InvalidDuty { duty: f64 },
    #[error("phase table must ascend to 1.0 with at most {max} entries")]
    InvalidPhases { max: usize },
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

#[derive(Debug, Clone)]
pub struct PulseGenerator {
    output: usize,
    event: EventHandle,
    period_ticks: f64,
    phases: HVec<PwmPhase, MAX_PWM_PHASES>,
    phase_index: usize,
    cycle_start: Ticks,
    mode: PwmMode,
    running: bool,
    cycles: u32,
}

impl PulseGenerator {
    fn new(output: usize, event: EventHandle) -> Self {
        Self {
            output,
            event,
            period_ticks: f64::NAN,
            phases: HVec::new(),
            phase_index: 0,
            cycle_start: 0,
            mode: PwmMode::AlwaysOff,
            running: false,
            cycles: 0,
        }
    }

    pub fn mode(&self) -> PwmMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// NaN while paused.
    pub fn period_ticks(&self) -> f64 {
        self.period_ticks
    }

    /// Completed periods since the last start.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn event(&self) -> EventHandle {
        self.event
    }

    fn chain_active(&self) -> bool {
        self.running && self.mode == PwmMode::Normal && !self.period_ticks.is_nan()
    }
}

/// Fixed set of generators, one per PWM output.
#[derive(Debug)]
pub struct PwmBank {
    generators: HVec<PulseGenerator, MAX_PWM_OUTPUTS>,
}

impl PwmBank {
    pub fn new<C>(executor: &mut SingleTimerExecutor<C>) -> Result<Self, ScheduleError> {
        let mut generators = HVec::new();
        for output in 0..MAX_PWM_OUTPUTS {
            let _ = generators.push(PulseGenerator::new(output, executor.allocate()?));
        }
        Ok(Self { generators })
    }

    pub fn generator(&self, id: usize) -> Option<&PulseGenerator> {
        self.generators.get(id)
    }

    /// Mark every generator stopped; used after the queue was cleared.
    pub(crate) fn halt_all(&mut self) {
        for generator in self.generators.iter_mut() {
            generator.running = false;
            generator.phase_index = 0;
        }
    }
}

fn duty_phases(duty: f64) -> HVec<PwmPhase, MAX_PWM_PHASES> {
    let mut phases = HVec::new();
    let _ = phases.push(PwmPhase { end: duty, high: true });
    let _ = phases.push(PwmPhase { end: 1.0, high: false });
    phases
}

fn period_from_frequency(frequency_hz: f64) -> f64 {
    if frequency_hz.is_finite() && frequency_hz > 0.0 {
        TICKS_PER_SECOND as f64 / frequency_hz
    } else {
        f64::NAN
    }
}

fn check_id(engine: &EngineContext, id: usize) -> Result<(), PwmError> {
    if id < engine.pwm.generators.len() {
        Ok(())
    } else {
        Err(PwmError::UnknownGenerator { id })
    }
}

// ── Public operations ─────────────────────────────────────────────────────────

/// Start generator `id` at `frequency_hz` with `duty`, first edge now.
pub fn start(engine: &mut EngineContext, id: usize, frequency_hz: f64, duty: f64) -> Result<(), PwmError> {
    check_id(engine, id)?;
    stop(engine, id)?;
    {
        let generator = &mut engine.pwm.generators[id];
        generator.period_ticks = period_from_frequency(frequency_hz);
        generator.running = true;
        generator.cycles = 0;
    }
    info!(id, frequency_hz, duty, "pulse generator started");
    set_duty_cycle(engine, id, duty)
}

/// Change the duty cycle; takes effect at the next period for a running
/// chain, immediately for the 0 / 1 shortcuts.
pub fn set_duty_cycle(engine: &mut EngineContext, id: usize, duty: f64) -> Result<(), PwmError> {
    check_id(engine, id)?;
    if !(0.0..=1.0).contains(&duty) {
        return Err(PwmError::InvalidDuty { duty });
    }

    let mode = if duty == 0.0 {
        PwmMode::AlwaysOff
    } else if duty == 1.0 {
        PwmMode::AlwaysOn
    } else {
        PwmMode::Normal
    };

    if mode == PwmMode::Normal {
        engine.pwm.generators[id].phases = duty_phases(duty);
    }
    apply_mode(engine, id, mode)
}

/// Replace the phase table.  Ends must ascend strictly and finish at 1.0.
pub fn set_phases(engine: &mut EngineContext, id: usize, phases: &[PwmPhase]) -> Result<(), PwmError> {
    check_id(engine, id)?;
    let ascending = phases.windows(2).all(|w| w[0].end < w[1].end);
    let bounded = phases.first().is_some_and(|p| p.end > 0.0)
        && phases.last().is_some_and(|p| p.end == 1.0);
    let table = HVec::from_slice(phases).ok().filter(|_| ascending && bounded);
    let Some(table) = table else {
        return Err(PwmError::InvalidPhases { max: MAX_PWM_PHASES });
    };

    let generator = &mut engine.pwm.generators[id];
    generator.phases = table;
    if generator.phase_index >= generator.phases.len() {
        generator.phase_index = 0;
    }
    apply_mode(engine, id, PwmMode::Normal)
}

/// Change the frequency.  NaN (or non-positive) pauses the chain after the
/// transition already pending; a finite value restarts a paused chain.
pub fn set_frequency(engine: &mut EngineContext, id: usize, frequency_hz: f64) -> Result<(), PwmError> {
    check_id(engine, id)?;
    let generator = &mut engine.pwm.generators[id];
    let was_paused = generator.period_ticks.is_nan();
    generator.period_ticks = period_from_frequency(frequency_hz);
    debug!(id, frequency_hz, "pulse generator frequency");

    let restart = was_paused
        && generator.chain_active()
        && !engine.executor.is_pending(generator.event);
    if restart {
        restart_chain(engine, id)?;
    }
    Ok(())
}

/// Cancel the pending transition and drive the output low.
pub fn stop(engine: &mut EngineContext, id: usize) -> Result<(), PwmError> {
    check_id(engine, id)?;
    let (event, output) = {
        let generator = &mut engine.pwm.generators[id];
        generator.running = false;
        generator.phase_index = 0;
        (generator.event, generator.output)
    };
    engine.executor.cancel(event)?;
    let now = engine.clock;
    engine.pins.set_pwm(output, false, now);
    Ok(())
}

// ── Chain management ──────────────────────────────────────────────────────────

fn apply_mode(engine: &mut EngineContext, id: usize, mode: PwmMode) -> Result<(), PwmError> {
    let now = engine.clock;
    let (event, output, running, previous) = {
        let generator = &mut engine.pwm.generators[id];
        let previous = generator.mode;
        generator.mode = mode;
        (generator.event, generator.output, generator.running, previous)
    };
    if !running {
        return Ok(());
    }

    match mode {
        PwmMode::AlwaysOff | PwmMode::AlwaysOn => {
            engine.executor.cancel(event)?;
            engine.pins.set_pwm(output, mode == PwmMode::AlwaysOn, now);
        }
        PwmMode::Normal => {
            let idle = previous != PwmMode::Normal || !engine.executor.is_pending(event);
            if idle && !engine.pwm.generators[id].period_ticks.is_nan() {
                restart_chain(engine, id)?;
            }
        }
    }
    Ok(())
}

/// Begin a new period at the current time.
fn restart_chain(engine: &mut EngineContext, id: usize) -> Result<(), PwmError> {
    let now = engine.clock;
    let event = {
        let generator = &mut engine.pwm.generators[id];
        generator.phase_index = 0;
        generator.cycle_start = now;
        generator.event
    };
    engine
        .executor
        .schedule_by_timestamp(event, now, Action::new(pwm_timer_callback, id))?;
    Ok(())
}

/// Apply the current phase level and arm the next boundary.
fn pwm_timer_callback(engine: &mut EngineContext, id: ActionArg) {
    let now = engine.clock;
    let generator = &mut engine.pwm.generators[id];
    if !generator.running || generator.mode != PwmMode::Normal || generator.phases.is_empty() {
        return;
    }

    let index = generator.phase_index.min(generator.phases.len() - 1);
    let phase = generator.phases[index];
    let output = generator.output;
    let period = generator.period_ticks;

    let next_due = if period.is_nan() {
        None
    } else {
        let boundary = generator.cycle_start + (phase.end * period).round() as Ticks;
        if index + 1 >= generator.phases.len() {
            generator.phase_index = 0;
            generator.cycle_start += period.round() as Ticks;
            generator.cycles = generator.cycles.wrapping_add(1);
        } else {
            generator.phase_index = index + 1;
        }
        // a boundary already in the past must not spin the timer pass
        Some(boundary.max(now + 1))
    };
    let event = generator.event;

    engine.pins.set_pwm(output, phase.high, now);

    let Some(due) = next_due else {
        debug!(id, "pulse generator paused");
        return;
    };
    if let Err(e) = engine
        .executor
        .schedule_by_timestamp(event, due, Action::new(pwm_timer_callback, id))
    {
        engine.diagnostics.warn(
            WarningCode::PwmFault,
            now,
            format_args!("pulse generator {id} could not re-arm: {e}"),
        );
        engine.report_schedule_error(e, now);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
