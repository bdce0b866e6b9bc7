/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-cylinder injection events and their per-edge dispatch.
//!
//! # Schedule
//! [`FuelSchedule`] caches, for every firing-order slot, the trigger tooth
//! the injection starts after and the angle offset from that tooth.  It is
//! rebuilt lazily on the first edge after [`FuelSchedule::invalidate`]:
//!
//! ```text
//! base  = injection_phase − duration_angle + global_trigger_angle_offset
//! angle = wrap(base + i × cycle / cylinders)          i = firing index
//! (tooth, offset) = shape.find_trigger_position(angle)
//! ```
//!
//! `duration_angle` comes from the same pulse width the dispatcher drives
//! (model × closed-loop correction, then wall wetting), so every pulse ends
//! on the injection phase.
//!
//! # Dispatch
//! On every edge [`handle_fuel`] schedules the events whose cached tooth
//! matches: the open action by angle from the edge, the close action at a
//! fixed duration after the computed open time.

pub mod model;

use heapless::Vec as HVec;
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::{EngineConfiguration, InjectionMode};
use crate::diagnostics::WarningCode;
use crate::engine::EngineContext;
use crate::outputs::MAX_CYLINDERS;
use crate::rotation::RotationState;
use crate::scheduler::{
    schedule_by_angle, Action, ActionArg, EventHandle, Executor, ScheduleError,
    SingleTimerExecutor,
};
use crate::time::{ms_to_ticks, ticks_to_ms, wrap_angle, Ticks};
use crate::trigger::shape::{TriggerPosition, TriggerShape};

pub use model::{ConfiguredFuelModel, FuelModel};

/// Pulses shorter than this are dropped without a warning.
pub const MIN_INJECTION_DURATION_MS: f64 = 0.050;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum FuelScheduleError {
    #[error("engine speed unknown")]
    NotSpinning,
    #[error("injection phase not calibrated")]
    PhaseNotCalibrated,
    #[error("invalid injection duration {duration_ms} ms")]
    InvalidDuration { duration_ms: f64 },
}

/// Operating-point inputs to the pulse width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuelOperatingPoint {
    /// Engine load in percent.
    pub load: f64,
    /// Closed-loop multiplier, 1.0 when neutral.
    pub correction: f64,
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InjectionEvent {
    /// 0-based cylinder this injection feeds.
    pub owner_cylinder_index: usize,
    /// Injector outputs; the second only for two-wire batch.
    pub outputs: [Option<usize>; 2],
    pub injection_start: TriggerPosition,
    pub is_simultaneous: bool,
    /// Absolute start angle within the cycle.
    pub angle: f64,
}

/// Queue slots of one injection event plus the outputs captured when the
/// pulse was armed, so the close action matches the open even across a
/// schedule rebuild.
#[derive(Debug, Clone, Copy)]
pub struct InjectionSignalPair {
    pub start: EventHandle,
    pub end: EventHandle,
    outputs: [Option<usize>; 2],
    simultaneous_count: usize,
}

// ── FuelSchedule ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct FuelSchedule {
    events: [Option<InjectionEvent>; MAX_CYLINDERS],
    signals: HVec<InjectionSignalPair, MAX_CYLINDERS>,
    event_count: usize,
    is_ready: bool,
    built_bases: [f64; MAX_CYLINDERS],
    prev_output: Option<usize>,
}

impl FuelSchedule {
    /// Reserve one start and one end slot per possible cylinder.
    pub fn new<C>(executor: &mut SingleTimerExecutor<C>) -> Result<Self, ScheduleError> {
        let mut signals = HVec::new();
        for _ in 0..MAX_CYLINDERS {
            let pair = InjectionSignalPair {
                start: executor.allocate()?,
                end: executor.allocate()?,
                outputs: [None; 2],
                simultaneous_count: 0,
            };
            // exactly MAX_CYLINDERS pushes
            let _ = signals.push(pair);
        }
        Ok(Self {
            events: [None; MAX_CYLINDERS],
            signals,
            event_count: 0,
            is_ready: false,
            built_bases: [f64::NAN; MAX_CYLINDERS],
            prev_output: None,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    pub fn invalidate(&mut self) {
        self.is_ready = false;
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    pub fn event(&self, index: usize) -> Option<&InjectionEvent> {
        self.events.get(index).and_then(Option::as_ref)
    }

    pub fn signal(&self, index: usize) -> Option<&InjectionSignalPair> {
        self.signals.get(index)
    }

    /// Largest change of any slot's base angle since the last rebuild.
    pub fn base_angle_drift(
        &self,
        config: &EngineConfiguration,
        rotation: &RotationState,
        model: &dyn FuelModel,
        point: FuelOperatingPoint,
    ) -> Result<f64, FuelScheduleError> {
        let mut drift: f64 = 0.0;
        for (i, event) in self.events[..self.event_count].iter().enumerate() {
            let Some(event) = event else {
                continue;
            };
            let base =
                injection_base_angle(config, rotation, model, point, event.owner_cylinder_index)?;
            drift = drift.max((base - self.built_bases[i]).abs());
        }
        Ok(drift)
    }

    /// Rebuild every event from the configuration and the current operating
    /// point.  On failure `is_ready` stays false and the old events are kept
    /// only for pending close actions.
    pub fn add_fuel_events(
        &mut self,
        config: &EngineConfiguration,
        shape: &TriggerShape,
        rotation: &RotationState,
        model: &dyn FuelModel,
        point: FuelOperatingPoint,
    ) -> Result<(), FuelScheduleError> {
        self.is_ready = false;

        let cycle = config.cycle_degrees();
        let cylinders = config.cylinders_count;
        let order = &config.firing_order;
        let injector_of = |i: usize| order[i] as usize - 1;

        for i in 0..cylinders {
            let outputs = match config.injection_mode {
                InjectionMode::Simultaneous => [None, None],
                InjectionMode::SinglePoint => [Some(0), None],
                InjectionMode::Sequential => [Some(injector_of(i)), None],
                InjectionMode::Batch if config.two_wire_batch_injection => [
                    Some(injector_of(i)),
                    Some(injector_of((i + cylinders / 2) % cylinders)),
                ],
                InjectionMode::Batch => [Some(i % (cylinders / 2)), None],
            };

            let base = injection_base_angle(config, rotation, model, point, injector_of(i))?;
            self.built_bases[i] = base;
            let angle = wrap_angle(base + i as f64 * cycle / cylinders as f64, cycle);
            self.events[i] = Some(InjectionEvent {
                owner_cylinder_index: injector_of(i),
                outputs,
                injection_start: shape.find_trigger_position(angle),
                is_simultaneous: config.injection_mode == InjectionMode::Simultaneous,
                angle,
            });
        }
        for slot in self.events.iter_mut().skip(cylinders) {
            *slot = None;
        }

        self.event_count = cylinders;
        self.is_ready = true;
        debug!(cylinders, base_angle = self.built_bases[0], "fuel schedule rebuilt");
        Ok(())
    }
}

/// Pulse width driven for `cylinder`: model width × closed-loop correction,
/// then wall-wetting compensation.
pub fn corrected_duration_ms(
    config: &EngineConfiguration,
    rotation: &RotationState,
    model: &dyn FuelModel,
    point: FuelOperatingPoint,
    cylinder: usize,
) -> f64 {
    let raw_ms = model.injection_duration_ms(
        config,
        rotation.rpm_value(),
        point.load,
        rotation.is_cranking(),
    ) * point.correction;
    model.wall_wetting_adjust(cylinder, raw_ms)
}

/// `injection_phase − duration_angle + global offset` for `cylinder` at the
/// current operating point.
pub fn injection_base_angle(
    config: &EngineConfiguration,
    rotation: &RotationState,
    model: &dyn FuelModel,
    point: FuelOperatingPoint,
    cylinder: usize,
) -> Result<f64, FuelScheduleError> {
    let one_degree = rotation.one_degree_time();
    if one_degree.is_nan() {
        return Err(FuelScheduleError::NotSpinning);
    }
    let phase = model.injection_phase(config, rotation.rpm_value(), point.load);
    if phase.is_nan() {
        return Err(FuelScheduleError::PhaseNotCalibrated);
    }
    let duration_ms = corrected_duration_ms(config, rotation, model, point, cylinder);
    if !duration_ms.is_finite() || duration_ms < 0.0 {
        return Err(FuelScheduleError::InvalidDuration { duration_ms });
    }
    let duration_angle = ms_to_ticks(duration_ms) / one_degree;
    Ok(phase - duration_angle + config.global_trigger_angle_offset)
}

// ── Per-edge dispatch ─────────────────────────────────────────────────────────

/// Schedule every injection that starts after `tooth`.
pub fn handle_fuel(engine: &mut EngineContext, tooth: usize, edge_timestamp: Ticks, limited_fuel: bool) {
    if !engine.config.injection_enabled || limited_fuel {
        return;
    }

    if !engine.fuel.is_ready() {
        let rebuilt = engine.fuel.add_fuel_events(
            &engine.config,
            &engine.shape,
            &engine.rotation,
            engine.fuel_model.as_ref(),
            engine.fuel_operating_point(),
        );
        if let Err(e) = rebuilt {
            engine.diagnostics.warn(
                WarningCode::FuelScheduleNotReady,
                edge_timestamp,
                format_args!("fuel schedule not ready: {e}"),
            );
            return;
        }
    }

    for index in 0..engine.fuel.event_count() {
        let Some(event) = engine.fuel.events[index] else {
            continue;
        };
        if event.injection_start.tooth_index == tooth {
            handle_fuel_injection_event(engine, index, &event, edge_timestamp);
        }
    }
}

fn handle_fuel_injection_event(
    engine: &mut EngineContext,
    index: usize,
    event: &InjectionEvent,
    edge_timestamp: Ticks,
) {
    let rpm = engine.rotation.rpm_value();
    let duration_ms = corrected_duration_ms(
        &engine.config,
        &engine.rotation,
        engine.fuel_model.as_ref(),
        engine.fuel_operating_point(),
        event.owner_cylinder_index,
    );

    if duration_ms.is_nan() {
        engine.diagnostics.warn(
            WarningCode::NanInjection,
            edge_timestamp,
            format_args!("NaN injection pulse for cylinder {}", event.owner_cylinder_index + 1),
        );
        return;
    }
    if duration_ms < 0.0 {
        engine.diagnostics.warn(
            WarningCode::NegativeInjection,
            edge_timestamp,
            format_args!("negative injection pulse {duration_ms:.3} ms"),
        );
        return;
    }
    if duration_ms < MIN_INJECTION_DURATION_MS {
        return;
    }

    let pair = engine.fuel.signals[index];
    if engine.executor.is_pending(pair.start) || engine.executor.is_pending(pair.end) {
        trace!(index, "previous injection still pending");
        return;
    }

    let cylinders = engine.config.cylinders_count;
    let per_cycle = engine.config.injection_mode.injections_per_cycle(cylinders);
    let cycle_ms = ticks_to_ms(engine.rotation.one_degree_time() * engine.config.cycle_degrees());
    if duration_ms * per_cycle as f64 > cycle_ms {
        engine.diagnostics.warn(
            WarningCode::TooLongInjection,
            edge_timestamp,
            format_args!(
                "injection {duration_ms:.2} ms x {per_cycle} exceeds cycle of {cycle_ms:.2} ms"
            ),
        );
    }

    let (open, close) = if event.is_simultaneous {
        (
            Action::new(open_all_injectors, index),
            Action::new(close_all_injectors, index),
        )
    } else {
        (
            Action::new(open_injectors, index),
            Action::new(close_injectors, index),
        )
    };

    {
        let signal = &mut engine.fuel.signals[index];
        signal.outputs = event.outputs;
        signal.simultaneous_count = cylinders;
    }

    let start = schedule_by_angle(
        &mut engine.executor,
        &engine.rotation,
        pair.start,
        edge_timestamp,
        event.injection_start.angle_offset,
        open,
    );
    let start_due = match start {
        Ok(Some(due)) => due,
        Ok(None) => return,
        Err(e) => {
            engine.report_schedule_error(e, edge_timestamp);
            return;
        }
    };

    let duration_ticks = ms_to_ticks(duration_ms).round() as Ticks;
    if let Err(e) = engine
        .executor
        .schedule_by_timestamp(pair.end, start_due + duration_ticks, close)
    {
        // never leave an injector open without its close
        let _ = engine.executor.cancel(pair.start);
        engine.report_schedule_error(e, edge_timestamp);
        return;
    }

    check_skipped_fuel(engine, event, rpm, edge_timestamp);
    trace!(
        cylinder = event.owner_cylinder_index + 1,
        open_us = start_due,
        duration_us = duration_ticks,
        "injection scheduled"
    );
}

/// Same output twice in a row at speed means an event was lost.
fn check_skipped_fuel(engine: &mut EngineContext, event: &InjectionEvent, rpm: f64, at: Ticks) {
    let mode = engine.config.injection_mode;
    let cylinders = engine.config.cylinders_count;
    let alternates = match mode {
        InjectionMode::Sequential => cylinders > 1,
        InjectionMode::Batch => cylinders / 2 > 1,
        _ => false,
    };
    let Some(output) = event.outputs[0] else {
        return;
    };
    let prev = engine.fuel.prev_output.replace(output);
    if alternates && rpm > 2.0 * engine.config.cranking_rpm && prev == Some(output) {
        engine.diagnostics.warn(
            WarningCode::SkippedFuel,
            at,
            format_args!("injector {} fired twice in a row", output + 1),
        );
    }
}

// ── Actions ───────────────────────────────────────────────────────────────────

fn open_injectors(engine: &mut EngineContext, index: ActionArg) {
    let now = engine.clock;
    for output in engine.fuel.signals[index].outputs.into_iter().flatten() {
        engine.pins.open_injector(output, now);
    }
}

fn close_injectors(engine: &mut EngineContext, index: ActionArg) {
    let now = engine.clock;
    for output in engine.fuel.signals[index].outputs.into_iter().flatten() {
        engine.pins.close_injector(output, now);
    }
}

fn open_all_injectors(engine: &mut EngineContext, index: ActionArg) {
    let now = engine.clock;
    for output in 0..engine.fuel.signals[index].simultaneous_count {
        engine.pins.open_injector(output, now);
    }
}

fn close_all_injectors(engine: &mut EngineContext, index: ActionArg) {
    let now = engine.clock;
    for output in 0..engine.fuel.signals[index].simultaneous_count {
        engine.pins.close_injector(output, now);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
