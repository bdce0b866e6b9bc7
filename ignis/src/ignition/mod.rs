/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Coil charge and spark scheduling.
//!
//! Each firing-order slot gets one [`IgnitionEvent`]: charge the coil at
//! `spark_angle − dwell_angle`, fire (drop the coil) `dwell` later.
//!
//! | IgnitionMode | coil for firing index `i` |
//! |---|---|
//! | `OneCoil` | 0 |
//! | `IndividualCoils` | `firing_order[i] − 1` |
//! | `WastedSpark` | `firing_order[i mod (cylinders / 2)] − 1` |

use heapless::Vec as HVec;
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::{EngineConfiguration, IgnitionMode};
use crate::diagnostics::WarningCode;
use crate::engine::EngineContext;
use crate::outputs::MAX_CYLINDERS;
use crate::rotation::RotationState;
use crate::scheduler::{
    schedule_by_angle, Action, ActionArg, EventHandle, Executor, ScheduleError,
    SingleTimerExecutor,
};
use crate::time::{ms_to_ticks, wrap_angle, Ticks};
use crate::trigger::shape::{TriggerPosition, TriggerShape};

// ── SparkModel ────────────────────────────────────────────────────────────────

pub trait SparkModel {
    /// Degrees before TDC.
    fn timing_advance(&self, config: &EngineConfiguration, rpm: f64, load: f64, cranking: bool) -> f64;

    fn dwell_ms(&self, config: &EngineConfiguration, rpm: f64, cranking: bool) -> f64;
}

/// Constant advance and dwell from [`SparkConfig`](crate::config::SparkConfig).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredSparkModel;

impl SparkModel for ConfiguredSparkModel {
    fn timing_advance(&self, config: &EngineConfiguration, _rpm: f64, _load: f64, cranking: bool) -> f64 {
        if cranking {
            config.spark.cranking_advance_deg
        } else {
            config.spark.advance_deg
        }
    }

    fn dwell_ms(&self, config: &EngineConfiguration, _rpm: f64, cranking: bool) -> f64 {
        if cranking {
            config.spark.cranking_dwell_ms
        } else {
            config.spark.dwell_ms
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum IgnitionScheduleError {
    #[error("engine speed unknown")]
    NotSpinning,
    #[error("invalid spark timing: advance {advance_deg}°, dwell {dwell_ms} ms")]
    InvalidTiming { advance_deg: f64, dwell_ms: f64 },
    #[error("dwell of {dwell_angle:.1}° does not fit a {cycle}° cycle")]
    DwellTooLong { dwell_angle: f64, cycle: f64 },
}

/// Spark timing at the current operating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparkTiming {
    pub advance_deg: f64,
    pub dwell_ms: f64,
    pub dwell_angle: f64,
}

pub fn spark_timing(
    config: &EngineConfiguration,
    rotation: &RotationState,
    model: &dyn SparkModel,
    load: f64,
) -> Result<SparkTiming, IgnitionScheduleError> {
    let one_degree = rotation.one_degree_time();
    if one_degree.is_nan() {
        return Err(IgnitionScheduleError::NotSpinning);
    }
    let rpm = rotation.rpm_value();
    let cranking = rotation.is_cranking();
    let advance_deg = model.timing_advance(config, rpm, load, cranking);
    let dwell_ms = model.dwell_ms(config, rpm, cranking);
    if !advance_deg.is_finite() || !dwell_ms.is_finite() || dwell_ms <= 0.0 {
        return Err(IgnitionScheduleError::InvalidTiming { advance_deg, dwell_ms });
    }
    let dwell_angle = ms_to_ticks(dwell_ms) / one_degree;
    let cycle = config.cycle_degrees();
    if dwell_angle >= cycle {
        return Err(IgnitionScheduleError::DwellTooLong { dwell_angle, cycle });
    }
    Ok(SparkTiming {
        advance_deg,
        dwell_ms,
        dwell_angle,
    })
}

// ── Schedule ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IgnitionEvent {
    pub cylinder_index: usize,
    pub coil_index: usize,
    pub spark_angle: f64,
    pub charge_start: TriggerPosition,
    pub dwell_ms: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct IgnitionSignalPair {
    pub charge: EventHandle,
    pub spark: EventHandle,
    coil: usize,
}

#[derive(Debug)]
pub struct IgnitionSchedule {
    events: [Option<IgnitionEvent>; MAX_CYLINDERS],
    signals: HVec<IgnitionSignalPair, MAX_CYLINDERS>,
    event_count: usize,
    is_ready: bool,
    built_timing: Option<SparkTiming>,
}

impl IgnitionSchedule {
    pub fn new<C>(executor: &mut SingleTimerExecutor<C>) -> Result<Self, ScheduleError> {
        let mut signals = HVec::new();
        for _ in 0..MAX_CYLINDERS {
            let pair = IgnitionSignalPair {
                charge: executor.allocate()?,
                spark: executor.allocate()?,
                coil: 0,
            };
            let _ = signals.push(pair);
        }
        Ok(Self {
            events: [None; MAX_CYLINDERS],
            signals,
            event_count: 0,
            is_ready: false,
            built_timing: None,
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

    pub fn event(&self, index: usize) -> Option<&IgnitionEvent> {
        self.events.get(index).and_then(Option::as_ref)
    }

    pub fn built_timing(&self) -> Option<SparkTiming> {
        self.built_timing
    }

    pub fn add_ignition_events(
        &mut self,
        config: &EngineConfiguration,
        shape: &TriggerShape,
        rotation: &RotationState,
        model: &dyn SparkModel,
        load: f64,
    ) -> Result<(), IgnitionScheduleError> {
        self.is_ready = false;

        let timing = spark_timing(config, rotation, model, load)?;
        let cycle = config.cycle_degrees();
        let cylinders = config.cylinders_count;
        let order = &config.firing_order;

        for i in 0..cylinders {
            let coil_index = match config.ignition_mode {
                IgnitionMode::OneCoil => 0,
                IgnitionMode::IndividualCoils => order[i] as usize - 1,
                IgnitionMode::WastedSpark => order[i % (cylinders / 2)] as usize - 1,
            };
            let spark_angle = wrap_angle(
                i as f64 * cycle / cylinders as f64 - timing.advance_deg
                    + config.global_trigger_angle_offset,
                cycle,
            );
            let charge_angle = wrap_angle(spark_angle - timing.dwell_angle, cycle);
            self.events[i] = Some(IgnitionEvent {
                cylinder_index: order[i] as usize - 1,
                coil_index,
                spark_angle,
                charge_start: shape.find_trigger_position(charge_angle),
                dwell_ms: timing.dwell_ms,
            });
        }
        for slot in self.events.iter_mut().skip(cylinders) {
            *slot = None;
        }

        self.event_count = cylinders;
        self.built_timing = Some(timing);
        self.is_ready = true;
        debug!(
            cylinders,
            advance = timing.advance_deg,
            dwell_angle = timing.dwell_angle,
            "ignition schedule rebuilt"
        );
        Ok(())
    }
}

// ── Per-edge dispatch ─────────────────────────────────────────────────────────

pub fn handle_spark(engine: &mut EngineContext, tooth: usize, edge_timestamp: Ticks, limited_spark: bool) {
    if !engine.config.ignition_enabled || limited_spark {
        return;
    }

    if !engine.ignition.is_ready() {
        let rebuilt = engine.ignition.add_ignition_events(
            &engine.config,
            &engine.shape,
            &engine.rotation,
            engine.spark_model.as_ref(),
            engine.sensors.load,
        );
        if let Err(e) = rebuilt {
            let code = match e {
                IgnitionScheduleError::DwellTooLong { .. } => WarningCode::DwellTooLong,
                _ => WarningCode::IgnitionScheduleNotReady,
            };
            engine.diagnostics.warn(
                code,
                edge_timestamp,
                format_args!("ignition schedule not ready: {e}"),
            );
            return;
        }
    }

    for index in 0..engine.ignition.event_count() {
        let Some(event) = engine.ignition.events[index] else {
            continue;
        };
        if event.charge_start.tooth_index != tooth {
            continue;
        }

        let pair = engine.ignition.signals[index];
        if engine.executor.is_pending(pair.charge) || engine.executor.is_pending(pair.spark) {
            continue;
        }
        engine.ignition.signals[index].coil = event.coil_index;

        let charge = schedule_by_angle(
            &mut engine.executor,
            &engine.rotation,
            pair.charge,
            edge_timestamp,
            event.charge_start.angle_offset,
            Action::new(charge_coil, index),
        );
        let charge_due = match charge {
            Ok(Some(due)) => due,
            Ok(None) => continue,
            Err(e) => {
                engine.report_schedule_error(e, edge_timestamp);
                continue;
            }
        };

        let dwell_ticks = ms_to_ticks(event.dwell_ms).round() as Ticks;
        if let Err(e) = engine.executor.schedule_by_timestamp(
            pair.spark,
            charge_due + dwell_ticks,
            Action::new(fire_spark, index),
        ) {
            let _ = engine.executor.cancel(pair.charge);
            engine.report_schedule_error(e, edge_timestamp);
            continue;
        }
        trace!(
            cylinder = event.cylinder_index + 1,
            coil = event.coil_index,
            charge_us = charge_due,
            spark_us = charge_due + dwell_ticks,
            "spark scheduled"
        );
    }
}

// ── Actions ───────────────────────────────────────────────────────────────────

fn charge_coil(engine: &mut EngineContext, index: ActionArg) {
    let coil = engine.ignition.signals[index].coil;
    let now = engine.clock;
    engine.pins.set_coil(coil, true, now);
}

fn fire_spark(engine: &mut EngineContext, index: ActionArg) {
    let coil = engine.ignition.signals[index].coil;
    let now = engine.clock;
    let charging = engine.pins.coil(coil).is_some_and(|pin| pin.is_high());
    if !charging {
        engine.diagnostics.warn(
            WarningCode::SparkWithoutDwell,
            now,
            format_args!("spark on coil {} without dwell", coil + 1),
        );
        return;
    }
    engine.pins.set_coil(coil, false, now);
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn build(config: &EngineConfiguration, rpm: f64) -> Result<IgnitionSchedule, IgnitionScheduleError> {
        let mut executor: SingleTimerExecutor<()> = SingleTimerExecutor::new();
        let mut schedule = IgnitionSchedule::new(&mut executor).unwrap();
        let shape = TriggerShape::from_config(&config.trigger, config.operation_mode).unwrap();
        let mut rot = RotationState::new();
        if rpm > 0.0 {
            rot.set_one_degree_time_for_test(crate::time::one_degree_ticks(rpm));
        }
        schedule
            .add_ignition_events(config, &shape, &rot, &ConfiguredSparkModel, 100.0)
            .map(|()| schedule)
    }

    #[test]
    fn spark_and_charge_angles() {
        let cfg = EngineConfiguration::default();
        let schedule = build(&cfg, 1000.0).unwrap();
        assert_eq!(schedule.event_count(), 4);

        // 10° advance, 3 ms dwell = 18° at 1000 RPM
        let first = schedule.event(0).unwrap();
        assert!((first.spark_angle - 710.0).abs() < 1e-6);
        let charge = 692.0;
        let shape = TriggerShape::from_config(&cfg.trigger, cfg.operation_mode).unwrap();
        let pos = first.charge_start;
        assert!((shape.event_angle(pos.tooth_index) + pos.angle_offset - charge).abs() < 1e-6);

        let second = schedule.event(1).unwrap();
        assert!((second.spark_angle - 170.0).abs() < 1e-6);
        assert_eq!(second.cylinder_index, 2);
        assert_eq!(second.coil_index, 2);
    }

    #[test]
    fn coil_selection_by_mode() {
        let cfg = EngineConfiguration {
            ignition_mode: IgnitionMode::WastedSpark,
            ..Default::default()
        };
        let schedule = build(&cfg, 1000.0).unwrap();
        let coils: Vec<_> = (0..4).map(|i| schedule.event(i).unwrap().coil_index).collect();
        assert_eq!(coils, vec![0, 2, 0, 2]);

        let cfg = EngineConfiguration {
            ignition_mode: IgnitionMode::OneCoil,
            ..Default::default()
        };
        let schedule = build(&cfg, 1000.0).unwrap();
        assert!((0..4).all(|i| schedule.event(i).unwrap().coil_index == 0));
    }

    #[test]
    fn not_spinning_fails_rebuild() {
        let cfg = EngineConfiguration::default();
        assert_eq!(build(&cfg, 0.0).unwrap_err(), IgnitionScheduleError::NotSpinning);
    }

    #[test]
    fn dwell_longer_than_cycle_rejected() {
        let mut cfg = EngineConfiguration::default();
        cfg.spark.dwell_ms = 25.0;
        // 25 ms at 6000 RPM = 900°
        assert!(matches!(
            build(&cfg, 6000.0),
            Err(IgnitionScheduleError::DwellTooLong { .. })
        ));
    }
}
