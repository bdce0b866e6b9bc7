/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! [`EngineContext`]: the single owner of every scheduling component.
//!
//! Trigger edges and timer expiries both enter through `&mut EngineContext`,
//! so the borrow checker provides the mutual exclusion an interrupt-driven
//! build gets from masking interrupts.  Queue actions receive the whole
//! context and can reach any component, including the executor they were
//! just unlinked from.
//!
//! ```text
//! decoder ──► on_trigger_event ──► advance_to(edge) ──► timer pass(es)
//!                    │
//!                    └──► main_trigger_callback ──► rotation / fuel / spark
//! ```
//!
//! All storage is sized here, in [`EngineContext::new`].

use thiserror::Error;
use tracing::{error, info, trace};

use crate::config::{ConfigError, EngineConfiguration};
use crate::diagnostics::{Diagnostics, WarningCode};
use crate::fuel::{ConfiguredFuelModel, FuelModel, FuelOperatingPoint, FuelSchedule};
use crate::ignition::{ConfiguredSparkModel, IgnitionSchedule, SparkModel};
use crate::outputs::EnginePins;
use crate::pwm::PwmBank;
use crate::rotation::RotationState;
use crate::scheduler::{ScheduleError, SingleTimerExecutor};
use crate::time::Ticks;
use crate::trigger::dispatcher::{
    main_trigger_callback, NoopPeripherals, Peripherals, TriggerDispatcher, TriggerEventType,
};
use crate::trigger::shape::TriggerShape;

pub type EngineExecutor = SingleTimerExecutor<EngineContext>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("event storage: {0}")]
    Schedule(#[from] ScheduleError),
}

/// Operating-point inputs read by the fuel and spark models.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sensors {
    /// Engine load in percent.
    pub load: f64,
    /// Manifold absolute pressure.
    pub map_kpa: f64,
}

impl Default for Sensors {
    fn default() -> Self {
        Self {
            load: 100.0,
            map_kpa: 100.0,
        }
    }
}

pub struct EngineContext {
    pub(crate) config: EngineConfiguration,
    pub(crate) config_version: u32,
    pub(crate) shape: TriggerShape,
    pub(crate) rotation: RotationState,
    pub(crate) executor: EngineExecutor,
    pub(crate) pins: EnginePins,
    pub(crate) fuel: FuelSchedule,
    pub(crate) ignition: IgnitionSchedule,
    pub(crate) pwm: PwmBank,
    pub(crate) dispatcher: TriggerDispatcher,
    pub(crate) fuel_model: Box<dyn FuelModel>,
    pub(crate) spark_model: Box<dyn SparkModel>,
    pub(crate) peripherals: Box<dyn Peripherals>,
    pub sensors: Sensors,
    pub(crate) fuel_correction: f64,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) clock: Ticks,
}

fn executor_of(engine: &mut EngineContext) -> &mut EngineExecutor {
    &mut engine.executor
}

impl EngineContext {
    /// Validate `config` and allocate every queue slot, pin and schedule.
    pub fn new(config: EngineConfiguration) -> Result<Self, EngineError> {
        config.validate()?;
        let shape = TriggerShape::from_config(&config.trigger, config.operation_mode)?;

        let mut executor = SingleTimerExecutor::new();
        let fuel = FuelSchedule::new(&mut executor)?;
        let ignition = IgnitionSchedule::new(&mut executor)?;
        let pwm = PwmBank::new(&mut executor)?;

        info!(
            cylinders = config.cylinders_count,
            events_per_cycle = shape.event_count(),
            queue_slots = executor.queue().allocated(),
            "engine context ready"
        );

        Ok(Self {
            config,
            config_version: 0,
            shape,
            rotation: RotationState::new(),
            executor,
            pins: EnginePins::new(),
            fuel,
            ignition,
            pwm,
            dispatcher: TriggerDispatcher::new(),
            fuel_model: Box::new(ConfiguredFuelModel),
            spark_model: Box::new(ConfiguredSparkModel),
            peripherals: Box::new(NoopPeripherals),
            sensors: Sensors::default(),
            fuel_correction: 1.0,
            diagnostics: Diagnostics::new(),
            clock: 0,
        })
    }

    pub fn set_fuel_model(&mut self, model: Box<dyn FuelModel>) {
        self.fuel_model = model;
        self.fuel.invalidate();
    }

    pub fn set_spark_model(&mut self, model: Box<dyn SparkModel>) {
        self.spark_model = model;
        self.ignition.invalidate();
    }

    pub fn set_peripherals(&mut self, peripherals: Box<dyn Peripherals>) {
        self.peripherals = peripherals;
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    /// Apply `edit` to a copy of the configuration and swap it in if it
    /// validates.  Both schedules rebuild on the next edge.
    pub fn reconfigure(
        &mut self,
        edit: impl FnOnce(&mut EngineConfiguration),
    ) -> Result<(), EngineError> {
        let mut next = self.config.clone();
        edit(&mut next);
        next.validate()?;
        let shape = TriggerShape::from_config(&next.trigger, next.operation_mode)?;

        let wheel_changed = next.trigger != self.config.trigger
            || next.operation_mode != self.config.operation_mode;
        self.config = next;
        self.shape = shape;
        self.config_version = self.config_version.wrapping_add(1);
        if wheel_changed {
            // tooth numbering changed under the decoder
            self.on_sync_loss();
        } else {
            self.fuel.invalidate();
            self.ignition.invalidate();
        }
        info!(version = self.config_version, "configuration updated");
        Ok(())
    }

    // ── Inputs ────────────────────────────────────────────────────────────────

    /// Decoded crank edge.  Events due up to `timestamp` run first.
    pub fn on_trigger_event(&mut self, event_type: TriggerEventType, tooth: usize, timestamp: Ticks) {
        self.advance_to(timestamp);
        main_trigger_callback(self, event_type, tooth, timestamp);
    }

    pub fn on_cam_event(&mut self, timestamp: Ticks) {
        trace!(at_us = timestamp, "cam edge");
        self.dispatcher.on_cam_event();
    }

    pub fn on_vvt_sync(&mut self, synced: bool) {
        self.dispatcher.set_vvt_synced(synced);
    }

    /// Decoder lost sync: stop, drop the speed estimate, rebuild later.
    pub fn on_sync_loss(&mut self) {
        self.rotation.on_sync_loss();
        self.fuel.invalidate();
        self.ignition.invalidate();
    }

    /// Run every timer expiry up to `target`, then check the no-edge timeout.
    pub fn advance_to(&mut self, target: Ticks) {
        while let Some(deadline) = self.executor.timer_deadline() {
            if deadline > target {
                break;
            }
            self.clock = self.clock.max(deadline);
            let now = self.clock;
            if let Err(e) = SingleTimerExecutor::on_timer_callback(self, now, executor_of) {
                self.report_schedule_error(e, now);
            }
        }
        self.clock = self.clock.max(target);

        if self.rotation.check_timeout(self.clock) {
            self.fuel.invalidate();
            self.ignition.invalidate();
        }
    }

    /// Drop every pending event, drive all outputs low and force both
    /// schedules to rebuild.
    pub fn reset(&mut self) {
        info!(at_us = self.clock, "engine reset");
        self.enter_safe_state();
        self.fuel.invalidate();
        self.ignition.invalidate();
        self.fuel_correction = 1.0;
    }

    fn enter_safe_state(&mut self) {
        self.executor.clear();
        self.pwm.halt_all();
        let now = self.clock;
        self.pins.all_low(now);
    }

    /// Route a scheduling failure: corruption latches a fatal error and
    /// parks the outputs, the rest are warnings.
    pub(crate) fn report_schedule_error(&mut self, err: ScheduleError, at: Ticks) {
        if let Some(fatal) = err.as_fatal() {
            self.diagnostics.latch_fatal(fatal);
            self.enter_safe_state();
            return;
        }
        match err {
            ScheduleError::AlreadyPending { .. } => {
                self.diagnostics.warn(
                    WarningCode::DoubleSchedule,
                    at,
                    format_args!("{err}"),
                );
            }
            _ => error!(error = %err, at_us = at, "scheduling failed"),
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfiguration {
        &self.config
    }

    pub fn config_version(&self) -> u32 {
        self.config_version
    }

    pub fn shape(&self) -> &TriggerShape {
        &self.shape
    }

    pub fn rotation(&self) -> &RotationState {
        &self.rotation
    }

    pub fn executor(&self) -> &EngineExecutor {
        &self.executor
    }

    pub fn pins(&self) -> &EnginePins {
        &self.pins
    }

    pub fn pins_mut(&mut self) -> &mut EnginePins {
        &mut self.pins
    }

    pub fn pwm(&self) -> &PwmBank {
        &self.pwm
    }

    pub fn fuel_schedule(&self) -> &FuelSchedule {
        &self.fuel
    }

    pub fn ignition_schedule(&self) -> &IgnitionSchedule {
        &self.ignition
    }

    pub fn dispatcher(&self) -> &TriggerDispatcher {
        &self.dispatcher
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    pub fn fuel_correction(&self) -> f64 {
        self.fuel_correction
    }

    pub(crate) fn fuel_operating_point(&self) -> FuelOperatingPoint {
        FuelOperatingPoint {
            load: self.sensors.load,
            correction: self.fuel_correction,
        }
    }

    /// Time of the last processed edge or timer expiry.
    pub fn clock(&self) -> Ticks {
        self.clock
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InjectionMode;
    use crate::diagnostics::FatalError;
    use crate::fuel::handle_fuel;
    use crate::outputs::{PinId, PinTransition};
    use crate::rotation::{SpinningState, NO_EDGE_TIMEOUT};
    use crate::stimulus::EdgeStream;

    const START: Ticks = 10_000;

    fn feed(engine: &mut EngineContext, rpm: f64, cycles: usize, start: Ticks) -> Ticks {
        let shape = engine.shape().clone();
        let mut last = start;
        for edge in EdgeStream::constant(&shape, rpm, cycles, start).unwrap() {
            engine.on_trigger_event(TriggerEventType::Rising, edge.tooth, edge.timestamp);
            last = edge.timestamp;
        }
        last
    }

    fn injector_log(engine: &mut EngineContext, injector: usize) -> Vec<(Ticks, bool)> {
        engine
            .pins_mut()
            .drain_transitions()
            .filter(|t: &PinTransition| t.pin == PinId::Injector(injector))
            .map(|t| (t.at, t.high))
            .collect()
    }

    // ── End-to-end ────────────────────────────────────────────────────────────

    #[test]
    fn four_cylinder_sequential_at_1000_rpm() {
        let mut engine = EngineContext::new(EngineConfiguration::default()).unwrap();
        let last = feed(&mut engine, 1000.0, 3, START);
        engine.advance_to(last + 10_000);

        // cylinder 3 → injector index 2, opens at 702° after tooth 0
        let cycle = 120_000;
        let log = injector_log(&mut engine, 2);
        assert_eq!(log.len(), 6, "one pulse per cycle: {log:?}");
        for (n, pair) in log.chunks(2).enumerate() {
            let tooth0 = START + n as Ticks * cycle;
            let (open_at, open_high) = pair[0];
            let (close_at, close_high) = pair[1];
            assert!(open_high && !close_high);
            assert!(open_at.abs_diff(tooth0 + 117_000) <= 1, "cycle {n}: opened at {open_at}");
            assert_eq!(close_at - open_at, 3_000);
        }

        let pin = engine.pins().injector(2).unwrap();
        assert_eq!(pin.overlap_count(), 0);
        assert!(!pin.is_high());
        assert_eq!(engine.diagnostics().count(WarningCode::SkippedFuel), 0);
        assert_eq!(engine.diagnostics().count(WarningCode::DoubleSchedule), 0);
    }

    #[test]
    fn every_injector_fires_once_per_cycle() {
        let mut engine = EngineContext::new(EngineConfiguration::default()).unwrap();
        let last = feed(&mut engine, 2000.0, 2, START);
        engine.advance_to(last + 10_000);

        let log: Vec<_> = engine.pins_mut().drain_transitions().collect();
        for injector in 0..4 {
            let opens = log
                .iter()
                .filter(|t| t.pin == PinId::Injector(injector) && t.high)
                .count();
            assert!((1..=2).contains(&opens), "injector {injector} opened {opens} times");
        }
    }

    #[test]
    fn overlapping_single_point_pulses_hold_injector_open() {
        let mut config = EngineConfiguration {
            injection_mode: InjectionMode::SinglePoint,
            ignition_enabled: false,
            ..Default::default()
        };
        // 40 ms every 180° at 1000 RPM (30 ms apart)
        config.fuel.base_duration_ms = 40.0;
        let mut engine = EngineContext::new(config).unwrap();
        let last = feed(&mut engine, 1000.0, 2, START);
        engine.advance_to(last + 100_000);

        let log = injector_log(&mut engine, 0);
        assert_eq!(log.len(), 2, "one continuous window: {log:?}");
        assert!(log[0].1 && !log[1].1);
        assert_eq!(engine.pins().injector(0).unwrap().overlap_count(), 0);
        assert!(engine.diagnostics().count(WarningCode::TooLongInjection) > 0);
    }

    // ── Rebuild / invalidation ────────────────────────────────────────────────

    #[test]
    fn cylinder_count_change_rebuilds_at_next_cycle() {
        let mut engine = EngineContext::new(EngineConfiguration::default()).unwrap();
        let last = feed(&mut engine, 1000.0, 1, START);
        assert_eq!(engine.fuel_schedule().event_count(), 4);

        engine
            .reconfigure(|c| {
                c.cylinders_count = 6;
                c.firing_order = vec![1, 5, 3, 6, 2, 4];
            })
            .unwrap();
        assert_eq!(engine.config_version(), 1);
        assert!(!engine.fuel_schedule().is_ready());
        assert!(!engine.ignition_schedule().is_ready());

        // a mid-cycle edge already rebuilds for six cylinders
        handle_fuel(&mut engine, 50, last + 1_000, false);
        assert!(engine.fuel_schedule().is_ready());
        assert_eq!(engine.fuel_schedule().event_count(), 6);

        feed(&mut engine, 1000.0, 1, last + 1_000);
        assert!(engine.fuel_schedule().is_ready());
        assert_eq!(engine.fuel_schedule().event_count(), 6);
        assert_eq!(engine.ignition_schedule().event_count(), 6);
    }

    #[test]
    fn wheel_change_drops_sync_and_schedules() {
        let mut engine = EngineContext::new(EngineConfiguration::default()).unwrap();
        feed(&mut engine, 1000.0, 2, START);
        assert!(engine.fuel_schedule().is_ready());

        engine
            .reconfigure(|c| {
                c.trigger.total_teeth = 36;
                c.trigger.missing_teeth = 1;
            })
            .unwrap();
        assert_eq!(engine.rotation().state(), SpinningState::Stopped);
        assert!(!engine.fuel_schedule().is_ready());
        assert!(!engine.ignition_schedule().is_ready());
    }

    struct HalfFuel;

    impl Peripherals for HalfFuel {
        fn sample_knock(&mut self, _at: Ticks) {}

        fn fuel_closed_loop_correction(&mut self, _rpm: f64, _load: f64) -> f64 {
            0.5
        }
    }

    #[test]
    fn closed_loop_correction_keeps_close_on_injection_phase() {
        let config = EngineConfiguration {
            closed_loop_fuel: true,
            ignition_enabled: false,
            ..Default::default()
        };
        let mut engine = EngineContext::new(config).unwrap();
        engine.set_peripherals(Box::new(HalfFuel));
        let last = feed(&mut engine, 1000.0, 3, START);
        engine.advance_to(last + 10_000);

        // phase -180° is tooth 0 of the next cycle for injector 2
        let cycle = 120_000;
        let log = injector_log(&mut engine, 2);
        assert_eq!(log.len(), 6, "{log:?}");
        for (n, pair) in log.chunks(2).enumerate() {
            let (open_at, close_at) = (pair[0].0, pair[1].0);
            let phase = (close_at - START) % cycle;
            assert!(phase <= 1 || phase >= cycle - 1, "cycle {n}: closed at {close_at}");
            let width = if n == 0 { 3_000 } else { 1_500 };
            assert_eq!(close_at - open_at, width, "cycle {n}");
        }
        assert_eq!(engine.fuel_correction(), 0.5);
    }

    #[test]
    fn rebuild_while_not_spinning_stays_not_ready() {
        let mut engine = EngineContext::new(EngineConfiguration::default()).unwrap();
        let last = feed(&mut engine, 1000.0, 1, START);
        engine.on_sync_loss();
        assert!(engine.rotation().one_degree_time().is_nan());

        engine
            .reconfigure(|c| {
                c.cylinders_count = 6;
                c.firing_order = vec![1, 5, 3, 6, 2, 4];
            })
            .unwrap();

        handle_fuel(&mut engine, 0, last + 1_000, false);
        assert!(!engine.fuel_schedule().is_ready());
        assert_eq!(engine.diagnostics().count(WarningCode::FuelScheduleNotReady), 1);
    }

    #[test]
    fn invalid_reconfigure_keeps_old_config() {
        let mut engine = EngineContext::new(EngineConfiguration::default()).unwrap();
        let result = engine.reconfigure(|c| c.cylinders_count = 13);
        assert!(matches!(result, Err(EngineError::Config(ConfigError::CylinderCount { .. }))));
        assert_eq!(engine.config().cylinders_count, 4);
        assert_eq!(engine.config_version(), 0);
    }

    #[test]
    fn uncalibrated_phase_never_fuels() {
        let mut config = EngineConfiguration::default();
        config.fuel.injection_phase_deg = None;
        let mut engine = EngineContext::new(config).unwrap();
        let last = feed(&mut engine, 1000.0, 2, START);
        engine.advance_to(last + 10_000);

        assert!(!engine.fuel_schedule().is_ready());
        assert!((0..4).all(|i| engine.pins().injector(i).unwrap().transitions() == 0));
        assert!(engine.diagnostics().count(WarningCode::FuelScheduleNotReady) > 0);
    }

    // ── Double scheduling ─────────────────────────────────────────────────────

    #[test]
    fn repeated_edge_does_not_double_schedule() {
        let mut engine = EngineContext::new(EngineConfiguration::default()).unwrap();
        let shape = engine.shape().clone();
        let mut edges = EdgeStream::constant(&shape, 1000.0, 1, START).unwrap();
        for edge in edges.by_ref().take(116) {
            engine.on_trigger_event(TriggerEventType::Rising, edge.tooth, edge.timestamp);
        }

        // tooth 115 arms cylinder 3; replaying its dispatch must be a no-op
        let pending = engine.executor().queue().len();
        let now = engine.clock();
        handle_fuel(&mut engine, 115, now, false);
        assert_eq!(engine.executor().queue().len(), pending);
        engine.executor().queue().assert_sorted().unwrap();
    }

    // ── Stop / reset / fatal ──────────────────────────────────────────────────

    #[test]
    fn edge_silence_stops_engine_and_invalidates() {
        let mut engine = EngineContext::new(EngineConfiguration::default()).unwrap();
        let last = feed(&mut engine, 1000.0, 1, START);
        assert!(engine.fuel_schedule().is_ready());

        engine.advance_to(last + NO_EDGE_TIMEOUT);
        assert!(engine.rotation().is_stopped());
        assert!(!engine.fuel_schedule().is_ready());
        assert!(!engine.pins().injector(2).unwrap().is_high());
    }

    #[test]
    fn reset_clears_queue_and_outputs() {
        let mut engine = EngineContext::new(EngineConfiguration::default()).unwrap();
        feed(&mut engine, 1000.0, 1, START);
        engine.pins_mut().open_injector(1, 0);
        engine.pins_mut().open_injector(1, 0);
        assert!(!engine.executor().queue().is_empty());

        engine.reset();
        assert!(engine.executor().queue().is_empty());
        assert_eq!(engine.executor().timer_deadline(), None);
        assert_eq!(engine.pins().injector(1).unwrap().overlap_count(), 0);
        assert!(!engine.pins().injector(1).unwrap().is_high());
        assert!(!engine.fuel_schedule().is_ready());
        assert!(!engine.ignition_schedule().is_ready());
    }

    #[test]
    fn queue_corruption_latches_fatal_and_parks_outputs() {
        let mut engine = EngineContext::new(EngineConfiguration::default()).unwrap();
        feed(&mut engine, 1000.0, 1, START);
        engine.pins_mut().set_coil(0, true, 0);

        engine.report_schedule_error(ScheduleError::QueueCorrupted { limit: 1000 }, 5);
        assert_eq!(
            engine.diagnostics().fatal(),
            Some(FatalError::QueueCorrupted { limit: 1000 })
        );
        assert!(engine.executor().queue().is_empty());
        assert!(!engine.pins().coil(0).unwrap().is_high());

        // dispatcher refuses to schedule from now on
        let clock = engine.clock();
        feed(&mut engine, 1000.0, 1, clock + 3_000);
        assert!(engine.executor().queue().is_empty());
    }

    #[test]
    fn invalid_config_rejected_at_construction() {
        let config = EngineConfiguration {
            firing_order: vec![1, 2],
            ..Default::default()
        };
        assert!(matches!(
            EngineContext::new(config),
            Err(EngineError::Config(ConfigError::FiringOrderLength { .. }))
        ));
    }
}
