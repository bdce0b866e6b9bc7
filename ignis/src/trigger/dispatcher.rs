/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-edge entry point: rotation update, guards, schedule maintenance and
//! fuel/spark dispatch.
//!
//! Order of work for one edge:
//!
//! 1. early return on a latched fatal error or an out-of-range tooth;
//! 2. rotation state update;
//! 3. early return while waiting for VVT sync, at 0 RPM, or on noise;
//! 4. fuel / spark limiting (rev limiter, boost cut);
//! 5. tooth 0 only: cam signal validation, schedule invalidation on a
//!    configuration change or timing drift, closed-loop fuel correction;
//! 6. knock sampling on its tooth;
//! 7. fuel dispatch, then spark dispatch.

use tracing::{debug, info};

use crate::diagnostics::WarningCode;
use crate::engine::EngineContext;
use crate::fuel::handle_fuel;
use crate::ignition::{handle_spark, spark_timing};
use crate::rotation::NOISY_RPM;
use crate::time::Ticks;

/// Minimum cam/VVT edges expected over 256 crank revolutions.
pub const MIN_CAM_EVENTS_PER_256_REVOLUTIONS: u32 = 60;

/// Timing change that forces a schedule rebuild.
pub const TIMING_DRIFT_LIMIT_DEG: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEventType {
    Rising,
    Falling,
}

// ── Peripherals ───────────────────────────────────────────────────────────────

/// Subsystems the dispatcher pokes at fixed points of the cycle.
pub trait Peripherals {
    /// Open the knock sampling window.
    fn sample_knock(&mut self, at: Ticks);

    /// Multiplier applied to every pulse width; 1.0 is neutral.
    fn fuel_closed_loop_correction(&mut self, _rpm: f64, _load: f64) -> f64 {
        1.0
    }
}

/// No knock front end, no lambda feedback.
#[derive(Debug, Default)]
pub struct NoopPeripherals;

impl Peripherals for NoopPeripherals {
    fn sample_knock(&mut self, _at: Ticks) {}
}

// ── TriggerDispatcher ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct TriggerDispatcher {
    last_config_version: u32,
    cam_events: u32,
    vvt_synced: bool,
    last_event_type: Option<TriggerEventType>,
    edges: u64,
    limited_fuel: bool,
    limited_spark: bool,
}

impl TriggerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_cam_event(&mut self) {
        self.cam_events = self.cam_events.saturating_add(1);
    }

    pub fn cam_events(&self) -> u32 {
        self.cam_events
    }

    pub fn set_vvt_synced(&mut self, synced: bool) {
        if synced != self.vvt_synced {
            info!(synced, "VVT sync changed");
        }
        self.vvt_synced = synced;
    }

    pub fn is_vvt_synced(&self) -> bool {
        self.vvt_synced
    }

    pub fn edges(&self) -> u64 {
        self.edges
    }

    pub fn last_event_type(&self) -> Option<TriggerEventType> {
        self.last_event_type
    }

    pub fn is_fuel_limited(&self) -> bool {
        self.limited_fuel
    }

    pub fn is_spark_limited(&self) -> bool {
        self.limited_spark
    }
}

// ── main_trigger_callback ─────────────────────────────────────────────────────

pub fn main_trigger_callback(
    engine: &mut EngineContext,
    event_type: TriggerEventType,
    tooth: usize,
    timestamp: Ticks,
) {
    engine.dispatcher.edges += 1;
    engine.dispatcher.last_event_type = Some(event_type);

    if engine.diagnostics.has_fatal() {
        return;
    }

    let events_per_cycle = engine.shape.event_count();
    if tooth >= events_per_cycle {
        engine.diagnostics.warn(
            WarningCode::UnexpectedToothIndex,
            timestamp,
            format_args!("tooth {tooth} beyond {events_per_cycle} events per cycle"),
        );
        return;
    }

    engine
        .rotation
        .on_edge(tooth, timestamp, &engine.shape, engine.config.cranking_rpm);

    if engine.config.vvt_mode.requires_sync() && !engine.dispatcher.vvt_synced {
        return;
    }

    let rpm = engine.rotation.rpm();
    if rpm == 0 {
        return;
    }
    if rpm == NOISY_RPM {
        engine.diagnostics.warn(
            WarningCode::NoisyTrigger,
            timestamp,
            format_args!("noisy trigger at tooth {tooth}"),
        );
        return;
    }

    let over_rev = rpm as f64 > engine.config.rpm_hard_limit;
    let boost_limit = engine.config.boost_cut_pressure_kpa;
    let over_boost = boost_limit > 0.0 && engine.sensors.map_kpa > boost_limit;
    let limited = over_rev || over_boost;
    if limited != engine.dispatcher.limited_fuel {
        info!(rpm, map_kpa = engine.sensors.map_kpa, limited, "fuel/spark cut");
    }
    engine.dispatcher.limited_fuel = limited;
    engine.dispatcher.limited_spark = limited;

    if tooth == 0 {
        on_cycle_start(engine, timestamp);
    }

    if engine.config.knock_sampling_tooth == Some(tooth) {
        engine.peripherals.sample_knock(timestamp);
    }

    let (limited_fuel, limited_spark) = (engine.dispatcher.limited_fuel, engine.dispatcher.limited_spark);
    handle_fuel(engine, tooth, timestamp, limited_fuel);
    handle_spark(engine, tooth, timestamp, limited_spark);
}

/// Once-per-cycle maintenance at tooth 0.
fn on_cycle_start(engine: &mut EngineContext, timestamp: Ticks) {
    if engine.config.vvt_mode.uses_cam() {
        validate_cam_signal(engine, timestamp);
    }

    // correction first so a changed pulse width shows up as drift this cycle
    if engine.config.closed_loop_fuel {
        let rpm = engine.rotation.rpm_value();
        let load = engine.sensors.load;
        engine.fuel_correction = engine.peripherals.fuel_closed_loop_correction(rpm, load);
    }

    if engine.dispatcher.last_config_version != engine.config_version {
        debug!(
            from = engine.dispatcher.last_config_version,
            to = engine.config_version,
            "configuration changed, rebuilding schedules"
        );
        engine.dispatcher.last_config_version = engine.config_version;
        engine.fuel.invalidate();
        engine.ignition.invalidate();
    } else {
        check_timing_drift(engine);
    }

}

fn validate_cam_signal(engine: &mut EngineContext, timestamp: Ticks) {
    let window = engine.rotation.revolution_counter_since_start() & 0xFF;
    if window == 0 {
        engine.dispatcher.cam_events = 0;
    } else if window == 0xFE && engine.dispatcher.cam_events < MIN_CAM_EVENTS_PER_256_REVOLUTIONS {
        let seen = engine.dispatcher.cam_events;
        engine.diagnostics.warn(
            WarningCode::NoCamSignal,
            timestamp,
            format_args!("only {seen} cam events in the last 254 revolutions"),
        );
    }
}

fn check_timing_drift(engine: &mut EngineContext) {
    if engine.fuel.is_ready() {
        let drift = engine.fuel.base_angle_drift(
            &engine.config,
            &engine.rotation,
            engine.fuel_model.as_ref(),
            engine.fuel_operating_point(),
        );
        let drifted = match drift {
            Ok(degrees) => degrees > TIMING_DRIFT_LIMIT_DEG,
            Err(_) => true,
        };
        if drifted {
            engine.fuel.invalidate();
        }
    }

    if engine.ignition.is_ready() {
        let current = spark_timing(
            &engine.config,
            &engine.rotation,
            engine.spark_model.as_ref(),
            engine.sensors.load,
        );
        let drifted = match (current, engine.ignition.built_timing()) {
            (Ok(now), Some(built)) => {
                (now.advance_deg - built.advance_deg).abs() > TIMING_DRIFT_LIMIT_DEG
                    || (now.dwell_angle - built.dwell_angle).abs() > TIMING_DRIFT_LIMIT_DEG
            }
            _ => true,
        };
        if drifted {
            engine.ignition.invalidate();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfiguration, VvtMode};
    use crate::diagnostics::FatalError;
    use crate::stimulus::EdgeStream;

    fn engine_with(config: EngineConfiguration) -> EngineContext {
        EngineContext::new(config).unwrap()
    }

    fn run(engine: &mut EngineContext, rpm: f64, cycles: usize) -> Ticks {
        let shape = engine.shape().clone();
        let mut last = 0;
        for edge in EdgeStream::constant(&shape, rpm, cycles, 10_000).unwrap() {
            engine.on_trigger_event(TriggerEventType::Rising, edge.tooth, edge.timestamp);
            last = edge.timestamp;
        }
        last
    }

    #[test]
    fn out_of_range_tooth_is_reported_and_ignored() {
        let mut engine = engine_with(EngineConfiguration::default());
        engine.on_trigger_event(TriggerEventType::Rising, 500, 1_000);
        assert_eq!(engine.diagnostics().count(WarningCode::UnexpectedToothIndex), 1);
        assert!(engine.rotation().is_stopped());
    }

    #[test]
    fn latched_fatal_blocks_everything() {
        let mut engine = engine_with(EngineConfiguration::default());
        engine.diagnostics_mut().latch_fatal(FatalError::QueueCorrupted { limit: 1000 });
        run(&mut engine, 1000.0, 2);
        assert!(engine.rotation().is_stopped());
        assert!(engine.executor().queue().is_empty());
    }

    #[test]
    fn require_sync_waits_for_vvt() {
        let config = EngineConfiguration {
            vvt_mode: VvtMode::RequireSync,
            ..Default::default()
        };
        let mut engine = engine_with(config);
        run(&mut engine, 1000.0, 2);
        assert!(engine.rotation().is_running(), "rotation still tracks speed");
        assert!(!engine.fuel_schedule().is_ready());
        assert_eq!(engine.dispatcher().edges(), 2 * 116);

        engine.on_vvt_sync(true);
        let shape = engine.shape().clone();
        let start = engine.clock() + 3_000;
        for edge in EdgeStream::constant(&shape, 1000.0, 1, start).unwrap() {
            engine.on_trigger_event(TriggerEventType::Rising, edge.tooth, edge.timestamp);
        }
        assert!(engine.fuel_schedule().is_ready());
    }

    #[test]
    fn rev_limiter_cuts_fuel_and_spark() {
        let config = EngineConfiguration {
            rpm_hard_limit: 900.0,
            ..Default::default()
        };
        let mut engine = engine_with(config);
        run(&mut engine, 1000.0, 2);
        assert!(engine.dispatcher().is_fuel_limited());
        assert!(engine.dispatcher().is_spark_limited());
        assert!(engine.pins().injector(0).unwrap().transitions() == 0);
        assert!(engine.pins().coil(0).unwrap().transitions() == 0);
    }

    #[test]
    fn boost_cut_uses_map_sensor() {
        let config = EngineConfiguration {
            boost_cut_pressure_kpa: 200.0,
            ..Default::default()
        };
        let mut engine = engine_with(config);
        engine.sensors.map_kpa = 250.0;
        run(&mut engine, 1000.0, 1);
        assert!(engine.dispatcher().is_fuel_limited());

        engine.sensors.map_kpa = 150.0;
        let shape = engine.shape().clone();
        let start = engine.clock() + 3_000;
        for edge in EdgeStream::constant(&shape, 1000.0, 1, start).unwrap() {
            engine.on_trigger_event(TriggerEventType::Rising, edge.tooth, edge.timestamp);
        }
        assert!(!engine.dispatcher().is_fuel_limited());
    }

    #[test]
    fn missing_cam_signal_is_reported() {
        let config = EngineConfiguration {
            vvt_mode: VvtMode::Monitor,
            ..Default::default()
        };
        let mut engine = engine_with(config);
        // 127 cycles → 254 revolutions; tooth 0 of the next cycle checks
        run(&mut engine, 3000.0, 128);
        assert_eq!(engine.diagnostics().count(WarningCode::NoCamSignal), 1);
    }

    #[test]
    fn cam_signal_present_passes_validation() {
        let config = EngineConfiguration {
            vvt_mode: VvtMode::Monitor,
            ..Default::default()
        };
        let mut engine = engine_with(config);
        let shape = engine.shape().clone();
        for edge in EdgeStream::constant(&shape, 3000.0, 128, 10_000).unwrap() {
            if edge.tooth == 0 {
                engine.on_cam_event(edge.timestamp);
            }
            engine.on_trigger_event(TriggerEventType::Rising, edge.tooth, edge.timestamp);
        }
        assert_eq!(engine.diagnostics().count(WarningCode::NoCamSignal), 0);
    }

    struct CountingPeripherals {
        knock: std::rc::Rc<std::cell::Cell<u32>>,
    }

    impl Peripherals for CountingPeripherals {
        fn sample_knock(&mut self, _at: Ticks) {
            self.knock.set(self.knock.get() + 1);
        }

        fn fuel_closed_loop_correction(&mut self, _rpm: f64, _load: f64) -> f64 {
            0.5
        }
    }

    #[test]
    fn knock_and_closed_loop_hooks() {
        let config = EngineConfiguration {
            knock_sampling_tooth: Some(30),
            closed_loop_fuel: true,
            ..Default::default()
        };
        let mut engine = engine_with(config);
        let knock = std::rc::Rc::new(std::cell::Cell::new(0));
        engine.set_peripherals(Box::new(CountingPeripherals { knock: knock.clone() }));

        run(&mut engine, 1000.0, 3);
        assert_eq!(knock.get(), 3);
        assert_eq!(engine.fuel_correction(), 0.5);
    }
}
