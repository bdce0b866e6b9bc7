/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Engine configuration loading and validation.
//!
//! The configuration is read-only to the scheduling core.  Changing it at
//! runtime goes through [`EngineContext::reconfigure`](crate::engine::EngineContext::reconfigure),
//! which bumps a version counter the trigger dispatcher watches.
//!
//! The expected YAML structure (every key optional, defaults shown):
//! ```yaml
//! cylinders_count: 4
//! firing_order: [1, 3, 4, 2]
//! operation_mode: four_stroke       # four_stroke | two_stroke
//! injection_mode: sequential        # simultaneous | sequential | batch | single_point
//! two_wire_batch_injection: false
//! ignition_mode: individual_coils   # one_coil | individual_coils | wasted_spark
//! cranking_rpm: 550
//! rpm_hard_limit: 7000
//! boost_cut_pressure_kpa: 0         # 0 disables boost cut
//! global_trigger_angle_offset: 0
//! injection_enabled: true
//! ignition_enabled: true
//! vvt_mode: off                     # off | monitor | require_sync
//! knock_sampling_tooth: ~
//! closed_loop_fuel: false
//! fuel:
//!   injection_phase_deg: -180       # end-of-injection angle; ~ = not calibrated
//!   base_duration_ms: 3.0
//!   cranking_duration_ms: 6.0
//! spark:
//!   advance_deg: 10
//!   cranking_advance_deg: 6
//!   dwell_ms: 3.0
//!   cranking_dwell_ms: 4.0
//! trigger:
//!   total_teeth: 60
//!   missing_teeth: 2
//!   wheel_position: crankshaft      # crankshaft | camshaft
//!   both_edges: false
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::outputs::MAX_CYLINDERS;
use crate::trigger::shape::{TriggerShape, MAX_TRIGGER_EVENTS};

// ── Enumerations ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    #[default]
    FourStroke,
    TwoStroke,
}

impl OperationMode {
    /// Crank degrees per engine cycle.
    pub fn cycle_degrees(self) -> f64 {
        match self {
            OperationMode::FourStroke => 720.0,
            OperationMode::TwoStroke => 360.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionMode {
    /// All injectors fire together on every event.
    Simultaneous,
    #[default]
    Sequential,
    /// Injectors paired; each pair fires twice per cycle.
    Batch,
    /// One throttle-body injector fires on every event.
    SinglePoint,
}

impl InjectionMode {
    /// How many times each injector output opens per engine cycle.
    pub fn injections_per_cycle(self, cylinders: usize) -> usize {
        match self {
            InjectionMode::Sequential => 1,
            InjectionMode::Batch => 2,
            InjectionMode::Simultaneous | InjectionMode::SinglePoint => cylinders,
        }
    }

    pub fn is_simultaneous(self) -> bool {
        matches!(self, InjectionMode::Simultaneous | InjectionMode::SinglePoint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnitionMode {
    OneCoil,
    #[default]
    IndividualCoils,
    WastedSpark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WheelPosition {
    #[default]
    Crankshaft,
    Camshaft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VvtMode {
    #[default]
    Off,
    /// Cam edges counted and validated, scheduling does not wait for them.
    Monitor,
    /// No scheduling until the cam decoder reports VVT sync.
    RequireSync,
}

impl VvtMode {
    pub fn requires_sync(self) -> bool {
        self == VvtMode::RequireSync
    }

    pub fn uses_cam(self) -> bool {
        self != VvtMode::Off
    }
}

// ── Sub-sections ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FuelConfig {
    /// End-of-injection angle.  `None` means the phase table is not
    /// populated yet; fuel scheduling stays off until it is.
    pub injection_phase_deg: Option<f64>,
    pub base_duration_ms: f64,
    pub cranking_duration_ms: f64,
}

impl Default for FuelConfig {
    fn default() -> Self {
        Self {
            injection_phase_deg: Some(-180.0),
            base_duration_ms: 3.0,
            cranking_duration_ms: 6.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SparkConfig {
    pub advance_deg: f64,
    pub cranking_advance_deg: f64,
    pub dwell_ms: f64,
    pub cranking_dwell_ms: f64,
}

impl Default for SparkConfig {
    fn default() -> Self {
        Self {
            advance_deg: 10.0,
            cranking_advance_deg: 6.0,
            dwell_ms: 3.0,
            cranking_dwell_ms: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub total_teeth: u32,
    pub missing_teeth: u32,
    pub wheel_position: WheelPosition,
    /// Decode falling edges too.
    pub both_edges: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            total_teeth: 60,
            missing_teeth: 2,
            wheel_position: WheelPosition::Crankshaft,
            both_edges: false,
        }
    }
}

// ── EngineConfiguration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfiguration {
    pub cylinders_count: usize,
    /// 1-based cylinder numbers in firing order.
    pub firing_order: Vec<u8>,
    pub operation_mode: OperationMode,
    pub injection_mode: InjectionMode,
    pub two_wire_batch_injection: bool,
    pub ignition_mode: IgnitionMode,
    pub cranking_rpm: f64,
    pub rpm_hard_limit: f64,
    pub boost_cut_pressure_kpa: f64,
    pub global_trigger_angle_offset: f64,
    pub injection_enabled: bool,
    pub ignition_enabled: bool,
    pub vvt_mode: VvtMode,
    pub knock_sampling_tooth: Option<usize>,
    pub closed_loop_fuel: bool,
    pub fuel: FuelConfig,
    pub spark: SparkConfig,
    pub trigger: TriggerConfig,
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        Self {
            cylinders_count: 4,
            firing_order: vec![1, 3, 4, 2],
            operation_mode: OperationMode::FourStroke,
            injection_mode: InjectionMode::Sequential,
            two_wire_batch_injection: false,
            ignition_mode: IgnitionMode::IndividualCoils,
            cranking_rpm: 550.0,
            rpm_hard_limit: 7000.0,
            boost_cut_pressure_kpa: 0.0,
            global_trigger_angle_offset: 0.0,
            injection_enabled: true,
            ignition_enabled: true,
            vvt_mode: VvtMode::Off,
            knock_sampling_tooth: None,
            closed_loop_fuel: false,
            fuel: FuelConfig::default(),
            spark: SparkConfig::default(),
            trigger: TriggerConfig::default(),
        }
    }
}

/// Reasons a configuration is rejected by [`EngineConfiguration::validate`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("cylinders_count {count} out of range 1..={max}")]
    CylinderCount { count: usize, max: usize },

    #[error("firing_order has {actual} entries, expected {expected}")]
    FiringOrderLength { expected: usize, actual: usize },

    #[error("firing_order {order:?} is not a permutation of 1..={cylinders}")]
    FiringOrderNotPermutation { order: Vec<u8>, cylinders: usize },

    #[error("{mode} needs at least two cylinders")]
    PairingNeedsTwoCylinders { mode: &'static str },

    #[error("trigger wheel with {total} teeth and {missing} missing is invalid")]
    TriggerWheel { total: u32, missing: u32 },

    #[error("trigger wheel produces {count} events per cycle, limit is {max}")]
    TooManyTriggerEvents { count: usize, max: usize },

    #[error("knock_sampling_tooth {tooth} beyond {events} events per cycle")]
    KnockToothOutOfRange { tooth: usize, events: usize },

    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },
}

impl EngineConfiguration {
    /// Parse YAML text.  The result is validated.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfiguration =
            serde_yaml::from_str(yaml).context("Failed to parse engine configuration YAML")?;
        config.validate().context("Invalid engine configuration")?;
        Ok(config)
    }

    /// Read, parse and validate the configuration at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the YAML is
    /// structurally invalid, or [`validate`](Self::validate) rejects it.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading engine configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let config: EngineConfiguration = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid engine configuration: {}", path.display()))?;

        debug!(
            cylinders = config.cylinders_count,
            firing_order = ?config.firing_order,
            injection_mode = ?config.injection_mode,
            ignition_mode = ?config.ignition_mode,
            "engine configuration loaded"
        );
        Ok(config)
    }

    /// Structural checks that the scheduling core relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cylinders = self.cylinders_count;
        if cylinders == 0 || cylinders > MAX_CYLINDERS {
            return Err(ConfigError::CylinderCount {
                count: cylinders,
                max: MAX_CYLINDERS,
            });
        }

        if self.firing_order.len() != cylinders {
            return Err(ConfigError::FiringOrderLength {
                expected: cylinders,
                actual: self.firing_order.len(),
            });
        }
        let mut seen = [false; MAX_CYLINDERS];
        for &cyl in &self.firing_order {
            let idx = cyl as usize;
            if idx == 0 || idx > cylinders || seen[idx - 1] {
                return Err(ConfigError::FiringOrderNotPermutation {
                    order: self.firing_order.clone(),
                    cylinders,
                });
            }
            seen[idx - 1] = true;
        }

        if cylinders < 2 {
            if self.injection_mode == InjectionMode::Batch {
                return Err(ConfigError::PairingNeedsTwoCylinders { mode: "batch injection" });
            }
            if self.ignition_mode == IgnitionMode::WastedSpark {
                return Err(ConfigError::PairingNeedsTwoCylinders { mode: "wasted spark" });
            }
        }

        for (field, value) in [
            ("cranking_rpm", self.cranking_rpm),
            ("rpm_hard_limit", self.rpm_hard_limit),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive { field, value });
            }
        }

        let shape = TriggerShape::from_config(&self.trigger, self.operation_mode)?;
        if let Some(tooth) = self.knock_sampling_tooth {
            if tooth >= shape.event_count() {
                return Err(ConfigError::KnockToothOutOfRange {
                    tooth,
                    events: shape.event_count(),
                });
            }
        }

        debug_assert!(shape.event_count() <= MAX_TRIGGER_EVENTS);
        Ok(())
    }

    pub fn cycle_degrees(&self) -> f64 {
        self.operation_mode.cycle_degrees()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
