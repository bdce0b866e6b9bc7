/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Fuel quantity and phase providers.
//!
//! The scheduling core does not own calibration: it asks a [`FuelModel`] for
//! the injection phase and pulse width at the current operating point.  A
//! board with real 3-D tables plugs its own implementation into
//! [`EngineContext`](crate::engine::EngineContext).

use crate::config::EngineConfiguration;

pub trait FuelModel {
    /// End-of-injection angle in crank degrees.  NaN when the phase table is
    /// not populated.
    fn injection_phase(&self, config: &EngineConfiguration, rpm: f64, load: f64) -> f64;

    /// Pulse width in milliseconds before wall-wetting compensation.
    fn injection_duration_ms(
        &self,
        config: &EngineConfiguration,
        rpm: f64,
        load: f64,
        cranking: bool,
    ) -> f64;

    /// Per-cylinder transient compensation.  Pass-through by default.
    fn wall_wetting_adjust(&self, _cylinder: usize, duration_ms: f64) -> f64 {
        duration_ms
    }
}

/// Flat model straight from [`FuelConfig`](crate::config::FuelConfig):
/// constant phase, base pulse width scaled by load percent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredFuelModel;

impl FuelModel for ConfiguredFuelModel {
    fn injection_phase(&self, config: &EngineConfiguration, _rpm: f64, _load: f64) -> f64 {
        config.fuel.injection_phase_deg.unwrap_or(f64::NAN)
    }

    fn injection_duration_ms(
        &self,
        config: &EngineConfiguration,
        _rpm: f64,
        load: f64,
        cranking: bool,
    ) -> f64 {
        if cranking {
            config.fuel.cranking_duration_ms
        } else {
            config.fuel.base_duration_ms * load / 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncalibrated_phase_is_nan() {
        let mut cfg = EngineConfiguration::default();
        cfg.fuel.injection_phase_deg = None;
        assert!(ConfiguredFuelModel.injection_phase(&cfg, 1000.0, 100.0).is_nan());
    }

    #[test]
    fn cranking_uses_cranking_pulse() {
        let cfg = EngineConfiguration::default();
        let model = ConfiguredFuelModel;
        assert_eq!(model.injection_duration_ms(&cfg, 300.0, 50.0, true), 6.0);
        assert_eq!(model.injection_duration_ms(&cfg, 3000.0, 50.0, false), 1.5);
        assert_eq!(model.wall_wetting_adjust(2, 1.5), 1.5);
    }
}
