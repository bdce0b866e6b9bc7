/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{debug, error, info, warn};

use ignis::config::EngineConfiguration;
use ignis::diagnostics::WarningCode;
use ignis::engine::EngineContext;
use ignis::outputs::{PinId, PinTransition};
use ignis::pwm;
use ignis::stimulus::EdgeStream;
use ignis::trigger::TriggerEventType;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Ignis scheduling simulator.
///
/// Drives the scheduling core with a synthetic crank signal and logs every
/// output transition.
///
/// Example:
///   ignis-sim --config demos/engine.yaml --rpm 3000 --cycles 8
#[derive(Debug, Parser)]
#[command(
    name = "ignis-sim",
    about = "Ignis trigger-synchronized scheduling simulator",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML engine configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Engine speed at the end of the run.
    #[arg(short = 'r', long = "rpm", default_value_t = 1000.0)]
    rpm: f64,

    /// Number of full engine cycles to simulate.
    #[arg(short = 'n', long = "cycles", default_value_t = 4)]
    cycles: usize,

    /// Ramp linearly from this speed to --rpm instead of running at constant speed.
    #[arg(long = "spin-up-from")]
    spin_up_from: Option<f64>,

    /// Engine load in percent.
    #[arg(short = 'l', long = "load", default_value_t = 100.0)]
    load: f64,

    /// Manifold absolute pressure in kPa.
    #[arg(long = "map-kpa", default_value_t = 100.0)]
    map_kpa: f64,

    /// Run pulse generator 0 at this frequency (50 % duty).
    #[arg(long = "pwm-hz")]
    pwm_hz: Option<f64>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!(
        config  = ?cli.config,
        rpm     = cli.rpm,
        cycles  = cli.cycles,
        from    = ?cli.spin_up_from,
        load    = cli.load,
        map_kpa = cli.map_kpa,
        "Simulation parameters"
    );

    // ── Load engine configuration ─────────────────────────────────────────────
    let config = match &cli.config {
        Some(path) => {
            info!("Loading engine configuration from: {}", path.display());
            match EngineConfiguration::load_from_file(path) {
                Ok(config) => config,
                Err(e) => {
                    error!("Failed to load engine configuration: {:#}", e);
                    process::exit(1);
                }
            }
        }
        None => {
            warn!("No configuration file provided, using default engine settings");
            EngineConfiguration::default()
        }
    };

    let mut engine = match EngineContext::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to build engine context: {}", e);
            process::exit(1);
        }
    };
    engine.sensors.load = cli.load;
    engine.sensors.map_kpa = cli.map_kpa;

    if let Some(hz) = cli.pwm_hz {
        if let Err(e) = pwm::start(&mut engine, 0, hz, 0.5) {
            error!("Failed to start pulse generator: {}", e);
            process::exit(1);
        }
    }

    // ── Drive the crank signal ────────────────────────────────────────────────
    let shape = engine.shape().clone();
    let edges = match cli.spin_up_from {
        Some(from) => EdgeStream::ramp(&shape, from, cli.rpm, cli.cycles, 0),
        None => EdgeStream::constant(&shape, cli.rpm, cli.cycles, 0),
    };
    let edges = match edges {
        Ok(edges) => edges,
        Err(e) => {
            error!("Invalid crank signal: {}", e);
            process::exit(1);
        }
    };

    let mut last_edge = 0;
    let mut transitions = 0usize;
    for edge in edges {
        engine.on_trigger_event(TriggerEventType::Rising, edge.tooth, edge.timestamp);
        last_edge = edge.timestamp;
        if edge.tooth == 0 {
            debug!(
                at_us = edge.timestamp,
                rpm = engine.rotation().rpm(),
                state = ?engine.rotation().state(),
                "cycle start"
            );
        }
        transitions += log_transitions(&mut engine);
    }

    // let pending closes run before reporting
    let shape_degrees = shape.cycle_degrees();
    let one_degree = engine.rotation().one_degree_time();
    let tail = if one_degree.is_finite() {
        (one_degree * shape_degrees) as u64
    } else {
        100_000
    };
    engine.advance_to(last_edge + tail);
    transitions += log_transitions(&mut engine);

    // ── Summary ───────────────────────────────────────────────────────────────
    info!(
        edges = engine.dispatcher().edges(),
        rpm = engine.rotation().rpm(),
        transitions,
        dropped = engine.pins().dropped_transitions(),
        timer_callbacks = engine.executor().timer_callback_count(),
        executed = engine.executor().executed_count(),
        "Simulation finished"
    );
    for code in WarningCode::ALL {
        let count = engine.diagnostics().count(code);
        if count > 0 {
            warn!("  {:?}: {}", code, count);
        }
    }
    if let Some(fatal) = engine.diagnostics().fatal() {
        error!("Fatal error latched: {}", fatal);
        process::exit(2);
    }
}

fn log_transitions(engine: &mut EngineContext) -> usize {
    let mut count = 0;
    for PinTransition { pin, at, high } in engine.pins_mut().drain_transitions() {
        let (kind, index) = match pin {
            PinId::Injector(i) => ("injector", i),
            PinId::Coil(i) => ("coil", i),
            PinId::Pwm(i) => ("pwm", i),
        };
        info!(
            "{at:>10} us  {kind:<8} {index:>2}  {}",
            if high { "HIGH" } else { "low" }
        );
        count += 1;
    }
    count
}
