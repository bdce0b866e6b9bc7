/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Ignis – trigger-synchronized event scheduling core.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── time          – tick type and unit conversions
//! ├── diagnostics   – rate-limited warnings, latched fatal errors
//! ├── config/       – YAML engine configuration + validation
//! ├── scheduler/    – Action, EventQueue, executor backend, scheduleByAngle
//! ├── rotation      – RPM / rotation state machine
//! ├── outputs       – logical output pins with overlap counting
//! ├── pwm           – self-rescheduling periodic pulse generator
//! ├── fuel/         – injection event schedule + per-edge fuel dispatch
//! ├── ignition/     – coil charge / spark schedule + per-edge spark dispatch
//! ├── trigger/      – trigger wheel shape and the main trigger dispatcher
//! ├── engine        – EngineContext owning every component
//! └── stimulus      – synthetic trigger edge stream (simulator, tests)
//! ```
//!
//! Everything that runs on the edge or timer path uses storage allocated in
//! [`engine::EngineContext::new`]; nothing allocates afterwards.

pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod fuel;
pub mod ignition;
pub mod outputs;
pub mod pwm;
pub mod rotation;
pub mod scheduler;
pub mod stimulus;
pub mod time;
pub mod trigger;
