/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Trigger wheel geometry and the per-edge dispatcher.

pub mod dispatcher;
pub mod shape;

pub use dispatcher::{main_trigger_callback, NoopPeripherals, Peripherals, TriggerDispatcher, TriggerEventType};
pub use shape::{TriggerPosition, TriggerShape};
