/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Type-erased unit of deferred work.
//!
//! An [`Action`] is a plain function pointer plus an opaque integer argument.
//! The function receives the host context (`C`, in practice
//! [`EngineContext`](crate::engine::EngineContext)) by exclusive reference at
//! execution time, so an action can touch any component – including the
//! queue it was just unlinked from.

use std::fmt;

/// Opaque argument carried by an [`Action`]: an index into the owner's
/// fixed tables (event slot, generator slot, injector count …).
pub type ActionArg = usize;

/// Callback signature.
pub type ActionFn<C> = fn(&mut C, ActionArg);

/// Callback pointer + argument.
pub struct Action<C> {
    callback: ActionFn<C>,
    arg: ActionArg,
}

impl<C> Action<C> {
    pub const fn new(callback: ActionFn<C>, arg: ActionArg) -> Self {
        Self { callback, arg }
    }

    pub fn arg(&self) -> ActionArg {
        self.arg
    }

    /// Run the callback against `host`.
    pub fn invoke(self, host: &mut C) {
        (self.callback)(host, self.arg)
    }
}

// Manual impls: deriving would demand `C: Clone` / `C: Debug`.
impl<C> Clone for Action<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Action<C> {}

impl<C> fmt::Debug for Action<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("callback", &(self.callback as *const ()))
            .field("arg", &self.arg)
            .finish()
    }
}
