/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Errors returned by the event queue and executor backends.
//!
//! | Variant | Severity |
//! |---|---|
//! | `AlreadyPending` | warning – the insert is ignored, queue unchanged |
//! | `UnknownEvent` | caller bug – handle not allocated from this queue |
//! | `SlotsExhausted` | init-time failure – arena too small |
//! | `QueueCorrupted` | fatal – escalated to [`FatalError`](crate::diagnostics::FatalError) |
//! | `Runaway` | fatal – one timer pass executed too many events |

use thiserror::Error;

use super::queue::EventHandle;
use crate::diagnostics::FatalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The event is already linked into the queue.
    #[error("event {event:?} is already pending")]
    AlreadyPending { event: EventHandle },

    /// The handle does not refer to an allocated slot.
    #[error("event {event:?} was not allocated from this queue")]
    UnknownEvent { event: EventHandle },

    /// Every slot of the pre-allocated arena is in use.
    #[error("event arena exhausted ({capacity} slots)")]
    SlotsExhausted { capacity: usize },

    /// List traversal exceeded the sanity bound – cyclic or corrupted chain.
    #[error("event queue corrupted: traversal exceeded {limit} entries")]
    QueueCorrupted { limit: usize },

    /// A single execution pass hit the per-pass event bound.
    #[error("timer pass executed more than {limit} events")]
    Runaway { limit: usize },
}

impl ScheduleError {
    /// Fatal escalation for the corruption case, `None` for recoverable ones.
    pub fn as_fatal(&self) -> Option<FatalError> {
        match self {
            ScheduleError::QueueCorrupted { limit } => {
                Some(FatalError::QueueCorrupted { limit: *limit })
            }
            ScheduleError::Runaway { limit } => Some(FatalError::QueueRunaway { limit: *limit }),
            _ => None,
        }
    }
}
