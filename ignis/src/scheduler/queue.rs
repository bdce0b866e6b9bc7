/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Time-sorted queue of pending actions.
//!
//! # Storage model
//! The queue owns a fixed arena of `N` event slots.  Each owner (an injection
//! event, an ignition event, a pulse generator …) allocates its slots once at
//! init time and keeps the returned [`EventHandle`]s.  Scheduling links the
//! owner's slot into a singly-linked chain ordered by due timestamp; nothing
//! is allocated after init.
//!
//! ```text
//! head ─► [due 100] ─► [due 250] ─► [due 250] ─► [due 900] ─► None
//!                         first in      second in  (FIFO among equals)
//! ```
//!
//! # Reentrancy
//! [`EventQueue::execute_due`] unlinks an event and clears its pending flag
//! *before* invoking its action.  An action may therefore re-insert its own
//! handle (self-rescheduling PWM) or any other handle.

use tracing::{debug, warn};

use super::action::Action;
use super::error::ScheduleError;
use crate::time::Ticks;

/// Sanity bound on list traversal and on events executed per pass.
pub const QUEUE_LENGTH_LIMIT: usize = 1000;

/// Default arena size: fuel + ignition pairs for 12 cylinders plus PWM slack.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

// ── EventHandle ───────────────────────────────────────────────────────────────

/// Stable reference to one slot of an [`EventQueue`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(u16);

impl EventHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ── Slot ──────────────────────────────────────────────────────────────────────

struct Slot<C> {
    due: Ticks,
    action: Option<Action<C>>,
    pending: bool,
    next: Option<EventHandle>,
    allocated: bool,
}

impl<C> Slot<C> {
    fn vacant() -> Self {
        Self {
            due: 0,
            action: None,
            pending: false,
            next: None,
            allocated: false,
        }
    }
}

// ── EventQueue ────────────────────────────────────────────────────────────────

/// Sorted singly-linked chain of scheduled events over a fixed arena.
pub struct EventQueue<C, const N: usize = DEFAULT_QUEUE_CAPACITY> {
    slots: [Slot<C>; N],
    head: Option<EventHandle>,
    allocated: usize,
}

impl<C, const N: usize> EventQueue<C, N> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot::vacant()),
            head: None,
            allocated: 0,
        }
    }

    /// Reserve a slot.  Init-time only.
    pub fn allocate(&mut self) -> Result<EventHandle, ScheduleError> {
        if self.allocated >= N || self.allocated > u16::MAX as usize {
            return Err(ScheduleError::SlotsExhausted { capacity: N });
        }
        let handle = EventHandle(self.allocated as u16);
        self.slots[handle.index()].allocated = true;
        self.allocated += 1;
        Ok(handle)
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }

    fn check(&self, event: EventHandle) -> Result<usize, ScheduleError> {
        let idx = event.index();
        if idx < N && self.slots[idx].allocated {
            Ok(idx)
        } else {
            Err(ScheduleError::UnknownEvent { event })
        }
    }

    /// `true` while `event` is linked into the queue.
    pub fn is_pending(&self, event: EventHandle) -> bool {
        self.check(event)
            .map(|idx| self.slots[idx].pending)
            .unwrap_or(false)
    }

    /// Due timestamp of a pending event.
    pub fn due_of(&self, event: EventHandle) -> Option<Ticks> {
        let idx = self.check(event).ok()?;
        let slot = &self.slots[idx];
        slot.pending.then_some(slot.due)
    }

    /// Link `event` so that it runs `action` at `due`.
    ///
    /// The event goes after every pending event whose due timestamp is `<=`
    /// `due`, so equal timestamps execute in insertion order.
    ///
    /// # Errors
    /// * [`ScheduleError::AlreadyPending`] – the queue is left unchanged.
    /// * [`ScheduleError::QueueCorrupted`] – traversal exceeded
    ///   [`QUEUE_LENGTH_LIMIT`].
    pub fn insert(
        &mut self,
        event: EventHandle,
        due: Ticks,
        action: Action<C>,
    ) -> Result<(), ScheduleError> {
        let idx = self.check(event)?;
        if self.slots[idx].pending {
            warn!(event = ?event, due_us = due, "event already pending – insert ignored");
            return Err(ScheduleError::AlreadyPending { event });
        }

        let mut prev: Option<EventHandle> = None;
        let mut cursor = self.head;
        let mut steps = 0usize;
        while let Some(current) = cursor {
            let slot = &self.slots[current.index()];
            if slot.due > due {
                break;
            }
            steps += 1;
            if steps > QUEUE_LENGTH_LIMIT {
                return Err(ScheduleError::QueueCorrupted {
                    limit: QUEUE_LENGTH_LIMIT,
                });
            }
            prev = Some(current);
            cursor = slot.next;
        }

        let slot = &mut self.slots[idx];
        slot.due = due;
        slot.action = Some(action);
        slot.pending = true;
        slot.next = cursor;

        match prev {
            None => self.head = Some(event),
            Some(p) => self.slots[p.index()].next = Some(event),
        }
        Ok(())
    }

    /// Unlink the head if it is due at `now`, returning its action.
    pub fn take_due(&mut self, now: Ticks) -> Option<Action<C>> {
        let head = self.head?;
        let idx = head.index();
        if self.slots[idx].due > now {
            return None;
        }

        let next = self.slots[idx].next.take();
        self.head = next;
        let slot = &mut self.slots[idx];
        slot.pending = false;
        slot.action.take()
    }

    /// Unlink `event` without running it.
    ///
    /// Returns `Ok(false)` when the event was not pending.
    pub fn remove(&mut self, event: EventHandle) -> Result<bool, ScheduleError> {
        let idx = self.check(event)?;
        if !self.slots[idx].pending {
            return Ok(false);
        }

        let mut prev: Option<EventHandle> = None;
        let mut cursor = self.head;
        let mut steps = 0usize;
        while let Some(current) = cursor {
            if current == event {
                let next = self.slots[idx].next.take();
                match prev {
                    None => self.head = next,
                    Some(p) => self.slots[p.index()].next = next,
                }
                let slot = &mut self.slots[idx];
                slot.pending = false;
                slot.action = None;
                return Ok(true);
            }
            steps += 1;
            if steps > QUEUE_LENGTH_LIMIT {
                return Err(ScheduleError::QueueCorrupted {
                    limit: QUEUE_LENGTH_LIMIT,
                });
            }
            prev = Some(current);
            cursor = self.slots[current.index()].next;
        }

        // pending flag set but not reachable from head
        Err(ScheduleError::QueueCorrupted {
            limit: QUEUE_LENGTH_LIMIT,
        })
    }

    /// Due timestamp of the head, `None` meaning "nothing scheduled".
    pub fn peek_next_timestamp(&self) -> Option<Ticks> {
        self.head.map(|h| self.slots[h.index()].due)
    }

    /// Head of the chain.
    pub fn head(&self) -> Option<EventHandle> {
        self.head
    }

    /// Unlink everything without executing.  Allocations are kept.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.pending = false;
            slot.next = None;
            slot.action = None;
        }
        self.head = None;
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.pending).count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Walk the whole chain and check ascending order.
    pub fn assert_sorted(&self) -> Result<(), ScheduleError> {
        let mut cursor = self.head;
        let mut last: Option<Ticks> = None;
        let mut steps = 0usize;
        while let Some(current) = cursor {
            steps += 1;
            if steps > QUEUE_LENGTH_LIMIT {
                return Err(ScheduleError::QueueCorrupted {
                    limit: QUEUE_LENGTH_LIMIT,
                });
            }
            let slot = &self.slots[current.index()];
            if let Some(prev_due) = last {
                if slot.due < prev_due {
                    return Err(ScheduleError::QueueCorrupted {
                        limit: QUEUE_LENGTH_LIMIT,
                    });
                }
            }
            last = Some(slot.due);
            cursor = slot.next;
        }
        Ok(())
    }

    /// Execute every event due at `now`, in order.
    ///
    /// `queue` projects the host onto this queue; the host is handed to each
    /// action after the event has been unlinked.
    pub fn execute_due(
        host: &mut C,
        now: Ticks,
        queue: fn(&mut C) -> &mut Self,
    ) -> Result<usize, ScheduleError> {
        drain_due(host, now, |h| queue(h).take_due(now))
    }
}

impl<C, const N: usize> Default for EventQueue<C, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared execution loop: pull due actions one at a time and run them.
pub(crate) fn drain_due<C>(
    host: &mut C,
    now: Ticks,
    mut take: impl FnMut(&mut C) -> Option<Action<C>>,
) -> Result<usize, ScheduleError> {
    let mut executed = 0usize;
    while let Some(action) = take(host) {
        action.invoke(host);
        executed += 1;
        if executed >= QUEUE_LENGTH_LIMIT {
            debug!(now_us = now, executed, "timer pass hit the execution bound");
            return Err(ScheduleError::Runaway {
                limit: QUEUE_LENGTH_LIMIT,
            });
        }
    }
    Ok(executed)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::action::ActionArg;

    // ── Test host ─────────────────────────────────────────────────────────────

    struct Host {
        queue: EventQueue<Host, 16>,
        log: Vec<ActionArg>,
        handles: Vec<EventHandle>,
        reschedules_left: usize,
    }

    impl Host {
        fn with_slots(n: usize) -> Self {
            let mut queue = EventQueue::new();
            let handles = (0..n).map(|_| queue.allocate().unwrap()).collect();
            Self {
                queue,
                log: Vec::new(),
                handles,
                reschedules_left: 0,
            }
        }

        fn run(&mut self, now: Ticks) -> usize {
            EventQueue::execute_due(self, now, queue_of).unwrap()
        }
    }

    fn queue_of(host: &mut Host) -> &mut EventQueue<Host, 16> {
        &mut host.queue
    }

    fn record(host: &mut Host, arg: ActionArg) {
        host.log.push(arg);
    }

    /// Re-arms its own slot 100 ticks later until the budget runs out.
    fn reschedule_self(host: &mut Host, arg: ActionArg) {
        host.log.push(arg);
        if host.reschedules_left > 0 {
            host.reschedules_left -= 1;
            let handle = host.handles[arg];
            let due = host.queue.due_of(handle);
            assert!(due.is_none(), "slot must be unlinked before its action runs");
            let next_due = 100 * (host.log.len() as Ticks + 1);
            host.queue
                .insert(handle, next_due, Action::new(reschedule_self, arg))
                .unwrap();
        }
    }

    // ── Ordering ──────────────────────────────────────────────────────────────

    #[test]
    fn executes_due_prefix_in_timestamp_order() {
        let mut host = Host::with_slots(5);
        let dues = [500, 100, 300, 900, 200];
        for (i, due) in dues.iter().enumerate() {
            let h = host.handles[i];
            host.queue.insert(h, *due, Action::new(record, i)).unwrap();
        }
        host.queue.assert_sorted().unwrap();

        assert_eq!(host.run(350), 3);
        assert_eq!(host.log, vec![1, 4, 2]);
        assert_eq!(host.queue.peek_next_timestamp(), Some(500));

        assert_eq!(host.run(10_000), 2);
        assert_eq!(host.log, vec![1, 4, 2, 0, 3]);
        assert!(host.queue.is_empty());
        assert_eq!(host.queue.peek_next_timestamp(), None);
    }

    #[test]
    fn equal_timestamps_run_in_insertion_order() {
        let mut host = Host::with_slots(4);
        host.queue.insert(host.handles[2], 50, Action::new(record, 2)).unwrap();
        host.queue.insert(host.handles[0], 50, Action::new(record, 0)).unwrap();
        host.queue.insert(host.handles[3], 10, Action::new(record, 3)).unwrap();
        host.queue.insert(host.handles[1], 50, Action::new(record, 1)).unwrap();

        host.run(50);
        assert_eq!(host.log, vec![3, 2, 0, 1]);
    }

    #[test]
    fn nothing_runs_before_due() {
        let mut host = Host::with_slots(1);
        host.queue.insert(host.handles[0], 1_000, Action::new(record, 0)).unwrap();
        assert_eq!(host.run(999), 0);
        assert!(host.queue.is_pending(host.handles[0]));
        assert_eq!(host.run(1_000), 1);
        assert!(!host.queue.is_pending(host.handles[0]));
    }

    // ── Double scheduling ─────────────────────────────────────────────────────

    #[test]
    fn reinserting_pending_event_is_rejected_and_queue_unchanged() {
        let mut host = Host::with_slots(2);
        let h0 = host.handles[0];
        host.queue.insert(h0, 100, Action::new(record, 0)).unwrap();
        host.queue.insert(host.handles[1], 200, Action::new(record, 1)).unwrap();

        let err = host.queue.insert(h0, 300, Action::new(record, 7)).unwrap_err();
        assert_eq!(err, ScheduleError::AlreadyPending { event: h0 });
        assert_eq!(host.queue.due_of(h0), Some(100));
        assert_eq!(host.queue.len(), 2);

        host.run(1_000);
        assert_eq!(host.log, vec![0, 1], "original action must be kept");
    }

    #[test]
    fn unknown_handle_is_rejected() {
        let mut queue: EventQueue<Host, 4> = EventQueue::new();
        let bogus = EventHandle(3);
        assert!(matches!(
            queue.insert(bogus, 0, Action::new(record, 0)),
            Err(ScheduleError::UnknownEvent { .. })
        ));
        assert!(!queue.is_pending(bogus));
    }

    #[test]
    fn arena_exhaustion_is_reported() {
        let mut queue: EventQueue<Host, 2> = EventQueue::new();
        queue.allocate().unwrap();
        queue.allocate().unwrap();
        assert_eq!(
            queue.allocate(),
            Err(ScheduleError::SlotsExhausted { capacity: 2 })
        );
    }

    // ── Reentrancy ────────────────────────────────────────────────────────────

    #[test]
    fn action_may_reschedule_itself() {
        let mut host = Host::with_slots(1);
        host.reschedules_left = 3;
        let h = host.handles[0];
        host.queue.insert(h, 100, Action::new(reschedule_self, 0)).unwrap();

        // each pass only runs what is due at `now`
        assert_eq!(host.run(100), 1);
        assert_eq!(host.queue.due_of(h), Some(200));
        assert_eq!(host.run(10_000), 3);
        assert_eq!(host.log.len(), 4);
        assert!(host.queue.is_empty());
    }

    // ── Clear / remove ────────────────────────────────────────────────────────

    #[test]
    fn clear_unlinks_without_executing() {
        let mut host = Host::with_slots(3);
        for (i, h) in host.handles.clone().into_iter().enumerate() {
            host.queue.insert(h, 10 * i as Ticks, Action::new(record, i)).unwrap();
        }
        host.queue.clear();
        assert!(host.queue.is_empty());
        assert_eq!(host.queue.len(), 0);
        assert_eq!(host.run(1_000), 0);
        assert!(host.log.is_empty());

        // slots stay usable
        host.queue.insert(host.handles[1], 5, Action::new(record, 1)).unwrap();
        assert_eq!(host.run(5), 1);
    }

    #[test]
    fn remove_unlinks_middle_event() {
        let mut host = Host::with_slots(3);
        for (i, h) in host.handles.clone().into_iter().enumerate() {
            host.queue.insert(h, 10 * (i as Ticks + 1), Action::new(record, i)).unwrap();
        }
        assert_eq!(host.queue.remove(host.handles[1]), Ok(true));
        assert_eq!(host.queue.remove(host.handles[1]), Ok(false));
        host.queue.assert_sorted().unwrap();

        host.run(100);
        assert_eq!(host.log, vec![0, 2]);
    }

    #[test]
    fn remove_head_updates_next_timestamp() {
        let mut host = Host::with_slots(2);
        host.queue.insert(host.handles[0], 10, Action::new(record, 0)).unwrap();
        host.queue.insert(host.handles[1], 20, Action::new(record, 1)).unwrap();
        assert_eq!(host.queue.remove(host.handles[0]), Ok(true));
        assert_eq!(host.queue.peek_next_timestamp(), Some(20));
        assert_eq!(host.queue.head(), Some(host.handles[1]));
    }
}
