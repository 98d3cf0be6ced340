//! Per-clock event scheduler.
//!
//! A min-heap of pending events keyed by `(deadline, insertion order)`.
//! Cancelled events stay in the heap and are skipped when they surface;
//! each slot carries a generation so that a stale [`EventHandle`] can
//! never cancel a newer event that reused its slot.
//!
//! Components hold an `Option<EventHandle>` per event they own and pass
//! the scheduler in by `&mut` whenever they need it. The owner of the
//! scheduler dispatches fired events to the right component by looking at
//! the [`EventTarget`] tag.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use thiserror::Error;

use crate::clock::Clock;

/// Returned by [`Scheduler::ticks_to_event`] and
/// [`Scheduler::next_event_delta`] when nothing is pending.
pub const NO_EVENT: u32 = u32::MAX;

/// Errors reported by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("event delta must be at least one tick")]
    InvalidDelta,
}

/// Opaque recipient tag chosen by the scheduler's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventTarget(pub u32);

/// Reference to a queued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandle {
    slot: u32,
    generation: u32,
}

/// Receives fired events.
pub trait EventHandler {
    /// Called once per fired event. The scheduler's clock already reads the
    /// event's deadline. New events may be queued from here.
    fn on_scheduled_event(&mut self, scheduler: &mut Scheduler, target: EventTarget, id: u32);
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    live: bool,
    deadline: u64,
    target: EventTarget,
    id: u32,
}

/// Event scheduler for one clock domain.
#[derive(Debug)]
pub struct Scheduler {
    clock: Clock,
    heap: BinaryHeap<Reverse<(u64, u64, u32, u32)>>,
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    next_seq: u64,
    live_count: usize,
    stop_tick: u32,
}

impl Scheduler {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            stop_tick: clock.tick(),
            clock,
            heap: BinaryHeap::new(),
            slots: Vec::new(),
            free_slots: Vec::new(),
            next_seq: 0,
            live_count: 0,
        }
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    #[must_use]
    pub fn tick(&self) -> u32 {
        self.clock.tick()
    }

    #[must_use]
    pub fn tick64(&self) -> u64 {
        self.clock.tick64()
    }

    /// Number of live events.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.live_count
    }

    /// Queue a new event `delta` ticks from now.
    ///
    /// A zero delta is a caller bug: it asserts in debug builds and is
    /// clamped to one tick otherwise.
    pub fn add_event(&mut self, delta: u32, target: EventTarget, id: u32) -> EventHandle {
        debug_assert!(delta > 0, "zero-delta event for {target:?}/{id}");
        let delta = if delta == 0 {
            log::warn!("zero-delta event for {target:?}/{id} clamped to 1");
            1
        } else {
            delta
        };

        let deadline = self.clock.tick64() + u64::from(delta);
        let slot = if let Some(slot) = self.free_slots.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.generation = entry.generation.wrapping_add(1);
            entry.live = true;
            entry.deadline = deadline;
            entry.target = target;
            entry.id = id;
            slot
        } else {
            self.slots.push(Slot {
                generation: 0,
                live: true,
                deadline,
                target,
                id,
            });
            (self.slots.len() - 1) as u32
        };

        let generation = self.slots[slot as usize].generation;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((deadline, seq, slot, generation)));
        self.live_count += 1;

        EventHandle { slot, generation }
    }

    /// Queue an event, cancelling whatever `handle` pointed at first.
    pub fn set_event(
        &mut self,
        delta: u32,
        target: EventTarget,
        id: u32,
        handle: &mut Option<EventHandle>,
    ) {
        self.unset_event(handle);
        *handle = Some(self.add_event(delta, target, id));
    }

    /// Like [`set_event`](Self::set_event) but rejects a zero delta.
    pub fn try_set_event(
        &mut self,
        delta: u32,
        target: EventTarget,
        id: u32,
        handle: &mut Option<EventHandle>,
    ) -> Result<(), SchedulerError> {
        if delta == 0 {
            return Err(SchedulerError::InvalidDelta);
        }
        self.set_event(delta, target, id, handle);
        Ok(())
    }

    /// Cancel the event behind `handle`, if still pending, and clear it.
    pub fn unset_event(&mut self, handle: &mut Option<EventHandle>) {
        if let Some(h) = handle.take() {
            if self.is_live(h) {
                let entry = &mut self.slots[h.slot as usize];
                entry.live = false;
                self.live_count -= 1;
                self.free_slots.push(h.slot);
            }
        }
    }

    fn is_live(&self, h: EventHandle) -> bool {
        self.slots
            .get(h.slot as usize)
            .is_some_and(|s| s.live && s.generation == h.generation)
    }

    /// True while the event behind `handle` has neither fired nor been
    /// cancelled.
    #[must_use]
    pub fn is_pending(&self, handle: Option<EventHandle>) -> bool {
        handle.is_some_and(|h| self.is_live(h))
    }

    /// Ticks until the event fires, or [`NO_EVENT`].
    #[must_use]
    pub fn ticks_to_event(&self, handle: Option<EventHandle>) -> u32 {
        match handle {
            Some(h) if self.is_live(h) => {
                let deadline = self.slots[h.slot as usize].deadline;
                deadline.saturating_sub(self.clock.tick64()).min(u64::from(NO_EVENT - 1)) as u32
            }
            _ => NO_EVENT,
        }
    }

    /// Drop cancelled entries sitting on top of the heap.
    fn prune(&mut self) {
        while let Some(&Reverse((_, _, slot, generation))) = self.heap.peek() {
            if self.is_live(EventHandle { slot, generation }) {
                break;
            }
            self.heap.pop();
        }
    }

    /// Ticks until the earliest pending event, or [`NO_EVENT`].
    pub fn next_event_delta(&mut self) -> u32 {
        self.prune();
        match self.heap.peek() {
            Some(&Reverse((deadline, _, _, _))) => deadline
                .saturating_sub(self.clock.tick64())
                .min(u64::from(NO_EVENT - 1)) as u32,
            None => NO_EVENT,
        }
    }

    /// Remove and return the earliest event if its deadline has been reached.
    pub fn pop_due(&mut self) -> Option<(EventTarget, u32)> {
        self.prune();
        let &Reverse((deadline, _, slot, _)) = self.heap.peek()?;
        if deadline > self.clock.tick64() {
            return None;
        }
        self.heap.pop();
        let entry = &mut self.slots[slot as usize];
        entry.live = false;
        self.live_count -= 1;
        self.free_slots.push(slot);
        Some((entry.target, entry.id))
    }

    /// Deliver every event whose deadline is at or before now.
    pub fn fire_due<H: EventHandler + ?Sized>(&mut self, handler: &mut H) {
        while let Some((target, id)) = self.pop_due() {
            handler.on_scheduled_event(self, target, id);
        }
    }

    /// Move the clock forward without firing anything.
    pub fn advance(&mut self, ticks: u32) {
        self.clock.advance(ticks);
    }

    /// Advance to `stop`, firing events in deadline order along the way.
    ///
    /// Events due at `stop` itself are delivered before returning. A stop
    /// tick at or behind now only drains what is already due.
    pub fn run_until<H: EventHandler + ?Sized>(&mut self, stop: u32, handler: &mut H) {
        loop {
            self.fire_due(handler);
            let remaining = crate::tick_delta(self.clock.tick(), stop);
            if remaining <= 0 {
                return;
            }
            let step = self.next_event_delta().min(remaining as u32);
            self.clock.advance(step);
        }
    }

    /// Set the tick at which a co-processor slice ends.
    pub fn set_stop_tick(&mut self, stop: u32) {
        self.stop_tick = stop;
    }

    #[must_use]
    pub fn stop_tick(&self) -> u32 {
        self.stop_tick
    }

    /// True once the clock has reached the stop tick.
    #[must_use]
    pub fn reached_stop(&self) -> bool {
        crate::tick_le(self.stop_tick, self.clock.tick())
    }

    /// Cancel every pending event. Outstanding handles become stale.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.live {
                slot.live = false;
                self.free_slots.push(index as u32);
            }
        }
        self.heap.clear();
        self.live_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const T: EventTarget = EventTarget(7);

    #[derive(Default)]
    struct Recorder {
        fired: Vec<(u32, u32)>,
        requeue: Option<u32>,
    }

    impl EventHandler for Recorder {
        fn on_scheduled_event(&mut self, sch: &mut Scheduler, target: EventTarget, id: u32) {
            assert_eq!(target, T);
            self.fired.push((sch.tick(), id));
            if let Some(delta) = self.requeue.take() {
                sch.add_event(delta, T, id + 100);
            }
        }
    }

    #[test]
    fn fires_in_deadline_then_insertion_order() {
        let mut sch = Scheduler::new(Clock::default());
        sch.add_event(5, T, 1);
        sch.add_event(3, T, 2);
        sch.add_event(5, T, 3);
        sch.add_event(3, T, 4);

        let mut rec = Recorder::default();
        sch.run_until(10, &mut rec);

        assert_eq!(rec.fired, vec![(3, 2), (3, 4), (5, 1), (5, 3)]);
        assert_eq!(sch.tick(), 10);
    }

    #[test]
    fn set_event_replaces_previous() {
        let mut sch = Scheduler::new(Clock::default());
        let mut handle = None;
        sch.set_event(4, T, 1, &mut handle);
        sch.set_event(6, T, 2, &mut handle);
        assert_eq!(sch.pending(), 1);
        assert_eq!(sch.ticks_to_event(handle), 6);

        let mut rec = Recorder::default();
        sch.run_until(10, &mut rec);
        assert_eq!(rec.fired, vec![(6, 2)]);
    }

    #[test]
    fn unset_after_fire_is_noop() {
        let mut sch = Scheduler::new(Clock::default());
        let mut handle = Some(sch.add_event(1, T, 1));
        let mut rec = Recorder::default();
        sch.run_until(2, &mut rec);

        // Slot is reused by the next event; the stale handle must not cancel it.
        let fresh = sch.add_event(3, T, 2);
        assert!(!sch.is_pending(handle));
        sch.unset_event(&mut handle);
        assert!(handle.is_none());
        assert!(sch.is_pending(Some(fresh)));
        assert_eq!(sch.ticks_to_event(handle), NO_EVENT);
    }

    #[test]
    fn try_set_event_rejects_zero_delta() {
        let mut sch = Scheduler::new(Clock::default());
        let mut handle = None;
        assert_eq!(
            sch.try_set_event(0, T, 1, &mut handle),
            Err(SchedulerError::InvalidDelta)
        );
        assert!(handle.is_none());
        assert_eq!(sch.pending(), 0);
    }

    #[test]
    fn next_event_delta_skips_cancelled() {
        let mut sch = Scheduler::new(Clock::default());
        let mut early = Some(sch.add_event(2, T, 1));
        sch.add_event(9, T, 2);
        assert_eq!(sch.next_event_delta(), 2);
        sch.unset_event(&mut early);
        assert_eq!(sch.next_event_delta(), 9);
        sch.clear();
        assert_eq!(sch.next_event_delta(), NO_EVENT);
    }

    #[test]
    fn handler_can_requeue() {
        let mut sch = Scheduler::new(Clock::default());
        sch.add_event(2, T, 1);
        let mut rec = Recorder {
            requeue: Some(3),
            ..Recorder::default()
        };
        sch.run_until(20, &mut rec);
        assert_eq!(rec.fired, vec![(2, 1), (5, 101)]);
    }

    #[test]
    fn run_until_across_wrap() {
        let mut clock = Clock::default();
        clock.set_tick64(0xFFFF_FFF0);
        let mut sch = Scheduler::new(clock);
        sch.add_event(0x20, T, 1);
        let mut rec = Recorder::default();
        sch.run_until(0x40, &mut rec);
        assert_eq!(rec.fired, vec![(0x10, 1)]);
        assert_eq!(sch.tick64(), 0x1_0000_0040);
    }

    #[test]
    fn empty_run_just_advances() {
        let mut sch = Scheduler::new(Clock::default());
        let mut rec = Recorder::default();
        sch.run_until(1000, &mut rec);
        assert!(rec.fired.is_empty());
        assert_eq!(sch.tick(), 1000);
    }

    #[test]
    fn stop_tick_is_wrap_safe() {
        let mut clock = Clock::default();
        clock.set_tick64(0xFFFF_FFFE);
        let mut sch = Scheduler::new(clock);
        sch.set_stop_tick(2);
        assert!(!sch.reached_stop());
        sch.advance(4);
        assert!(sch.reached_stop());
    }

    proptest! {
        #[test]
        fn equal_deadlines_fire_in_queue_order(deltas in proptest::collection::vec(1u32..8, 1..40)) {
            let mut sch = Scheduler::new(Clock::default());
            for (i, &d) in deltas.iter().enumerate() {
                sch.add_event(d, T, i as u32);
            }
            let mut rec = Recorder::default();
            sch.run_until(16, &mut rec);

            prop_assert_eq!(rec.fired.len(), deltas.len());
            for pair in rec.fired.windows(2) {
                let (t0, id0) = pair[0];
                let (t1, id1) = pair[1];
                prop_assert!(t0 < t1 || (t0 == t1 && id0 < id1));
            }
            for &(t, id) in &rec.fired {
                prop_assert_eq!(t, deltas[id as usize]);
            }
        }
    }
}
