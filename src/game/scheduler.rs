//! Tick Scheduler
//!
//! Deferred effects keyed to simulation ticks. Every scheduled effect gets a
//! [`TimerHandle`] that cancels it; teardown cancels everything at once, so
//! no effect outlives its session.

use std::collections::BTreeMap;

use crate::game::state::PlayerId;

/// Cancellation token for one scheduled effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

/// Effects the session can schedule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScheduledEffect {
    /// Reconnect grace period ran out
    DisconnectExpiry {
        /// Disconnected player
        player: PlayerId,
    },
    /// Turn holder took too long
    TurnTimeout {
        /// Turn sequence the timeout was armed for
        turn: u32,
    },
    /// Spawn the next marker
    SpawnMarker,
    /// Announce the round clock
    ClockAnnouncement,
}

/// Ordered queue of pending effects.
#[derive(Debug, Default)]
pub struct TickScheduler {
    next_id: u64,
    /// (due tick, handle) -> effect; BTreeMap gives due-then-creation order
    entries: BTreeMap<(u64, TimerHandle), ScheduledEffect>,
    /// handle -> due tick
    index: BTreeMap<TimerHandle, u64>,
}

impl TickScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `effect` to fire at tick `due`.
    pub fn schedule_at(&mut self, due: u64, effect: ScheduledEffect) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        self.entries.insert((due, handle), effect);
        self.index.insert(handle, due);
        handle
    }

    /// Schedule `effect` to fire `delay` ticks after `now`.
    pub fn schedule_in(&mut self, now: u64, delay: u32, effect: ScheduledEffect) -> TimerHandle {
        self.schedule_at(now + delay.max(1) as u64, effect)
    }

    /// Cancel one effect. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.index.remove(&handle) {
            Some(due) => self.entries.remove(&(due, handle)).is_some(),
            None => false,
        }
    }

    /// Cancel every effect matching `predicate`, returning how many.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&ScheduledEffect) -> bool) -> usize {
        let doomed: Vec<(u64, TimerHandle)> = self
            .entries
            .iter()
            .filter(|(_, effect)| predicate(effect))
            .map(|(key, _)| *key)
            .collect();

        for key in &doomed {
            self.entries.remove(key);
            self.index.remove(&key.1);
        }
        doomed.len()
    }

    /// Cancel everything, returning how many effects were pending.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.index.clear();
        count
    }

    /// Remove and return every effect due at or before `now`, in order.
    pub fn drain_due(&mut self, now: u64) -> Vec<ScheduledEffect> {
        let mut due = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((_, handle), effect) = entry.remove_entry();
            self.index.remove(&handle);
            due.push(effect);
        }
        due
    }

    /// Number of pending effects.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_in_due_order() {
        let mut scheduler = TickScheduler::new();
        scheduler.schedule_at(5, ScheduledEffect::SpawnMarker);
        scheduler.schedule_at(3, ScheduledEffect::ClockAnnouncement);
        scheduler.schedule_at(3, ScheduledEffect::TurnTimeout { turn: 1 });

        assert!(scheduler.drain_due(2).is_empty());
        assert_eq!(
            scheduler.drain_due(4),
            vec![ScheduledEffect::ClockAnnouncement, ScheduledEffect::TurnTimeout { turn: 1 }]
        );
        assert_eq!(scheduler.drain_due(10), vec![ScheduledEffect::SpawnMarker]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_cancel_handle() {
        let mut scheduler = TickScheduler::new();
        let handle = scheduler.schedule_in(0, 10, ScheduledEffect::SpawnMarker);

        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.cancel(handle));
        assert!(!scheduler.cancel(handle));
        assert!(scheduler.drain_due(100).is_empty());
    }

    #[test]
    fn test_fired_handle_cannot_cancel() {
        let mut scheduler = TickScheduler::new();
        let handle = scheduler.schedule_at(1, ScheduledEffect::ClockAnnouncement);
        scheduler.drain_due(1);
        assert!(!scheduler.cancel(handle));
    }

    #[test]
    fn test_cancel_where_keeps_others() {
        let mut scheduler = TickScheduler::new();
        let keep = scheduler.schedule_at(9, ScheduledEffect::DisconnectExpiry { player: PlayerId::new("p") });
        scheduler.schedule_at(9, ScheduledEffect::SpawnMarker);
        scheduler.schedule_at(9, ScheduledEffect::ClockAnnouncement);

        let removed = scheduler.cancel_where(|e| !matches!(e, ScheduledEffect::DisconnectExpiry { .. }));
        assert_eq!(removed, 2);
        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.cancel(keep));
    }

    #[test]
    fn test_cancel_all() {
        let mut scheduler = TickScheduler::new();
        scheduler.schedule_at(1, ScheduledEffect::SpawnMarker);
        scheduler.schedule_at(2, ScheduledEffect::SpawnMarker);
        assert_eq!(scheduler.cancel_all(), 2);
        assert_eq!(scheduler.cancel_all(), 0);
    }

    #[test]
    fn test_zero_delay_fires_next_tick() {
        let mut scheduler = TickScheduler::new();
        scheduler.schedule_in(7, 0, ScheduledEffect::SpawnMarker);
        assert!(scheduler.drain_due(7).is_empty());
        assert_eq!(scheduler.drain_due(8).len(), 1);
    }
}
