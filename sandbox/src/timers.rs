//! Guest timer registrations.
//!
//! The guest's scheduler asks for a wake-up through
//! `runtime.scheduleTimeoutEvent` and may cancel it again. Nothing here sleeps:
//! the execution driver awaits the earliest deadline on the tokio clock.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct TimerRegistry {
    next_id: i32,
    pending: HashMap<i32, Instant>,
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Registers a timer due after `delay`. Returns its id.
    pub fn schedule(&mut self, delay: Duration) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.pending.insert(id, Instant::now() + delay);
        id
    }

    /// Cancels a timer. Returns `false` if it was not pending.
    pub fn clear(&mut self, id: i32) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn contains(&self, id: i32) -> bool {
        self.pending.contains_key(&id)
    }

    /// The earliest pending timer, ties broken by id.
    pub fn next_due(&self) -> Option<(i32, Instant)> {
        self.pending
            .iter()
            .map(|(id, due)| (*id, *due))
            .min_by_key(|(id, due)| (*due, *id))
    }

    pub fn clear_all(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential() {
        let mut timers = TimerRegistry::new();
        assert_eq!(timers.schedule(Duration::from_millis(5)), 1);
        assert_eq!(timers.schedule(Duration::from_millis(5)), 2);
        assert_eq!(timers.len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut timers = TimerRegistry::new();
        let id = timers.schedule(Duration::from_millis(5));
        assert!(timers.contains(id));
        assert!(timers.clear(id));
        assert!(!timers.clear(id));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_next_due_picks_earliest() {
        let mut timers = TimerRegistry::new();
        let late = timers.schedule(Duration::from_millis(500));
        let early = timers.schedule(Duration::from_millis(10));
        let (id, _) = timers.next_due().unwrap();
        assert_eq!(id, early);
        timers.clear(early);
        assert_eq!(timers.next_due().unwrap().0, late);
        timers.clear_all();
        assert!(timers.next_due().is_none());
    }
}
