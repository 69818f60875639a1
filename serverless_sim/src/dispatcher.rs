//! Virtual-clock event dispatcher.

use serverless_env::{Dispatcher, EnvError, EventId, InstanceId, ServiceName, SimEvent, SimTime};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Deterministic event queue with a virtual clock.
///
/// Events are ordered by `(timestamp, EventId)`: ties at the same instant are
/// delivered in scheduling order. The clock only advances when an event is
/// popped or [`SimDispatcher::advance_to`] is called.
#[derive(Default)]
pub struct SimDispatcher {
    inner: Mutex<EventQueue>,
}

#[derive(Default)]
struct EventQueue {
    /// Current virtual time
    now: SimTime,

    next_id: u64,

    /// Pending events in delivery order
    queue: BTreeMap<(SimTime, EventId), SimEvent>,

    /// Timestamp of every pending event, for cancellation
    index: HashMap<EventId, SimTime>,
}

impl SimDispatcher {
    /// Creates a dispatcher at virtual time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped dispatcher for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, EventQueue> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes the next event due at or before `until` and advances the clock to it.
    pub fn pop_until(&self, until: SimTime) -> Option<(SimTime, SimEvent)> {
        let mut queue = self.lock();
        let (&(at, id), _) = queue.queue.iter().next()?;
        if at > until {
            return None;
        }

        queue.index.remove(&id);
        queue.now = at;
        queue.queue.remove(&(at, id)).map(|event| (at, event))
    }

    /// Removes the next event regardless of its timestamp.
    pub fn pop_next(&self) -> Option<(SimTime, SimEvent)> {
        self.pop_until(SimTime::MAX)
    }

    /// Timestamp of the next pending event.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.lock().queue.keys().next().map(|&(at, _)| at)
    }

    /// Moves the clock forward to `time`. Never moves it backwards.
    pub fn advance_to(&self, time: SimTime) {
        let mut queue = self.lock();
        queue.now = queue.now.max(time);
    }

    /// Number of pending events.
    pub fn pending_count(&self) -> usize {
        self.lock().queue.len()
    }

    /// Pending events addressed to `target`, in delivery order.
    pub fn pending_for(&self, target: &ServiceName) -> Vec<(SimTime, SimEvent)> {
        self.lock()
            .queue
            .iter()
            .filter(|(_, event)| event.target == *target)
            .map(|(&(at, _), event)| (at, event.clone()))
            .collect()
    }

    /// Returns true if any pending event of `target` concerns `instance`.
    pub fn has_pending_for_instance(&self, target: &ServiceName, instance: InstanceId) -> bool {
        self.lock()
            .queue
            .values()
            .any(|event| event.target == *target && event.kind.instance() == instance)
    }
}

impl Dispatcher for SimDispatcher {
    fn now(&self) -> SimTime {
        self.lock().now
    }

    fn schedule(&self, at: SimTime, event: SimEvent) -> Result<EventId, EnvError> {
        let mut queue = self.lock();
        if at < queue.now {
            return Err(EnvError::ScheduleInPast { at, now: queue.now });
        }

        let id = EventId(queue.next_id);
        queue.next_id += 1;
        queue.index.insert(id, at);
        queue.queue.insert((at, id), event);
        Ok(id)
    }

    fn cancel(&self, id: EventId) -> bool {
        let mut queue = self.lock();
        match queue.index.remove(&id) {
            Some(at) => queue.queue.remove(&(at, id)).is_some(),
            None => false,
        }
    }
}

impl std::fmt::Debug for SimDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.lock();
        f.debug_struct("SimDispatcher")
            .field("now", &queue.now)
            .field("pending", &queue.queue.len())
            .finish()
    }
}
