//! Test doubles shared by the unit tests of this crate.

use serverless_env::{Dispatcher, EnvError, EventId, SimEvent, SimTime};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// Minimal dispatcher whose clock only moves when a test pops events.
#[derive(Default)]
pub struct ManualDispatcher {
    inner: Mutex<Queue>,
}

#[derive(Default)]
struct Queue {
    now: SimTime,
    next_id: u64,
    events: BTreeMap<(SimTime, EventId), SimEvent>,
}

impl ManualDispatcher {
    /// Pops the next event due at or before `until`, advancing the clock to it.
    pub fn pop_until(&self, until: SimTime) -> Option<SimEvent> {
        let mut queue = self.inner.lock().unwrap();
        let (&(at, id), _) = queue.events.iter().next()?;
        if at > until {
            return None;
        }
        queue.now = at;
        queue.events.remove(&(at, id))
    }

    /// Moves the clock forward without delivering anything.
    pub fn set_time(&self, now: SimTime) {
        self.inner.lock().unwrap().now = now;
    }

    pub fn pending(&self) -> Vec<(SimTime, SimEvent)> {
        let queue = self.inner.lock().unwrap();
        queue.events.iter().map(|(&(at, _), event)| (at, event.clone())).collect()
    }

    pub fn secs(s: u64) -> SimTime {
        Duration::from_secs(s)
    }
}

impl Dispatcher for ManualDispatcher {
    fn now(&self) -> SimTime {
        self.inner.lock().unwrap().now
    }

    fn schedule(&self, at: SimTime, event: SimEvent) -> Result<EventId, EnvError> {
        let mut queue = self.inner.lock().unwrap();
        if at < queue.now {
            return Err(EnvError::ScheduleInPast { at, now: queue.now });
        }
        let id = EventId(queue.next_id);
        queue.next_id += 1;
        queue.events.insert((at, id), event);
        Ok(id)
    }

    fn cancel(&self, id: EventId) -> bool {
        let mut queue = self.inner.lock().unwrap();
        let key = queue.events.keys().find(|(_, event_id)| *event_id == id).copied();
        match key {
            Some(key) => queue.events.remove(&key).is_some(),
            None => false,
        }
    }
}
