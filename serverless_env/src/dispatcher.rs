//! Event scheduling abstraction for the simulated platform.

use crate::error::EnvError;
use crate::types::{EventId, SimEvent, SimTime};

/// The simulation's event scheduling primitive.
///
/// Components never block or sleep: a delay is modeled by scheduling an event
/// at a future virtual timestamp. The driver of the simulation pops events in
/// timestamp order and hands them to their target service.
///
/// # Event Flow
///
/// ```text
/// Deployer                  Dispatcher                 Driver
///   |                           |                         |
///   |-- schedule(t, ready) ---->|                         |
///   |                           |-- [clock advances] ---->|
///   |                           |                         |-- service.handle_event(ready)
/// ```
pub trait Dispatcher: Send + Sync {
    /// Returns the current virtual time.
    fn now(&self) -> SimTime;

    /// Schedules an event at an absolute virtual timestamp.
    ///
    /// # Returns
    /// * `Ok(EventId)` - Handle that can be passed to [`Dispatcher::cancel`]
    /// * `Err(EnvError::ScheduleInPast)` - `at` is earlier than [`Dispatcher::now`]
    fn schedule(&self, at: SimTime, event: SimEvent) -> Result<EventId, EnvError>;

    /// Cancels a pending event.
    ///
    /// Returns `true` if the event was still pending and has been removed.
    fn cancel(&self, id: EventId) -> bool;

    /// Schedules an event `delay` after the current time.
    ///
    /// Returns `Err(EnvError::TimeOverflow)` if the timestamp is not representable.
    fn schedule_after(&self, delay: SimTime, event: SimEvent) -> Result<EventId, EnvError> {
        let at = EnvError::checked_after(self.now(), delay)?;
        self.schedule(at, event)
    }
}
