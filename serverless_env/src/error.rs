//! Error types for the serverless environment abstraction.

use crate::types::SimTime;
use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// An event was scheduled before the current virtual time.
    ///
    /// Fatal: the simulation clock never moves backwards.
    #[error("Cannot schedule event at {at:?}, current time is {now:?}")]
    ScheduleInPast { at: SimTime, now: SimTime },

    /// A relative delay lands past the end of representable virtual time
    #[error("Cannot schedule event {delay:?} after {now:?}: time overflow")]
    TimeOverflow { now: SimTime, delay: SimTime },

    /// A service is already registered under this name
    #[error("Service already registered: {0}")]
    AlreadyRegistered(String),
}

impl EnvError {
    /// Creates a registry collision error.
    pub fn already_registered(name: impl std::fmt::Display) -> Self {
        Self::AlreadyRegistered(name.to_string())
    }

    /// Adds `delay` to `now`, failing instead of wrapping or panicking.
    pub fn checked_after(now: SimTime, delay: SimTime) -> Result<SimTime, Self> {
        now.checked_add(delay)
            .ok_or(Self::TimeOverflow { now, delay })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_checked_after() {
        let now = Duration::from_secs(1);
        assert_eq!(EnvError::checked_after(now, Duration::from_secs(2)).unwrap(), Duration::from_secs(3));

        let overflow = EnvError::checked_after(now, Duration::MAX);
        assert!(matches!(
            overflow,
            Err(EnvError::TimeOverflow { now: n, delay }) if n == now && delay == Duration::MAX
        ));
    }
}
