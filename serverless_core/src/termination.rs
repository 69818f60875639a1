//! Termination policies - when idle instances are reclaimed.

use crate::function::InstanceView;
use serde::{Deserialize, Serialize};
use serverless_env::ProvisioningContext;
use std::time::Duration;

/// Decides when idle instances are reclaimed.
///
/// Whenever an instance becomes idle the service asks [`keep_alive`] how long
/// to wait before checking it; at that point [`should_terminate`] decides.
///
/// [`keep_alive`]: TerminationPolicy::keep_alive
/// [`should_terminate`]: TerminationPolicy::should_terminate
pub trait TerminationPolicy: Send {
    /// Delay before the idle instance is examined. `None` means never.
    fn keep_alive(&mut self, instance: &InstanceView) -> Option<Duration>;

    /// Returns true if an instance idle for `idle` should be reclaimed.
    fn should_terminate(&mut self, instance: &InstanceView, idle: Duration) -> bool;
}

/// Keeps instances warm for a fixed time after their last invocation.
#[derive(Debug, Clone, Copy)]
pub struct FixedKeepAlive {
    timeout: Duration,
}

impl FixedKeepAlive {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TerminationPolicy for FixedKeepAlive {
    fn keep_alive(&mut self, _instance: &InstanceView) -> Option<Duration> {
        Some(self.timeout)
    }

    fn should_terminate(&mut self, _instance: &InstanceView, idle: Duration) -> bool {
        idle >= self.timeout
    }
}

/// Reclaims instances as soon as they go idle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateTermination;

impl TerminationPolicy for ImmediateTermination {
    fn keep_alive(&mut self, _instance: &InstanceView) -> Option<Duration> {
        Some(Duration::ZERO)
    }

    fn should_terminate(&mut self, _instance: &InstanceView, _idle: Duration) -> bool {
        true
    }
}

/// Never reclaims anything; instances live until the service shuts down.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverTerminate;

impl TerminationPolicy for NeverTerminate {
    fn keep_alive(&mut self, _instance: &InstanceView) -> Option<Duration> {
        None
    }

    fn should_terminate(&mut self, _instance: &InstanceView, _idle: Duration) -> bool {
        false
    }
}

/// Builds a termination policy for a provisioning context.
pub trait TerminationPolicyFactory {
    fn build(&self, ctx: &dyn ProvisioningContext) -> Box<dyn TerminationPolicy>;
}

impl<F> TerminationPolicyFactory for F
where
    F: Fn(&dyn ProvisioningContext) -> Box<dyn TerminationPolicy>,
{
    fn build(&self, ctx: &dyn ProvisioningContext) -> Box<dyn TerminationPolicy> {
        self(ctx)
    }
}

/// The built-in termination policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationPolicyKind {
    FixedKeepAlive { timeout_ms: u64 },
    Immediate,
    Never,
}

impl Default for TerminationPolicyKind {
    fn default() -> Self {
        // Ten minutes, the usual keep-alive of commercial platforms
        TerminationPolicyKind::FixedKeepAlive { timeout_ms: 600_000 }
    }
}

impl TerminationPolicyFactory for TerminationPolicyKind {
    fn build(&self, _ctx: &dyn ProvisioningContext) -> Box<dyn TerminationPolicy> {
        match *self {
            TerminationPolicyKind::FixedKeepAlive { timeout_ms } => {
                Box::new(FixedKeepAlive::new(Duration::from_millis(timeout_ms)))
            }
            TerminationPolicyKind::Immediate => Box::new(ImmediateTermination),
            TerminationPolicyKind::Never => Box::new(NeverTerminate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::InstanceState;
    use serverless_env::{FunctionId, InstanceId};

    fn idle_view() -> InstanceView {
        InstanceView {
            id: InstanceId(0),
            function: FunctionId::from_seed(0),
            state: InstanceState::Idle,
            created_at: Duration::ZERO,
            ready_at: Duration::ZERO,
            idle_since: Some(Duration::ZERO),
            queued: 0,
            completed: 1,
        }
    }

    #[test]
    fn test_fixed_keep_alive() {
        let mut policy = FixedKeepAlive::new(Duration::from_secs(10));
        let view = idle_view();

        assert_eq!(policy.keep_alive(&view), Some(Duration::from_secs(10)));
        assert!(!policy.should_terminate(&view, Duration::from_secs(9)));
        assert!(policy.should_terminate(&view, Duration::from_secs(10)));
    }

    #[test]
    fn test_immediate_and_never() {
        let view = idle_view();

        assert_eq!(ImmediateTermination.keep_alive(&view), Some(Duration::ZERO));
        assert!(ImmediateTermination.should_terminate(&view, Duration::ZERO));

        assert_eq!(NeverTerminate.keep_alive(&view), None);
        assert!(!NeverTerminate.should_terminate(&view, Duration::from_secs(3600)));
    }
}
