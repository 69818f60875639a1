//! Routing policies - which instance serves an invocation.

use crate::function::{InstanceView, PendingInvocation};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serverless_env::{InstanceId, ProvisioningContext};

/// Selects the instance that should serve an invocation.
///
/// `candidates` are the live instances of the invoked function, oldest first.
/// Returning `None` asks the service to obtain an instance from the deployer,
/// which reuses a warm one or creates a new one.
pub trait RoutingPolicy: Send {
    fn select_instance(
        &mut self,
        invocation: &PendingInvocation,
        candidates: &[InstanceView],
    ) -> Option<InstanceId>;
}

/// Routes to the oldest idle instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstIdleRouting;

impl RoutingPolicy for FirstIdleRouting {
    fn select_instance(
        &mut self,
        _invocation: &PendingInvocation,
        candidates: &[InstanceView],
    ) -> Option<InstanceId> {
        candidates.iter().find(|c| c.is_idle()).map(|c| c.id)
    }
}

/// Routes to a uniformly random idle instance.
#[derive(Debug)]
pub struct RandomRouting {
    rng: ChaCha8Rng,
}

impl RandomRouting {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl RoutingPolicy for RandomRouting {
    fn select_instance(
        &mut self,
        _invocation: &PendingInvocation,
        candidates: &[InstanceView],
    ) -> Option<InstanceId> {
        let idle: Vec<InstanceId> = candidates.iter().filter(|c| c.is_idle()).map(|c| c.id).collect();
        idle.choose(&mut self.rng).copied()
    }
}

/// Builds a routing policy for a provisioning context.
///
/// Late binding lets a policy depend on simulation-wide state (the seed
/// stream, other registered services) without the provisioning step knowing
/// about it.
pub trait RoutingPolicyFactory {
    fn build(&self, ctx: &dyn ProvisioningContext) -> Box<dyn RoutingPolicy>;
}

impl<F> RoutingPolicyFactory for F
where
    F: Fn(&dyn ProvisioningContext) -> Box<dyn RoutingPolicy>,
{
    fn build(&self, ctx: &dyn ProvisioningContext) -> Box<dyn RoutingPolicy> {
        self(ctx)
    }
}

/// The built-in routing policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicyKind {
    #[default]
    FirstIdle,
    Random,
}

impl RoutingPolicyFactory for RoutingPolicyKind {
    fn build(&self, ctx: &dyn ProvisioningContext) -> Box<dyn RoutingPolicy> {
        match self {
            RoutingPolicyKind::FirstIdle => Box::new(FirstIdleRouting),
            RoutingPolicyKind::Random => Box::new(RandomRouting::new(ctx.seeder().next_seed())),
        }
    }
}

impl std::str::FromStr for RoutingPolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first_idle" | "first-idle" | "first" => Ok(RoutingPolicyKind::FirstIdle),
            "random" => Ok(RoutingPolicyKind::Random),
            _ => Err(format!("Unknown routing policy: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::InstanceState;
    use serverless_env::{FunctionId, InvocationId};
    use std::time::Duration;

    fn view(id: u64, state: InstanceState) -> InstanceView {
        InstanceView {
            id: InstanceId(id),
            function: FunctionId::from_seed(0),
            state,
            created_at: Duration::ZERO,
            ready_at: Duration::ZERO,
            idle_since: None,
            queued: 0,
            completed: 0,
        }
    }

    fn invocation() -> PendingInvocation {
        PendingInvocation {
            id: InvocationId(0),
            function: FunctionId::from_seed(0),
            work: Duration::from_millis(10),
            submitted_at: Duration::ZERO,
        }
    }

    #[test]
    fn test_first_idle_skips_busy() {
        let candidates = vec![
            view(0, InstanceState::Active),
            view(1, InstanceState::Provisioning),
            view(2, InstanceState::Idle),
            view(3, InstanceState::Idle),
        ];
        assert_eq!(FirstIdleRouting.select_instance(&invocation(), &candidates), Some(InstanceId(2)));
    }

    #[test]
    fn test_no_idle_candidate() {
        let candidates = vec![view(0, InstanceState::Active)];
        assert_eq!(FirstIdleRouting.select_instance(&invocation(), &candidates), None);
        assert_eq!(RandomRouting::new(1).select_instance(&invocation(), &candidates), None);
        assert_eq!(RandomRouting::new(1).select_instance(&invocation(), &[]), None);
    }

    #[test]
    fn test_random_picks_idle_deterministically() {
        let candidates: Vec<_> = (0..8).map(|i| view(i, InstanceState::Idle)).collect();

        let mut a = RandomRouting::new(99);
        let mut b = RandomRouting::new(99);
        for _ in 0..20 {
            let pick = a.select_instance(&invocation(), &candidates);
            assert_eq!(pick, b.select_instance(&invocation(), &candidates));
            assert!(pick.is_some());
        }
    }
}
