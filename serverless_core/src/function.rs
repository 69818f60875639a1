//! Functions, invocations and read-only views of function instances.

use serde::{Deserialize, Serialize};
use serverless_env::{FunctionId, InstanceId, InvocationId, SimTime};
use std::time::Duration;

/// A function deployed on the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Unique function ID
    pub id: FunctionId,

    /// Function name (for logs and reports)
    pub name: String,

    /// Provisioned memory in MB; selects the cold-start tier
    pub memory_mb: u64,
}

impl FunctionSpec {
    pub fn new(id: FunctionId, name: impl Into<String>, memory_mb: u64) -> Self {
        Self {
            id,
            name: name.into(),
            memory_mb,
        }
    }
}

/// Lifecycle of a function instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    /// Created, paying its cold start
    Provisioning,

    /// Ready and not executing anything
    Idle,

    /// Executing an invocation
    Active,

    /// Reclaimed; never used again
    Terminated,
}

/// An invocation waiting for, or running on, an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInvocation {
    pub id: InvocationId,
    pub function: FunctionId,

    /// Simulated execution time once started
    pub work: Duration,

    /// When the invocation reached the service
    pub submitted_at: SimTime,
}

/// Snapshot of an instance handed to routing and termination policies.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceView {
    pub id: InstanceId,
    pub function: FunctionId,
    pub state: InstanceState,
    pub created_at: SimTime,

    /// When the cold start completes (or completed)
    pub ready_at: SimTime,

    /// Set while the instance is idle
    pub idle_since: Option<SimTime>,

    /// Invocations waiting for this instance
    pub queued: usize,

    /// Invocations completed on this instance
    pub completed: u64,
}

impl InstanceView {
    /// Returns true if the instance can start work right now.
    pub fn is_idle(&self) -> bool {
        self.state == InstanceState::Idle
    }
}
