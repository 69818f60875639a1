//! Common types for the serverless environment abstraction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Simulated timestamp, measured from the start of the simulation.
///
/// This is virtual time: it only advances when the dispatcher delivers an
/// event, never with the wall clock.
pub type SimTime = Duration;

/// Handle for a scheduled event, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

/// Identifier of a simulated function instance.
///
/// Issued by the deployer that owns the instance; unique within one deployer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

/// Identifier of a single function invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InvocationId(pub u64);

/// Identifier of a deployed function.
///
/// Uses UUIDs like the platform it models, but derived from seeds so that
/// simulation runs stay reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionId(pub Uuid);

impl FunctionId {
    /// Creates a deterministic FunctionId from a seed.
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance-{}", self.0)
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invocation-{}", self.0)
    }
}

/// Name under which a service is registered (its "domain").
///
/// Cheap to clone since every scheduled event carries one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceName(Arc<str>);

impl ServiceName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ServiceName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// What happened, from the point of view of the service receiving the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Cold start of an instance completed; it can now execute work.
    InstanceReady { instance: InstanceId },

    /// An invocation running on an instance finished.
    InvocationFinished {
        instance: InstanceId,
        invocation: InvocationId,
    },

    /// The termination policy asked to re-examine an idle instance.
    IdleCheck { instance: InstanceId },
}

impl EventKind {
    /// Returns the instance this event concerns.
    pub fn instance(&self) -> InstanceId {
        match *self {
            EventKind::InstanceReady { instance }
            | EventKind::InvocationFinished { instance, .. }
            | EventKind::IdleCheck { instance } => instance,
        }
    }
}

/// A simulation event addressed to a registered service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimEvent {
    /// The service that should handle this event
    pub target: ServiceName,

    /// The event payload
    pub kind: EventKind,
}

impl SimEvent {
    pub fn new(target: ServiceName, kind: EventKind) -> Self {
        Self { target, kind }
    }
}
