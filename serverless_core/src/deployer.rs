//! Function deployer - owns the simulated function instances.
//!
//! The deployer is where simulated time meets resource bookkeeping: every
//! instance it creates reserves capacity on the machine profile and schedules
//! its own "ready" event on the dispatcher at `now + cold_start_delay`.
//! Reclaiming an instance cancels everything it still has pending.

use crate::delay::{DelayInjector, DelayStats};
use crate::function::{FunctionSpec, InstanceState, InstanceView, PendingInvocation};
use crate::machine::{MachineError, MachineProfile, MachineReservation};
use serde::Serialize;
use serverless_env::{
    Dispatcher, EnvError, EventId, EventKind, FunctionId, InstanceId, ServiceName, SimEvent, SimTime,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised while deploying an instance.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The machine cannot host the function
    #[error("Insufficient capacity: {0}")]
    InsufficientCapacity(#[from] MachineError),

    /// The ready event could not be scheduled
    #[error("Scheduling failed: {0}")]
    Schedule(#[from] EnvError),

    /// No service has adopted this deployer yet
    #[error("Deployer is not bound to a service")]
    Unbound,
}

/// Result of a deploy request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
    /// The instance serving the function
    pub instance: InstanceId,

    /// Delay charged by this request; `None` when a warm instance was reused
    pub cold_start: Option<Duration>,

    /// When the instance is (or was) ready
    pub ready_at: SimTime,
}

impl Deployment {
    /// Returns true if this request created a new instance.
    pub fn is_cold(&self) -> bool {
        self.cold_start.is_some()
    }
}

/// Scheduled events an instance can have outstanding, besides its ready event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSlot {
    /// Completion of the running invocation
    Finish,

    /// Termination policy check while idle
    IdleCheck,
}

/// Deployer-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeployerStats {
    pub deployed: u64,
    pub reclaimed: u64,
    pub warm_reuses: u64,
    pub peak_instances: usize,
}

/// A live simulated function instance.
#[derive(Debug)]
struct FunctionInstance {
    id: InstanceId,
    function: FunctionSpec,
    state: InstanceState,
    created_at: SimTime,
    ready_at: SimTime,
    reservation: MachineReservation,
    idle_since: Option<SimTime>,
    queue: VecDeque<PendingInvocation>,
    running: Option<PendingInvocation>,
    completed: u64,

    // Outstanding events, cancelled on reclaim
    ready_event: Option<EventId>,
    finish_event: Option<EventId>,
    idle_check: Option<EventId>,
}

impl FunctionInstance {
    fn view(&self) -> InstanceView {
        InstanceView {
            id: self.id,
            function: self.function.id,
            state: self.state,
            created_at: self.created_at,
            ready_at: self.ready_at,
            idle_since: self.idle_since,
            queued: self.queue.len(),
            completed: self.completed,
        }
    }

    /// Warm means reusable without a new cold start and without waiting behind other work.
    fn is_warm(&self) -> bool {
        match self.state {
            InstanceState::Idle => self.queue.is_empty(),
            InstanceState::Provisioning => self.queue.is_empty() && self.running.is_none(),
            InstanceState::Active | InstanceState::Terminated => false,
        }
    }

    fn pending_events(&self) -> impl Iterator<Item = EventId> {
        [self.ready_event, self.finish_event, self.idle_check]
            .into_iter()
            .flatten()
    }
}

/// Creates and destroys simulated function instances on demand.
pub struct SimFunctionDeployer {
    dispatcher: Arc<dyn Dispatcher>,
    machine: MachineProfile,
    injector: DelayInjector,

    /// Service that receives this deployer's events
    owner: Option<ServiceName>,

    /// Live instances, ordered by creation
    instances: BTreeMap<InstanceId, FunctionInstance>,

    next_instance: u64,
    reserved_memory_mb: u64,
    stats: DeployerStats,
}

impl SimFunctionDeployer {
    /// Creates a deployer bound to a dispatcher, machine profile and delay injector.
    pub fn new(dispatcher: Arc<dyn Dispatcher>, machine: MachineProfile, injector: DelayInjector) -> Self {
        Self {
            dispatcher,
            machine,
            injector,
            owner: None,
            instances: BTreeMap::new(),
            next_instance: 0,
            reserved_memory_mb: 0,
            stats: DeployerStats::default(),
        }
    }

    /// Addresses all future events of this deployer to `owner`.
    pub fn bind(&mut self, owner: ServiceName) {
        self.owner = Some(owner);
    }

    /// Returns a warm instance of `function`, creating one if none exists.
    ///
    /// A new instance pays a cold start drawn from the delay injector and
    /// becomes ready when its `InstanceReady` event fires at `now + delay`.
    /// A reused instance costs no additional delay.
    pub fn deploy(&mut self, function: &FunctionSpec) -> Result<Deployment, DeployError> {
        if let Some(warm) = self
            .instances
            .values()
            .find(|instance| instance.function.id == function.id && instance.is_warm())
        {
            self.stats.warm_reuses += 1;
            return Ok(Deployment {
                instance: warm.id,
                cold_start: None,
                ready_at: warm.ready_at,
            });
        }

        let owner = self.owner.clone().ok_or(DeployError::Unbound)?;
        let reservation = self.machine.reserve(function.memory_mb)?;

        let id = InstanceId(self.next_instance);
        let now = self.dispatcher.now();
        let delay = self.injector.delay(id, function);
        let ready_at = EnvError::checked_after(now, delay)?;

        let ready_event = self
            .dispatcher
            .schedule(ready_at, SimEvent::new(owner, EventKind::InstanceReady { instance: id }))?;

        self.next_instance += 1;
        self.reserved_memory_mb += reservation.memory_mb;
        self.instances.insert(
            id,
            FunctionInstance {
                id,
                function: function.clone(),
                state: InstanceState::Provisioning,
                created_at: now,
                ready_at,
                reservation,
                idle_since: None,
                queue: VecDeque::new(),
                running: None,
                completed: 0,
                ready_event: Some(ready_event),
                finish_event: None,
                idle_check: None,
            },
        );

        self.stats.deployed += 1;
        self.stats.peak_instances = self.stats.peak_instances.max(self.instances.len());

        debug!(
            "Deployed {} for {} at {:?} (cold start {:?})",
            id, function.name, now, delay
        );

        Ok(Deployment {
            instance: id,
            cold_start: Some(delay),
            ready_at,
        })
    }

    /// Destroys an instance and releases its reservation.
    ///
    /// Cancels the instance's pending events and drops its queued invocations.
    ///
    /// # Panics
    /// If `id` is not owned by this deployer. Reclaiming a foreign or
    /// already-reclaimed instance is a caller bug.
    pub fn reclaim(&mut self, id: InstanceId) -> InstanceView {
        let Some(mut instance) = self.instances.remove(&id) else {
            panic!("contract violation: reclaim of {id}, which is not owned by this deployer");
        };

        for event in instance.pending_events() {
            self.dispatcher.cancel(event);
        }

        self.reserved_memory_mb -= instance.reservation.memory_mb;
        self.stats.reclaimed += 1;

        instance.state = InstanceState::Terminated;
        instance.idle_since = None;

        debug!(
            "Reclaimed {} for {} ({} completed, {} queued dropped)",
            id,
            instance.function.name,
            instance.completed,
            instance.queue.len()
        );

        instance.view()
    }

    /// Reclaims every live instance. Returns how many were reclaimed.
    pub fn shutdown(&mut self) -> usize {
        let ids: Vec<InstanceId> = self.instances.keys().copied().collect();
        for id in &ids {
            self.reclaim(*id);
        }
        ids.len()
    }

    /// Completes the cold start of an instance.
    ///
    /// Returns false if the instance is unknown or was not provisioning.
    pub fn mark_ready(&mut self, id: InstanceId) -> bool {
        let now = self.dispatcher.now();
        match self.instances.get_mut(&id) {
            Some(instance) if instance.state == InstanceState::Provisioning => {
                instance.state = InstanceState::Idle;
                instance.ready_event = None;
                instance.idle_since = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Appends an invocation to an instance's queue.
    ///
    /// Returns false if the instance is unknown.
    pub fn enqueue(&mut self, id: InstanceId, invocation: PendingInvocation) -> bool {
        match self.instances.get_mut(&id) {
            Some(instance) => {
                instance.queue.push_back(invocation);
                true
            }
            None => false,
        }
    }

    /// Starts the next queued invocation if the instance is idle.
    ///
    /// Cancels any pending idle check, since the instance is no longer idle.
    pub fn begin_next(&mut self, id: InstanceId) -> Option<PendingInvocation> {
        let instance = self.instances.get_mut(&id)?;
        if instance.state != InstanceState::Idle {
            return None;
        }

        let invocation = instance.queue.pop_front()?;
        if let Some(check) = instance.idle_check.take() {
            self.dispatcher.cancel(check);
        }

        instance.state = InstanceState::Active;
        instance.idle_since = None;
        instance.running = Some(invocation.clone());
        Some(invocation)
    }

    /// Finishes the running invocation and returns the instance to idle.
    pub fn complete(&mut self, id: InstanceId) -> Option<PendingInvocation> {
        let now = self.dispatcher.now();
        let instance = self.instances.get_mut(&id)?;
        if instance.state != InstanceState::Active {
            return None;
        }

        let finished = instance.running.take();
        instance.state = InstanceState::Idle;
        instance.idle_since = Some(now);
        instance.finish_event = None;
        instance.completed += 1;
        finished
    }

    /// Drops the running invocation without counting it as completed.
    ///
    /// Used when its finish event cannot be scheduled. The instance goes back to idle.
    pub fn abort_running(&mut self, id: InstanceId) -> Option<PendingInvocation> {
        let now = self.dispatcher.now();
        let instance = self.instances.get_mut(&id)?;
        if instance.state != InstanceState::Active {
            return None;
        }

        let aborted = instance.running.take();
        instance.state = InstanceState::Idle;
        instance.idle_since = Some(now);
        aborted
    }

    /// Records an event scheduled on behalf of an instance so reclaim can cancel it.
    ///
    /// A previously tracked event in the same slot is cancelled.
    pub fn track(&mut self, id: InstanceId, slot: EventSlot, event: EventId) {
        let Some(instance) = self.instances.get_mut(&id) else {
            self.dispatcher.cancel(event);
            return;
        };

        let previous = match slot {
            EventSlot::Finish => instance.finish_event.replace(event),
            EventSlot::IdleCheck => instance.idle_check.replace(event),
        };
        if let Some(previous) = previous {
            self.dispatcher.cancel(previous);
        }
    }

    /// Forgets the event in `slot` after it has been delivered.
    pub fn clear(&mut self, id: InstanceId, slot: EventSlot) {
        if let Some(instance) = self.instances.get_mut(&id) {
            match slot {
                EventSlot::Finish => instance.finish_event = None,
                EventSlot::IdleCheck => instance.idle_check = None,
            }
        }
    }

    /// Returns a snapshot of an instance.
    pub fn instance(&self, id: InstanceId) -> Option<InstanceView> {
        self.instances.get(&id).map(FunctionInstance::view)
    }

    /// Returns snapshots of all live instances of a function, oldest first.
    pub fn instances_of(&self, function: FunctionId) -> Vec<InstanceView> {
        self.instances
            .values()
            .filter(|instance| instance.function.id == function)
            .map(FunctionInstance::view)
            .collect()
    }

    /// Returns true if the deployer owns `id`.
    pub fn owns(&self, id: InstanceId) -> bool {
        self.instances.contains_key(&id)
    }

    /// Event ids still pending for an instance.
    pub fn pending_events(&self, id: InstanceId) -> Vec<EventId> {
        self.instances
            .get(&id)
            .map(|instance| instance.pending_events().collect())
            .unwrap_or_default()
    }

    pub fn live_instances(&self) -> usize {
        self.instances.len()
    }

    pub fn reserved_memory_mb(&self) -> u64 {
        self.reserved_memory_mb
    }

    pub fn machine(&self) -> &MachineProfile {
        &self.machine
    }

    pub fn stats(&self) -> &DeployerStats {
        &self.stats
    }

    pub fn delay_stats(&self) -> DelayStats {
        self.injector.stats()
    }
}

impl std::fmt::Debug for SimFunctionDeployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimFunctionDeployer")
            .field("machine", &self.machine.name)
            .field("owner", &self.owner)
            .field("instances", &self.instances.len())
            .finish()
    }
}
