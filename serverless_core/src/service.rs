//! The simulated FaaS platform.
//!
//! A [`FaasService`] accepts invocations, asks its [`RoutingPolicy`] which
//! instance should serve each one, falls back to the [`SimFunctionDeployer`]
//! to materialize instances, and asks its [`TerminationPolicy`] when idle
//! instances should be reclaimed.
//!
//! All progress happens through dispatcher events addressed to the service's
//! name: the simulation driver resolves the service from the registry and
//! calls [`FaasService::handle_event`].
//!
//! ```text
//! invoke(f) ──► routing.select_instance ──► Some(idle) ──► start now
//!                         │
//!                         └──► None ──► deployer.deploy(f) ──► queue until ready
//!
//! InstanceReady / InvocationFinished ──► start next queued, or go idle
//! idle ──► termination.keep_alive ──► IdleCheck ──► should_terminate ──► reclaim
//! ```

use crate::delay::mean_duration;
use crate::deployer::{DeployError, EventSlot, SimFunctionDeployer};
use crate::function::{FunctionSpec, InstanceState, PendingInvocation};
use crate::routing::RoutingPolicy;
use crate::termination::TerminationPolicy;
use serde::Serialize;
use serverless_env::{
    Dispatcher, EnvError, EventKind, FunctionId, InstanceId, InvocationId, ServiceName, SimEvent,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors returned by service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service has been shut down
    #[error("Service '{0}' is closed")]
    Closed(ServiceName),

    /// No function with this id was registered
    #[error("Unknown function: {0}")]
    UnknownFunction(FunctionId),

    /// An instance could not be deployed
    #[error(transparent)]
    Deploy(#[from] DeployError),

    /// An event could not be scheduled
    #[error("Scheduling failed: {0}")]
    Schedule(#[from] EnvError),
}

/// Counters describing what the service did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceStats {
    /// Invocations accepted
    pub invocations: u64,

    /// Invocations that ran to completion
    pub completed: u64,

    /// Invocations that had to create a new instance
    pub cold_starts: u64,

    /// Invocations served by an existing instance
    pub warm_starts: u64,

    /// Sum of cold-start delays charged
    pub total_cold_start: Duration,

    /// Largest cold-start delay charged
    pub max_cold_start: Duration,

    pub instances_deployed: u64,
    pub instances_reclaimed: u64,
    pub peak_instances: usize,
}

impl ServiceStats {
    /// Fraction of invocations that paid a cold start.
    pub fn cold_start_ratio(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.cold_starts as f64 / self.invocations as f64
        }
    }

    /// Mean cold-start delay over the invocations that paid one.
    pub fn mean_cold_start(&self) -> Duration {
        mean_duration(self.total_cold_start, self.cold_starts)
    }
}

struct ServiceState {
    deployer: SimFunctionDeployer,
    routing: Box<dyn RoutingPolicy>,
    termination: Box<dyn TerminationPolicy>,
    functions: HashMap<FunctionId, FunctionSpec>,
    next_function: u64,
    next_invocation: u64,
    stats: ServiceStats,
    closed: bool,
}

/// A simulated FaaS platform instance.
///
/// Shared as `Arc<FaasService>` between the registry, the disposal handle and
/// the simulation driver; all mutable state sits behind one mutex.
pub struct FaasService {
    name: ServiceName,
    dispatcher: Arc<dyn Dispatcher>,
    state: Mutex<ServiceState>,
}

impl FaasService {
    /// Assembles a service from its parts.
    ///
    /// The deployer is bound to `name`, so every event it schedules is
    /// delivered back to this service.
    pub fn new(
        name: ServiceName,
        dispatcher: Arc<dyn Dispatcher>,
        mut deployer: SimFunctionDeployer,
        routing: Box<dyn RoutingPolicy>,
        termination: Box<dyn TerminationPolicy>,
    ) -> Self {
        deployer.bind(name.clone());

        Self {
            name,
            dispatcher,
            state: Mutex::new(ServiceState {
                deployer,
                routing,
                termination,
                functions: HashMap::new(),
                next_function: 0,
                next_invocation: 0,
                stats: ServiceStats::default(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Registers a new function with the platform.
    pub fn register_function(&self, name: impl Into<String>, memory_mb: u64) -> FunctionId {
        let mut state = self.lock();
        // FNV-1a over the service name, so two services never share ids
        let name_hash = self
            .name
            .as_str()
            .bytes()
            .fold(0xcbf29ce484222325u64, |hash, byte| (hash ^ byte as u64).wrapping_mul(0x100000001b3));
        let id = FunctionId::from_seed(name_hash ^ state.next_function);
        state.next_function += 1;

        let spec = FunctionSpec::new(id, name, memory_mb);
        debug!("Service {} registered function {} ({})", self.name, spec.name, id);
        state.functions.insert(id, spec);
        id
    }

    /// Returns the spec of a registered function.
    pub fn function(&self, id: FunctionId) -> Option<FunctionSpec> {
        self.lock().functions.get(&id).cloned()
    }

    /// Submits an invocation of `function` that runs for `work` once started.
    ///
    /// `work` must fit in virtual time counted from now, otherwise the
    /// invocation is rejected with [`EnvError::TimeOverflow`].
    pub fn invoke(&self, function: FunctionId, work: Duration) -> Result<InvocationId, ServiceError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(ServiceError::Closed(self.name.clone()));
        }

        let spec = state
            .functions
            .get(&function)
            .cloned()
            .ok_or(ServiceError::UnknownFunction(function))?;

        let now = self.dispatcher.now();
        EnvError::checked_after(now, work)?;

        let id = InvocationId(state.next_invocation);
        state.next_invocation += 1;

        let invocation = PendingInvocation {
            id,
            function,
            work,
            submitted_at: now,
        };

        let candidates = state.deployer.instances_of(function);
        let routed = state
            .routing
            .select_instance(&invocation, &candidates)
            .filter(|instance| {
                let owned = state.deployer.owns(*instance);
                if !owned {
                    warn!("Routing policy selected unknown {}, deploying instead", instance);
                }
                owned
            });

        let instance = match routed {
            Some(instance) => {
                state.stats.warm_starts += 1;
                instance
            }
            None => {
                let deployment = state.deployer.deploy(&spec)?;
                match deployment.cold_start {
                    Some(delay) => {
                        state.stats.cold_starts += 1;
                        state.stats.total_cold_start = state.stats.total_cold_start.saturating_add(delay);
                        state.stats.max_cold_start = state.stats.max_cold_start.max(delay);
                    }
                    None => state.stats.warm_starts += 1,
                }
                deployment.instance
            }
        };

        state.stats.invocations += 1;
        state.deployer.enqueue(instance, invocation);
        self.start_next(state, instance)?;

        Ok(id)
    }

    /// Applies a dispatcher event addressed to this service.
    pub fn handle_event(&self, kind: EventKind) -> Result<(), ServiceError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.closed {
            // Close cancels every pending event, so this only happens if the
            // driver delivered an event it had already popped.
            warn!("Service {} is closed, dropping {:?}", self.name, kind);
            return Ok(());
        }

        match kind {
            EventKind::InstanceReady { instance } => {
                if !state.deployer.mark_ready(instance) {
                    warn!("Ready event for {} which is not provisioning", instance);
                    return Ok(());
                }
                debug!("{} ready at {:?}", instance, self.dispatcher.now());
                self.start_next(state, instance)?;
            }
            EventKind::InvocationFinished { instance, invocation } => {
                match state.deployer.complete(instance) {
                    Some(finished) if finished.id == invocation => {
                        state.stats.completed += 1;
                    }
                    other => {
                        warn!("Unexpected completion of {} on {} (running: {:?})", invocation, instance, other);
                    }
                }
                self.start_next(state, instance)?;
            }
            EventKind::IdleCheck { instance } => {
                state.deployer.clear(instance, EventSlot::IdleCheck);
                self.check_idle(state, instance)?;
            }
        }

        Ok(())
    }

    /// Starts queued work on an idle instance, or arms its idle check.
    fn start_next(&self, state: &mut ServiceState, instance: InstanceId) -> Result<(), ServiceError> {
        if let Some(invocation) = state.deployer.begin_next(instance) {
            let scheduled = self.dispatcher.schedule_after(
                invocation.work,
                SimEvent::new(
                    self.name.clone(),
                    EventKind::InvocationFinished {
                        instance,
                        invocation: invocation.id,
                    },
                ),
            );
            return match scheduled {
                Ok(event) => {
                    state.deployer.track(instance, EventSlot::Finish, event);
                    Ok(())
                }
                Err(e) => {
                    warn!("Dropping {} on {}: {}", invocation.id, instance, e);
                    state.deployer.abort_running(instance);
                    self.arm_idle_check(state, instance)?;
                    Err(e.into())
                }
            };
        }

        self.arm_idle_check(state, instance)
    }

    fn arm_idle_check(&self, state: &mut ServiceState, instance: InstanceId) -> Result<(), ServiceError> {
        let Some(view) = state.deployer.instance(instance) else {
            return Ok(());
        };
        if view.state != InstanceState::Idle || view.queued > 0 {
            return Ok(());
        }

        if let Some(after) = state.termination.keep_alive(&view) {
            let event = self
                .dispatcher
                .schedule_after(after, SimEvent::new(self.name.clone(), EventKind::IdleCheck { instance }))?;
            state.deployer.track(instance, EventSlot::IdleCheck, event);
        }
        Ok(())
    }

    fn check_idle(&self, state: &mut ServiceState, instance: InstanceId) -> Result<(), ServiceError> {
        let Some(view) = state.deployer.instance(instance) else {
            return Ok(());
        };
        let Some(idle_since) = view.idle_since.filter(|_| view.state == InstanceState::Idle) else {
            return Ok(());
        };

        let idle = self.dispatcher.now().saturating_sub(idle_since);
        if state.termination.should_terminate(&view, idle) {
            state.deployer.reclaim(instance);
            return Ok(());
        }

        // Not yet; look again later unless the policy would spin at this instant
        if let Some(after) = state.termination.keep_alive(&view).filter(|after| !after.is_zero()) {
            let event = self
                .dispatcher
                .schedule_after(after, SimEvent::new(self.name.clone(), EventKind::IdleCheck { instance }))?;
            state.deployer.track(instance, EventSlot::IdleCheck, event);
        }
        Ok(())
    }

    /// Shuts the service down.
    ///
    /// Cancels every pending event and reclaims every instance, so no
    /// scheduled event refers to this service afterwards.
    ///
    /// # Panics
    /// If the service was already closed. Shutdown happens exactly once,
    /// through the disposal handle.
    pub fn close(&self) {
        let mut state = self.lock();
        assert!(
            !state.closed,
            "contract violation: service '{}' shut down twice",
            self.name
        );

        state.closed = true;
        let reclaimed = state.deployer.shutdown();
        info!(
            "Service {} shut down at {:?}, reclaimed {} instances",
            self.name,
            self.dispatcher.now(),
            reclaimed
        );
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Returns a snapshot of the service counters.
    pub fn stats(&self) -> ServiceStats {
        let state = self.lock();
        let deployer = state.deployer.stats();

        ServiceStats {
            instances_deployed: deployer.deployed,
            instances_reclaimed: deployer.reclaimed,
            peak_instances: deployer.peak_instances,
            ..state.stats.clone()
        }
    }

    /// Runs `f` with read access to the deployer.
    pub fn with_deployer<R>(&self, f: impl FnOnce(&SimFunctionDeployer) -> R) -> R {
        f(&self.lock().deployer)
    }
}

impl std::fmt::Debug for FaasService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaasService").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::DelayInjector;
    use crate::delay_model::{ColdStartModel, DelayModel};
    use crate::machine::MachineProfile;
    use crate::routing::FirstIdleRouting;
    use crate::termination::{FixedKeepAlive, NeverTerminate};
    use crate::testing::ManualDispatcher;

    fn service(
        cold_start_ms: Option<f64>,
        termination: Box<dyn TerminationPolicy>,
    ) -> (Arc<ManualDispatcher>, FaasService) {
        let dispatcher = Arc::new(ManualDispatcher::default());
        let model = cold_start_ms
            .map(|millis| Arc::new(ColdStartModel::Constant { millis }) as Arc<dyn DelayModel>);
        let deployer = SimFunctionDeployer::new(
            dispatcher.clone(),
            MachineProfile::default(),
            DelayInjector::from_model(model, 1),
        );
        let service = FaasService::new(
            ServiceName::new("faas"),
            dispatcher.clone(),
            deployer,
            Box::new(FirstIdleRouting),
            termination,
        );
        (dispatcher, service)
    }

    fn run_until(dispatcher: &ManualDispatcher, service: &FaasService, until: Duration) {
        while let Some(event) = dispatcher.pop_until(until) {
            assert_eq!(event.target, *service.name());
            service.handle_event(event.kind).unwrap();
        }
        dispatcher.set_time(until);
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_cold_invocation_runs_after_ready() {
        let (dispatcher, service) = service(Some(5000.0), Box::new(NeverTerminate));
        let f = service.register_function("resize", 256);

        service.invoke(f, secs(1)).unwrap();
        let stats = service.stats();
        assert_eq!(stats.cold_starts, 1);
        assert_eq!(stats.total_cold_start, secs(5));

        run_until(&dispatcher, &service, secs(5));
        assert_eq!(service.stats().completed, 0);

        run_until(&dispatcher, &service, secs(6));
        assert_eq!(service.stats().completed, 1);
        assert!(dispatcher.pending().is_empty());
    }

    #[test]
    fn test_warm_start_after_completion() {
        let (dispatcher, service) = service(Some(1000.0), Box::new(NeverTerminate));
        let f = service.register_function("resize", 256);

        service.invoke(f, secs(1)).unwrap();
        run_until(&dispatcher, &service, secs(3));

        service.invoke(f, secs(1)).unwrap();
        let stats = service.stats();
        assert_eq!(stats.cold_starts, 1);
        assert_eq!(stats.warm_starts, 1);
        assert_eq!(stats.instances_deployed, 1);

        run_until(&dispatcher, &service, secs(4));
        assert_eq!(service.stats().completed, 2);
    }

    #[test]
    fn test_concurrent_invocations_scale_out() {
        let (dispatcher, service) = service(Some(500.0), Box::new(NeverTerminate));
        let f = service.register_function("resize", 256);

        for _ in 0..3 {
            service.invoke(f, secs(2)).unwrap();
        }

        let stats = service.stats();
        assert_eq!(stats.cold_starts, 3);
        assert_eq!(stats.peak_instances, 3);

        run_until(&dispatcher, &service, secs(10));
        assert_eq!(service.stats().completed, 3);
    }

    #[test]
    fn test_keep_alive_reclaims_idle_instance() {
        let (dispatcher, service) = service(Some(1000.0), Box::new(FixedKeepAlive::new(secs(10))));
        let f = service.register_function("resize", 256);

        service.invoke(f, secs(1)).unwrap();
        // Ready at 1s, finished at 2s, idle check at 12s
        run_until(&dispatcher, &service, secs(11));
        assert_eq!(service.stats().instances_reclaimed, 0);

        run_until(&dispatcher, &service, secs(12));
        assert_eq!(service.stats().instances_reclaimed, 1);
        assert!(dispatcher.pending().is_empty());
        service.with_deployer(|deployer| assert_eq!(deployer.live_instances(), 0));
    }

    #[test]
    fn test_new_work_cancels_idle_check() {
        let (dispatcher, service) = service(Some(0.0), Box::new(FixedKeepAlive::new(secs(10))));
        let f = service.register_function("resize", 256);

        service.invoke(f, secs(1)).unwrap();
        run_until(&dispatcher, &service, secs(5));

        service.invoke(f, secs(1)).unwrap();
        run_until(&dispatcher, &service, secs(12));
        // The check armed at 1s was cancelled; the new one fires at 16s
        assert_eq!(service.stats().instances_reclaimed, 0);

        run_until(&dispatcher, &service, secs(16));
        assert_eq!(service.stats().instances_reclaimed, 1);
    }

    #[test]
    fn test_close_cancels_pending_events() {
        let (dispatcher, service) = service(Some(5000.0), Box::new(NeverTerminate));
        let f = service.register_function("resize", 256);

        service.invoke(f, secs(1)).unwrap();
        run_until(&dispatcher, &service, secs(2));
        assert_eq!(dispatcher.pending().len(), 1);

        service.close();

        assert!(service.is_closed());
        assert!(dispatcher.pending().is_empty());
        assert!(matches!(service.invoke(f, secs(1)), Err(ServiceError::Closed(_))));
    }

    #[test]
    #[should_panic(expected = "shut down twice")]
    fn test_double_close_panics() {
        let (_dispatcher, service) = service(None, Box::new(NeverTerminate));
        service.close();
        service.close();
    }

    #[test]
    fn test_unknown_function() {
        let (_dispatcher, service) = service(None, Box::new(NeverTerminate));
        let missing = FunctionId::from_seed(1234);
        assert!(matches!(
            service.invoke(missing, secs(1)),
            Err(ServiceError::UnknownFunction(id)) if id == missing
        ));
    }

    #[test]
    fn test_unschedulable_work_rejected() {
        let (dispatcher, service) = service(None, Box::new(NeverTerminate));
        let f = service.register_function("resize", 256);
        dispatcher.set_time(secs(1));

        let result = service.invoke(f, Duration::MAX);
        assert!(matches!(result, Err(ServiceError::Schedule(EnvError::TimeOverflow { .. }))));

        let stats = service.stats();
        assert_eq!(stats.invocations, 0);
        assert_eq!(stats.instances_deployed, 0);
        assert!(dispatcher.pending().is_empty());

        service.invoke(f, secs(1)).unwrap();
        run_until(&dispatcher, &service, secs(2));
        assert_eq!(service.stats().completed, 1);
    }

    #[test]
    fn test_work_overflowing_at_start_is_dropped() {
        let (dispatcher, service) = service(Some(5000.0), Box::new(NeverTerminate));
        let f = service.register_function("resize", 256);

        // Fits at submission, no longer fits once the cold start is paid
        service.invoke(f, Duration::MAX - secs(2)).unwrap();
        let ready = dispatcher.pop_until(secs(5)).unwrap();
        let result = service.handle_event(ready.kind);
        assert!(matches!(result, Err(ServiceError::Schedule(EnvError::TimeOverflow { .. }))));

        let instances = service.with_deployer(|deployer| deployer.instances_of(f));
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].state, InstanceState::Idle);
        assert_eq!(instances[0].queued, 0);

        // The instance is still usable
        service.invoke(f, secs(1)).unwrap();
        run_until(&dispatcher, &service, secs(6));
        let stats = service.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.warm_starts, 1);
    }

    #[test]
    fn test_huge_cold_starts_saturate_stats() {
        let (_dispatcher, service) = service(Some(1e22), Box::new(NeverTerminate));
        let f = service.register_function("resize", 256);

        service.invoke(f, secs(1)).unwrap();
        service.invoke(f, secs(1)).unwrap();

        let stats = service.stats();
        assert_eq!(stats.cold_starts, 2);
        assert_eq!(stats.total_cold_start, Duration::MAX);
        assert!(stats.mean_cold_start() >= Duration::from_secs(u64::MAX / 4));
    }

    #[test]
    fn test_function_too_large_for_machine() {
        let (_dispatcher, service) = service(None, Box::new(NeverTerminate));
        let f = service.register_function("huge", 8192);
        assert!(matches!(service.invoke(f, secs(1)), Err(ServiceError::Deploy(_))));
    }
}
