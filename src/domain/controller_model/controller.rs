use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::api::controller_dto::{AgentConnectionDto, ControllerDto};
use crate::domain::controller_model::agent::command::CommandResult;
use crate::domain::controller_model::agent::dispatcher::{AgentRegistry, CommandDispatch, DeviceAgent};
use crate::domain::controller_model::agent::remote_agent::RemoteAgent;
use crate::domain::controller_model::agent::simulated_agent::{SimulatedDevice, SimulatedDeviceHandle};
use crate::domain::controller_model::executor::executable::{Executable, ExecutableId, ExecutableKind};
use crate::domain::controller_model::executor::executor::{Executor, ExecutorConfig, ExecutorRunSummary, RoomControl};
use crate::domain::controller_model::notification::notification::{LogNotificationSink, NotificationSink};
use crate::domain::controller_model::notification::operator::{LogOperatorReporter, OperatorReporter};
use crate::domain::controller_model::request::reservation_request::{RequestState, ReservationRequest, ReservationRequestData};
use crate::domain::controller_model::request::specification::Specification;
use crate::domain::controller_model::resource::resource::{AliasProvider, DeviceResource, ValueProvider};
use crate::domain::controller_model::resource::resource_store::ResourceStore;
use crate::domain::controller_model::scheduler::scheduler::{Scheduler, SchedulerConfig, SchedulerRunSummary};
use crate::domain::controller_model::store::controller_store::{ControllerStore, StoreState};
use crate::domain::controller_model::utils::id::{AgentId, OwnerId, RequestId};
use crate::domain::controller_model::utils::interval::Interval;
use crate::domain::simulator::simulator::SystemSimulator;
use crate::error::{Error, Result};

/// Selects requests in [`Controller::list_reservation_requests`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub owner: Option<OwnerId>,
    pub state: Option<RequestState>,
    pub interval: Option<Interval>,
}

impl RequestFilter {
    fn matches(&self, request: &ReservationRequest) -> bool {
        self.owner.as_ref().is_none_or(|owner| *owner == request.owner)
            && self.state.is_none_or(|state| state == request.state)
            && self.interval.is_none_or(|interval| interval.overlaps(&request.interval))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub scheduler: SchedulerRunSummary,
    pub executor: ExecutorRunSummary,
}

/// Entry point of the controller: request intake plus the scheduler and executor working on one store.
#[derive(Debug)]
pub struct Controller {
    resources: Arc<ResourceStore>,
    store: ControllerStore,
    scheduler_config: SchedulerConfig,
    scheduler: Scheduler,
    executor: Executor,
    simulator: Arc<dyn SystemSimulator>,
    simulated_devices: BTreeMap<AgentId, SimulatedDeviceHandle>,
}

impl Controller {
    pub fn new(
        resources: ResourceStore,
        scheduler_config: SchedulerConfig,
        executor_config: ExecutorConfig,
        dispatcher: Arc<dyn CommandDispatch>,
        notification_sink: Arc<dyn NotificationSink>,
        operator: Arc<dyn OperatorReporter>,
        simulator: Arc<dyn SystemSimulator>,
    ) -> Self {
        let resources = Arc::new(resources);
        let store = ControllerStore::new();
        let scheduler = Scheduler::new(resources.clone(), store.clone(), notification_sink, operator.clone());
        let executor = Executor::new(executor_config, store.clone(), dispatcher, operator);
        Controller { resources, store, scheduler_config, scheduler, executor, simulator, simulated_devices: BTreeMap::new() }
    }

    /// Builds a controller from a configuration file's content: resources, agents and the initial
    /// reservation requests.
    pub fn from_dto(dto: ControllerDto, simulator: Arc<dyn SystemSimulator>) -> Result<Controller> {
        let executor_config = ExecutorConfig::from(dto.executor);

        let mut resources = ResourceStore::new();
        for resource in dto.resources {
            resources.add_resource(DeviceResource::from(resource))?;
        }
        for provider in dto.alias_providers {
            resources.add_alias_provider(AliasProvider::try_from(provider)?)?;
        }
        for provider in dto.value_providers {
            resources.add_value_provider(ValueProvider::try_from(provider)?)?;
        }

        let registry = Arc::new(AgentRegistry::new(executor_config.command_timeout));
        let mut simulated_devices = BTreeMap::new();
        for agent in dto.agents {
            let id = AgentId::new(agent.id);
            let device: Box<dyn DeviceAgent> = match agent.connection {
                AgentConnectionDto::Simulated => {
                    let device = SimulatedDevice::new(id.clone());
                    simulated_devices.insert(id, device.device_handle());
                    Box::new(device)
                }
                AgentConnectionDto::Remote { address } => Box::new(RemoteAgent::new(id, address, executor_config.command_timeout)),
            };
            registry.spawn_agent(device)?;
        }
        for resource in resources.resources() {
            if let Some(agent_id) = &resource.agent_id {
                if registry.proxy(agent_id).is_none() {
                    log::warn!("Resource '{}' is controlled by agent '{}' which is not configured.", resource.id, agent_id);
                }
            }
        }

        let mut controller = Controller::new(
            resources,
            dto.scheduler.into(),
            executor_config,
            registry,
            Arc::new(LogNotificationSink),
            Arc::new(LogOperatorReporter),
            simulator,
        );
        controller.simulated_devices = simulated_devices;

        for request in dto.requests {
            controller.create_reservation_request(request.try_into()?)?;
        }
        log::info!("Controller constructed with {} resources.", controller.resources.resources().count());
        Ok(controller)
    }

    pub fn store(&self) -> &ControllerStore {
        &self.store
    }

    pub fn resources(&self) -> &ResourceStore {
        &self.resources
    }

    /// Handle of an in-process simulated device created from the configuration.
    pub fn simulated_device(&self, agent_id: &AgentId) -> Option<SimulatedDeviceHandle> {
        self.simulated_devices.get(agent_id).cloned()
    }

    pub fn executor_config(&self) -> &ExecutorConfig {
        self.executor.config()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.simulator.now()
    }

    pub fn create_reservation_request(&self, data: ReservationRequestData) -> Result<RequestId> {
        let id = RequestId::generate();
        let now = self.now();
        self.store.transaction("create-reservation-request", |state| {
            Self::validate(state, &data)?;
            state.requests.insert(id.clone(), ReservationRequest::new(id.clone(), data, now));
            Ok::<_, Error>(())
        })?;
        log::info!("Reservation request '{}' created.", id);
        Ok(id)
    }

    /// Replaces the request's data. The request is scheduled again, its current reservation is kept
    /// or migrated by the next scheduler run.
    pub fn modify_reservation_request(&self, id: &RequestId, data: ReservationRequestData) -> Result<()> {
        let now = self.now();
        self.store.transaction("modify-reservation-request", |state| {
            Self::validate(state, &data)?;
            let request = state.request_mut(id)?;
            if request.interval.end <= now {
                return Err(Error::RequestNotModifiable { id: id.to_string(), reason: "its interval has already ended".to_string() });
            }
            request.apply(data);
            Ok(())
        })?;
        log::info!("Reservation request '{}' modified.", id);
        Ok(())
    }

    /// Removes the request and marks its reservations for deletion by the next scheduler run. Refused
    /// while another request reuses one of the reservations.
    pub fn delete_reservation_request(&self, id: &RequestId) -> Result<()> {
        self.store.transaction("delete-reservation-request", |state| {
            let reservations = state.request(id)?.allocation.reservations().to_vec();

            for reservation in &reservations {
                for member in state.reservation_tree(*reservation) {
                    let foreign = state.reservations_reusing(member).into_iter().find(|r| match &r.request_id {
                        Some(user) => user != id && state.requests.contains_key(user),
                        None => true,
                    });
                    if let Some(user) = foreign {
                        let user = user.request_id.as_ref().map(|r| r.to_string()).unwrap_or_default();
                        return Err(Error::RequestNotModifiable {
                            id: id.to_string(),
                            reason: format!("its reservation is reused by request '{}'", user),
                        });
                    }
                }
            }

            for reservation in reservations {
                if let Some(reservation) = state.reservations.get_mut(reservation) {
                    reservation.marked_for_deletion = true;
                }
            }
            state.requests.remove(id);
            Ok(())
        })?;
        log::info!("Reservation request '{}' deleted.", id);
        Ok(())
    }

    pub fn list_reservation_requests(&self, filter: &RequestFilter) -> Result<Vec<ReservationRequest>> {
        self.store.read(|state| state.requests.values().filter(|request| filter.matches(request)).cloned().collect())
    }

    pub fn get_reservation_request(&self, id: &RequestId) -> Result<ReservationRequest> {
        self.store.read(|state| state.request(id).cloned())?
    }

    pub fn executables(&self) -> Result<Vec<Executable>> {
        self.store.read(|state| state.executables.values().cloned().collect())
    }

    pub fn run_scheduler(&self, cancel: &CancellationToken) -> Result<SchedulerRunSummary> {
        let now = self.now();
        self.scheduler.run(self.scheduler_config.window(now), now, cancel)
    }

    pub fn run_executor(&self, cancel: &CancellationToken) -> Result<ExecutorRunSummary> {
        self.executor.execute(self.now(), cancel)
    }

    /// One scheduler run followed by one executor pass.
    pub fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleSummary> {
        let scheduler = self.run_scheduler(cancel)?;
        let executor = if cancel.is_cancelled() {
            ExecutorRunSummary { cancelled: true, ..Default::default() }
        } else {
            self.run_executor(cancel)?
        };
        Ok(CycleSummary { scheduler, executor })
    }

    /// Forwards `action` to the room of the request's current reservation.
    pub fn control_room(&self, request: &RequestId, action: RoomControl) -> Result<CommandResult> {
        let room = self.store.read(|state| Self::room_of(state, request))??;
        self.executor.control_room(room, action)
    }

    fn room_of(state: &StoreState, request: &RequestId) -> Result<ExecutableId> {
        let reservation = state.request(request)?.allocation.current().ok_or_else(|| Error::not_found("Reservation of request", request))?;
        let executable = state.reservation(reservation)?.executable.ok_or_else(|| Error::not_found("Room of request", request))?;
        match &state.executable(executable)?.kind {
            ExecutableKind::Room(_) => Ok(executable),
            ExecutableKind::Compartment(compartment) => compartment
                .children
                .iter()
                .copied()
                .find(|child| matches!(state.executables.get(*child).map(|e| &e.kind), Some(ExecutableKind::Room(_))))
                .ok_or_else(|| Error::not_found("Room of request", request)),
            _ => Err(Error::not_found("Room of request", request)),
        }
    }

    fn validate(state: &StoreState, data: &ReservationRequestData) -> Result<()> {
        if data.interval.is_empty() {
            return Err(Error::InvalidRequest(format!("interval {} is empty", data.interval)));
        }

        let provided: HashSet<_> = data.provided_reservations.iter().copied().collect();
        for reservation in &provided {
            state.reservation(*reservation)?;
        }

        let mut stack = vec![&data.specification];
        while let Some(specification) = stack.pop() {
            match specification {
                Specification::Composite(composite) => stack.extend(composite.specifications.iter()),
                Specification::ExistingReservation(existing) if !provided.contains(&existing.reservation_id) => {
                    return Err(Error::InvalidRequest(format!("reservation {:?} is used but not provided", existing.reservation_id)));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::controller_model::agent::dispatcher::AgentRegistry;
    use crate::domain::controller_model::agent::simulated_agent::SimulatedDevice;
    use crate::domain::controller_model::notification::notification::NotificationQueue;
    use crate::domain::controller_model::notification::operator::RecordingOperatorReporter;
    use crate::domain::controller_model::request::specification::ExistingReservationSpecification;
    use crate::domain::controller_model::test_support::*;
    use crate::domain::controller_model::utils::id::AgentId;
    use crate::domain::simulator::simulator_mock::MockSimulator;

    struct Setup {
        controller: Controller,
        clock: MockSimulator,
        notifications: Arc<NotificationQueue>,
        _registry: Arc<AgentRegistry>,
    }

    fn setup() -> Setup {
        let registry = Arc::new(AgentRegistry::new(std::time::Duration::from_millis(200)));
        registry.spawn_agent(Box::new(SimulatedDevice::new(AgentId::new("mcu-agent")))).unwrap();
        let clock = MockSimulator::new(at(8));
        let notifications = Arc::new(NotificationQueue::new());
        let controller = Controller::new(
            resources(10),
            SchedulerConfig::default(),
            executor_config(),
            registry.clone(),
            notifications.clone(),
            Arc::new(RecordingOperatorReporter::new()),
            Arc::new(clock.clone()),
        );
        Setup { controller, clock, notifications, _registry: registry }
    }

    #[test]
    fn test_request_lifecycle() {
        let setup = setup();
        let controller = &setup.controller;
        let id = controller.create_reservation_request(request_data(room_with_alias(4), slot(12, 14), 0)).unwrap();
        assert_eq!(controller.get_reservation_request(&id).unwrap().state, RequestState::Complete);

        let summary = controller.run_cycle(&CancellationToken::new()).unwrap();
        assert_eq!(summary.scheduler.allocated, vec![id.clone()]);
        assert_eq!(summary.executor.started, 0);

        setup.clock.set_time(at(12));
        let summary = controller.run_cycle(&CancellationToken::new()).unwrap();
        assert_eq!(summary.executor.started, 1);

        controller.delete_reservation_request(&id).unwrap();
        assert!(controller.get_reservation_request(&id).is_err());
        let summary = controller.run_cycle(&CancellationToken::new()).unwrap();
        assert_eq!(summary.scheduler.deleted_reservations, 1);
        assert_eq!(summary.executor.stopped, 1);
        assert!(controller.executables().unwrap().is_empty());
        assert_eq!(setup.notifications.drain().len(), 2);
    }

    #[test]
    fn test_list_filters_by_state() {
        let setup = setup();
        let controller = &setup.controller;
        let fits = controller.create_reservation_request(request_data(room(4), slot(12, 14), 0)).unwrap();
        let too_big = controller.create_reservation_request(request_data(room(20), slot(12, 14), 0)).unwrap();
        controller.run_scheduler(&CancellationToken::new()).unwrap();

        let failed = controller
            .list_reservation_requests(&RequestFilter { state: Some(RequestState::AllocationFailed), ..Default::default() })
            .unwrap();
        assert_eq!(failed.iter().map(|r| r.id.clone()).collect::<Vec<_>>(), vec![too_big]);
        let later = RequestFilter { interval: Some(slot(20, 22)), ..Default::default() };
        assert!(controller.list_reservation_requests(&later).unwrap().is_empty());
        assert_eq!(controller.list_reservation_requests(&RequestFilter::default()).unwrap().len(), 2);
        assert_eq!(controller.get_reservation_request(&fits).unwrap().state, RequestState::Allocated);
    }

    #[test]
    fn test_reused_reservation_cannot_be_deleted() {
        let setup = setup();
        let controller = &setup.controller;
        let provider = controller.create_reservation_request(request_data(room_with_alias(4), slot(10, 16), 0)).unwrap();
        controller.run_scheduler(&CancellationToken::new()).unwrap();
        let reservation = controller.get_reservation_request(&provider).unwrap().allocation.current().unwrap();

        let mut data = request_data(
            Specification::ExistingReservation(ExistingReservationSpecification { reservation_id: reservation }),
            slot(12, 14),
            0,
        );
        data.provided_reservations = vec![reservation];
        let user = controller.create_reservation_request(data).unwrap();
        controller.run_scheduler(&CancellationToken::new()).unwrap();
        assert_eq!(controller.get_reservation_request(&user).unwrap().state, RequestState::Allocated);

        let refused = controller.delete_reservation_request(&provider);
        assert!(matches!(refused, Err(Error::RequestNotModifiable { .. })));

        controller.delete_reservation_request(&user).unwrap();
        controller.delete_reservation_request(&provider).unwrap();
    }

    #[test]
    fn test_invalid_requests_are_rejected() {
        let setup = setup();
        let controller = &setup.controller;

        let empty = controller.create_reservation_request(request_data(room(4), slot(12, 12), 0));
        assert!(matches!(empty, Err(Error::InvalidRequest(_))));

        let id = controller.create_reservation_request(request_data(room(4), slot(12, 14), 0)).unwrap();
        controller.run_scheduler(&CancellationToken::new()).unwrap();
        let reservation = controller.get_reservation_request(&id).unwrap().allocation.current().unwrap();
        let unprovided = request_data(
            Specification::ExistingReservation(ExistingReservationSpecification { reservation_id: reservation }),
            slot(12, 14),
            0,
        );
        assert!(matches!(controller.create_reservation_request(unprovided), Err(Error::InvalidRequest(_))));

        setup.clock.set_time(at(15));
        let late = controller.modify_reservation_request(&id, request_data(room(2), slot(12, 14), 0));
        assert!(matches!(late, Err(Error::RequestNotModifiable { .. })));
    }
}
