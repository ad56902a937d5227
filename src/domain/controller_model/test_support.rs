use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::domain::controller_model::agent::dispatcher::AgentRegistry;
use crate::domain::controller_model::agent::simulated_agent::{SimulatedDevice, SimulatedDeviceHandle};
use crate::domain::controller_model::executor::executable::{Executable, ExecutableId};
use crate::domain::controller_model::executor::executor::{Executor, ExecutorConfig, ExecutorRunSummary};

use crate::domain::controller_model::notification::notification::NotificationQueue;
use crate::domain::controller_model::notification::operator::RecordingOperatorReporter;
use crate::domain::controller_model::request::reservation_request::{Purpose, ReservationRequest, ReservationRequestData};
use crate::domain::controller_model::request::specification::{AliasSpecification, RoomSpecification, Specification};
use crate::domain::controller_model::resource::resource::{
    Alias, AliasProvider, AliasType, DeviceResource, RecordingCapability, RoomProviderCapability, Technology, TerminalCapability,
};
use crate::domain::controller_model::resource::resource_store::ResourceStore;
use crate::domain::controller_model::resource::value_pattern::ValuePattern;
use crate::domain::controller_model::scheduler::scheduler::{Scheduler, SchedulerRunSummary};
use crate::domain::controller_model::store::controller_store::ControllerStore;
use crate::domain::controller_model::utils::id::{AgentId, AliasProviderId, OwnerId, RequestId, ResourceId};
use crate::domain::controller_model::utils::interval::Interval;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 0, 0, 0).unwrap()
}

pub fn at(hours: i64) -> DateTime<Utc> {
    base_time() + Duration::hours(hours)
}

pub fn slot(from_h: i64, to_h: i64) -> Interval {
    Interval::new(at(from_h), at(to_h))
}

pub fn mcu(id: &str, ports: u32) -> DeviceResource {
    DeviceResource {
        id: ResourceId::new(id),
        name: id.to_uppercase(),
        agent_id: Some(AgentId::new(format!("{}-agent", id))),
        allocatable: true,
        technologies: BTreeSet::from([Technology::H323, Technology::Sip]),
        room_provider: Some(RoomProviderCapability { license_count: ports }),
        recording: None,
        terminal: None,
    }
}

pub fn recorder(id: &str, licenses: u32) -> DeviceResource {
    DeviceResource {
        id: ResourceId::new(id),
        name: id.to_uppercase(),
        agent_id: Some(AgentId::new(format!("{}-agent", id))),
        allocatable: true,
        technologies: BTreeSet::from([Technology::H323]),
        room_provider: None,
        recording: Some(RecordingCapability { license_count: licenses }),
        terminal: None,
    }
}

pub fn terminal(id: &str, number: &str) -> DeviceResource {
    DeviceResource {
        id: ResourceId::new(id),
        name: id.to_uppercase(),
        agent_id: Some(AgentId::new(format!("{}-agent", id))),
        allocatable: true,
        technologies: BTreeSet::from([Technology::H323]),
        room_provider: None,
        recording: None,
        terminal: Some(TerminalCapability { aliases: vec![Alias { alias_type: AliasType::E164, value: number.to_string() }] }),
    }
}

pub fn e164_provider(id: &str, resource: &str, pattern: &str) -> AliasProvider {
    AliasProvider {
        id: AliasProviderId::new(id),
        resource_id: ResourceId::new(resource),
        alias_type: AliasType::E164,
        pattern: ValuePattern::parse(pattern).unwrap(),
    }
}

/// One MCU with `ports` ports and an E.164 provider handing out `950087{digit:2}`.
pub fn resources(ports: u32) -> ResourceStore {
    let mut resources = ResourceStore::new();
    resources.add_resource(mcu("mcu", ports)).unwrap();
    resources.add_alias_provider(e164_provider("e164", "mcu", "950087{digit:2}")).unwrap();
    resources
}

pub fn room(participants: u32) -> Specification {
    Specification::Room(RoomSpecification {
        participant_count: participants,
        resource_id: None,
        technologies: BTreeSet::new(),
        aliases: Vec::new(),
        recording: false,
    })
}

pub fn room_with_alias(participants: u32) -> Specification {
    Specification::Room(RoomSpecification {
        participant_count: participants,
        resource_id: None,
        technologies: BTreeSet::from([Technology::H323]),
        aliases: vec![AliasSpecification { alias_type: Some(AliasType::E164), ..Default::default() }],
        recording: false,
    })
}

pub fn request_data(specification: Specification, interval: Interval, priority: i32) -> ReservationRequestData {
    ReservationRequestData {
        owner: OwnerId::new("owner"),
        purpose: Purpose::Science,
        priority,
        interval,
        specification,
        provided_reservations: Vec::new(),
        description: None,
    }
}

/// Stores a request created at `created_at` directly, bypassing the intake checks.
pub fn insert_request(store: &ControllerStore, id: &str, data: ReservationRequestData, created_at: DateTime<Utc>) -> RequestId {
    let id = RequestId::new(id);
    store
        .transaction("insert-request", |state| {
            state.requests.insert(id.clone(), ReservationRequest::new(id.clone(), data, created_at));
            Ok::<_, crate::error::Error>(())
        })
        .unwrap();
    id
}

pub struct SchedulerFixture {
    pub store: ControllerStore,
    pub scheduler: Scheduler,
    pub notifications: Arc<NotificationQueue>,
    pub operator: Arc<RecordingOperatorReporter>,
}

impl SchedulerFixture {
    pub fn new(resources: ResourceStore) -> Self {
        let store = ControllerStore::new();
        let notifications = Arc::new(NotificationQueue::new());
        let operator = Arc::new(RecordingOperatorReporter::new());
        let scheduler = Scheduler::new(Arc::new(resources), store.clone(), notifications.clone(), operator.clone());
        SchedulerFixture { store, scheduler, notifications, operator }
    }
}

pub fn executor_config() -> ExecutorConfig {
    ExecutorConfig {
        period: std::time::Duration::from_millis(10),
        start_offset: Duration::zero(),
        end_offset: Duration::zero(),
        command_timeout: std::time::Duration::from_millis(200),
        max_attempt_count: 3,
    }
}

/// Scheduler and executor over one store, with a simulated device behind every agent of `resources`.
pub struct ExecutionFixture {
    pub scheduling: SchedulerFixture,
    pub executor: Executor,
    pub registry: Arc<AgentRegistry>,
    devices: BTreeMap<String, SimulatedDeviceHandle>,
}

impl ExecutionFixture {
    pub fn new(resources: ResourceStore) -> Self {
        let config = executor_config();
        let registry = Arc::new(AgentRegistry::new(config.command_timeout));
        let mut devices = BTreeMap::new();
        for agent_id in resources.resources().filter_map(|resource| resource.agent_id.clone()) {
            let device = SimulatedDevice::new(agent_id.clone());
            devices.insert(agent_id.to_string(), device.device_handle());
            registry.spawn_agent(Box::new(device)).unwrap();
        }

        let scheduling = SchedulerFixture::new(resources);
        let executor = Executor::new(config, scheduling.store.clone(), registry.clone(), scheduling.operator.clone());
        ExecutionFixture { scheduling, executor, registry, devices }
    }

    pub fn device(&self, agent_id: &str) -> &SimulatedDeviceHandle {
        &self.devices[agent_id]
    }

    pub fn store(&self) -> &ControllerStore {
        &self.scheduling.store
    }

    pub fn schedule(&self, now_h: i64) -> SchedulerRunSummary {
        self.scheduling.scheduler.run(slot(0, 48), at(now_h), &CancellationToken::new()).unwrap()
    }

    pub fn execute(&self, now_h: i64) -> ExecutorRunSummary {
        self.executor.execute(at(now_h), &CancellationToken::new()).unwrap()
    }

    /// Executable of the current reservation of `request`.
    pub fn executable_of(&self, request: &RequestId) -> ExecutableId {
        self.store()
            .read(|state| {
                let reservation = state.request(request).unwrap().allocation.current().unwrap();
                state.reservation(reservation).unwrap().executable.unwrap()
            })
            .unwrap()
    }

    pub fn executable(&self, id: ExecutableId) -> Executable {
        self.store().read(|state| state.executable(id).unwrap().clone()).unwrap()
    }
}
