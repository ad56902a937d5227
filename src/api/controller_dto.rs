use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::domain::controller_model::executor::executor::ExecutorConfig;
use crate::domain::controller_model::request::reservation_request::{Purpose, ReservationRequestData};
use crate::domain::controller_model::request::specification::{
    AliasSpecification, CompositeSpecification, EndpointSpecification, RoomSpecification, Specification, ValueSpecification,
};
use crate::domain::controller_model::resource::resource::{
    Alias, AliasProvider, AliasType, DeviceResource, RecordingCapability, RoomProviderCapability, Technology, TerminalCapability, ValueProvider,
};
use crate::domain::controller_model::resource::value_pattern::ValuePattern;
use crate::domain::controller_model::scheduler::scheduler::SchedulerConfig;
use crate::domain::controller_model::utils::id::{AgentId, AliasProviderId, OwnerId, ResourceId, ValueProviderId};
use crate::domain::controller_model::utils::interval::Interval;
use crate::error::Error;

/// Root of a controller configuration file.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerDto {
    #[serde(default)]
    pub simulator: SimulatorDto,
    #[serde(default)]
    pub scheduler: SchedulerConfigDto,
    #[serde(default)]
    pub executor: ExecutorConfigDto,
    pub resources: Vec<DeviceResourceDto>,
    #[serde(default)]
    pub alias_providers: Vec<AliasProviderDto>,
    #[serde(default)]
    pub value_providers: Vec<ValueProviderDto>,
    #[serde(default)]
    pub agents: Vec<AgentDto>,
    #[serde(default)]
    pub requests: Vec<ReservationRequestDto>,
}

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorDto {
    pub is_simulation: bool,
    pub simulation_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfigDto {
    pub lookahead_hours: i64,
}

impl Default for SchedulerConfigDto {
    fn default() -> Self {
        SchedulerConfigDto { lookahead_hours: SchedulerConfig::default().lookahead.num_hours() }
    }
}

impl From<SchedulerConfigDto> for SchedulerConfig {
    fn from(dto: SchedulerConfigDto) -> Self {
        SchedulerConfig { lookahead: chrono::Duration::hours(dto.lookahead_hours) }
    }
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfigDto {
    pub period_ms: u64,
    pub start_offset_s: i64,
    pub end_offset_s: i64,
    pub command_timeout_ms: u64,
    pub max_attempt_count: u32,
}

impl Default for ExecutorConfigDto {
    fn default() -> Self {
        let config = ExecutorConfig::default();
        ExecutorConfigDto {
            period_ms: config.period.as_millis() as u64,
            start_offset_s: config.start_offset.num_seconds(),
            end_offset_s: config.end_offset.num_seconds(),
            command_timeout_ms: config.command_timeout.as_millis() as u64,
            max_attempt_count: config.max_attempt_count,
        }
    }
}

impl From<ExecutorConfigDto> for ExecutorConfig {
    fn from(dto: ExecutorConfigDto) -> Self {
        ExecutorConfig {
            period: Duration::from_millis(dto.period_ms),
            start_offset: chrono::Duration::seconds(dto.start_offset_s),
            end_offset: chrono::Duration::seconds(dto.end_offset_s),
            command_timeout: Duration::from_millis(dto.command_timeout_ms),
            max_attempt_count: dto.max_attempt_count,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasDto {
    pub alias_type: AliasType,
    pub value: String,
}

impl From<AliasDto> for Alias {
    fn from(dto: AliasDto) -> Self {
        Alias { alias_type: dto.alias_type, value: dto.value }
    }
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResourceDto {
    pub id: String,
    pub name: String,
    pub agent_id: Option<String>,
    #[serde(default = "default_allocatable")]
    pub allocatable: bool,
    #[serde(default)]
    pub technologies: BTreeSet<Technology>,
    /// Participant ports of a multipoint unit.
    pub room_ports: Option<u32>,
    pub recording_licenses: Option<u32>,
    /// Aliases of a terminal. An empty list means the device is no terminal.
    #[serde(default)]
    pub terminal_aliases: Vec<AliasDto>,
}

fn default_allocatable() -> bool {
    true
}

impl From<DeviceResourceDto> for DeviceResource {
    fn from(dto: DeviceResourceDto) -> Self {
        let terminal = if dto.terminal_aliases.is_empty() {
            None
        } else {
            Some(TerminalCapability { aliases: dto.terminal_aliases.into_iter().map(Alias::from).collect() })
        };

        DeviceResource {
            id: ResourceId::new(dto.id),
            name: dto.name,
            agent_id: dto.agent_id.map(AgentId::new),
            allocatable: dto.allocatable,
            technologies: dto.technologies,
            room_provider: dto.room_ports.map(|license_count| RoomProviderCapability { license_count }),
            recording: dto.recording_licenses.map(|license_count| RecordingCapability { license_count }),
            terminal,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasProviderDto {
    pub id: String,
    pub resource_id: String,
    pub alias_type: AliasType,
    pub pattern: String,
}

impl TryFrom<AliasProviderDto> for AliasProvider {
    type Error = Error;

    fn try_from(dto: AliasProviderDto) -> Result<Self, Self::Error> {
        Ok(AliasProvider {
            pattern: parse_pattern(&dto.pattern)?,
            id: AliasProviderId::new(dto.id),
            resource_id: ResourceId::new(dto.resource_id),
            alias_type: dto.alias_type,
        })
    }
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueProviderDto {
    pub id: String,
    pub resource_id: String,
    pub pattern: String,
}

impl TryFrom<ValueProviderDto> for ValueProvider {
    type Error = Error;

    fn try_from(dto: ValueProviderDto) -> Result<Self, Self::Error> {
        Ok(ValueProvider {
            pattern: parse_pattern(&dto.pattern)?,
            id: ValueProviderId::new(dto.id),
            resource_id: ResourceId::new(dto.resource_id),
        })
    }
}

fn parse_pattern(pattern: &str) -> Result<ValuePattern, Error> {
    ValuePattern::parse(pattern).map_err(|e| Error::ModelConstructionError(e.to_string()))
}

/// How the controller reaches the agent of a device.
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentConnectionDto {
    /// In-process device simulation.
    Simulated,
    /// Agent served over TCP, e.g. by `serve_agent`.
    Remote { address: String },
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDto {
    pub id: String,
    pub connection: AgentConnectionDto,
}

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AliasSpecificationDto {
    pub alias_type: Option<AliasType>,
    pub technology: Option<Technology>,
    pub provider_id: Option<String>,
    pub value: Option<String>,
}

impl From<AliasSpecificationDto> for AliasSpecification {
    fn from(dto: AliasSpecificationDto) -> Self {
        AliasSpecification {
            alias_type: dto.alias_type,
            technology: dto.technology,
            provider_id: dto.provider_id.map(AliasProviderId::new),
            value: dto.value,
        }
    }
}

/// Specifications which can be written in a configuration file. Reuse of existing reservations needs
/// reservation ids and is only available through the controller API.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum SpecificationDto {
    Room {
        participant_count: u32,
        #[serde(default)]
        resource_id: Option<String>,
        #[serde(default)]
        technologies: BTreeSet<Technology>,
        #[serde(default)]
        aliases: Vec<AliasSpecificationDto>,
        #[serde(default)]
        recording: bool,
    },
    Alias(AliasSpecificationDto),
    Value {
        provider_id: String,
        #[serde(default)]
        value: Option<String>,
    },
    Endpoint {
        resource_id: String,
    },
    Composite {
        specifications: Vec<SpecificationDto>,
    },
}

impl From<SpecificationDto> for Specification {
    fn from(dto: SpecificationDto) -> Self {
        match dto {
            SpecificationDto::Room { participant_count, resource_id, technologies, aliases, recording } => {
                Specification::Room(RoomSpecification {
                    participant_count,
                    resource_id: resource_id.map(ResourceId::new),
                    technologies,
                    aliases: aliases.into_iter().map(AliasSpecification::from).collect(),
                    recording,
                })
            }
            SpecificationDto::Alias(alias) => Specification::Alias(alias.into()),
            SpecificationDto::Value { provider_id, value } => {
                Specification::Value(ValueSpecification { provider_id: ValueProviderId::new(provider_id), value })
            }
            SpecificationDto::Endpoint { resource_id } => Specification::Endpoint(EndpointSpecification { resource_id: ResourceId::new(resource_id) }),
            SpecificationDto::Composite { specifications } => {
                Specification::Composite(CompositeSpecification { specifications: specifications.into_iter().map(Specification::from).collect() })
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequestDto {
    pub owner: String,
    pub purpose: Purpose,
    #[serde(default)]
    pub priority: i32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub specification: SpecificationDto,
    pub description: Option<String>,
}

impl TryFrom<ReservationRequestDto> for ReservationRequestData {
    type Error = Error;

    fn try_from(dto: ReservationRequestDto) -> Result<Self, Self::Error> {
        let interval = Interval::try_new(dto.start, dto.end)
            .ok_or_else(|| Error::ModelConstructionError(format!("Request of '{}' ends before it starts", dto.owner)))?;

        Ok(ReservationRequestData {
            owner: OwnerId::new(dto.owner),
            purpose: dto.purpose,
            priority: dto.priority,
            interval,
            specification: dto.specification.into(),
            provided_reservations: Vec::new(),
            description: dto.description,
        })
    }
}
