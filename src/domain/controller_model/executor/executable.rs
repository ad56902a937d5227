use serde::{Deserialize, Serialize};
use slotmap::{Key, new_key_type};
use std::collections::BTreeSet;

use crate::domain::controller_model::executor::execution_report::ExecutionReport;
use crate::domain::controller_model::resource::resource::{Alias, Technology};
use crate::domain::controller_model::utils::id::{AgentId, ResourceId};
use crate::domain::controller_model::utils::interval::Interval;

new_key_type! {
    pub struct ExecutableId;
}

/// Lifecycle of an executable.
///
/// ```text
/// NotStarted --activate--> Started | StartingFailed
/// Started --deactivate--> Stopped | StoppingFailed
/// StartingFailed / StoppingFailed are retried by later executor passes.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutableState {
    NotStarted,
    Started,
    StartingFailed,
    Stopped,
    StoppingFailed,
}

impl ExecutableState {
    /// The executable holds something on a device which must be released.
    pub fn is_active(&self) -> bool {
        matches!(self, ExecutableState::Started | ExecutableState::StoppingFailed)
    }

    pub fn is_startable(&self) -> bool {
        matches!(self, ExecutableState::NotStarted | ExecutableState::StartingFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEndpoint {
    pub resource_id: ResourceId,
    pub agent_id: AgentId,
    pub port_count: u32,
    pub technologies: BTreeSet<Technology>,
    pub aliases: Vec<Alias>,
    /// Name the room is created with, used to find the room again on the device.
    pub room_name: String,
    pub remote_room_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub resource_id: ResourceId,
    pub agent_id: AgentId,
    pub aliases: Vec<Alias>,
}

/// Call from an endpoint into a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub endpoint: ExecutableId,
    pub room: ExecutableId,
    pub alias: Alias,
    pub call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compartment {
    /// Rooms and endpoints first, connections last.
    pub children: Vec<ExecutableId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingService {
    pub resource_id: ResourceId,
    pub agent_id: AgentId,
    pub room: ExecutableId,
    pub recording_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutableKind {
    Room(RoomEndpoint),
    Endpoint(Endpoint),
    Connection(Connection),
    Compartment(Compartment),
    Recording(RecordingService),
}

impl ExecutableKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutableKind::Room(_) => "room",
            ExecutableKind::Endpoint(_) => "endpoint",
            ExecutableKind::Connection(_) => "connection",
            ExecutableKind::Compartment(_) => "compartment",
            ExecutableKind::Recording(_) => "recording",
        }
    }

    /// Services depend on other executables and are handled after them.
    pub fn is_service(&self) -> bool {
        matches!(self, ExecutableKind::Recording(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    pub id: ExecutableId,
    pub interval: Interval,
    pub state: ExecutableState,
    pub kind: ExecutableKind,
    pub reports: Vec<ExecutionReport>,
    /// Failed activations since the last successful one.
    pub attempt_count: u32,
    /// Room of the preceding reservation which this room takes over.
    pub migrated_from: Option<ExecutableId>,
    /// Compartment this executable belongs to; such executables are driven by their parent.
    pub parent: Option<ExecutableId>,
}

impl Executable {
    pub fn new(id: ExecutableId, interval: Interval, kind: ExecutableKind) -> Self {
        Executable {
            id,
            interval,
            state: ExecutableState::NotStarted,
            kind,
            reports: Vec::new(),
            attempt_count: 0,
            migrated_from: None,
            parent: None,
        }
    }

    pub fn describe(&self) -> String {
        format!("{} {}", self.kind.name(), self.id.data().as_ffi())
    }

    /// Executables referenced by this one (compartment children, connection ends, recorded room).
    pub fn dependencies(&self) -> Vec<ExecutableId> {
        match &self.kind {
            ExecutableKind::Compartment(compartment) => compartment.children.clone(),
            ExecutableKind::Connection(connection) => vec![connection.endpoint, connection.room],
            ExecutableKind::Recording(recording) => vec![recording.room],
            ExecutableKind::Room(_) | ExecutableKind::Endpoint(_) => Vec::new(),
        }
    }

    pub fn last_report(&self) -> Option<&ExecutionReport> {
        self.reports.last()
    }
}
