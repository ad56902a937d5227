use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::domain::controller_model::agent::command::{Command, CommandPayload, CommandResult, RoomDescription};
use crate::domain::controller_model::agent::dispatcher::CommandDispatch;
use crate::domain::controller_model::executor::executable::{Executable, ExecutableId, ExecutableKind, ExecutableState, RoomEndpoint};
use crate::domain::controller_model::executor::execution_report::{ExecutionReport, ExecutionReportKind};
use crate::domain::controller_model::resource::resource::Alias;
use crate::domain::controller_model::store::controller_store::StoreState;
use crate::domain::controller_model::utils::id::AgentId;

/// Informational report on success, failure report otherwise.
type Step = std::result::Result<Option<ExecutionReportKind>, ExecutionReportKind>;

/// Copies of the executables one worker drives. Only the worker touches them until the changes are
/// written back to the store.
#[derive(Debug, Default)]
pub struct WorkSet {
    executables: BTreeMap<ExecutableId, Executable>,
    initial_states: BTreeMap<ExecutableId, ExecutableState>,
    changed: BTreeSet<ExecutableId>,
}

impl WorkSet {
    /// `root` with everything it depends on and the room it takes over.
    pub fn collect(state: &StoreState, root: ExecutableId) -> Self {
        let mut work = WorkSet::default();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if work.executables.contains_key(&id) {
                continue;
            }
            let Some(executable) = state.executables.get(id) else {
                continue;
            };
            stack.extend(executable.dependencies());
            if let Some(source) = executable.migrated_from {
                stack.push(source);
            }
            work.initial_states.insert(id, executable.state);
            work.executables.insert(id, executable.clone());
        }
        work
    }

    pub fn get(&self, id: ExecutableId) -> Option<&Executable> {
        self.executables.get(&id)
    }

    fn state(&self, id: ExecutableId) -> Option<ExecutableState> {
        self.executables.get(&id).map(|e| e.state)
    }

    fn update<R>(&mut self, id: ExecutableId, f: impl FnOnce(&mut Executable) -> R) -> Option<R> {
        let executable = self.executables.get_mut(&id)?;
        self.changed.insert(id);
        Some(f(executable))
    }

    /// `(id, state before, state after)` of every executable whose state changed.
    pub fn transitions(&self) -> Vec<(ExecutableId, ExecutableState, ExecutableState)> {
        self.executables
            .iter()
            .filter_map(|(id, e)| {
                let before = self.initial_states.get(id).copied()?;
                (before != e.state).then_some((*id, before, e.state))
            })
            .collect()
    }

    pub fn into_changed(self) -> Vec<Executable> {
        let WorkSet { mut executables, changed, .. } = self;
        changed.into_iter().filter_map(|id| executables.remove(&id)).collect()
    }
}

fn room_description(room: &RoomEndpoint) -> RoomDescription {
    RoomDescription {
        name: room.room_name.clone(),
        port_count: room.port_count,
        technologies: room.technologies.clone(),
        aliases: room.aliases.clone(),
    }
}

/// Drives executables through their lifecycle by talking to their agents.
pub struct Activation<'a> {
    dispatcher: &'a dyn CommandDispatch,
    now: DateTime<Utc>,
    timeout: Duration,
}

impl<'a> Activation<'a> {
    pub fn new(dispatcher: &'a dyn CommandDispatch, now: DateTime<Utc>, timeout: Duration) -> Self {
        Activation { dispatcher, now, timeout }
    }

    fn send(&self, agent_id: &AgentId, command: Command) -> std::result::Result<CommandPayload, ExecutionReportKind> {
        let name = command.name();
        log::debug!("Sending '{}' to {}.", name, agent_id);
        match self.dispatcher.send(agent_id, command) {
            CommandResult::Success(payload) => Ok(payload),
            CommandResult::Failure(failure) => {
                Err(ExecutionReportKind::CommandFailed { agent_id: agent_id.clone(), command: name.to_string(), message: failure.message })
            }
            CommandResult::Timeout => Err(ExecutionReportKind::CommandTimeout {
                agent_id: agent_id.clone(),
                command: name.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    fn unexpected(agent_id: &AgentId, command: &str, payload: CommandPayload) -> ExecutionReportKind {
        ExecutionReportKind::CommandFailed {
            agent_id: agent_id.clone(),
            command: command.to_string(),
            message: format!("unexpected answer {:?}", payload),
        }
    }

    fn report(&self, work: &mut WorkSet, id: ExecutableId, kind: ExecutionReportKind) {
        let report = ExecutionReport::new(self.now, kind);
        work.update(id, |e| e.reports.push(report));
    }

    /// Activates `id`. Returns whether it is started afterwards.
    pub fn start(&self, work: &mut WorkSet, id: ExecutableId) -> bool {
        let Some((kind, migrated_from)) = work.get(id).map(|e| (e.kind.clone(), e.migrated_from)) else {
            return false;
        };

        let step = match kind {
            ExecutableKind::Room(room) => self.start_room(work, id, &room, migrated_from),
            ExecutableKind::Endpoint(_) => Ok(None),
            ExecutableKind::Connection(connection) => match Self::endpoint_agent(work, connection.endpoint) {
                Some(agent_id) => match self.send(&agent_id, Command::Dial { alias: connection.alias.clone() }) {
                    Ok(CommandPayload::CallId(call_id)) => {
                        work.update(id, |e| {
                            if let ExecutableKind::Connection(c) = &mut e.kind {
                                c.call_id = Some(call_id);
                            }
                        });
                        Ok(None)
                    }
                    Ok(other) => Err(Self::unexpected(&agent_id, "Dial", other)),
                    Err(kind) => Err(kind),
                },
                None => Err(ExecutionReportKind::DependencyNotStarted { description: "Endpoint of the connection".to_string() }),
            },
            ExecutableKind::Compartment(compartment) => self.start_compartment(work, &compartment.children),
            ExecutableKind::Recording(recording) => {
                let room = match work.get(recording.room) {
                    Some(Executable { state: ExecutableState::Started, kind: ExecutableKind::Room(room), .. }) => Some(room.room_name.clone()),
                    _ => None,
                };
                let alias = match work.get(recording.room).map(|e| &e.kind) {
                    Some(ExecutableKind::Room(room)) => room.aliases.first().cloned(),
                    _ => None,
                };
                match room {
                    Some(room_name) => self.start_recording(work, id, &recording.agent_id, room_name, alias),
                    None => Err(ExecutionReportKind::DependencyNotStarted { description: "Room of the recording".to_string() }),
                }
            }
        };

        let now = self.now;
        work.update(id, |e| match step {
            Ok(info) => {
                e.state = ExecutableState::Started;
                e.attempt_count = 0;
                if let Some(kind) = info {
                    e.reports.push(ExecutionReport::new(now, kind));
                }
                true
            }
            Err(kind) => {
                // Waiting for a dependency is not an attempt of its own.
                if !matches!(kind, ExecutionReportKind::DependencyNotStarted { .. }) {
                    e.attempt_count += 1;
                }
                e.state = ExecutableState::StartingFailed;
                e.reports.push(ExecutionReport::new(now, kind));
                false
            }
        })
        .unwrap_or(false)
    }

    fn endpoint_agent(work: &WorkSet, endpoint: ExecutableId) -> Option<AgentId> {
        match work.get(endpoint).map(|e| &e.kind) {
            Some(ExecutableKind::Endpoint(endpoint)) => Some(endpoint.agent_id.clone()),
            _ => None,
        }
    }

    fn set_remote_room_id(work: &mut WorkSet, id: ExecutableId, remote_room_id: Option<String>) {
        work.update(id, |e| {
            if let ExecutableKind::Room(room) = &mut e.kind {
                room.remote_room_id = remote_room_id;
            }
        });
    }

    /// Adopts a room already present on the device, takes over the preceding room or creates a new one.
    fn start_room(&self, work: &mut WorkSet, id: ExecutableId, room: &RoomEndpoint, migrated_from: Option<ExecutableId>) -> Step {
        let rooms = match self.send(&room.agent_id, Command::ListRooms)? {
            CommandPayload::Rooms(rooms) => rooms,
            other => return Err(Self::unexpected(&room.agent_id, "ListRooms", other)),
        };
        if let Some(existing) = rooms.into_iter().find(|r| r.description.name == room.room_name) {
            log::info!("Room '{}' already exists on {} as '{}'.", room.room_name, room.agent_id, existing.id);
            Self::set_remote_room_id(work, id, Some(existing.id.clone()));
            return Ok(Some(ExecutionReportKind::Adopted { description: format!("room '{}'", existing.id) }));
        }

        if let Some(step) = migrated_from.and_then(|source| self.migrate_room(work, id, source, room)) {
            return step;
        }

        match self.send(&room.agent_id, Command::CreateRoom { room: room_description(room) })? {
            CommandPayload::RoomId(remote_room_id) => {
                Self::set_remote_room_id(work, id, Some(remote_room_id));
                Ok(None)
            }
            other => Err(Self::unexpected(&room.agent_id, "CreateRoom", other)),
        }
    }

    /// `None` when the preceding room cannot be taken over and a new room has to be created.
    fn migrate_room(&self, work: &mut WorkSet, id: ExecutableId, source: ExecutableId, room: &RoomEndpoint) -> Option<Step> {
        let remote_room_id = match work.get(source) {
            Some(Executable { state: ExecutableState::Started, kind: ExecutableKind::Room(preceding), .. })
                if preceding.agent_id == room.agent_id =>
            {
                preceding.remote_room_id.clone()?
            }
            _ => return None,
        };

        match self.send(&room.agent_id, Command::ModifyRoom { room_id: remote_room_id.clone(), room: room_description(room) }) {
            Ok(_) => {
                Self::set_remote_room_id(work, id, Some(remote_room_id.clone()));
                Self::set_remote_room_id(work, source, None);
                work.update(source, |e| e.state = ExecutableState::Stopped);
                self.report(work, source, ExecutionReportKind::Migrated { description: format!("room '{}' to its successor", remote_room_id) });
                Some(Ok(Some(ExecutionReportKind::Migrated { description: format!("room '{}' from its predecessor", remote_room_id) })))
            }
            Err(kind) => {
                log::warn!("Room '{}' could not be taken over, a new room is created: {}", remote_room_id, ExecutionReport::new(self.now, kind));
                None
            }
        }
    }

    fn start_recording(
        &self,
        work: &mut WorkSet,
        id: ExecutableId,
        agent_id: &AgentId,
        room_name: String,
        alias: Option<Alias>,
    ) -> Step {
        let (recording_id, info) = match self.send(agent_id, Command::GetActiveRecording { room_name: room_name.clone() })? {
            CommandPayload::ActiveRecording(Some(recording_id)) => {
                let info = ExecutionReportKind::Adopted { description: format!("recording '{}'", recording_id) };
                (recording_id, Some(info))
            }
            CommandPayload::ActiveRecording(None) => match self.send(agent_id, Command::StartRecording { room_name, alias })? {
                CommandPayload::RecordingId(recording_id) => (recording_id, None),
                other => return Err(Self::unexpected(agent_id, "StartRecording", other)),
            },
            other => return Err(Self::unexpected(agent_id, "GetActiveRecording", other)),
        };

        work.update(id, |e| {
            if let ExecutableKind::Recording(recording) = &mut e.kind {
                recording.recording_id = Some(recording_id);
            }
        });
        Ok(info)
    }

    /// Starts children in order; on the first failure the already started ones are stopped again.
    fn start_compartment(&self, work: &mut WorkSet, children: &[ExecutableId]) -> Step {
        for child in children {
            if work.state(*child) == Some(ExecutableState::Started) {
                continue;
            }
            if self.start(work, *child) {
                continue;
            }

            let (child_name, cause) = match work.get(*child) {
                Some(e) => (e.describe(), e.last_report().map(|r| r.to_string()).unwrap_or_default()),
                None => (format!("{:?}", child), String::new()),
            };
            for started in children.iter().rev() {
                if work.state(*started).is_some_and(|s| s.is_active()) {
                    self.stop(work, *started);
                }
            }
            return Err(ExecutionReportKind::ChildFailed { child: child_name, cause });
        }
        Ok(None)
    }

    /// Deactivates `id`. Returns whether it is stopped afterwards.
    pub fn stop(&self, work: &mut WorkSet, id: ExecutableId) -> bool {
        let Some(kind) = work.get(id).map(|e| e.kind.clone()) else {
            return false;
        };

        let step: Step = match kind {
            ExecutableKind::Room(room) => match room.remote_room_id.clone() {
                None => Ok(None),
                Some(remote_room_id) => match self.send(&room.agent_id, Command::DeleteRoom { room_id: remote_room_id.clone() }) {
                    Ok(_) => Ok(None),
                    Err(kind) => match self.send(&room.agent_id, Command::GetRoom { room_id: remote_room_id }) {
                        Ok(CommandPayload::Room(None)) => Ok(None),
                        _ => Err(kind),
                    },
                },
            }
            .map(|info| {
                Self::set_remote_room_id(work, id, None);
                info
            }),
            ExecutableKind::Endpoint(_) => Ok(None),
            ExecutableKind::Connection(connection) => match (Self::endpoint_agent(work, connection.endpoint), connection.call_id) {
                (Some(agent_id), Some(call_id)) => self.send(&agent_id, Command::HangUp { call_id }).map(|_| None),
                _ => Ok(None),
            },
            ExecutableKind::Compartment(compartment) => {
                let mut failed = None;
                for child in compartment.children.iter().rev() {
                    if work.state(*child).is_some_and(|s| s.is_active()) && !self.stop(work, *child) {
                        let cause = work.get(*child).and_then(|e| e.last_report()).map(|r| r.to_string()).unwrap_or_default();
                        let child_name = work.get(*child).map(|e| e.describe()).unwrap_or_default();
                        failed.get_or_insert(ExecutionReportKind::ChildFailed { child: child_name, cause });
                    }
                }
                failed.map_or(Ok(None), Err)
            }
            ExecutableKind::Recording(recording) => match recording.recording_id {
                Some(recording_id) => self.send(&recording.agent_id, Command::StopRecording { recording_id }).map(|_| None),
                None => Ok(None),
            },
        };

        let now = self.now;
        work.update(id, |e| match step {
            Ok(_) => {
                e.state = ExecutableState::Stopped;
                true
            }
            Err(kind) => {
                e.state = ExecutableState::StoppingFailed;
                e.reports.push(ExecutionReport::new(now, kind));
                false
            }
        })
        .unwrap_or(false)
    }

    /// Verifies that a started executable still exists on its device. Returns whether it does.
    pub fn check(&self, work: &mut WorkSet, id: ExecutableId) -> bool {
        let Some(kind) = work.get(id).map(|e| e.kind.clone()) else {
            return false;
        };

        let vanished = match kind {
            ExecutableKind::Room(room) => match room.remote_room_id {
                None => Some(format!("Room '{}'", room.room_name)),
                Some(remote_room_id) => match self.send(&room.agent_id, Command::GetRoom { room_id: remote_room_id.clone() }) {
                    Ok(CommandPayload::Room(None)) => Some(format!("Room '{}'", remote_room_id)),
                    Ok(_) => None,
                    Err(kind) => {
                        log::warn!("Room '{}' could not be checked: {}", remote_room_id, ExecutionReport::new(self.now, kind));
                        None
                    }
                },
            },
            ExecutableKind::Recording(recording) => {
                let room_name = match work.get(recording.room).map(|e| &e.kind) {
                    Some(ExecutableKind::Room(room)) => room.room_name.clone(),
                    _ => String::new(),
                };
                match self.send(&recording.agent_id, Command::GetActiveRecording { room_name }) {
                    Ok(CommandPayload::ActiveRecording(None)) => Some("Recording".to_string()),
                    Ok(_) => None,
                    Err(kind) => {
                        log::warn!("Recording could not be checked: {}", ExecutionReport::new(self.now, kind));
                        None
                    }
                }
            }
            ExecutableKind::Compartment(compartment) => {
                let mut vanished_child = None;
                for child in compartment.children.iter().copied() {
                    let started_room = matches!(
                        work.get(child),
                        Some(Executable { state: ExecutableState::Started, kind: ExecutableKind::Room(_), .. })
                    );
                    if started_room && !self.check(work, child) {
                        vanished_child = Some(child);
                        break;
                    }
                }
                match vanished_child {
                    Some(child) => {
                        for other in compartment.children.iter().rev() {
                            if work.state(*other).is_some_and(|s| s.is_active()) {
                                self.stop(work, *other);
                            }
                        }
                        Some(work.get(child).map(|e| e.describe()).unwrap_or_default())
                    }
                    None => None,
                }
            }
            ExecutableKind::Endpoint(_) | ExecutableKind::Connection(_) => None,
        };

        match vanished {
            Some(description) => {
                log::warn!("{} is no longer active on the device.", description);
                let report = ExecutionReport::new(self.now, ExecutionReportKind::ResourceVanished { description });
                work.update(id, |e| {
                    e.state = ExecutableState::NotStarted;
                    e.reports.push(report);
                    match &mut e.kind {
                        ExecutableKind::Room(room) => room.remote_room_id = None,
                        ExecutableKind::Recording(recording) => recording.recording_id = None,
                        _ => {}
                    }
                });
                false
            }
            None => true,
        }
    }
}
