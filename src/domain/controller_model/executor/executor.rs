use chrono::{DateTime, Utc};
use slotmap::Key;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::domain::controller_model::agent::command::{Command, CommandResult};
use crate::domain::controller_model::agent::dispatcher::CommandDispatch;
use crate::domain::controller_model::executor::activation::{Activation, WorkSet};
use crate::domain::controller_model::executor::executable::{Executable, ExecutableId, ExecutableKind, ExecutableState};
use crate::domain::controller_model::notification::operator::{OperatorReport, OperatorReporter};
use crate::domain::controller_model::resource::resource::Alias;
use crate::domain::controller_model::store::controller_store::{ControllerStore, StoreState};
use crate::domain::controller_model::utils::statistics::ANALYTICS_TARGET;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Pause between two passes of the periodic driver.
    pub period: Duration,
    /// Executables are started this long before their interval begins.
    pub start_offset: chrono::Duration,
    /// Executables are stopped this long after their interval ended.
    pub end_offset: chrono::Duration,
    pub command_timeout: Duration,
    /// Failed activations after which an executable is no longer started.
    pub max_attempt_count: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            period: Duration::from_secs(30),
            start_offset: chrono::Duration::seconds(30),
            end_offset: chrono::Duration::zero(),
            command_timeout: Duration::from_secs(10),
            max_attempt_count: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorRunSummary {
    pub started: usize,
    pub stopped: usize,
    pub failed: usize,
    pub checked: usize,
    /// Started executables which were no longer present on their device.
    pub vanished: usize,
    pub deleted_executables: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Start,
    Stop,
    Check,
}

/// Work of one pass, split into the phases which run one after another.
#[derive(Debug, Default)]
struct DuePhases {
    stop_services: Vec<(Operation, ExecutableId)>,
    executables: Vec<(Operation, ExecutableId)>,
    services: Vec<(Operation, ExecutableId)>,
}

/// Action on a started room, forwarded to the room's device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomControl {
    DialParticipant { alias: Alias },
    DisconnectParticipant { participant_id: String },
    MuteParticipant { participant_id: String },
    UnmuteParticipant { participant_id: String },
}

impl RoomControl {
    fn into_command(self, room_id: String) -> Command {
        match self {
            RoomControl::DialParticipant { alias } => Command::DialParticipant { room_id, alias },
            RoomControl::DisconnectParticipant { participant_id } => Command::DisconnectParticipant { room_id, participant_id },
            RoomControl::MuteParticipant { participant_id } => Command::MuteParticipant { room_id, participant_id },
            RoomControl::UnmuteParticipant { participant_id } => Command::UnmuteParticipant { room_id, participant_id },
        }
    }
}

/// Drives executables whose interval is due.
///
/// A pass first stops services (recordings) which have to end, then starts, stops and checks the
/// remaining executables and finally starts and checks services, because a service needs its room.
/// Within a phase every executable (with its compartment children) is handled by its own worker
/// thread, and each worker's result is written back in its own transaction.
#[derive(Debug)]
pub struct Executor {
    config: ExecutorConfig,
    store: ControllerStore,
    dispatcher: Arc<dyn CommandDispatch>,
    operator: Arc<dyn OperatorReporter>,
    run_guard: Mutex<()>,
}

impl Executor {
    pub fn new(config: ExecutorConfig, store: ControllerStore, dispatcher: Arc<dyn CommandDispatch>, operator: Arc<dyn OperatorReporter>) -> Self {
        Executor { config, store, dispatcher, operator, run_guard: Mutex::new(()) }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn execute(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<ExecutorRunSummary> {
        let _guard = self.run_guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let started = Instant::now();
        let mut summary = ExecutorRunSummary::default();

        let phases = self.store.read(|state| self.due_phases(state, now))?;
        log::debug!(
            "Executor pass at {}: {} services to stop, {} executables, {} services.",
            now,
            phases.stop_services.len(),
            phases.executables.len(),
            phases.services.len()
        );

        for phase in [phases.stop_services, phases.executables, phases.services] {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            self.run_phase(phase, now, cancel, &mut summary)?;
        }

        let deleted = self.store.transaction("delete-unreferenced-executables", |state| {
            Ok::<_, Error>(state.delete_unreferenced_executables())
        })?;
        summary.deleted_executables = deleted.len();

        if summary.started + summary.stopped + summary.failed + summary.vanished > 0 {
            log::info!(
                "Executor pass finished: {} started, {} stopped, {} failed, {} vanished.",
                summary.started,
                summary.stopped,
                summary.failed,
                summary.vanished
            );
        }
        tracing::info!(
            target: ANALYTICS_TARGET,
            LogDescription = "Executor pass finished",
            ComponentType = "EXECUTOR",
            AllocatedCount = summary.started as u64,
            FailedCount = summary.failed as u64,
            ProcessingTime = started.elapsed().as_millis() as u64,
        );
        Ok(summary)
    }

    fn due_phases(&self, state: &StoreState, now: DateTime<Utc>) -> DuePhases {
        let referenced = state.referenced_executables();
        let mut due = Vec::new();
        // Rooms taken over by a room starting in this pass are stopped by the take-over.
        let mut migration_sources = HashSet::new();

        for executable in state.executables.values().filter(|e| e.parent.is_none()) {
            let window_start = executable.interval.start - self.config.start_offset;
            let window_end = executable.interval.end + self.config.end_offset;
            let in_window = window_start <= now && now < window_end;
            let is_referenced = referenced.contains(&executable.id);

            let operation = if executable.state.is_active() && (!in_window || !is_referenced) {
                Operation::Stop
            } else if executable.state.is_startable() && in_window && is_referenced {
                if executable.attempt_count >= self.config.max_attempt_count {
                    log::trace!("{} reached the maximum number of attempts.", executable.describe());
                    continue;
                }
                if let Some(source) = executable.migrated_from {
                    migration_sources.insert(source);
                }
                Operation::Start
            } else if executable.state == ExecutableState::Started {
                Operation::Check
            } else {
                continue;
            };
            due.push((operation, executable.id, executable.kind.is_service()));
        }

        let mut phases = DuePhases::default();
        for (operation, id, is_service) in due {
            if operation != Operation::Start && migration_sources.contains(&id) {
                continue;
            }
            match (operation, is_service) {
                (Operation::Stop, true) => phases.stop_services.push((operation, id)),
                (_, true) => phases.services.push((operation, id)),
                (_, false) => phases.executables.push((operation, id)),
            }
        }
        phases
    }

    fn run_phase(
        &self,
        items: Vec<(Operation, ExecutableId)>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        summary: &mut ExecutorRunSummary,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let works: Vec<(Operation, ExecutableId, WorkSet)> =
            self.store.read(|state| items.iter().map(|(operation, id)| (*operation, *id, WorkSet::collect(state, *id))).collect())?;
        let activation = Activation::new(self.dispatcher.as_ref(), now, self.config.command_timeout);

        let mut cancelled = false;
        let results = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(works.len());
            for (operation, id, mut work) in works {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let activation = &activation;
                let spawned = thread::Builder::new().name(format!("Executor-{}", id.data().as_ffi())).spawn_scoped(scope, move || {
                    let started = Instant::now();
                    match operation {
                        Operation::Start => {
                            activation.start(&mut work, id);
                        }
                        Operation::Stop => {
                            activation.stop(&mut work, id);
                        }
                        Operation::Check => {
                            activation.check(&mut work, id);
                        }
                    }
                    (operation, id, work, started.elapsed())
                });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => log::error!("Failed to spawn executor worker: {}", e),
                }
            }
            handles.into_iter().filter_map(|handle| handle.join().ok()).collect::<Vec<_>>()
        });
        summary.cancelled |= cancelled;

        for (operation, id, work, elapsed) in results {
            self.apply(operation, id, work, elapsed, summary)?;
        }
        Ok(())
    }

    fn apply(&self, operation: Operation, id: ExecutableId, work: WorkSet, elapsed: Duration, summary: &mut ExecutorRunSummary) -> Result<()> {
        for (_, before, after) in work.transitions() {
            match after {
                ExecutableState::Started => summary.started += 1,
                ExecutableState::Stopped => summary.stopped += 1,
                ExecutableState::StartingFailed | ExecutableState::StoppingFailed => summary.failed += 1,
                ExecutableState::NotStarted if before == ExecutableState::Started => summary.vanished += 1,
                ExecutableState::NotStarted => {}
            }
        }
        if operation == Operation::Check {
            summary.checked += 1;
        }

        if let Some(root) = work.get(id) {
            self.report_outcome(operation, root, elapsed);
        }

        let changed = work.into_changed();
        if changed.is_empty() {
            return Ok(());
        }
        self.store.transaction("apply-execution-result", |state| {
            for executable in changed {
                // The executable may have been deleted by a concurrent cleanup.
                if let Some(current) = state.executables.get_mut(executable.id) {
                    current.state = executable.state;
                    current.kind = executable.kind;
                    current.reports = executable.reports;
                    current.attempt_count = executable.attempt_count;
                }
            }
            Ok::<_, Error>(())
        })
    }

    fn report_outcome(&self, operation: Operation, executable: &Executable, elapsed: Duration) {
        let name = executable.describe();
        if matches!(executable.state, ExecutableState::StartingFailed | ExecutableState::StoppingFailed) {
            self.operator.report(OperatorReport::ExecutionFailed {
                executable: name.clone(),
                report: executable.last_report().map(|r| r.to_string()).unwrap_or_default(),
            });
        } else {
            log::debug!("{:?} of {} finished in state {:?}.", operation, name, executable.state);
        }

        tracing::info!(
            target: ANALYTICS_TARGET,
            LogDescription = "Executable processed",
            ComponentType = "EXECUTOR",
            ExecutableName = name.as_str(),
            ExecutableState = ?executable.state,
            Command = ?operation,
            ProcessingTime = elapsed.as_millis() as u64,
        );
    }

    /// Forwards `action` to the device hosting the started room `room`.
    pub fn control_room(&self, room: ExecutableId, action: RoomControl) -> Result<CommandResult> {
        let target = self.store.read(|state| match state.executables.get(room) {
            Some(Executable { state: ExecutableState::Started, kind: ExecutableKind::Room(r), .. }) => {
                r.remote_room_id.clone().map(|remote_room_id| (r.agent_id.clone(), remote_room_id))
            }
            _ => None,
        })?;
        let (agent_id, remote_room_id) = target.ok_or_else(|| Error::NotStarted(format!("Room {}", room.data().as_ffi())))?;

        let command = action.into_command(remote_room_id);
        let name = command.name();
        let result = self.dispatcher.send(&agent_id, command);
        tracing::info!(
            target: ANALYTICS_TARGET,
            LogDescription = "Room control",
            ComponentType = "EXECUTOR",
            AgentId = %agent_id,
            Command = name,
        );
        Ok(result)
    }
}
