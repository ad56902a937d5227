use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::domain::controller_model::agent::command::{Command, CommandPayload, CommandResult, RoomDescription, RoomInfo};
use crate::domain::controller_model::agent::dispatcher::DeviceAgent;
use crate::domain::controller_model::resource::resource::Alias;
use crate::domain::controller_model::utils::id::AgentId;

#[derive(Debug, Default)]
struct DeviceState {
    rooms: BTreeMap<String, RoomInfo>,
    calls: BTreeMap<String, Alias>,
    /// recording id -> room name
    recordings: BTreeMap<String, String>,
    muted: Vec<String>,
    next_id: u64,
    failures: HashMap<&'static str, String>,
    latency: Duration,
    performed: Vec<Command>,
}

impl DeviceState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn set_muted(&mut self, room_id: &str, participant_id: String, mute: bool) -> CommandResult {
        let present = self.rooms.get(room_id).is_some_and(|info| info.participant_ids.contains(&participant_id));
        if !present {
            return CommandResult::failure(format!("participant '{}' is not in room '{}'", participant_id, room_id));
        }
        self.muted.retain(|p| p != &participant_id);
        if mute {
            self.muted.push(participant_id);
        }
        CommandResult::Success(CommandPayload::None)
    }

    fn apply(&mut self, command: Command) -> CommandResult {
        match command {
            Command::CreateRoom { room } => {
                let id = self.next_id("room");
                self.rooms.insert(id.clone(), RoomInfo { id: id.clone(), description: room, participant_ids: Vec::new() });
                CommandResult::Success(CommandPayload::RoomId(id))
            }
            Command::ModifyRoom { room_id, room } => match self.rooms.get_mut(&room_id) {
                Some(info) => {
                    info.description = room;
                    CommandResult::Success(CommandPayload::RoomId(room_id))
                }
                None => CommandResult::failure(format!("room '{}' does not exist", room_id)),
            },
            Command::DeleteRoom { room_id } => match self.rooms.remove(&room_id) {
                Some(_) => CommandResult::Success(CommandPayload::None),
                None => CommandResult::failure(format!("room '{}' does not exist", room_id)),
            },
            Command::GetRoom { room_id } => CommandResult::Success(CommandPayload::Room(self.rooms.get(&room_id).cloned())),
            Command::ListRooms => CommandResult::Success(CommandPayload::Rooms(self.rooms.values().cloned().collect())),
            Command::DialParticipant { room_id, alias } => {
                let participant_id = self.next_id("participant");
                match self.rooms.get_mut(&room_id) {
                    Some(info) => {
                        log::debug!("Dialing {} into room {}.", alias, room_id);
                        info.participant_ids.push(participant_id.clone());
                        CommandResult::Success(CommandPayload::ParticipantId(participant_id))
                    }
                    None => CommandResult::failure(format!("room '{}' does not exist", room_id)),
                }
            }
            Command::DisconnectParticipant { room_id, participant_id } => match self.rooms.get_mut(&room_id) {
                Some(info) if info.participant_ids.contains(&participant_id) => {
                    info.participant_ids.retain(|p| p != &participant_id);
                    self.muted.retain(|p| p != &participant_id);
                    CommandResult::Success(CommandPayload::None)
                }
                _ => CommandResult::failure(format!("participant '{}' is not in room '{}'", participant_id, room_id)),
            },
            Command::MuteParticipant { room_id, participant_id } => self.set_muted(&room_id, participant_id, true),
            Command::UnmuteParticipant { room_id, participant_id } => self.set_muted(&room_id, participant_id, false),
            Command::Dial { alias } => {
                let call_id = self.next_id("call");
                self.calls.insert(call_id.clone(), alias);
                CommandResult::Success(CommandPayload::CallId(call_id))
            }
            Command::HangUp { call_id } => match self.calls.remove(&call_id) {
                Some(_) => CommandResult::Success(CommandPayload::None),
                None => CommandResult::failure(format!("call '{}' does not exist", call_id)),
            },
            Command::StartRecording { room_name, .. } => {
                let recording_id = self.next_id("recording");
                self.recordings.insert(recording_id.clone(), room_name);
                CommandResult::Success(CommandPayload::RecordingId(recording_id))
            }
            Command::StopRecording { recording_id } => match self.recordings.remove(&recording_id) {
                Some(_) => CommandResult::Success(CommandPayload::None),
                None => CommandResult::failure(format!("recording '{}' does not exist", recording_id)),
            },
            Command::GetActiveRecording { room_name } => {
                let active = self.recordings.iter().find(|(_, name)| **name == room_name).map(|(id, _)| id.clone());
                CommandResult::Success(CommandPayload::ActiveRecording(active))
            }
        }
    }
}

/// Shared view into a [`SimulatedDevice`], used to inject failures, latency and drift and to inspect
/// what the device was asked to do.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDeviceHandle {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDeviceHandle {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Every following command named `command` fails with `message`.
    pub fn fail_command(&self, command: &'static str, message: &str) {
        self.lock().failures.insert(command, message.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Removes a room behind the controller's back.
    pub fn drop_room(&self, room_id: &str) -> bool {
        self.lock().rooms.remove(room_id).is_some()
    }

    /// Creates a room the controller did not ask for.
    pub fn insert_room(&self, description: RoomDescription) -> String {
        let mut state = self.lock();
        let id = state.next_id("room");
        state.rooms.insert(id.clone(), RoomInfo { id: id.clone(), description, participant_ids: Vec::new() });
        id
    }

    pub fn rooms(&self) -> Vec<RoomInfo> {
        self.lock().rooms.values().cloned().collect()
    }

    pub fn calls(&self) -> Vec<(String, Alias)> {
        self.lock().calls.iter().map(|(id, alias)| (id.clone(), alias.clone())).collect()
    }

    pub fn active_recordings(&self) -> Vec<String> {
        self.lock().recordings.keys().cloned().collect()
    }

    pub fn muted(&self) -> Vec<String> {
        self.lock().muted.clone()
    }

    pub fn performed(&self) -> Vec<Command> {
        self.lock().performed.clone()
    }

    pub fn performed_names(&self) -> Vec<&'static str> {
        self.lock().performed.iter().map(Command::name).collect()
    }
}

/// In-memory device answering every command immediately (or after the configured latency).
#[derive(Debug)]
pub struct SimulatedDevice {
    id: AgentId,
    handle: SimulatedDeviceHandle,
}

impl SimulatedDevice {
    pub fn new(id: AgentId) -> Self {
        SimulatedDevice { id, handle: SimulatedDeviceHandle::default() }
    }

    pub fn device_handle(&self) -> SimulatedDeviceHandle {
        self.handle.clone()
    }
}

impl DeviceAgent for SimulatedDevice {
    fn id(&self) -> AgentId {
        self.id.clone()
    }

    fn handle(&mut self, command: Command) -> CommandResult {
        let latency = self.handle.lock().latency;
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        let mut state = self.handle.lock();
        state.performed.push(command.clone());
        if let Some(message) = state.failures.get(command.name()) {
            return CommandResult::failure(message.clone());
        }
        state.apply(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::controller_model::resource::resource::AliasType;
    use std::collections::BTreeSet;

    fn description(name: &str) -> RoomDescription {
        RoomDescription { name: name.to_string(), port_count: 4, technologies: BTreeSet::new(), aliases: Vec::new() }
    }

    #[test]
    fn test_room_lifecycle() {
        let mut device = SimulatedDevice::new(AgentId::new("mcu"));
        let handle = device.device_handle();

        let CommandResult::Success(CommandPayload::RoomId(room_id)) = device.handle(Command::CreateRoom { room: description("a") }) else {
            panic!("room not created");
        };
        assert_eq!(handle.rooms().len(), 1);

        let alias = Alias { alias_type: AliasType::E164, value: "42".into() };
        let CommandResult::Success(CommandPayload::ParticipantId(participant_id)) =
            device.handle(Command::DialParticipant { room_id: room_id.clone(), alias })
        else {
            panic!("participant not dialed");
        };
        assert!(device.handle(Command::MuteParticipant { room_id: room_id.clone(), participant_id: participant_id.clone() }).is_success());
        assert_eq!(handle.muted(), vec![participant_id.clone()]);
        assert!(device.handle(Command::UnmuteParticipant { room_id: room_id.clone(), participant_id }).is_success());
        assert!(handle.muted().is_empty());

        assert!(device.handle(Command::DeleteRoom { room_id: room_id.clone() }).is_success());
        assert_eq!(device.handle(Command::GetRoom { room_id }), CommandResult::Success(CommandPayload::Room(None)));
    }

    #[test]
    fn test_injected_failure_is_reported_and_recorded() {
        let mut device = SimulatedDevice::new(AgentId::new("mcu"));
        let handle = device.device_handle();
        handle.fail_command("CreateRoom", "out of licenses");

        let result = device.handle(Command::CreateRoom { room: description("a") });

        assert_eq!(result, CommandResult::failure("out of licenses"));
        assert!(handle.rooms().is_empty());
        assert_eq!(handle.performed_names(), vec!["CreateRoom"]);
    }

    #[test]
    fn test_active_recording_is_found_by_room_name() {
        let mut device = SimulatedDevice::new(AgentId::new("rec"));
        device.handle(Command::StartRecording { room_name: "a".into(), alias: None });

        let result = device.handle(Command::GetActiveRecording { room_name: "a".into() });
        assert!(matches!(result, CommandResult::Success(CommandPayload::ActiveRecording(Some(_)))));
        let result = device.handle(Command::GetActiveRecording { room_name: "b".into() });
        assert_eq!(result, CommandResult::Success(CommandPayload::ActiveRecording(None)));
    }
}
