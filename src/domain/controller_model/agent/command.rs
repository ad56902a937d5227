use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::domain::controller_model::resource::resource::{Alias, Technology};

/// Room as it is configured on a multipoint device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDescription {
    pub name: String,
    pub port_count: u32,
    pub technologies: BTreeSet<Technology>,
    pub aliases: Vec<Alias>,
}

/// Room as reported back by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: String,
    pub description: RoomDescription,
    pub participant_ids: Vec<String>,
}

/// Everything the controller asks of a device agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    CreateRoom { room: RoomDescription },
    ModifyRoom { room_id: String, room: RoomDescription },
    DeleteRoom { room_id: String },
    GetRoom { room_id: String },
    ListRooms,

    DialParticipant { room_id: String, alias: Alias },
    DisconnectParticipant { room_id: String, participant_id: String },
    MuteParticipant { room_id: String, participant_id: String },
    UnmuteParticipant { room_id: String, participant_id: String },

    /// Endpoint calls `alias`.
    Dial { alias: Alias },
    HangUp { call_id: String },

    StartRecording { room_name: String, alias: Option<Alias> },
    StopRecording { recording_id: String },
    GetActiveRecording { room_name: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateRoom { .. } => "CreateRoom",
            Command::ModifyRoom { .. } => "ModifyRoom",
            Command::DeleteRoom { .. } => "DeleteRoom",
            Command::GetRoom { .. } => "GetRoom",
            Command::ListRooms => "ListRooms",
            Command::DialParticipant { .. } => "DialParticipant",
            Command::DisconnectParticipant { .. } => "DisconnectParticipant",
            Command::MuteParticipant { .. } => "MuteParticipant",
            Command::UnmuteParticipant { .. } => "UnmuteParticipant",
            Command::Dial { .. } => "Dial",
            Command::HangUp { .. } => "HangUp",
            Command::StartRecording { .. } => "StartRecording",
            Command::StopRecording { .. } => "StopRecording",
            Command::GetActiveRecording { .. } => "GetActiveRecording",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandPayload {
    None,
    RoomId(String),
    Room(Option<RoomInfo>),
    Rooms(Vec<RoomInfo>),
    ParticipantId(String),
    CallId(String),
    RecordingId(String),
    ActiveRecording(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFailure {
    pub message: String,
}

impl CommandFailure {
    pub fn new(message: impl Into<String>) -> Self {
        CommandFailure { message: message.into() }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Answer to a command. Commands are never retried by the dispatcher, a `Timeout` may still have been
/// performed by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Success(CommandPayload),
    Failure(CommandFailure),
    Timeout,
}

impl CommandResult {
    pub fn failure(message: impl Into<String>) -> Self {
        CommandResult::Failure(CommandFailure::new(message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandResult::Success(_))
    }
}
