use serde::{Deserialize, Serialize};

use crate::domain::controller_model::agent::command::{Command, CommandFailure, CommandPayload, CommandResult};
use crate::domain::controller_model::utils::id::AgentId;

/// Request frame sent to a remote agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub target_agent_id: AgentId,
    pub command_name: String,
    pub command: Command,
}

impl CommandEnvelope {
    pub fn new(target_agent_id: AgentId, command: Command) -> Self {
        CommandEnvelope { target_agent_id, command_name: command.name().to_string(), command }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// Answer frame. Exactly one of `result` and `failure` is set, matching `status`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub status: ResponseStatus,
    pub result: Option<CommandPayload>,
    pub failure: Option<CommandFailure>,
}

impl ResponseEnvelope {
    pub fn success(payload: CommandPayload) -> Self {
        ResponseEnvelope { status: ResponseStatus::Success, result: Some(payload), failure: None }
    }

    pub fn failure(failure: CommandFailure) -> Self {
        ResponseEnvelope { status: ResponseStatus::Failure, result: None, failure: Some(failure) }
    }

    pub fn into_result(self) -> CommandResult {
        match (self.status, self.result, self.failure) {
            (ResponseStatus::Success, Some(payload), _) => CommandResult::Success(payload),
            (ResponseStatus::Failure, _, Some(failure)) => CommandResult::Failure(failure),
            (status, _, _) => CommandResult::failure(format!("malformed {:?} response from agent", status)),
        }
    }
}

impl From<CommandResult> for ResponseEnvelope {
    fn from(result: CommandResult) -> Self {
        match result {
            CommandResult::Success(payload) => ResponseEnvelope::success(payload),
            CommandResult::Failure(failure) => ResponseEnvelope::failure(failure),
            CommandResult::Timeout => ResponseEnvelope::failure(CommandFailure::new("device did not answer in time")),
        }
    }
}
