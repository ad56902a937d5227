use chrono::{DateTime, Utc};
use std::fmt;

use crate::domain::controller_model::utils::id::AgentId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionReportKind {
    CommandFailed { agent_id: AgentId, command: String, message: String },
    CommandTimeout { agent_id: AgentId, command: String, timeout_ms: u64 },
    AgentNotConfigured { resource: String },
    /// A sub-entity of a composite executable failed.
    ChildFailed { child: String, cause: String },
    /// The remote resource no longer exists although the executable was started.
    ResourceVanished { description: String },
    /// An existing remote resource was taken over instead of creating a new one.
    Adopted { description: String },
    Migrated { description: String },
    DependencyNotStarted { description: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub at: DateTime<Utc>,
    pub kind: ExecutionReportKind,
}

impl ExecutionReport {
    pub fn new(at: DateTime<Utc>, kind: ExecutionReportKind) -> Self {
        ExecutionReport { at, kind }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self.kind, ExecutionReportKind::Adopted { .. } | ExecutionReportKind::Migrated { .. })
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExecutionReportKind::CommandFailed { agent_id, command, message } => {
                write!(f, "Command '{}' failed at {}:\n{}", command, agent_id, message)
            }
            ExecutionReportKind::CommandTimeout { agent_id, command, timeout_ms } => {
                write!(f, "Command '{}' sent to {} timed out after {} ms.", command, agent_id, timeout_ms)
            }
            ExecutionReportKind::AgentNotConfigured { resource } => write!(f, "Resource '{}' is not managed by any agent.", resource),
            ExecutionReportKind::ChildFailed { child, cause } => write!(f, "{} failed:\n{}", child, cause),
            ExecutionReportKind::ResourceVanished { description } => write!(f, "{} is no longer active on the device.", description),
            ExecutionReportKind::Adopted { description } => write!(f, "Adopted {} which is already active.", description),
            ExecutionReportKind::Migrated { description } => write!(f, "Migrated {}.", description),
            ExecutionReportKind::DependencyNotStarted { description } => write!(f, "{} is not started.", description),
        }
    }
}
