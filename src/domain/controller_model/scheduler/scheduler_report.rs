use std::fmt;
use thiserror::Error;

use crate::domain::controller_model::utils::interval::Interval;
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerReportKind {
    Allocated { description: String },
    Reallocated { description: String },
    ReusingProvided { description: String },

    ResourceNotFound { resource_id: String },
    ResourceNotAllocatable { resource_id: String },
    ResourceAlreadyAllocated { resource_id: String },
    ValueAlreadyAllocated { value: String, provider: String },
    NoFreeValue { provider: String, pattern: String },
    NoMatchingProvider { description: String },
    NoAvailableProvider { description: String },
    NotEnoughPorts { resource_id: String, requested: u32, available: u32 },
    NoRoomProviderAvailable { participant_count: u32 },
    RecordingNotAvailable { interval: Interval },
    SpecificationInvalid { reason: String },
    ProvidedReservationNotAvailable { reservation: String },
    ProvidedReservationNotUsable { reservation: String, interval: Interval },
    CompositeChildFailed { index: usize, kind: &'static str },
    InternalError { message: String },
}

impl fmt::Display for SchedulerReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerReportKind::Allocated { description } => write!(f, "Allocated {}.", description),
            SchedulerReportKind::Reallocated { description } => write!(f, "Reallocated {}.", description),
            SchedulerReportKind::ReusingProvided { description } => write!(f, "Reusing provided {}.", description),
            SchedulerReportKind::ResourceNotFound { resource_id } => write!(f, "Resource '{}' does not exist.", resource_id),
            SchedulerReportKind::ResourceNotAllocatable { resource_id } => write!(f, "Resource '{}' is not allocatable.", resource_id),
            SchedulerReportKind::ResourceAlreadyAllocated { resource_id } => {
                write!(f, "Resource '{}' is already allocated in the requested time slot.", resource_id)
            }
            SchedulerReportKind::ValueAlreadyAllocated { value, provider } => {
                write!(f, "Value '{}' of '{}' is already allocated in the requested time slot.", value, provider)
            }
            SchedulerReportKind::NoFreeValue { provider, pattern } => {
                write!(f, "No value is available in '{}' (pattern '{}').", provider, pattern)
            }
            SchedulerReportKind::NoMatchingProvider { description } => write!(f, "No provider of {} exists.", description),
            SchedulerReportKind::NoAvailableProvider { description } => {
                write!(f, "No provider of {} has a free value in the requested time slot.", description)
            }
            SchedulerReportKind::NotEnoughPorts { resource_id, requested, available } => {
                write!(f, "Device '{}' has {} free ports but {} are requested.", resource_id, available, requested)
            }
            SchedulerReportKind::NoRoomProviderAvailable { participant_count } => {
                write!(f, "No device can host a room for {} participants.", participant_count)
            }
            SchedulerReportKind::RecordingNotAvailable { interval } => write!(f, "No recording capacity is available in {}.", interval),
            SchedulerReportKind::SpecificationInvalid { reason } => write!(f, "Invalid specification: {}.", reason),
            SchedulerReportKind::ProvidedReservationNotAvailable { reservation } => write!(f, "{} is not available.", reservation),
            SchedulerReportKind::ProvidedReservationNotUsable { reservation, interval } => {
                write!(f, "{} cannot be used for the requested time slot {}.", reservation, interval)
            }
            SchedulerReportKind::CompositeChildFailed { index, kind } => {
                write!(f, "Allocation of {} specification #{} failed.", kind, index + 1)
            }
            SchedulerReportKind::InternalError { message } => write!(f, "Internal error: {}.", message),
        }
    }
}

/// One entry of a request's report trail, with the sub-causes that led to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerReport {
    pub kind: SchedulerReportKind,
    pub children: Vec<SchedulerReport>,
}

impl SchedulerReport {
    pub fn new(kind: SchedulerReportKind) -> Self {
        SchedulerReport { kind, children: Vec::new() }
    }

    pub fn with_children(kind: SchedulerReportKind, children: Vec<SchedulerReport>) -> Self {
        SchedulerReport { kind, children }
    }

    pub fn is_error(&self) -> bool {
        !matches!(
            self.kind,
            SchedulerReportKind::Allocated { .. } | SchedulerReportKind::Reallocated { .. } | SchedulerReportKind::ReusingProvided { .. }
        )
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    /// The report and all sub-causes as an indented list.
    pub fn message_recursive(&self) -> String {
        let mut lines = Vec::new();
        self.write_lines(0, &mut lines);
        lines.join("\n")
    }

    fn write_lines(&self, depth: usize, lines: &mut Vec<String>) {
        let prefix = if depth == 0 { String::new() } else { format!("{}- ", "  ".repeat(depth - 1)) };
        lines.push(format!("{}{}", prefix, self.kind));
        for child in &self.children {
            child.write_lines(depth + 1, lines);
        }
    }

    /// True if this report or one of its sub-causes contains `text`.
    pub fn mentions(&self, text: &str) -> bool {
        self.message_recursive().contains(text)
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Domain failure: conflict, capacity, invalid specification or misuse of a provided reservation.
    #[error("{}", .0.message_recursive())]
    Allocation(SchedulerReport),

    #[error("internal scheduler error: {0}")]
    Internal(#[from] Error),
}

impl SchedulerError {
    pub fn allocation(kind: SchedulerReportKind) -> Self {
        SchedulerError::Allocation(SchedulerReport::new(kind))
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        SchedulerError::allocation(SchedulerReportKind::SpecificationInvalid { reason: reason.into() })
    }

    pub fn report(&self) -> Option<&SchedulerReport> {
        match self {
            SchedulerError::Allocation(report) => Some(report),
            SchedulerError::Internal(_) => None,
        }
    }
}
