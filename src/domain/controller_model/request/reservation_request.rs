use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::domain::controller_model::request::specification::Specification;
use crate::domain::controller_model::reservation::reservation::ReservationId;
use crate::domain::controller_model::scheduler::scheduler_report::SchedulerReport;
use crate::domain::controller_model::utils::id::{OwnerId, RequestId};
use crate::domain::controller_model::utils::interval::Interval;

/// Scheduling class of a request. Variants are declared in scheduling order, earlier ones first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Purpose {
    Maintenance,
    Owner,
    Science,
    Education,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    /// Specification is not ready, the scheduler ignores the request.
    NotComplete,
    /// Waiting for the next scheduler run.
    Complete,
    Allocated,
    AllocationFailed,
}

/// Ordered history of top-level reservations allocated for one request. The last one is current.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    reservations: Vec<ReservationId>,
}

impl Allocation {
    pub fn current(&self) -> Option<ReservationId> {
        self.reservations.last().copied()
    }

    pub fn reservations(&self) -> &[ReservationId] {
        &self.reservations
    }

    pub fn contains(&self, reservation: ReservationId) -> bool {
        self.reservations.contains(&reservation)
    }

    /// Appends `reservation`, moving it to the end if it is already part of the history.
    pub fn push(&mut self, reservation: ReservationId) {
        self.reservations.retain(|id| *id != reservation);
        self.reservations.push(reservation);
    }

    pub fn remove(&mut self, reservation: ReservationId) -> bool {
        let before = self.reservations.len();
        self.reservations.retain(|id| *id != reservation);
        before != self.reservations.len()
    }

    pub fn clear(&mut self) -> Vec<ReservationId> {
        std::mem::take(&mut self.reservations)
    }
}

/// Input of the intake operations.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationRequestData {
    pub owner: OwnerId,
    pub purpose: Purpose,
    pub priority: i32,
    pub interval: Interval,
    pub specification: Specification,
    pub provided_reservations: Vec<ReservationId>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReservationRequest {
    pub id: RequestId,
    pub owner: OwnerId,
    pub purpose: Purpose,
    pub priority: i32,
    pub interval: Interval,
    pub specification: Specification,
    pub provided_reservations: Vec<ReservationId>,
    pub description: Option<String>,
    pub state: RequestState,
    pub reports: Vec<SchedulerReport>,
    pub created_at: DateTime<Utc>,
    pub allocation: Allocation,
}

impl ReservationRequest {
    pub fn new(id: RequestId, data: ReservationRequestData, created_at: DateTime<Utc>) -> Self {
        let mut request = ReservationRequest {
            id,
            owner: data.owner,
            purpose: data.purpose,
            priority: data.priority,
            interval: data.interval,
            specification: data.specification,
            provided_reservations: data.provided_reservations,
            description: data.description,
            state: RequestState::NotComplete,
            reports: Vec::new(),
            created_at,
            allocation: Allocation::default(),
        };
        request.refresh_state();
        request
    }

    /// Replaces the modifiable parts and puts the request back into the scheduling queue.
    pub fn apply(&mut self, data: ReservationRequestData) {
        self.owner = data.owner;
        self.purpose = data.purpose;
        self.priority = data.priority;
        self.interval = data.interval;
        self.specification = data.specification;
        self.provided_reservations = data.provided_reservations;
        self.description = data.description;
        self.reports.clear();
        self.refresh_state();
    }

    pub fn refresh_state(&mut self) {
        self.state = if self.specification.is_ready() { RequestState::Complete } else { RequestState::NotComplete };
    }

    /// Order in which the scheduler processes requests: **priority** (higher first), **purpose**,
    /// **creation time** (older first) and finally the id for a stable order.
    pub fn scheduling_order(&self, other: &ReservationRequest) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.purpose.cmp(&other.purpose))
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Human readable report trail, `None` if there is nothing to report.
    pub fn report_text(&self) -> Option<String> {
        if self.reports.is_empty() {
            return None;
        }
        Some(self.reports.iter().map(SchedulerReport::message_recursive).collect::<Vec<_>>().join("\n"))
    }
}
