use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::domain::controller_model::cache::resource_unit::ResourceUnit;
use crate::domain::controller_model::reservation::reservation::{ReservationId, ReservationKind};
use crate::domain::controller_model::reservation::reservation_draft::{NewReservation, ReservationDraft};
use crate::domain::controller_model::resource::resource_store::ResourceStore;
use crate::domain::controller_model::scheduler::scheduler_report::{SchedulerReport, SchedulerReportKind};
use crate::domain::controller_model::store::controller_store::StoreState;
use crate::domain::controller_model::utils::id::RequestId;
use crate::domain::controller_model::utils::interval::Interval;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityType {
    /// Provided by the requester, reused through an existing-reservation.
    Reusable,
    /// Allocated for the same request before, may be kept as it is.
    Reallocatable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvailableReservation {
    pub id: ReservationId,
    pub availability: AvailabilityType,
    pub interval: Interval,
    pub kind: ReservationKind,
}

/// Restores the context to an earlier point, used when a task abandons one candidate and tries the next.
#[derive(Debug, Clone)]
pub struct ContextCheckpoint {
    claims: usize,
    reports: usize,
    used: HashSet<ReservationId>,
}

/// Working set of one allocation attempt.
///
/// Tasks never write to the store. They read the committed state (`state`), record the units they
/// intend to take as **claims** and return a [`ReservationDraft`] which the scheduler persists once the
/// whole request succeeded.
#[derive(Debug)]
pub struct SchedulerContext<'a> {
    pub resources: &'a ResourceStore,
    pub state: &'a StoreState,
    pub request_id: RequestId,
    /// Reference time of the run, nothing is allocated before it.
    pub now: DateTime<Utc>,
    /// Requested interval of the request, clipped to `now`.
    pub slot: Interval,
    available: Vec<AvailableReservation>,
    reallocatable_ids: HashSet<ReservationId>,
    used: HashSet<ReservationId>,
    claims: Vec<(ResourceUnit, Interval)>,
    reports: Vec<SchedulerReport>,
    depth: usize,
}

impl<'a> SchedulerContext<'a> {
    pub fn new(resources: &'a ResourceStore, state: &'a StoreState, request_id: RequestId, now: DateTime<Utc>, slot: Interval) -> Self {
        SchedulerContext {
            resources,
            state,
            request_id,
            now,
            slot,
            available: Vec::new(),
            reallocatable_ids: HashSet::new(),
            used: HashSet::new(),
            claims: Vec::new(),
            reports: Vec::new(),
            depth: 0,
        }
    }

    pub fn add_available(&mut self, id: ReservationId, availability: AvailabilityType) -> Result<()> {
        if self.available.iter().any(|available| available.id == id) {
            return Ok(());
        }

        let reservation = self.state.reservation(id)?;
        if availability == AvailabilityType::Reallocatable {
            self.reallocatable_ids.insert(id);
        }
        self.available.push(AvailableReservation { id, availability, interval: reservation.interval, kind: reservation.kind.clone() });
        Ok(())
    }

    pub fn is_nested(&self) -> bool {
        self.depth > 0
    }

    /// Runs `f` one level deeper, for tasks allocating children of another reservation.
    pub fn nested<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Free in the committed state (ignoring entries of reallocatable reservations) and not yet
    /// claimed by this attempt.
    pub fn is_unit_available(&self, unit: &ResourceUnit, interval: &Interval) -> bool {
        self.state.cache.is_available_ignoring(unit, interval, &self.reallocatable_ids)
            && !self.claims.iter().any(|(claimed, claimed_interval)| claimed == unit && claimed_interval.overlaps(interval))
    }

    pub fn claim(&mut self, unit: ResourceUnit, interval: Interval) {
        self.claims.push((unit, interval));
    }

    /// Units held by reallocatable reservations, i.e. what this request had before.
    pub fn previously_held_units(&self) -> Vec<ResourceUnit> {
        let mut ids: Vec<&ReservationId> = self.reallocatable_ids.iter().collect();
        ids.sort();
        ids.into_iter().flat_map(|id| self.state.cache.units_of(*id)).collect()
    }

    fn fits(&self, available: &AvailableReservation) -> bool {
        match available.availability {
            AvailabilityType::Reusable => available.interval.contains(&self.slot),
            AvailabilityType::Reallocatable if self.is_nested() => available.interval == self.slot,
            AvailabilityType::Reallocatable => available.interval.start <= self.slot.start && available.interval.end == self.slot.end,
        }
    }

    /// First unused available reservation accepted by `predicate`. Reallocatable reservations are
    /// preferred over provided ones.
    pub fn find_available<F: Fn(&AvailableReservation) -> bool>(&self, predicate: F) -> Option<AvailableReservation> {
        let candidates = || self.available.iter().filter(|a| !self.used.contains(&a.id) && self.fits(a) && predicate(a));

        candidates()
            .find(|a| a.availability == AvailabilityType::Reallocatable)
            .or_else(|| candidates().next())
            .cloned()
    }

    /// Turns an available reservation into the draft which keeps using it.
    pub fn reuse(&mut self, available: &AvailableReservation) -> ReservationDraft {
        self.used.insert(available.id);
        let description = self.state.reservations.get(available.id).map(|r| r.describe()).unwrap_or_else(|| format!("{:?}", available.id));

        match available.availability {
            AvailabilityType::Reallocatable => {
                self.add_report(SchedulerReport::new(SchedulerReportKind::Reallocated { description }));
                ReservationDraft::Reallocated(available.id)
            }
            AvailabilityType::Reusable => {
                self.add_report(SchedulerReport::new(SchedulerReportKind::ReusingProvided { description }));
                ReservationDraft::new(NewReservation {
                    interval: self.slot,
                    kind: ReservationKind::Existing { target: available.id },
                    units: Vec::new(),
                    executable: None,
                    children: Vec::new(),
                })
            }
        }
    }

    pub fn add_report(&mut self, report: SchedulerReport) {
        self.reports.push(report);
    }

    pub fn checkpoint(&self) -> ContextCheckpoint {
        ContextCheckpoint { claims: self.claims.len(), reports: self.reports.len(), used: self.used.clone() }
    }

    pub fn restore(&mut self, checkpoint: ContextCheckpoint) {
        self.claims.truncate(checkpoint.claims);
        self.reports.truncate(checkpoint.reports);
        self.used = checkpoint.used;
    }

    pub fn into_reports(self) -> Vec<SchedulerReport> {
        self.reports
    }
}
