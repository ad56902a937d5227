use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::controller_model::notification::notification::{NotificationSink, NotificationType, ReservationNotification};
use crate::domain::controller_model::notification::operator::{OperatorReport, OperatorReporter};
use crate::domain::controller_model::request::reservation_request::{RequestState, ReservationRequest};
use crate::domain::controller_model::reservation::reservation::{Reservation, ReservationId};
use crate::domain::controller_model::resource::resource_store::ResourceStore;
use crate::domain::controller_model::scheduler::scheduler_context::{AvailabilityType, SchedulerContext};
use crate::domain::controller_model::scheduler::scheduler_report::{SchedulerError, SchedulerReport, SchedulerReportKind};
use crate::domain::controller_model::store::controller_store::{ControllerStore, StoreState};
use crate::domain::controller_model::utils::id::RequestId;
use crate::domain::controller_model::utils::interval::Interval;
use crate::domain::controller_model::utils::statistics::ANALYTICS_TARGET;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Length of the window scheduled by a periodic run, starting at the run's reference time.
    pub lookahead: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { lookahead: Duration::days(7) }
    }
}

impl SchedulerConfig {
    pub fn window(&self, now: DateTime<Utc>) -> Interval {
        Interval::new(now, now + self.lookahead)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerRunSummary {
    pub deleted_reservations: usize,
    pub allocated: Vec<RequestId>,
    pub failed: Vec<RequestId>,
    /// Failed requests whose failure was an internal error rather than an allocation conflict.
    pub internal_errors: Vec<RequestId>,
    pub deleted_executables: usize,
    pub notifications: usize,
    pub cancelled: bool,
}

/// Outcome of one committed allocation.
struct Allocated {
    notifications: Vec<ReservationNotification>,
    reservation_count: usize,
}

/// Allocates pending reservation requests.
///
/// One run walks through **LOAD → SORT → for each request { BEGIN, ALLOCATE, COMMIT | ROLLBACK } →
/// CLEANUP**. Every request is allocated in its own store transaction, so a failing request never
/// affects the requests scheduled before or after it.
#[derive(Debug)]
pub struct Scheduler {
    resources: Arc<ResourceStore>,
    store: ControllerStore,
    notification_sink: Arc<dyn NotificationSink>,
    operator: Arc<dyn OperatorReporter>,
    run_guard: Mutex<()>,
}

impl Scheduler {
    pub fn new(
        resources: Arc<ResourceStore>,
        store: ControllerStore,
        notification_sink: Arc<dyn NotificationSink>,
        operator: Arc<dyn OperatorReporter>,
    ) -> Self {
        Scheduler { resources, store, notification_sink, operator, run_guard: Mutex::new(()) }
    }

    /// Schedules all complete requests intersecting `interval`. `now` is the reference time of the
    /// run: nothing is allocated before it and availability entries ending before it are dropped.
    pub fn run(&self, interval: Interval, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<SchedulerRunSummary> {
        let _guard = self.run_guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let started = Instant::now();
        let mut summary = SchedulerRunSummary::default();
        log::info!("Scheduler run for {} started (now = {}).", interval, now);

        let mut notifications = self.delete_marked_reservations(now)?;
        summary.deleted_reservations = notifications.len();

        let request_ids = self.store.read(|state| state.requests_to_schedule(&interval))?;
        log::debug!("{} requests to schedule.", request_ids.len());

        for request_id in request_ids {
            if cancel.is_cancelled() {
                log::info!("Scheduler run cancelled, remaining requests are left for the next run.");
                summary.cancelled = true;
                break;
            }

            let request_started = Instant::now();
            match self.allocate_request(&request_id, now) {
                Ok(Some(allocated)) => {
                    log::info!("Request '{}' allocated.", request_id);
                    Self::log_request_event(&request_id, RequestState::Allocated, allocated.reservation_count, request_started);
                    notifications.extend(allocated.notifications);
                    summary.allocated.push(request_id);
                }
                Ok(None) => log::debug!("Request '{}' changed since loading, skipped.", request_id),
                Err(SchedulerError::Allocation(report)) => {
                    log::warn!("Allocation of request '{}' failed: {}", request_id, report.message());
                    self.operator.report(OperatorReport::AllocationFailed {
                        request: request_id.to_string(),
                        report: report.message_recursive(),
                    });
                    if let Err(e) = self.mark_failed(&request_id, report) {
                        self.operator.report(OperatorReport::InternalError { component: "scheduler", message: e.to_string() });
                    }
                    Self::log_request_event(&request_id, RequestState::AllocationFailed, 0, request_started);
                    summary.failed.push(request_id);
                }
                Err(SchedulerError::Internal(e)) => {
                    log::error!("Allocation of request '{}' failed with an internal error: {}", request_id, e);
                    self.operator.report(OperatorReport::InternalError {
                        component: "scheduler",
                        message: format!("request '{}': {}", request_id, e),
                    });
                    let report = SchedulerReport::new(SchedulerReportKind::InternalError { message: e.to_string() });
                    if let Err(e) = self.mark_failed(&request_id, report) {
                        self.operator.report(OperatorReport::InternalError { component: "scheduler", message: e.to_string() });
                    }
                    Self::log_request_event(&request_id, RequestState::AllocationFailed, 0, request_started);
                    summary.internal_errors.push(request_id.clone());
                    summary.failed.push(request_id);
                }
            }
        }

        let deleted_executables = self.store.transaction("delete-unreferenced-executables", |state| {
            Ok::<_, Error>(state.delete_unreferenced_executables())
        })?;
        summary.deleted_executables = deleted_executables.len();

        summary.notifications = notifications.len();
        for notification in notifications {
            self.notification_sink.notify(notification);
        }

        log::info!(
            "Scheduler run finished: {} allocated, {} failed, {} reservations deleted.",
            summary.allocated.len(),
            summary.failed.len(),
            summary.deleted_reservations
        );
        tracing::info!(
            target: ANALYTICS_TARGET,
            LogDescription = "Scheduler run finished",
            ComponentType = "SCHEDULER",
            AllocatedCount = summary.allocated.len() as u64,
            FailedCount = summary.failed.len() as u64,
            ReservationCount = summary.deleted_reservations as u64,
            NotificationCount = summary.notifications as u64,
            ProcessingTime = started.elapsed().as_millis() as u64,
        );

        Ok(summary)
    }

    fn log_request_event(request_id: &RequestId, state: RequestState, reservation_count: usize, started: Instant) {
        tracing::info!(
            target: ANALYTICS_TARGET,
            LogDescription = "Request scheduled",
            ComponentType = "SCHEDULER",
            RequestId = %request_id,
            RequestState = ?state,
            ReservationCount = reservation_count as u64,
            ProcessingTime = started.elapsed().as_millis() as u64,
        );
    }

    /// Deletes reservations of deleted requests and moves the cache's working start to `now`.
    fn delete_marked_reservations(&self, now: DateTime<Utc>) -> Result<Vec<ReservationNotification>> {
        self.store.transaction("delete-marked-reservations", |state| {
            let pruned = state.cache.set_working_start(now);
            if pruned > 0 {
                log::debug!("{} availability entries ended before {} and were pruned.", pruned, now);
            }

            let mut notifications = Vec::new();
            for id in state.reservations_marked_for_deletion() {
                notifications.push(notification(NotificationType::Deleted, state.reservation(id)?));
                state.delete_reservation(id)?;
            }
            Ok(notifications)
        })
    }

    fn mark_failed(&self, request_id: &RequestId, report: SchedulerReport) -> Result<()> {
        self.store.transaction("mark-allocation-failed", |state| {
            let request = state.request_mut(request_id)?;
            request.state = RequestState::AllocationFailed;
            request.reports = vec![report];
            Ok(())
        })
    }

    /// Allocates one request inside its own transaction. `None` means the request is no longer
    /// waiting for allocation.
    fn allocate_request(&self, request_id: &RequestId, now: DateTime<Utc>) -> std::result::Result<Option<Allocated>, SchedulerError> {
        self.store.transaction("allocate-request", |state| {
            let request = state.request(request_id)?.clone();
            if request.state != RequestState::Complete {
                return Ok(None);
            }

            let slot = request.interval.clip_start(now);
            if slot.is_empty() {
                return Err(SchedulerError::invalid(format!("requested interval {} lies before {}", request.interval, now)));
            }

            let (draft, task, reports) = {
                let mut ctx = SchedulerContext::new(&self.resources, state, request_id.clone(), now, slot);
                for id in request.allocation.reservations() {
                    let Some(reservation) = state.reservations.get(*id) else {
                        continue;
                    };
                    if reservation.marked_for_deletion || !reservation.interval.overlaps(&slot) {
                        continue;
                    }
                    for reallocatable in state.reservation_tree(*id) {
                        ctx.add_available(reallocatable, AvailabilityType::Reallocatable)?;
                    }
                }
                for provided in &request.provided_reservations {
                    check_provided(state, &request, *provided, &slot)?;
                    ctx.add_available(*provided, AvailabilityType::Reusable)?;
                }

                let mut task = request.specification.create_task();
                let draft = task.perform(&mut ctx)?;
                (draft, task, ctx.into_reports())
            };

            let reallocated = draft.reallocated_ids();
            state.detach_reallocated(&reallocated);
            let (preceding, mut notifications) = reconcile_history(state, &request, &reallocated, now, slot)?;

            let new_id = state.persist_draft(draft, request_id, None, None)?;
            if let Some(preceding) = preceding {
                if state.reservation(preceding)?.kind.is_same_kind(&state.reservation(new_id)?.kind) {
                    task.migrate(state, preceding, new_id)?;
                }
            }

            let notification_type = if request.allocation.reservations().is_empty() { NotificationType::New } else { NotificationType::Modified };
            notifications.push(notification(notification_type, state.reservation(new_id)?));
            let reservation_count = state.reservation_tree(new_id).len();

            let request = state.request_mut(request_id)?;
            request.allocation.push(new_id);
            request.state = RequestState::Allocated;
            request.reports = reports;

            Ok(Some(Allocated { notifications, reservation_count }))
        })
    }
}

/// A provided reservation must exist, contain the requested slot and not be reused by another
/// request in that slot.
fn check_provided(state: &StoreState, request: &ReservationRequest, provided: ReservationId, slot: &Interval) -> std::result::Result<(), SchedulerError> {
    let Some(reservation) = state.reservations.get(provided).filter(|r| !r.marked_for_deletion) else {
        return Err(SchedulerError::allocation(SchedulerReportKind::ProvidedReservationNotAvailable {
            reservation: format!("Reservation {:?}", provided),
        }));
    };

    if !reservation.interval.contains(slot) {
        return Err(SchedulerError::allocation(SchedulerReportKind::ProvidedReservationNotUsable {
            reservation: reservation.describe(),
            interval: *slot,
        }));
    }

    let consumed = state
        .reservations_reusing(provided)
        .iter()
        .any(|reuse| reuse.interval.overlaps(slot) && reuse.request_id.as_ref() != Some(&request.id));
    if consumed {
        return Err(SchedulerError::allocation(SchedulerReportKind::ProvidedReservationNotAvailable { reservation: reservation.describe() }));
    }
    Ok(())
}

/// Deals with the reservations the request had before: future ones are deleted, one still running at
/// `now` is truncated and becomes the preceding reservation, past ones stay in the history.
fn reconcile_history(
    state: &mut StoreState,
    request: &ReservationRequest,
    reallocated: &HashSet<ReservationId>,
    now: DateTime<Utc>,
    slot: Interval,
) -> std::result::Result<(Option<ReservationId>, Vec<ReservationNotification>), SchedulerError> {
    let mut preceding = None;
    let mut notifications = Vec::new();

    for old in request.allocation.reservations() {
        if reallocated.contains(old) {
            continue;
        }
        let Some(reservation) = state.reservations.get(*old) else {
            continue;
        };

        if reservation.interval.end <= now {
            continue;
        }
        if reservation.interval.start < now {
            if preceding.is_some() {
                return Err(SchedulerError::Internal(Error::InvariantViolation(format!(
                    "request '{}' has more than one reservation running at {}",
                    request.id, now
                ))));
            }
            state.truncate_reservation(*old, slot.start)?;
            preceding = Some(*old);
        } else {
            notifications.push(notification(NotificationType::Deleted, reservation));
            state.delete_reservation(*old)?;
            if let Ok(request) = state.request_mut(&request.id) {
                request.allocation.remove(*old);
            }
        }
    }
    Ok((preceding, notifications))
}

fn notification(notification_type: NotificationType, reservation: &Reservation) -> ReservationNotification {
    ReservationNotification {
        notification_type,
        request_id: reservation.request_id.clone(),
        interval: reservation.interval,
        description: reservation.describe(),
    }
}
