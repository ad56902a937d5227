use crate::domain::controller_model::request::specification::ExistingReservationSpecification;
use crate::domain::controller_model::reservation::reservation::ReservationKind;
use crate::domain::controller_model::reservation::reservation_draft::ReservationDraft;
use crate::domain::controller_model::scheduler::reservation_task::ReservationTask;
use crate::domain::controller_model::scheduler::scheduler_context::{AvailabilityType, SchedulerContext};
use crate::domain::controller_model::scheduler::scheduler_report::{SchedulerError, SchedulerReportKind};

/// Reuses a reservation which was provided to the request.
#[derive(Debug, Clone)]
pub struct ExistingReservationTask {
    spec: ExistingReservationSpecification,
}

impl ExistingReservationTask {
    pub fn new(spec: ExistingReservationSpecification) -> Self {
        ExistingReservationTask { spec }
    }
}

impl ReservationTask for ExistingReservationTask {
    fn perform(&mut self, ctx: &mut SchedulerContext) -> Result<ReservationDraft, SchedulerError> {
        let target = self.spec.reservation_id;

        // The reuse allocated by an earlier run is kept if it still fits.
        let reusable = ctx.find_available(|available| match available.availability {
            AvailabilityType::Reallocatable => matches!(available.kind, ReservationKind::Existing { target: t } if t == target),
            AvailabilityType::Reusable => available.id == target,
        });
        if let Some(available) = reusable {
            return Ok(ctx.reuse(&available));
        }

        let description = match ctx.state.reservations.get(target) {
            Some(reservation) => reservation.describe(),
            None => format!("Reservation {:?}", target),
        };
        Err(SchedulerError::allocation(SchedulerReportKind::ProvidedReservationNotAvailable { reservation: description }))
    }
}
