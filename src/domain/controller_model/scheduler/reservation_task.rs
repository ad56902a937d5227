use crate::domain::controller_model::request::specification::Specification;
use crate::domain::controller_model::reservation::reservation::ReservationId;
use crate::domain::controller_model::reservation::reservation_draft::ReservationDraft;
use crate::domain::controller_model::scheduler::scheduler_context::SchedulerContext;
use crate::domain::controller_model::scheduler::scheduler_report::SchedulerError;
use crate::domain::controller_model::scheduler::task::alias_task::AliasTask;
use crate::domain::controller_model::scheduler::task::composite_task::CompositeTask;
use crate::domain::controller_model::scheduler::task::endpoint_task::EndpointTask;
use crate::domain::controller_model::scheduler::task::existing_reservation_task::ExistingReservationTask;
use crate::domain::controller_model::scheduler::task::room_task::RoomTask;
use crate::domain::controller_model::scheduler::task::value_task::ValueTask;
use crate::domain::controller_model::store::controller_store::StoreState;
use crate::error::Result;

/// Turns one specification into a reservation tree.
///
/// ### Protocol
///
/// 1. **Perform**: The task inspects the [`SchedulerContext`] (committed state, reusable and
///    reallocatable reservations, claims of sibling tasks) and returns a [`ReservationDraft`].
///    Nested specifications are handled by creating sub-tasks and running them inside
///    [`SchedulerContext::nested`].
/// 2. **Persist**: The scheduler writes the draft into the store. Tasks never touch the store
///    themselves, so a failed attempt leaves nothing behind.
/// 3. **Migrate**: If the request's previous reservation is still running and has the same kind as
///    the new one, the scheduler lets the task hand over the running state from the old reservation
///    to the new one.
///
/// A domain failure (conflict, missing capacity, invalid specification) is returned as
/// [`SchedulerError::Allocation`] with a report describing the cause.
pub trait ReservationTask: std::fmt::Debug {
    fn perform(&mut self, ctx: &mut SchedulerContext) -> std::result::Result<ReservationDraft, SchedulerError>;

    /// Hands over from `preceding` to the freshly persisted `new` reservation. The default keeps
    /// nothing, the old executable is simply stopped.
    fn migrate(&self, _state: &mut StoreState, _preceding: ReservationId, _new: ReservationId) -> Result<()> {
        Ok(())
    }
}

impl Specification {
    pub fn create_task(&self) -> Box<dyn ReservationTask> {
        match self {
            Specification::Room(spec) => Box::new(RoomTask::new(spec.clone())),
            Specification::Alias(spec) => Box::new(AliasTask::new(spec.clone())),
            Specification::Value(spec) => Box::new(ValueTask::new(spec.clone())),
            Specification::Endpoint(spec) => Box::new(EndpointTask::new(spec.clone())),
            Specification::Composite(spec) => Box::new(CompositeTask::new(spec.clone())),
            Specification::ExistingReservation(spec) => Box::new(ExistingReservationTask::new(spec.clone())),
        }
    }
}
