use crate::domain::controller_model::request::specification::{AliasSpecification, CompositeSpecification, Specification};
use crate::domain::controller_model::reservation::reservation::ReservationKind;
use crate::domain::controller_model::reservation::reservation_draft::{ExecutableDraft, NewReservation, ReservationDraft};
use crate::domain::controller_model::scheduler::reservation_task::ReservationTask;
use crate::domain::controller_model::scheduler::scheduler_context::SchedulerContext;
use crate::domain::controller_model::scheduler::scheduler_report::{SchedulerError, SchedulerReport, SchedulerReportKind};

/// Allocates all child specifications or none of them.
///
/// A composite with endpoints becomes a compartment: exactly one room is required and every endpoint
/// is connected to it, dialling the room's first alias.
#[derive(Debug, Clone)]
pub struct CompositeTask {
    spec: CompositeSpecification,
}

impl CompositeTask {
    pub fn new(spec: CompositeSpecification) -> Self {
        CompositeTask { spec }
    }

    fn is_compartment(&self) -> bool {
        self.spec.specifications.iter().any(|spec| matches!(spec, Specification::Endpoint(_)))
    }

    /// Child specifications as they are allocated. A compartment room without aliases gets one, since
    /// endpoints need something to dial.
    fn prepared_specifications(&self) -> Vec<Specification> {
        let compartment = self.is_compartment();
        self.spec
            .specifications
            .iter()
            .cloned()
            .map(|mut spec| {
                if let Specification::Room(room) = &mut spec {
                    if compartment && room.aliases.is_empty() {
                        room.aliases.push(AliasSpecification::default());
                    }
                }
                spec
            })
            .collect()
    }
}

impl ReservationTask for CompositeTask {
    fn perform(&mut self, ctx: &mut SchedulerContext) -> Result<ReservationDraft, SchedulerError> {
        if self.spec.specifications.is_empty() {
            return Err(SchedulerError::invalid("a composite needs at least one specification"));
        }

        let compartment = self.is_compartment();
        if compartment {
            let rooms = self.spec.specifications.iter().filter(|spec| matches!(spec, Specification::Room(_))).count();
            if rooms != 1 {
                return Err(SchedulerError::invalid(format!("a composite with endpoints needs exactly one room, found {}", rooms)));
            }
        }

        let mut children = Vec::new();
        for (index, spec) in self.prepared_specifications().into_iter().enumerate() {
            let mut task = spec.create_task();
            match ctx.nested(|ctx| task.perform(ctx)) {
                Ok(draft) => children.push(draft),
                Err(SchedulerError::Allocation(report)) => {
                    return Err(SchedulerError::Allocation(SchedulerReport::with_children(
                        SchedulerReportKind::CompositeChildFailed { index, kind: spec.kind_name() },
                        vec![report],
                    )));
                }
                Err(internal) => return Err(internal),
            }
        }

        ctx.add_report(SchedulerReport::new(SchedulerReportKind::Allocated {
            description: format!("composite of {} specifications", children.len()),
        }));
        Ok(ReservationDraft::new(NewReservation {
            interval: ctx.slot,
            kind: ReservationKind::Compound,
            units: Vec::new(),
            executable: compartment.then_some(ExecutableDraft::Compartment),
            children,
        }))
    }
}
