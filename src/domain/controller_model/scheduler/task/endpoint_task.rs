use crate::domain::controller_model::cache::resource_unit::ResourceUnit;
use crate::domain::controller_model::request::specification::EndpointSpecification;
use crate::domain::controller_model::reservation::reservation::ReservationKind;
use crate::domain::controller_model::reservation::reservation_draft::{ExecutableDraft, NewReservation, ReservationDraft};
use crate::domain::controller_model::scheduler::reservation_task::ReservationTask;
use crate::domain::controller_model::scheduler::scheduler_context::SchedulerContext;
use crate::domain::controller_model::scheduler::scheduler_report::{SchedulerError, SchedulerReport, SchedulerReportKind};

/// Exclusive use of one terminal for the requested slot.
#[derive(Debug, Clone)]
pub struct EndpointTask {
    spec: EndpointSpecification,
}

impl EndpointTask {
    pub fn new(spec: EndpointSpecification) -> Self {
        EndpointTask { spec }
    }
}

impl ReservationTask for EndpointTask {
    fn perform(&mut self, ctx: &mut SchedulerContext) -> Result<ReservationDraft, SchedulerError> {
        let resources = ctx.resources;
        let resource_id = &self.spec.resource_id;
        let resource = resources
            .get_resource(resource_id)
            .ok_or_else(|| SchedulerError::allocation(SchedulerReportKind::ResourceNotFound { resource_id: resource_id.to_string() }))?;

        let terminal = resource
            .terminal
            .as_ref()
            .ok_or_else(|| SchedulerError::invalid(format!("resource '{}' is not a terminal", resource_id)))?;
        if !resource.allocatable {
            return Err(SchedulerError::allocation(SchedulerReportKind::ResourceNotAllocatable { resource_id: resource_id.to_string() }));
        }
        let agent_id = resource
            .agent_id
            .clone()
            .ok_or_else(|| SchedulerError::invalid(format!("terminal '{}' is not managed by an agent", resource_id)))?;

        let reusable = ctx.find_available(|available| matches!(&available.kind, ReservationKind::Endpoint { resource_id: id } if id == resource_id));
        if let Some(available) = reusable {
            return Ok(ctx.reuse(&available));
        }

        let slot = ctx.slot;
        let unit = ResourceUnit::Device { resource_id: resource_id.clone() };
        if !ctx.is_unit_available(&unit, &slot) {
            return Err(SchedulerError::allocation(SchedulerReportKind::ResourceAlreadyAllocated { resource_id: resource_id.to_string() }));
        }

        ctx.claim(unit.clone(), slot);
        ctx.add_report(SchedulerReport::new(SchedulerReportKind::Allocated { description: format!("endpoint '{}'", resource_id) }));
        Ok(ReservationDraft::new(NewReservation {
            interval: slot,
            kind: ReservationKind::Endpoint { resource_id: resource_id.clone() },
            units: vec![unit],
            executable: Some(ExecutableDraft::Endpoint { resource_id: resource_id.clone(), agent_id, aliases: terminal.aliases.clone() }),
            children: Vec::new(),
        }))
    }
}
