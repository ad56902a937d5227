use std::iter;

use crate::domain::controller_model::cache::resource_unit::ResourceUnit;
use crate::domain::controller_model::request::specification::ValueSpecification;
use crate::domain::controller_model::reservation::reservation::ReservationKind;
use crate::domain::controller_model::reservation::reservation_draft::{NewReservation, ReservationDraft};
use crate::domain::controller_model::scheduler::reservation_task::ReservationTask;
use crate::domain::controller_model::scheduler::scheduler_context::SchedulerContext;
use crate::domain::controller_model::scheduler::scheduler_report::{SchedulerError, SchedulerReport, SchedulerReportKind};

/// Allocates a generic value, the requested one or the first free one of the provider's pattern.
#[derive(Debug, Clone)]
pub struct ValueTask {
    spec: ValueSpecification,
}

impl ValueTask {
    pub fn new(spec: ValueSpecification) -> Self {
        ValueTask { spec }
    }
}

impl ReservationTask for ValueTask {
    fn perform(&mut self, ctx: &mut SchedulerContext) -> Result<ReservationDraft, SchedulerError> {
        let resources = ctx.resources;
        let provider = resources
            .get_value_provider(&self.spec.provider_id)
            .ok_or_else(|| SchedulerError::invalid(format!("value provider '{}' does not exist", self.spec.provider_id)))?;

        if let Some(value) = &self.spec.value {
            if !provider.pattern.matches(value) {
                return Err(SchedulerError::invalid(format!(
                    "value '{}' does not match pattern '{}' of '{}'",
                    value, provider.pattern, provider.id
                )));
            }
        }

        let reusable = ctx.find_available(|available| match &available.kind {
            ReservationKind::Value { provider_id, value } => {
                *provider_id == provider.id && self.spec.value.as_ref().is_none_or(|requested| requested == value)
            }
            _ => false,
        });
        if let Some(available) = reusable {
            return Ok(ctx.reuse(&available));
        }

        let slot = ctx.slot;
        let held = ctx.previously_held_units();
        let candidates: Box<dyn Iterator<Item = String> + '_> = match &self.spec.value {
            Some(value) => Box::new(iter::once(value.clone())),
            None => Box::new(
                held.iter()
                    .filter_map(|unit| match unit {
                        ResourceUnit::Value { provider_id, value } if *provider_id == provider.id => Some(value.clone()),
                        _ => None,
                    })
                    .chain(provider.pattern.values()),
            ),
        };

        for value in candidates {
            let unit = ResourceUnit::Value { provider_id: provider.id.clone(), value: value.clone() };
            if !ctx.is_unit_available(&unit, &slot) {
                continue;
            }

            ctx.claim(unit.clone(), slot);
            ctx.add_report(SchedulerReport::new(SchedulerReportKind::Allocated {
                description: format!("value '{}' from '{}'", value, provider.id),
            }));
            return Ok(ReservationDraft::new(NewReservation {
                interval: slot,
                kind: ReservationKind::Value { provider_id: provider.id.clone(), value },
                units: vec![unit],
                executable: None,
                children: Vec::new(),
            }));
        }

        Err(SchedulerError::allocation(match &self.spec.value {
            Some(value) => SchedulerReportKind::ValueAlreadyAllocated { value: value.clone(), provider: provider.id.to_string() },
            None => SchedulerReportKind::NoFreeValue { provider: provider.id.to_string(), pattern: provider.pattern.to_string() },
        }))
    }
}
