use std::iter;

use crate::domain::controller_model::cache::resource_unit::ResourceUnit;
use crate::domain::controller_model::request::specification::AliasSpecification;
use crate::domain::controller_model::reservation::reservation::ReservationKind;
use crate::domain::controller_model::reservation::reservation_draft::{NewReservation, ReservationDraft};
use crate::domain::controller_model::resource::resource::{Alias, AliasProvider};
use crate::domain::controller_model::scheduler::reservation_task::ReservationTask;
use crate::domain::controller_model::scheduler::scheduler_context::{AvailableReservation, SchedulerContext};
use crate::domain::controller_model::scheduler::scheduler_report::{SchedulerError, SchedulerReport, SchedulerReportKind};
use crate::domain::controller_model::utils::id::{AliasProviderId, ResourceId};

/// Allocates one alias from the first matching provider with a free value.
#[derive(Debug, Clone)]
pub struct AliasTask {
    spec: AliasSpecification,
    /// Providers of this resource are tried first, set for aliases of a room.
    preferred_resource: Option<ResourceId>,
}

impl AliasTask {
    pub fn new(spec: AliasSpecification) -> Self {
        AliasTask { spec, preferred_resource: None }
    }

    pub fn for_room(spec: AliasSpecification, resource_id: ResourceId) -> Self {
        AliasTask { spec, preferred_resource: Some(resource_id) }
    }

    fn matches_provider(&self, provider: &AliasProvider) -> bool {
        self.spec.provider_id.as_ref().is_none_or(|id| *id == provider.id)
            && self.spec.alias_type.is_none_or(|alias_type| alias_type == provider.alias_type)
            && self.spec.technology.is_none_or(|technology| provider.alias_type.technology() == Some(technology))
            && self.spec.value.as_ref().is_none_or(|value| provider.pattern.matches(value))
    }

    pub fn matches_alias(&self, provider_id: &AliasProviderId, alias: &Alias) -> bool {
        self.spec.provider_id.as_ref().is_none_or(|id| id == provider_id)
            && self.spec.alias_type.is_none_or(|alias_type| alias_type == alias.alias_type)
            && self.spec.technology.is_none_or(|technology| alias.alias_type.technology() == Some(technology))
            && self.spec.value.as_ref().is_none_or(|value| *value == alias.value)
    }

    fn is_reusable(&self, available: &AvailableReservation) -> bool {
        match &available.kind {
            ReservationKind::Alias { provider_id, alias } => self.matches_alias(provider_id, alias),
            _ => false,
        }
    }

    fn description(&self) -> String {
        let mut parts = Vec::new();
        if let Some(alias_type) = self.spec.alias_type {
            parts.push(format!("type {:?}", alias_type));
        }
        if let Some(technology) = self.spec.technology {
            parts.push(format!("technology {:?}", technology));
        }
        if let Some(provider_id) = &self.spec.provider_id {
            parts.push(format!("provider '{}'", provider_id));
        }
        if let Some(value) = &self.spec.value {
            parts.push(format!("value '{}'", value));
        }

        if parts.is_empty() { "alias".to_string() } else { format!("alias with {}", parts.join(", ")) }
    }
}

impl ReservationTask for AliasTask {
    fn perform(&mut self, ctx: &mut SchedulerContext) -> Result<ReservationDraft, SchedulerError> {
        let resources = ctx.resources;
        if let Some(provider_id) = &self.spec.provider_id {
            if resources.get_alias_provider(provider_id).is_none() {
                return Err(SchedulerError::invalid(format!("alias provider '{}' does not exist", provider_id)));
            }
        }

        if let Some(available) = ctx.find_available(|available| self.is_reusable(available)) {
            return Ok(ctx.reuse(&available));
        }

        let mut providers: Vec<&AliasProvider> = resources.alias_providers().filter(|p| self.matches_provider(p)).collect();
        if providers.is_empty() {
            return Err(SchedulerError::allocation(SchedulerReportKind::NoMatchingProvider { description: self.description() }));
        }
        if let Some(preferred) = &self.preferred_resource {
            providers.sort_by_key(|provider| provider.resource_id != *preferred);
        }

        let slot = ctx.slot;
        let held = ctx.previously_held_units();
        let mut failures = Vec::new();

        for provider in providers {
            let candidates: Box<dyn Iterator<Item = String> + '_> = match &self.spec.value {
                Some(value) => Box::new(iter::once(value.clone())),
                None => {
                    let previous = held.iter().filter_map(|unit| match unit {
                        ResourceUnit::Alias { provider_id, value } if *provider_id == provider.id => Some(value.clone()),
                        _ => None,
                    });
                    Box::new(previous.chain(provider.pattern.values()))
                }
            };

            for value in candidates {
                let unit = ResourceUnit::Alias { provider_id: provider.id.clone(), value: value.clone() };
                if !ctx.is_unit_available(&unit, &slot) {
                    continue;
                }

                ctx.claim(unit.clone(), slot);
                let alias = Alias { alias_type: provider.alias_type, value };
                ctx.add_report(SchedulerReport::new(SchedulerReportKind::Allocated {
                    description: format!("alias {} from '{}'", alias, provider.id),
                }));
                return Ok(ReservationDraft::new(NewReservation {
                    interval: slot,
                    kind: ReservationKind::Alias { provider_id: provider.id.clone(), alias },
                    units: vec![unit],
                    executable: None,
                    children: Vec::new(),
                }));
            }

            failures.push(SchedulerReport::new(match &self.spec.value {
                Some(value) => SchedulerReportKind::ValueAlreadyAllocated { value: value.clone(), provider: provider.id.to_string() },
                None => SchedulerReportKind::NoFreeValue { provider: provider.id.to_string(), pattern: provider.pattern.to_string() },
            }));
        }

        if failures.len() == 1 {
            return Err(SchedulerError::Allocation(failures.remove(0)));
        }
        Err(SchedulerError::Allocation(SchedulerReport::with_children(
            SchedulerReportKind::NoAvailableProvider { description: self.description() },
            failures,
        )))
    }
}
