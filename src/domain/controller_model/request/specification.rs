use std::collections::BTreeSet;

use crate::domain::controller_model::reservation::reservation::ReservationId;
use crate::domain::controller_model::resource::resource::{AliasType, Technology};
use crate::domain::controller_model::utils::id::{AliasProviderId, ResourceId, ValueProviderId};

/// What a reservation request asks for. Each variant knows how to build its own reservation task
/// (see `Specification::create_task`).
#[derive(Debug, Clone, PartialEq)]
pub enum Specification {
    Room(RoomSpecification),
    Alias(AliasSpecification),
    Value(ValueSpecification),
    Endpoint(EndpointSpecification),
    Composite(CompositeSpecification),
    ExistingReservation(ExistingReservationSpecification),
}

/// Virtual room on a multipoint device.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSpecification {
    pub participant_count: u32,
    /// Pins the room to one device.
    pub resource_id: Option<ResourceId>,
    pub technologies: BTreeSet<Technology>,
    pub aliases: Vec<AliasSpecification>,
    pub recording: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AliasSpecification {
    pub alias_type: Option<AliasType>,
    pub technology: Option<Technology>,
    pub provider_id: Option<AliasProviderId>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueSpecification {
    pub provider_id: ValueProviderId,
    pub value: Option<String>,
}

/// Exclusive use of an existing terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSpecification {
    pub resource_id: ResourceId,
}

/// Several specifications which are allocated together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeSpecification {
    pub specifications: Vec<Specification>,
}

/// Reuse of an already allocated reservation, which must also be listed as provided.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingReservationSpecification {
    pub reservation_id: ReservationId,
}

impl Specification {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Specification::Room(_) => "room",
            Specification::Alias(_) => "alias",
            Specification::Value(_) => "value",
            Specification::Endpoint(_) => "endpoint",
            Specification::Composite(_) => "composite",
            Specification::ExistingReservation(_) => "existing reservation",
        }
    }

    /// A specification is ready when it can be handed to the scheduler. An empty composite is not.
    pub fn is_ready(&self) -> bool {
        match self {
            Specification::Composite(composite) => {
                !composite.specifications.is_empty() && composite.specifications.iter().all(Specification::is_ready)
            }
            _ => true,
        }
    }
}
