use slotmap::new_key_type;
use std::mem::discriminant;

use crate::domain::controller_model::executor::executable::ExecutableId;
use crate::domain::controller_model::resource::resource::Alias;
use crate::domain::controller_model::utils::id::{AliasProviderId, RequestId, ResourceId, ValueProviderId};
use crate::domain::controller_model::utils::interval::Interval;

new_key_type! {
    pub struct ReservationId;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReservationKind {
    Room { resource_id: ResourceId, port_count: u32 },
    Alias { provider_id: AliasProviderId, alias: Alias },
    Value { provider_id: ValueProviderId, value: String },
    Endpoint { resource_id: ResourceId },
    Recording { resource_id: ResourceId },
    /// Parent of the reservations of a composite specification.
    Compound,
    /// Reuse of another reservation, which keeps holding the resource units.
    Existing { target: ReservationId },
}

impl ReservationKind {
    pub fn name(&self) -> &'static str {
        match self {
            ReservationKind::Room { .. } => "room",
            ReservationKind::Alias { .. } => "alias",
            ReservationKind::Value { .. } => "value",
            ReservationKind::Endpoint { .. } => "endpoint",
            ReservationKind::Recording { .. } => "recording",
            ReservationKind::Compound => "compound",
            ReservationKind::Existing { .. } => "existing",
        }
    }

    pub fn is_same_kind(&self, other: &ReservationKind) -> bool {
        discriminant(self) == discriminant(other)
    }
}

/// An allocated, interval scoped claim on resource units.
///
/// Reservations form trees: children are contained in the interval of their parent and are deleted
/// with it. A reservation owns at most one executable.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: ReservationId,
    pub request_id: Option<RequestId>,
    pub interval: Interval,
    pub kind: ReservationKind,
    pub parent: Option<ReservationId>,
    pub children: Vec<ReservationId>,
    pub executable: Option<ExecutableId>,
    /// Set when the owning request was deleted, the next scheduler run removes the reservation.
    pub marked_for_deletion: bool,
}

impl Reservation {
    pub fn describe(&self) -> String {
        match &self.kind {
            ReservationKind::Room { resource_id, port_count } => {
                format!("room with {} ports on '{}' in {}", port_count, resource_id, self.interval)
            }
            ReservationKind::Alias { alias, .. } => format!("alias {} in {}", alias, self.interval),
            ReservationKind::Value { value, provider_id } => format!("value '{}' of '{}' in {}", value, provider_id, self.interval),
            ReservationKind::Endpoint { resource_id } => format!("endpoint '{}' in {}", resource_id, self.interval),
            ReservationKind::Recording { resource_id } => format!("recording on '{}' in {}", resource_id, self.interval),
            ReservationKind::Compound => format!("compound of {} reservations in {}", self.children.len(), self.interval),
            ReservationKind::Existing { target } => format!("reuse of {:?} in {}", target, self.interval),
        }
    }
}
