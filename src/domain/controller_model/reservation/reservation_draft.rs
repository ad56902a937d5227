use std::collections::{BTreeSet, HashSet};

use crate::domain::controller_model::cache::resource_unit::ResourceUnit;
use crate::domain::controller_model::reservation::reservation::{ReservationId, ReservationKind};
use crate::domain::controller_model::resource::resource::{Alias, Technology};
use crate::domain::controller_model::utils::id::{AgentId, ResourceId};
use crate::domain::controller_model::utils::interval::Interval;

/// Result of a reservation task: either a reservation from the request's own history which is kept
/// as it is, or a tree of reservations still to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum ReservationDraft {
    Reallocated(ReservationId),
    New(Box<NewReservation>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReservation {
    pub interval: Interval,
    pub kind: ReservationKind,
    pub units: Vec<ResourceUnit>,
    pub executable: Option<ExecutableDraft>,
    pub children: Vec<ReservationDraft>,
}

/// Executable created together with a new reservation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutableDraft {
    Room { resource_id: ResourceId, agent_id: AgentId, port_count: u32, technologies: BTreeSet<Technology> },
    Endpoint { resource_id: ResourceId, agent_id: AgentId, aliases: Vec<Alias> },
    /// Recording of the room executable created by the parent reservation.
    Recording { resource_id: ResourceId, agent_id: AgentId },
    /// Rooms and endpoints of the children, connected with each other.
    Compartment,
}

impl ReservationDraft {
    pub fn new(reservation: NewReservation) -> Self {
        ReservationDraft::New(Box::new(reservation))
    }

    /// Ids of all reallocated reservations anywhere in the tree.
    pub fn reallocated_ids(&self) -> HashSet<ReservationId> {
        let mut ids = HashSet::new();
        self.collect_reallocated(&mut ids);
        ids
    }

    fn collect_reallocated(&self, ids: &mut HashSet<ReservationId>) {
        match self {
            ReservationDraft::Reallocated(id) => {
                ids.insert(*id);
            }
            ReservationDraft::New(reservation) => {
                for child in &reservation.children {
                    child.collect_reallocated(ids);
                }
            }
        }
    }
}
