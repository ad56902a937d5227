use chrono::{DateTime, Utc};
use slotmap::{Key, SlotMap};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::domain::controller_model::cache::availability_cache::AvailabilityCache;
use crate::domain::controller_model::executor::executable::{
    Compartment, Connection, Endpoint, Executable, ExecutableId, ExecutableKind, RecordingService, RoomEndpoint,
};
use crate::domain::controller_model::request::reservation_request::{RequestState, ReservationRequest};
use crate::domain::controller_model::reservation::reservation::{Reservation, ReservationId, ReservationKind};
use crate::domain::controller_model::reservation::reservation_draft::{ExecutableDraft, NewReservation, ReservationDraft};
use crate::domain::controller_model::resource::resource::Alias;
use crate::domain::controller_model::utils::id::RequestId;
use crate::domain::controller_model::utils::interval::Interval;
use crate::error::{Error, Result};

/// Everything the controller persists: requests, reservations, executables and the availability
/// cache derived from the reservations.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub requests: BTreeMap<RequestId, ReservationRequest>,
    pub reservations: SlotMap<ReservationId, Reservation>,
    pub executables: SlotMap<ExecutableId, Executable>,
    pub cache: AvailabilityCache,
    /// Number of committed transactions.
    pub version: u64,
}

/// Shared handle on the persisted state.
///
/// All mutations run inside [`ControllerStore::transaction`], which works on a shadow copy of the
/// state and only replaces the real state if the closure succeeds. Dropping the shadow is the rollback.
#[derive(Debug, Clone, Default)]
pub struct ControllerStore {
    inner: Arc<RwLock<StoreState>>,
}

impl ControllerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> Result<R> {
        let guard = self.inner.read().map_err(|e| Error::StorePoisoned(e.to_string()))?;
        Ok(f(&guard))
    }

    pub fn transaction<R, E, F>(&self, label: &str, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&mut StoreState) -> std::result::Result<R, E>,
        E: From<Error>,
    {
        let mut guard = self.inner.write().map_err(|e| E::from(Error::StorePoisoned(e.to_string())))?;
        let mut shadow = guard.clone();

        match f(&mut shadow) {
            Ok(result) => {
                shadow.version += 1;
                *guard = shadow;
                log::trace!("Transaction '{}' committed (version {}).", label, guard.version);
                Ok(result)
            }
            Err(e) => {
                log::debug!("Transaction '{}' rolled back.", label);
                Err(e)
            }
        }
    }
}

impl StoreState {
    pub fn request(&self, id: &RequestId) -> Result<&ReservationRequest> {
        self.requests.get(id).ok_or_else(|| Error::not_found("Reservation request", id))
    }

    pub fn request_mut(&mut self, id: &RequestId) -> Result<&mut ReservationRequest> {
        self.requests.get_mut(id).ok_or_else(|| Error::not_found("Reservation request", id))
    }

    pub fn reservation(&self, id: ReservationId) -> Result<&Reservation> {
        self.reservations.get(id).ok_or_else(|| Error::not_found("Reservation", format!("{:?}", id)))
    }

    pub fn executable(&self, id: ExecutableId) -> Result<&Executable> {
        self.executables.get(id).ok_or_else(|| Error::not_found("Executable", format!("{:?}", id)))
    }

    /// Complete requests intersecting `interval`, in scheduling order.
    pub fn requests_to_schedule(&self, interval: &Interval) -> Vec<RequestId> {
        let mut requests: Vec<&ReservationRequest> = self
            .requests
            .values()
            .filter(|request| request.state == RequestState::Complete && request.interval.overlaps(interval))
            .collect();
        requests.sort_by(|a, b| a.scheduling_order(b));
        requests.into_iter().map(|request| request.id.clone()).collect()
    }

    pub fn reservations_marked_for_deletion(&self) -> Vec<ReservationId> {
        self.reservations.values().filter(|r| r.marked_for_deletion && r.parent.is_none()).map(|r| r.id).collect()
    }

    /// `id` followed by all its descendants.
    pub fn reservation_tree(&self, id: ReservationId) -> Vec<ReservationId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(reservation) = self.reservations.get(current) {
                result.push(current);
                stack.extend(reservation.children.iter().rev().copied());
            }
        }
        result
    }

    /// Live reservations reusing `target`.
    pub fn reservations_reusing(&self, target: ReservationId) -> Vec<&Reservation> {
        self.reservations
            .values()
            .filter(|r| !r.marked_for_deletion && matches!(r.kind, ReservationKind::Existing { target: t } if t == target))
            .collect()
    }

    /// Alias held by `reservation`, following reuses.
    pub fn alias_of(&self, reservation: ReservationId) -> Option<Alias> {
        match &self.reservations.get(reservation)?.kind {
            ReservationKind::Alias { alias, .. } => Some(alias.clone()),
            ReservationKind::Existing { target } => self.alias_of(*target),
            _ => None,
        }
    }

    /// Persists a reservation tree produced by a reservation task together with its executables and
    /// availability entries. Returns the id of the tree's root.
    pub fn persist_draft(
        &mut self,
        draft: ReservationDraft,
        request_id: &RequestId,
        parent: Option<ReservationId>,
        parent_executable: Option<ExecutableId>,
    ) -> Result<ReservationId> {
        match draft {
            ReservationDraft::Reallocated(id) => {
                let reservation = self.reservations.get_mut(id).ok_or_else(|| Error::not_found("Reservation", format!("{:?}", id)))?;
                reservation.parent = parent;
                self.attach_child(parent, id);
                Ok(id)
            }
            ReservationDraft::New(new) => {
                let NewReservation { interval, kind, units, executable, children } = *new;

                let id = self.reservations.insert_with_key(|id| Reservation {
                    id,
                    request_id: Some(request_id.clone()),
                    interval,
                    kind,
                    parent,
                    children: Vec::new(),
                    executable: None,
                    marked_for_deletion: false,
                });
                self.attach_child(parent, id);

                for unit in units {
                    self.cache.reserve(unit, interval, id)?;
                }

                let executable_id = match &executable {
                    Some(executable) => Some(self.create_executable(executable, interval, &children, parent_executable)?),
                    None => None,
                };
                if let Some(reservation) = self.reservations.get_mut(id) {
                    reservation.executable = executable_id;
                }

                let mut child_ids = Vec::with_capacity(children.len());
                for child in children {
                    child_ids.push(self.persist_draft(child, request_id, Some(id), executable_id)?);
                }

                if let (Some(ExecutableDraft::Compartment), Some(compartment)) = (&executable, executable_id) {
                    self.link_compartment(compartment, &child_ids)?;
                }

                Ok(id)
            }
        }
    }

    fn attach_child(&mut self, parent: Option<ReservationId>, child: ReservationId) {
        if let Some(parent) = parent.and_then(|parent| self.reservations.get_mut(parent)) {
            if !parent.children.contains(&child) {
                parent.children.push(child);
            }
        }
    }

    fn create_executable(
        &mut self,
        draft: &ExecutableDraft,
        interval: Interval,
        children: &[ReservationDraft],
        parent_executable: Option<ExecutableId>,
    ) -> Result<ExecutableId> {
        let kind = match draft {
            ExecutableDraft::Room { resource_id, agent_id, port_count, technologies } => {
                let aliases = children
                    .iter()
                    .filter_map(|child| match child {
                        ReservationDraft::New(new) => match &new.kind {
                            ReservationKind::Alias { alias, .. } => Some(alias.clone()),
                            ReservationKind::Existing { target } => self.alias_of(*target),
                            _ => None,
                        },
                        ReservationDraft::Reallocated(id) => self.alias_of(*id),
                    })
                    .collect();

                ExecutableKind::Room(RoomEndpoint {
                    resource_id: resource_id.clone(),
                    agent_id: agent_id.clone(),
                    port_count: *port_count,
                    technologies: technologies.clone(),
                    aliases,
                    room_name: String::new(),
                    remote_room_id: None,
                })
            }
            ExecutableDraft::Endpoint { resource_id, agent_id, aliases } => {
                ExecutableKind::Endpoint(Endpoint { resource_id: resource_id.clone(), agent_id: agent_id.clone(), aliases: aliases.clone() })
            }
            ExecutableDraft::Recording { resource_id, agent_id } => {
                let room = parent_executable
                    .filter(|id| matches!(self.executables.get(*id).map(|e| &e.kind), Some(ExecutableKind::Room(_))))
                    .ok_or_else(|| Error::InvariantViolation("recording reservation without room executable".to_string()))?;
                ExecutableKind::Recording(RecordingService {
                    resource_id: resource_id.clone(),
                    agent_id: agent_id.clone(),
                    room,
                    recording_id: None,
                })
            }
            ExecutableDraft::Compartment => ExecutableKind::Compartment(Compartment { children: Vec::new() }),
        };

        let id = self.executables.insert_with_key(|id| {
            let mut kind = kind;
            if let ExecutableKind::Room(room) = &mut kind {
                room.room_name = format!("room-{}", id.data().as_ffi());
            }
            Executable::new(id, interval, kind)
        });
        Ok(id)
    }

    /// Collects the rooms and endpoints of the compartment's child reservations and connects every
    /// endpoint to the room.
    fn link_compartment(&mut self, compartment: ExecutableId, child_reservations: &[ReservationId]) -> Result<()> {
        let members: Vec<ExecutableId> = child_reservations
            .iter()
            .filter_map(|id| self.reservations.get(*id).and_then(|r| r.executable))
            .filter(|id| matches!(self.executables.get(*id).map(|e| &e.kind), Some(ExecutableKind::Room(_) | ExecutableKind::Endpoint(_))))
            .collect();

        let room = members.iter().copied().find(|id| matches!(self.executables[*id].kind, ExecutableKind::Room(_)));
        let endpoints: Vec<ExecutableId> =
            members.iter().copied().filter(|id| matches!(self.executables[*id].kind, ExecutableKind::Endpoint(_))).collect();

        let interval = self.executable(compartment)?.interval;
        let mut children = members.clone();

        if !endpoints.is_empty() {
            let room = room.ok_or_else(|| Error::InvariantViolation("compartment with endpoints but without room".to_string()))?;
            let alias = match &self.executables[room].kind {
                ExecutableKind::Room(room) => room.aliases.first().cloned(),
                _ => None,
            }
            .ok_or_else(|| Error::InvariantViolation("compartment room without alias".to_string()))?;

            for endpoint in endpoints {
                let connection = self.executables.insert_with_key(|id| {
                    let mut executable = Executable::new(
                        id,
                        interval,
                        ExecutableKind::Connection(Connection { endpoint, room, alias: alias.clone(), call_id: None }),
                    );
                    executable.parent = Some(compartment);
                    executable
                });
                children.push(connection);
            }
        }

        for member in &members {
            if let Some(executable) = self.executables.get_mut(*member) {
                executable.parent = Some(compartment);
            }
        }
        if let Some(Executable { kind: ExecutableKind::Compartment(c), .. }) = self.executables.get_mut(compartment) {
            c.children = children;
        }
        Ok(())
    }

    /// Detaches reused reservations from their old parents, which may be deleted afterwards.
    pub fn detach_reallocated(&mut self, reallocated: &HashSet<ReservationId>) {
        for id in reallocated {
            let Some(parent) = self.reservations.get(*id).and_then(|r| r.parent) else {
                continue;
            };
            if reallocated.contains(&parent) {
                continue;
            }
            if let Some(parent) = self.reservations.get_mut(parent) {
                parent.children.retain(|child| child != id);
            }
            if let Some(reservation) = self.reservations.get_mut(*id) {
                reservation.parent = None;
            }
        }
    }

    /// Deletes `id` with all its descendants and releases their availability entries.
    /// Executables are left to the executable cleanup.
    pub fn delete_reservation(&mut self, id: ReservationId) -> Result<Vec<ReservationId>> {
        let reservation = self.reservation(id)?;
        let children = reservation.children.clone();
        let parent = reservation.parent;

        let mut deleted = Vec::new();
        for child in children {
            deleted.extend(self.delete_reservation(child)?);
        }

        self.cache.release_all(id);
        if let Some(parent) = parent.and_then(|parent| self.reservations.get_mut(parent)) {
            parent.children.retain(|child| *child != id);
        }
        self.reservations.remove(id);
        deleted.push(id);

        Ok(deleted)
    }

    /// Shortens `id` and its descendants to end at `end`. Descendants starting at or after `end` are
    /// deleted.
    pub fn truncate_reservation(&mut self, id: ReservationId, end: DateTime<Utc>) -> Result<()> {
        let children = self.reservation(id)?.children.clone();
        for child in children {
            if self.reservation(child)?.interval.start >= end {
                self.delete_reservation(child)?;
            } else {
                self.truncate_reservation(child, end)?;
            }
        }

        let executable = {
            let reservation = self.reservations.get_mut(id).ok_or_else(|| Error::not_found("Reservation", format!("{:?}", id)))?;
            if end < reservation.interval.end {
                reservation.interval.end = end;
            }
            reservation.executable
        };
        self.cache.truncate(id, end);

        if let Some(executable) = executable.and_then(|id| self.executables.get_mut(id)) {
            if end < executable.interval.end {
                executable.interval.end = end;
            }
        }
        Ok(())
    }

    /// Executables owned by a live reservation, including everything they depend on.
    pub fn referenced_executables(&self) -> HashSet<ExecutableId> {
        let mut referenced = HashSet::new();
        let mut stack: Vec<ExecutableId> = self.reservations.values().filter_map(|r| r.executable).collect();

        while let Some(id) = stack.pop() {
            if !referenced.insert(id) {
                continue;
            }
            if let Some(executable) = self.executables.get(id) {
                stack.extend(executable.dependencies());
            }
        }
        referenced
    }

    /// Deletes executables which no live reservation references and which hold nothing on a device.
    pub fn delete_unreferenced_executables(&mut self) -> Vec<ExecutableId> {
        let referenced = self.referenced_executables();
        let deletable: Vec<ExecutableId> = self
            .executables
            .values()
            .filter(|executable| !referenced.contains(&executable.id) && !executable.state.is_active())
            .map(|executable| executable.id)
            .collect();

        for id in &deletable {
            self.executables.remove(*id);
        }
        for executable in self.executables.values_mut() {
            if executable.migrated_from.is_some_and(|source| deletable.contains(&source)) {
                executable.migrated_from = None;
            }
        }
        deletable
    }
}
