use crate::domain::controller_model::cache::resource_unit::ResourceUnit;
use crate::domain::controller_model::executor::executable::ExecutableKind;
use crate::domain::controller_model::request::specification::RoomSpecification;
use crate::domain::controller_model::reservation::reservation::{ReservationId, ReservationKind};
use crate::domain::controller_model::reservation::reservation_draft::{ExecutableDraft, NewReservation, ReservationDraft};
use crate::domain::controller_model::resource::resource::{Alias, DeviceResource};
use crate::domain::controller_model::resource::resource_store::ResourceStore;
use crate::domain::controller_model::scheduler::reservation_task::ReservationTask;
use crate::domain::controller_model::scheduler::scheduler_context::{AvailableReservation, SchedulerContext};
use crate::domain::controller_model::scheduler::scheduler_report::{SchedulerError, SchedulerReport, SchedulerReportKind};
use crate::domain::controller_model::scheduler::task::alias_task::AliasTask;
use crate::domain::controller_model::store::controller_store::StoreState;
use crate::domain::controller_model::utils::id::AliasProviderId;
use crate::error::{Error, Result};

/// Allocates a virtual room with the requested number of participant ports, its aliases and an
/// optional recording.
///
/// Candidate devices are tried in order of most free ports, so load spreads over the devices. A
/// candidate whose aliases or recording cannot be allocated is abandoned and the next one is tried.
#[derive(Debug, Clone)]
pub struct RoomTask {
    spec: RoomSpecification,
}

impl RoomTask {
    pub fn new(spec: RoomSpecification) -> Self {
        RoomTask { spec }
    }

    fn free_ports(&self, ctx: &SchedulerContext, device: &DeviceResource) -> Vec<u32> {
        (0..device.port_count())
            .filter(|port| ctx.is_unit_available(&ResourceUnit::RoomPort { resource_id: device.id.clone(), port: *port }, &ctx.slot))
            .collect()
    }

    fn is_reusable(&self, resources: &ResourceStore, state: &StoreState, available: &AvailableReservation) -> bool {
        let ReservationKind::Room { resource_id, port_count } = &available.kind else {
            return false;
        };

        *port_count == self.spec.participant_count
            && self.spec.resource_id.as_ref().is_none_or(|pinned| pinned == resource_id)
            && resources.get_resource(resource_id).is_some_and(|device| device.supports_all(&self.spec.technologies))
            && self.children_compatible(state, available.id)
    }

    /// The aliases and recording of an earlier room still satisfy the specification.
    fn children_compatible(&self, state: &StoreState, room: ReservationId) -> bool {
        let Some(reservation) = state.reservations.get(room) else {
            return false;
        };

        let mut aliases: Vec<(AliasProviderId, Alias)> =
            reservation.children.iter().filter_map(|child| alias_with_provider(state, *child)).collect();
        let has_recording = reservation
            .children
            .iter()
            .any(|child| matches!(state.reservations.get(*child).map(|r| &r.kind), Some(ReservationKind::Recording { .. })));

        if aliases.len() != self.spec.aliases.len() || has_recording != self.spec.recording {
            return false;
        }

        for alias_spec in &self.spec.aliases {
            let task = AliasTask::new(alias_spec.clone());
            match aliases.iter().position(|(provider_id, alias)| task.matches_alias(provider_id, alias)) {
                Some(index) => {
                    aliases.remove(index);
                }
                None => return false,
            }
        }
        true
    }

    fn allocate_on(&self, ctx: &mut SchedulerContext, device: &DeviceResource, free_ports: &[u32]) -> std::result::Result<ReservationDraft, SchedulerError> {
        let slot = ctx.slot;
        let participants = self.spec.participant_count;
        let agent_id = device
            .agent_id
            .clone()
            .ok_or_else(|| SchedulerError::invalid(format!("device '{}' is not managed by an agent", device.id)))?;

        let units: Vec<ResourceUnit> = free_ports
            .iter()
            .take(participants as usize)
            .map(|port| ResourceUnit::RoomPort { resource_id: device.id.clone(), port: *port })
            .collect();
        for unit in &units {
            ctx.claim(unit.clone(), slot);
        }

        let mut children = Vec::new();
        for alias_spec in &self.spec.aliases {
            let mut task = AliasTask::for_room(alias_spec.clone(), device.id.clone());
            children.push(ctx.nested(|ctx| task.perform(ctx))?);
        }
        if self.spec.recording {
            children.push(ctx.nested(|ctx| self.allocate_recording(ctx, device))?);
        }

        ctx.add_report(SchedulerReport::new(SchedulerReportKind::Allocated {
            description: format!("room for {} participants on '{}'", participants, device.id),
        }));
        Ok(ReservationDraft::new(NewReservation {
            interval: slot,
            kind: ReservationKind::Room { resource_id: device.id.clone(), port_count: participants },
            units,
            executable: Some(ExecutableDraft::Room {
                resource_id: device.id.clone(),
                agent_id,
                port_count: participants,
                technologies: self.spec.technologies.clone(),
            }),
            children,
        }))
    }

    /// One recording license, preferably on the device hosting the room.
    fn allocate_recording(&self, ctx: &mut SchedulerContext, room_device: &DeviceResource) -> std::result::Result<ReservationDraft, SchedulerError> {
        let resources = ctx.resources;
        let slot = ctx.slot;

        let mut devices: Vec<&DeviceResource> = resources.recording_devices().collect();
        devices.sort_by_key(|device| device.id != room_device.id);

        for device in devices {
            let (Some(agent_id), Some(capability)) = (&device.agent_id, &device.recording) else {
                continue;
            };
            for index in 0..capability.license_count {
                let unit = ResourceUnit::RecordingLicense { resource_id: device.id.clone(), index };
                if !ctx.is_unit_available(&unit, &slot) {
                    continue;
                }

                ctx.claim(unit.clone(), slot);
                ctx.add_report(SchedulerReport::new(SchedulerReportKind::Allocated { description: format!("recording on '{}'", device.id) }));
                return Ok(ReservationDraft::new(NewReservation {
                    interval: slot,
                    kind: ReservationKind::Recording { resource_id: device.id.clone() },
                    units: vec![unit],
                    executable: Some(ExecutableDraft::Recording { resource_id: device.id.clone(), agent_id: agent_id.clone() }),
                    children: Vec::new(),
                }));
            }
        }

        Err(SchedulerError::allocation(SchedulerReportKind::RecordingNotAvailable { interval: slot }))
    }
}

fn alias_with_provider(state: &StoreState, reservation: ReservationId) -> Option<(AliasProviderId, Alias)> {
    match &state.reservations.get(reservation)?.kind {
        ReservationKind::Alias { provider_id, alias } => Some((provider_id.clone(), alias.clone())),
        ReservationKind::Existing { target } => alias_with_provider(state, *target),
        _ => None,
    }
}

impl ReservationTask for RoomTask {
    fn perform(&mut self, ctx: &mut SchedulerContext) -> std::result::Result<ReservationDraft, SchedulerError> {
        let participants = self.spec.participant_count;
        if participants == 0 {
            return Err(SchedulerError::invalid("a room needs at least one participant"));
        }

        let resources = ctx.resources;
        if let Some(pinned) = &self.spec.resource_id {
            let device = resources
                .get_resource(pinned)
                .ok_or_else(|| SchedulerError::allocation(SchedulerReportKind::ResourceNotFound { resource_id: pinned.to_string() }))?;
            if device.room_provider.is_none() {
                return Err(SchedulerError::invalid(format!("device '{}' cannot host rooms", pinned)));
            }
            if !device.allocatable {
                return Err(SchedulerError::allocation(SchedulerReportKind::ResourceNotAllocatable { resource_id: pinned.to_string() }));
            }
        }

        let state = ctx.state;
        if let Some(available) = ctx.find_available(|available| self.is_reusable(resources, state, available)) {
            return Ok(ctx.reuse(&available));
        }

        let mut candidates: Vec<(&DeviceResource, Vec<u32>)> = resources
            .room_providers()
            .filter(|device| self.spec.resource_id.as_ref().is_none_or(|pinned| *pinned == device.id))
            .filter(|device| device.supports_all(&self.spec.technologies))
            .map(|device| (device, self.free_ports(&*ctx, device)))
            .collect();
        candidates.sort_by(|(a, a_free), (b, b_free)| b_free.len().cmp(&a_free.len()).then_with(|| a.id.cmp(&b.id)));

        let mut failures = Vec::new();
        for (device, free_ports) in candidates {
            if (free_ports.len() as u32) < participants {
                failures.push(SchedulerReport::new(SchedulerReportKind::NotEnoughPorts {
                    resource_id: device.id.to_string(),
                    requested: participants,
                    available: free_ports.len() as u32,
                }));
                continue;
            }

            let checkpoint = ctx.checkpoint();
            match self.allocate_on(ctx, device, &free_ports) {
                Ok(draft) => return Ok(draft),
                Err(SchedulerError::Allocation(report)) => {
                    ctx.restore(checkpoint);
                    failures.push(report);
                }
                Err(internal) => return Err(internal),
            }
        }

        Err(SchedulerError::Allocation(SchedulerReport::with_children(
            SchedulerReportKind::NoRoomProviderAvailable { participant_count: participants },
            failures,
        )))
    }

    /// The new room takes over the running room of the preceding reservation when both live on the
    /// same device.
    fn migrate(&self, state: &mut StoreState, preceding: ReservationId, new: ReservationId) -> Result<()> {
        let source = state.reservation(preceding)?.executable;
        let target = state.reservation(new)?.executable;
        let (Some(source), Some(target)) = (source, target) else {
            return Ok(());
        };
        if source == target {
            return Ok(());
        }

        let source_device = match &state.executable(source)?.kind {
            ExecutableKind::Room(room) => room.resource_id.clone(),
            _ => return Ok(()),
        };
        let target_executable = state.executables.get_mut(target).ok_or_else(|| Error::not_found("Executable", format!("{:?}", target)))?;
        if let ExecutableKind::Room(room) = &target_executable.kind {
            if room.resource_id == source_device {
                target_executable.migrated_from = Some(source);
                log::debug!("Room executable {:?} takes over {:?}.", target, source);
            }
        }
        Ok(())
    }
}
