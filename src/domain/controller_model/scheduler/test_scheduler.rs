use tokio_util::sync::CancellationToken;

use crate::domain::controller_model::cache::resource_unit::ResourceUnit;
use crate::domain::controller_model::executor::executable::{ExecutableKind, ExecutableState};
use crate::domain::controller_model::notification::notification::NotificationType;
use crate::domain::controller_model::notification::operator::OperatorReport;
use crate::domain::controller_model::request::reservation_request::RequestState;
use crate::domain::controller_model::request::specification::{
    AliasSpecification, CompositeSpecification, ExistingReservationSpecification, Specification,
};
use crate::domain::controller_model::reservation::reservation::{ReservationId, ReservationKind};
use crate::domain::controller_model::resource::resource_store::ResourceStore;
use crate::domain::controller_model::scheduler::scheduler::SchedulerRunSummary;
use crate::domain::controller_model::store::controller_store::StoreState;
use crate::domain::controller_model::test_support::*;
use crate::domain::controller_model::utils::id::{AliasProviderId, RequestId, ResourceId};
use crate::domain::controller_model::utils::interval::Interval;

fn run(fixture: &SchedulerFixture, now_h: i64) -> SchedulerRunSummary {
    fixture.scheduler.run(slot(0, 48), at(now_h), &CancellationToken::new()).unwrap()
}

fn state_of(fixture: &SchedulerFixture, id: &RequestId) -> RequestState {
    fixture.store.read(|state| state.request(id).unwrap().state).unwrap()
}

fn current_reservation(fixture: &SchedulerFixture, id: &RequestId) -> ReservationId {
    fixture.store.read(|state| state.request(id).unwrap().allocation.current().unwrap()).unwrap()
}

fn report_text(fixture: &SchedulerFixture, id: &RequestId) -> String {
    fixture.store.read(|state| state.request(id).unwrap().report_text().unwrap_or_default()).unwrap()
}

fn alias_of_room(state: &StoreState, room: ReservationId) -> String {
    let child = state.reservation(room).unwrap().children[0];
    state.alias_of(child).unwrap().value
}

fn single_alias_resources() -> ResourceStore {
    let mut resources = resources(10);
    resources.add_alias_provider(e164_provider("single", "mcu", "9501")).unwrap();
    resources
}

fn single_alias() -> Specification {
    Specification::Alias(AliasSpecification { provider_id: Some(AliasProviderId::new("single")), ..Default::default() })
}

/// Re-submits the request unchanged, as a modification with identical data would.
fn resubmit(fixture: &SchedulerFixture, id: &RequestId, specification: Specification, interval: Interval) {
    fixture
        .store
        .transaction("resubmit", |state| {
            state.request_mut(id)?.apply(request_data(specification, interval, 0));
            Ok::<_, crate::error::Error>(())
        })
        .unwrap();
}

#[test]
fn test_higher_priority_request_wins_contested_ports() {
    let fixture = SchedulerFixture::new(resources(10));
    let low = insert_request(&fixture.store, "low", request_data(room(6), slot(12, 14), 0), at(0));
    let high = insert_request(&fixture.store, "high", request_data(room(6), slot(12, 14), 5), at(1));

    let summary = run(&fixture, 8);

    assert_eq!(summary.allocated, vec![high.clone()]);
    assert_eq!(summary.failed, vec![low.clone()]);
    assert_eq!(state_of(&fixture, &high), RequestState::Allocated);
    assert_eq!(state_of(&fixture, &low), RequestState::AllocationFailed);
    assert!(report_text(&fixture, &low).contains("Device 'mcu' has 4 free ports but 6 are requested."));
    assert!(matches!(&fixture.operator.reports()[0], OperatorReport::AllocationFailed { request, .. } if request == "low"));
}

#[test]
fn test_earlier_request_wins_single_alias() {
    let fixture = SchedulerFixture::new(single_alias_resources());
    let first = insert_request(&fixture.store, "first", request_data(single_alias(), slot(10, 12), 0), at(0));
    let second = insert_request(&fixture.store, "second", request_data(single_alias(), slot(11, 13), 0), at(1));

    run(&fixture, 8);

    assert_eq!(state_of(&fixture, &first), RequestState::Allocated);
    assert_eq!(state_of(&fixture, &second), RequestState::AllocationFailed);
    let text = report_text(&fixture, &second);
    assert!(text.contains("'single'") && text.contains("9501"), "unexpected report: {}", text);
}

#[test]
fn test_requested_value_conflict_names_value() {
    let fixture = SchedulerFixture::new(resources(10));
    let spec = Specification::Alias(AliasSpecification { value: Some("95008742".to_string()), ..Default::default() });
    insert_request(&fixture.store, "a", request_data(spec.clone(), slot(10, 12), 0), at(0));
    let b = insert_request(&fixture.store, "b", request_data(spec, slot(10, 12), 0), at(1));

    run(&fixture, 8);

    assert!(report_text(&fixture, &b).contains("Value '95008742' of 'e164' is already allocated"));
}

#[test]
fn test_failed_composite_leaves_no_partial_allocation() {
    let fixture = SchedulerFixture::new(single_alias_resources());
    insert_request(&fixture.store, "alias", request_data(single_alias(), slot(10, 12), 0), at(0));
    let composite = Specification::Composite(CompositeSpecification { specifications: vec![room(4), single_alias()] });
    let failing = insert_request(&fixture.store, "composite", request_data(composite, slot(10, 12), 0), at(1));

    run(&fixture, 8);

    assert_eq!(state_of(&fixture, &failing), RequestState::AllocationFailed);
    assert!(report_text(&fixture, &failing).contains("Allocation of alias specification #2 failed."));
    fixture
        .store
        .read(|state| {
            assert_eq!(state.reservations.len(), 1);
            assert!(state.executables.is_empty());
            for port in 0..10 {
                let unit = ResourceUnit::RoomPort { resource_id: ResourceId::new("mcu"), port };
                assert!(state.cache.is_available(&unit, &slot(10, 12)));
            }
        })
        .unwrap();
}

#[test]
fn test_provided_reservation_is_reused_once() {
    let fixture = SchedulerFixture::new(resources(10));
    let owner = insert_request(&fixture.store, "owner", request_data(single_alias_spec(), slot(10, 14), 0), at(0));
    run(&fixture, 8);
    let provided = current_reservation(&fixture, &owner);

    let reuse = Specification::ExistingReservation(ExistingReservationSpecification { reservation_id: provided });
    let mut data = request_data(reuse, slot(11, 12), 0);
    data.provided_reservations = vec![provided];
    let first = insert_request(&fixture.store, "first", data.clone(), at(1));
    let second = insert_request(&fixture.store, "second", data.clone(), at(2));
    data.interval = slot(13, 15);
    let outside = insert_request(&fixture.store, "outside", data, at(3));

    run(&fixture, 8);

    assert_eq!(state_of(&fixture, &first), RequestState::Allocated);
    let reused = current_reservation(&fixture, &first);
    fixture
        .store
        .read(|state| assert_eq!(state.reservation(reused).unwrap().kind, ReservationKind::Existing { target: provided }))
        .unwrap();
    assert_eq!(state_of(&fixture, &second), RequestState::AllocationFailed);
    assert!(report_text(&fixture, &second).contains("is not available"));
    assert!(report_text(&fixture, &outside).contains("cannot be used for the requested time slot"));
}

fn single_alias_spec() -> Specification {
    Specification::Alias(AliasSpecification::default())
}

#[test]
fn test_rerun_without_changes_keeps_reservation() {
    let fixture = SchedulerFixture::new(resources(10));
    let id = insert_request(&fixture.store, "room", request_data(room_with_alias(4), slot(10, 12), 0), at(0));
    run(&fixture, 8);
    let reservation = current_reservation(&fixture, &id);
    assert_eq!(fixture.notifications.drain().len(), 1);

    let summary = run(&fixture, 8);
    assert!(summary.allocated.is_empty());
    assert!(fixture.notifications.drain().is_empty());

    resubmit(&fixture, &id, room_with_alias(4), slot(10, 12));
    let summary = run(&fixture, 8);

    assert_eq!(summary.allocated, vec![id.clone()]);
    assert_eq!(current_reservation(&fixture, &id), reservation);
    let notifications = fixture.notifications.drain();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].notification_type, NotificationType::Modified);
    fixture.store.read(|state| assert_eq!(state.reservations.len(), 2)).unwrap();
}

#[test]
fn test_modified_future_request_replaces_reservation_and_keeps_alias() {
    let fixture = SchedulerFixture::new(resources(10));
    let id = insert_request(&fixture.store, "room", request_data(room_with_alias(4), slot(10, 12), 0), at(0));
    run(&fixture, 8);
    let old = current_reservation(&fixture, &id);
    let old_alias = fixture.store.read(|state| alias_of_room(state, old)).unwrap();
    fixture.notifications.drain();

    resubmit(&fixture, &id, room_with_alias(6), slot(10, 12));
    run(&fixture, 8);

    let new = current_reservation(&fixture, &id);
    assert_ne!(new, old);
    fixture
        .store
        .read(|state| {
            assert!(state.reservations.get(old).is_none());
            assert_eq!(alias_of_room(state, new), old_alias);
            assert_eq!(state.request(&id).unwrap().allocation.reservations(), &[new]);
        })
        .unwrap();

    let kinds: Vec<NotificationType> = fixture.notifications.drain().into_iter().map(|n| n.notification_type).collect();
    assert_eq!(kinds, vec![NotificationType::Deleted, NotificationType::Modified]);
}

#[test]
fn test_modification_of_running_room_migrates_executable() {
    let fixture = SchedulerFixture::new(resources(10));
    let id = insert_request(&fixture.store, "room", request_data(room_with_alias(4), slot(10, 14), 0), at(0));
    run(&fixture, 8);
    let old = current_reservation(&fixture, &id);
    let old_executable = fixture.store.read(|state| state.reservation(old).unwrap().executable.unwrap()).unwrap();
    fixture
        .store
        .transaction("start", |state| {
            state.executables[old_executable].state = ExecutableState::Started;
            Ok::<_, crate::error::Error>(())
        })
        .unwrap();

    resubmit(&fixture, &id, room_with_alias(6), slot(10, 14));
    run(&fixture, 11);

    let new = current_reservation(&fixture, &id);
    fixture
        .store
        .read(|state| {
            assert_eq!(state.reservation(old).unwrap().interval, slot(10, 11));
            assert_eq!(state.executable(old_executable).unwrap().interval, slot(10, 11));
            let reservation = state.reservation(new).unwrap();
            assert_eq!(reservation.interval, slot(11, 14));
            let executable = state.executable(reservation.executable.unwrap()).unwrap();
            assert_eq!(executable.migrated_from, Some(old_executable));
            assert!(matches!(executable.kind, ExecutableKind::Room(_)));
            assert_eq!(alias_of_room(state, new), alias_of_room(state, old));
            assert_eq!(state.request(&id).unwrap().allocation.reservations(), &[old, new]);
        })
        .unwrap();
}

#[test]
fn test_failing_request_does_not_stop_batch() {
    let fixture = SchedulerFixture::new(resources(10));
    let a = insert_request(&fixture.store, "a", request_data(room(2), slot(10, 12), 0), at(0));
    let b = insert_request(&fixture.store, "b", request_data(room(0), slot(10, 12), 0), at(1));
    let c = insert_request(&fixture.store, "c", request_data(room(2), slot(10, 12), 0), at(2));

    let summary = run(&fixture, 8);

    assert_eq!(summary.allocated, vec![a, c]);
    assert_eq!(summary.failed, vec![b.clone()]);
    assert!(report_text(&fixture, &b).contains("Invalid specification: a room needs at least one participant."));
}

#[test]
fn test_two_running_reservations_fail_request_once() {
    let fixture = SchedulerFixture::new(resources(10));
    let id = insert_request(&fixture.store, "twice", request_data(room(2), slot(10, 14), 0), at(0));
    let other = insert_request(&fixture.store, "other", request_data(room(2), slot(11, 14), 0), at(1));
    run(&fixture, 8);

    // Hand the other request's reservation over, so two reservations of "twice" run at 12:00.
    fixture
        .store
        .transaction("corrupt-history", |state| {
            let moved = state.request(&other)?.allocation.current().unwrap();
            state.requests.remove(&other);
            state.reservations[moved].request_id = Some(id.clone());
            state.request_mut(&id)?.allocation.push(moved);
            Ok::<_, crate::error::Error>(())
        })
        .unwrap();
    resubmit(&fixture, &id, room(3), slot(10, 14));
    let sibling = insert_request(&fixture.store, "sibling", request_data(room(2), slot(12, 16), 0), at(2));

    let summary = run(&fixture, 12);

    assert_eq!(summary.internal_errors, vec![id.clone()]);
    assert_eq!(summary.failed, vec![id.clone()]);
    assert_eq!(summary.allocated, vec![sibling.clone()]);
    assert_eq!(state_of(&fixture, &id), RequestState::AllocationFailed);
    assert_eq!(state_of(&fixture, &sibling), RequestState::Allocated);
    assert!(report_text(&fixture, &id).contains("more than one reservation running"));
    let reports = fixture.operator.reports();
    assert_eq!(reports.len(), 1);
    assert!(matches!(&reports[0], OperatorReport::InternalError { component, message } if *component == "scheduler" && message.contains("twice")));

    let summary = run(&fixture, 12);
    assert!(summary.failed.is_empty());
    assert_eq!(fixture.operator.reports().len(), 1);
}

#[test]
fn test_marked_reservations_are_deleted_with_notification() {
    let fixture = SchedulerFixture::new(resources(10));
    let id = insert_request(&fixture.store, "room", request_data(room_with_alias(4), slot(10, 12), 0), at(0));
    run(&fixture, 8);
    fixture.notifications.drain();

    fixture
        .store
        .transaction("delete-request", |state| {
            let request = state.requests.remove(&id).unwrap();
            for top in request.allocation.reservations() {
                for reservation in state.reservation_tree(*top) {
                    state.reservations[reservation].marked_for_deletion = true;
                }
            }
            Ok::<_, crate::error::Error>(())
        })
        .unwrap();

    let summary = run(&fixture, 8);

    assert_eq!(summary.deleted_reservations, 1);
    assert_eq!(summary.deleted_executables, 1);
    let notifications = fixture.notifications.drain();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].notification_type, NotificationType::Deleted);
    fixture.store.read(|state| assert!(state.reservations.is_empty())).unwrap();
}

#[test]
fn test_cancelled_run_leaves_requests_pending() {
    let fixture = SchedulerFixture::new(resources(10));
    let id = insert_request(&fixture.store, "room", request_data(room(2), slot(10, 12), 0), at(0));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = fixture.scheduler.run(slot(0, 48), at(8), &cancel).unwrap();

    assert!(summary.cancelled);
    assert_eq!(state_of(&fixture, &id), RequestState::Complete);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_no_port_is_allocated_twice(requests in proptest::collection::vec((1u32..7, 0i64..10, 1i64..4, 0i32..3), 1..12)) {
            let fixture = SchedulerFixture::new(resources(10));
            for (index, (participants, start, len, priority)) in requests.iter().enumerate() {
                let data = request_data(room(*participants), slot(10 + start, 10 + start + len), *priority);
                insert_request(&fixture.store, &format!("r{}", index), data, at(index as i64 - 100));
            }

            run(&fixture, 8);

            fixture.store.read(|state| {
                let rooms: Vec<_> = state.reservations.values().filter(|r| matches!(r.kind, ReservationKind::Room { .. })).collect();
                for (i, a) in rooms.iter().enumerate() {
                    for b in rooms.iter().skip(i + 1) {
                        if a.interval.overlaps(&b.interval) {
                            let a_units = state.cache.units_of(a.id);
                            assert!(state.cache.units_of(b.id).iter().all(|unit| !a_units.contains(unit)));
                        }
                    }
                }
                for request in state.requests.values() {
                    assert!(matches!(request.state, RequestState::Allocated | RequestState::AllocationFailed));
                }
            }).unwrap();
        }
    }
}
