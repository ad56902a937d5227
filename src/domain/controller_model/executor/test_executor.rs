use std::time::Duration;

use crate::domain::controller_model::agent::command::{CommandPayload, CommandResult, RoomDescription};
use crate::domain::controller_model::executor::executable::{ExecutableKind, ExecutableState};
use crate::domain::controller_model::executor::execution_report::ExecutionReportKind;
use crate::domain::controller_model::executor::executor::RoomControl;
use crate::domain::controller_model::notification::operator::OperatorReport;
use crate::domain::controller_model::request::reservation_request::RequestState;
use crate::domain::controller_model::request::specification::{CompositeSpecification, EndpointSpecification, RoomSpecification, Specification};
use crate::domain::controller_model::resource::resource::{Alias, AliasType};
use crate::domain::controller_model::test_support::*;
use crate::domain::controller_model::utils::id::{RequestId, ResourceId};
use crate::error::Error;

fn remote_room_id(fixture: &ExecutionFixture, request: &RequestId) -> Option<String> {
    match fixture.executable(fixture.executable_of(request)).kind {
        ExecutableKind::Room(room) => room.remote_room_id,
        _ => None,
    }
}

fn pinned_room(participants: u32, device: &str) -> Specification {
    match room(participants) {
        Specification::Room(spec) => Specification::Room(RoomSpecification { resource_id: Some(ResourceId::new(device)), ..spec }),
        other => other,
    }
}

#[test]
fn test_room_is_created_at_start_and_deleted_at_end() {
    let fixture = ExecutionFixture::new(resources(10));
    let request = insert_request(fixture.store(), "meeting", request_data(room(4), slot(12, 14), 0), at(0));
    fixture.schedule(8);
    let executable = fixture.executable_of(&request);
    assert_eq!(fixture.store().read(|state| state.request(&request).unwrap().state).unwrap(), RequestState::Allocated);
    assert_eq!(fixture.executable(executable).state, ExecutableState::NotStarted);

    assert_eq!(fixture.execute(11).started, 0);

    let summary = fixture.execute(12);
    assert_eq!(summary.started, 1);
    assert_eq!(fixture.executable(executable).state, ExecutableState::Started);
    let device = fixture.device("mcu-agent");
    assert_eq!(device.performed_names(), vec!["ListRooms", "CreateRoom"]);
    assert_eq!(device.rooms().len(), 1);
    assert_eq!(device.rooms()[0].description.port_count, 4);
    assert_eq!(remote_room_id(&fixture, &request), Some(device.rooms()[0].id.clone()));

    let summary = fixture.execute(14);
    assert_eq!(summary.stopped, 1);
    assert_eq!(fixture.executable(executable).state, ExecutableState::Stopped);
    assert!(device.rooms().is_empty());
}

#[test]
fn test_vanished_room_is_started_again() {
    let fixture = ExecutionFixture::new(resources(10));
    let request = insert_request(fixture.store(), "meeting", request_data(room(4), slot(12, 14), 0), at(0));
    fixture.schedule(8);
    fixture.execute(12);
    let executable = fixture.executable_of(&request);
    let device = fixture.device("mcu-agent");
    let first_room = remote_room_id(&fixture, &request).unwrap();

    assert!(device.drop_room(&first_room));
    let summary = fixture.execute(13);

    assert_eq!(summary.vanished, 1);
    let vanished = fixture.executable(executable);
    assert_eq!(vanished.state, ExecutableState::NotStarted);
    assert!(matches!(vanished.last_report().unwrap().kind, ExecutionReportKind::ResourceVanished { .. }));

    fixture.execute(13);
    assert_eq!(fixture.executable(executable).state, ExecutableState::Started);
    let second_room = remote_room_id(&fixture, &request).unwrap();
    assert_ne!(first_room, second_room);
    assert_eq!(device.rooms().len(), 1);
}

#[test]
fn test_failing_device_does_not_affect_other_rooms() {
    let mut resources = resources(10);
    resources.add_resource(mcu("mcu2", 10)).unwrap();
    let fixture = ExecutionFixture::new(resources);
    let broken = insert_request(fixture.store(), "broken", request_data(pinned_room(4, "mcu"), slot(12, 14), 0), at(0));
    let healthy = insert_request(fixture.store(), "healthy", request_data(pinned_room(4, "mcu2"), slot(12, 14), 0), at(1));
    fixture.schedule(8);
    fixture.device("mcu-agent").fail_command("CreateRoom", "license server unreachable");

    let summary = fixture.execute(12);

    assert_eq!((summary.started, summary.failed), (1, 1));
    let failed = fixture.executable(fixture.executable_of(&broken));
    assert_eq!(failed.state, ExecutableState::StartingFailed);
    assert_eq!(failed.attempt_count, 1);
    let report = failed.last_report().unwrap().to_string();
    assert!(report.contains("Command 'CreateRoom' failed at mcu-agent") && report.contains("license server unreachable"));
    assert_eq!(fixture.executable(fixture.executable_of(&healthy)).state, ExecutableState::Started);
    assert!(fixture.scheduling.operator.reports().iter().any(|r| matches!(r, OperatorReport::ExecutionFailed { .. })));

    fixture.device("mcu-agent").clear_failures();
    fixture.execute(12);
    let recovered = fixture.executable(fixture.executable_of(&broken));
    assert_eq!(recovered.state, ExecutableState::Started);
    assert_eq!(recovered.attempt_count, 0);
}

#[test]
fn test_activation_gives_up_after_max_attempts() {
    let fixture = ExecutionFixture::new(resources(10));
    let request = insert_request(fixture.store(), "meeting", request_data(room(4), slot(12, 14), 0), at(0));
    fixture.schedule(8);
    let device = fixture.device("mcu-agent");
    device.fail_command("ListRooms", "busy");

    for _ in 0..5 {
        fixture.execute(12);
    }

    assert_eq!(fixture.executable(fixture.executable_of(&request)).attempt_count, 3);
    assert_eq!(device.performed_names().len(), 3);
}

#[test]
fn test_slow_device_times_out() {
    let fixture = ExecutionFixture::new(resources(10));
    let request = insert_request(fixture.store(), "meeting", request_data(room(4), slot(12, 14), 0), at(0));
    fixture.schedule(8);
    fixture.device("mcu-agent").set_latency(Duration::from_millis(600));

    let summary = fixture.execute(12);

    assert_eq!(summary.failed, 1);
    let executable = fixture.executable(fixture.executable_of(&request));
    assert_eq!(executable.state, ExecutableState::StartingFailed);
    assert!(matches!(
        &executable.last_report().unwrap().kind,
        ExecutionReportKind::CommandTimeout { command, timeout_ms: 200, .. } if command == "ListRooms"
    ));
}

#[test]
fn test_existing_room_is_adopted() {
    let fixture = ExecutionFixture::new(resources(10));
    let request = insert_request(fixture.store(), "meeting", request_data(room(4), slot(12, 14), 0), at(0));
    fixture.schedule(8);
    let room_name = match fixture.executable(fixture.executable_of(&request)).kind {
        ExecutableKind::Room(room) => room.room_name,
        _ => unreachable!(),
    };
    let device = fixture.device("mcu-agent");
    let existing = device.insert_room(RoomDescription {
        name: room_name,
        port_count: 4,
        technologies: Default::default(),
        aliases: Vec::new(),
    });

    fixture.execute(12);

    let executable = fixture.executable(fixture.executable_of(&request));
    assert_eq!(executable.state, ExecutableState::Started);
    assert!(matches!(executable.last_report().unwrap().kind, ExecutionReportKind::Adopted { .. }));
    assert_eq!(remote_room_id(&fixture, &request), Some(existing));
    assert_eq!(device.performed_names(), vec!["ListRooms"]);
}

#[test]
fn test_modified_running_room_is_taken_over_in_place() {
    let fixture = ExecutionFixture::new(resources(10));
    let request = insert_request(fixture.store(), "meeting", request_data(room_with_alias(4), slot(10, 14), 0), at(0));
    fixture.schedule(8);
    fixture.execute(10);
    let old = fixture.executable_of(&request);
    let remote_room = remote_room_id(&fixture, &request).unwrap();

    fixture
        .store()
        .transaction("modify", |state| {
            state.request_mut(&request)?.apply(request_data(room_with_alias(6), slot(10, 14), 0));
            Ok::<_, Error>(())
        })
        .unwrap();
    fixture.schedule(11);
    let summary = fixture.execute(11);

    let new = fixture.executable_of(&request);
    assert_ne!(old, new);
    assert_eq!(summary.started, 1);
    assert_eq!(fixture.executable(new).state, ExecutableState::Started);
    assert_eq!(remote_room_id(&fixture, &request), Some(remote_room.clone()));
    assert_eq!(fixture.executable(old).state, ExecutableState::Stopped);

    let device = fixture.device("mcu-agent");
    assert_eq!(device.rooms().len(), 1);
    assert_eq!(device.rooms()[0].id, remote_room);
    assert_eq!(device.rooms()[0].description.port_count, 6);
    assert!(device.performed_names().contains(&"ModifyRoom"));
    assert!(!device.performed_names().contains(&"DeleteRoom"));
}

#[test]
fn test_failed_connection_stops_started_compartment_children() {
    let mut resources = resources(10);
    resources.add_resource(terminal("t1", "1001")).unwrap();
    resources.add_resource(terminal("t2", "1002")).unwrap();
    let fixture = ExecutionFixture::new(resources);
    let composite = Specification::Composite(CompositeSpecification {
        specifications: vec![
            room(3),
            Specification::Endpoint(EndpointSpecification { resource_id: ResourceId::new("t1") }),
            Specification::Endpoint(EndpointSpecification { resource_id: ResourceId::new("t2") }),
        ],
    });
    let request = insert_request(fixture.store(), "call", request_data(composite, slot(12, 14), 0), at(0));
    fixture.schedule(8);
    fixture.device("t2-agent").fail_command("Dial", "line busy");

    fixture.execute(12);

    let compartment = fixture.executable(fixture.executable_of(&request));
    assert!(matches!(compartment.kind, ExecutableKind::Compartment(_)));
    assert_eq!(compartment.state, ExecutableState::StartingFailed);
    let report = compartment.last_report().unwrap().to_string();
    assert!(report.contains("connection") && report.contains("line busy"), "unexpected report: {}", report);

    assert!(fixture.device("mcu-agent").rooms().is_empty());
    assert!(fixture.device("mcu-agent").performed_names().contains(&"DeleteRoom"));
    assert!(fixture.device("t1-agent").calls().is_empty());
    assert_eq!(fixture.device("t1-agent").performed_names(), vec!["Dial", "HangUp"]);

    fixture.device("t2-agent").clear_failures();
    fixture.execute(12);
    assert_eq!(fixture.executable(fixture.executable_of(&request)).state, ExecutableState::Started);
    assert_eq!(fixture.device("t1-agent").calls().len(), 1);
    assert_eq!(fixture.device("t2-agent").calls().len(), 1);
}

#[test]
fn test_recording_runs_inside_started_room() {
    let mut resources = resources(10);
    resources.add_resource(recorder("rec", 2)).unwrap();
    let fixture = ExecutionFixture::new(resources);
    let recorded = match room_with_alias(4) {
        Specification::Room(spec) => Specification::Room(RoomSpecification { recording: true, ..spec }),
        other => other,
    };
    insert_request(fixture.store(), "recorded", request_data(recorded, slot(12, 14), 0), at(0));
    fixture.schedule(8);

    let summary = fixture.execute(12);

    assert_eq!(summary.started, 2);
    let recorder = fixture.device("rec-agent");
    assert_eq!(recorder.performed_names(), vec!["GetActiveRecording", "StartRecording"]);
    assert_eq!(recorder.active_recordings().len(), 1);

    fixture.execute(13);
    assert_eq!(recorder.performed_names().last(), Some(&"GetActiveRecording"));
    assert_eq!(recorder.active_recordings().len(), 1);

    let summary = fixture.execute(14);
    assert_eq!(summary.stopped, 2);
    assert!(recorder.active_recordings().is_empty());
    assert!(fixture.device("mcu-agent").rooms().is_empty());
}

#[test]
fn test_deleted_reservation_stops_room_and_removes_executable() {
    let fixture = ExecutionFixture::new(resources(10));
    let request = insert_request(fixture.store(), "meeting", request_data(room(4), slot(12, 14), 0), at(0));
    fixture.schedule(8);
    fixture.execute(12);
    fixture
        .store()
        .transaction("delete", |state| {
            let reservation = state.request(&request)?.allocation.current().ok_or_else(|| Error::not_found("Reservation", "current"))?;
            state.delete_reservation(reservation)?;
            Ok::<_, Error>(())
        })
        .unwrap();

    let summary = fixture.execute(13);

    assert_eq!(summary.stopped, 1);
    assert_eq!(summary.deleted_executables, 1);
    assert!(fixture.device("mcu-agent").rooms().is_empty());
    assert!(fixture.store().read(|state| state.executables.is_empty()).unwrap());
}

#[test]
fn test_participants_of_started_room_are_controlled() {
    let fixture = ExecutionFixture::new(resources(10));
    let request = insert_request(fixture.store(), "meeting", request_data(room(4), slot(12, 14), 0), at(0));
    fixture.schedule(8);
    let room = fixture.executable_of(&request);
    let alias = Alias { alias_type: AliasType::E164, value: "1001".to_string() };

    let not_started = fixture.executor.control_room(room, RoomControl::DialParticipant { alias: alias.clone() });
    assert!(matches!(not_started, Err(Error::NotStarted(_))));

    fixture.execute(12);
    let CommandResult::Success(CommandPayload::ParticipantId(participant_id)) =
        fixture.executor.control_room(room, RoomControl::DialParticipant { alias }).unwrap()
    else {
        panic!("participant was not dialed");
    };
    let muted = fixture.executor.control_room(room, RoomControl::MuteParticipant { participant_id: participant_id.clone() }).unwrap();

    assert!(muted.is_success());
    assert_eq!(fixture.device("mcu-agent").muted(), vec![participant_id]);
}
