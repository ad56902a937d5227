use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use room_reservation_controller::domain::controller_model::controller::{Controller, RequestFilter};
use room_reservation_controller::domain::controller_model::executor::executor::RoomControl;
use room_reservation_controller::domain::controller_model::request::reservation_request::RequestState;
use room_reservation_controller::domain::controller_model::resource::resource::{Alias, AliasType};
use room_reservation_controller::domain::controller_model::utils::id::{AgentId, OwnerId};
use room_reservation_controller::domain::simulator::simulator_mock::MockSimulator;
use room_reservation_controller::error::Error;
use room_reservation_controller::generate_controller;

fn config_path() -> String {
    format!("{}/tests/data/controller.json", env!("CARGO_MANIFEST_DIR"))
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, hour, 0, 0).unwrap()
}

fn load() -> (Controller, MockSimulator) {
    let clock = MockSimulator::new(at(8));
    let controller = generate_controller(&config_path(), Arc::new(clock.clone())).unwrap();
    (controller, clock)
}

fn owned_by(controller: &Controller, owner: &str) -> RequestState {
    let filter = RequestFilter { owner: Some(OwnerId::new(owner)), ..Default::default() };
    let requests = controller.list_reservation_requests(&filter).unwrap();
    assert_eq!(requests.len(), 1);
    requests[0].state
}

#[test]
fn test_configuration_is_loaded() {
    let (controller, _clock) = load();

    assert_eq!(controller.resources().resources().count(), 2);
    assert_eq!(controller.executor_config().max_attempt_count, 3);
    assert!(controller.simulated_device(&AgentId::new("mcu-agent")).is_some());
    assert!(controller.simulated_device(&AgentId::new("unknown")).is_none());
    assert_eq!(owned_by(&controller, "alice"), RequestState::Complete);
    assert_eq!(owned_by(&controller, "bob"), RequestState::Complete);
}

#[test]
fn test_full_cycle_over_the_reservation_interval() {
    let (controller, clock) = load();
    let cancel = CancellationToken::new();
    let device = controller.simulated_device(&AgentId::new("mcu-agent")).unwrap();

    let summary = controller.run_cycle(&cancel).unwrap();
    assert_eq!(summary.scheduler.allocated.len(), 1);
    assert_eq!(summary.scheduler.failed.len(), 1);
    let alice = summary.scheduler.allocated[0].clone();
    assert_eq!(summary.executor.started, 0);
    assert_eq!(owned_by(&controller, "alice"), RequestState::Allocated);
    assert_eq!(owned_by(&controller, "bob"), RequestState::AllocationFailed);

    clock.set_time(at(10));
    let summary = controller.run_cycle(&cancel).unwrap();
    assert_eq!(summary.executor.started, 1);
    let rooms = device.rooms();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].description.port_count, 5);
    assert_eq!(rooms[0].description.aliases.len(), 1);
    assert!(rooms[0].description.aliases[0].value.starts_with("950087"));

    let dialed = controller
        .control_room(&alice, RoomControl::DialParticipant { alias: Alias { alias_type: AliasType::E164, value: "9500870001".to_string() } })
        .unwrap();
    assert!(dialed.is_success());
    assert_eq!(device.rooms()[0].participant_ids.len(), 1);

    clock.set_time(at(12));
    let summary = controller.run_cycle(&cancel).unwrap();
    assert_eq!(summary.executor.stopped, 1);
    assert!(device.rooms().is_empty());

    let late = controller.control_room(&alice, RoomControl::MuteParticipant { participant_id: "p-1".to_string() });
    assert!(matches!(late, Err(Error::NotStarted(_))));
}

#[test]
fn test_cancelled_cycle_does_not_execute() {
    let (controller, clock) = load();
    clock.set_time(at(10));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = controller.run_cycle(&cancel).unwrap();
    assert!(summary.scheduler.cancelled);
    assert!(summary.executor.cancelled);
    assert!(controller.executables().unwrap().is_empty());

    let retry = controller.run_cycle(&CancellationToken::new()).unwrap();
    assert_eq!(retry.executor.started, 1);
    assert!(matches!(
        controller.simulated_device(&AgentId::new("mcu-agent")).unwrap().rooms().as_slice(),
        [room] if room.description.port_count == 5
    ));
}

#[test]
fn test_missing_configuration_fails() {
    let result = generate_controller("tests/data/missing.json", Arc::new(MockSimulator::new(at(8))));
    assert!(matches!(result, Err(Error::IoError(_))));
}
