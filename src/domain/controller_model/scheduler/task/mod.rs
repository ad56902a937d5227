pub mod alias_task;
pub mod composite_task;
pub mod endpoint_task;
pub mod existing_reservation_task;
pub mod room_task;
pub mod value_task;
