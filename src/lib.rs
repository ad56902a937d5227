use std::sync::Arc;

use crate::api::controller_dto::ControllerDto;
use crate::domain::controller_model::controller::Controller;
use crate::domain::simulator::simulator::SystemSimulator;
use crate::error::Result;
use crate::loader::parser::parse_json_file;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Loads a controller configuration and builds the controller. The clock is taken from `simulator`.
pub fn generate_controller(file_path: &str, simulator: Arc<dyn SystemSimulator>) -> Result<Controller> {
    logger::init();
    log::info!("Logger initialized. Starting controller construction.");

    let root_dto: ControllerDto = parse_json_file::<ControllerDto>(file_path)?;
    log::info!("Configuration '{}' parsed successfully.", file_path);

    let controller = Controller::from_dto(root_dto, simulator)?;
    log::info!("Controller constructed successfully.");

    Ok(controller)
}
