pub mod controller_model;
pub mod simulator;
