pub mod agent;
pub mod cache;
pub mod controller;
pub mod executor;
pub mod notification;
pub mod request;
pub mod reservation;
pub mod resource;
pub mod scheduler;
pub mod store;
pub mod utils;

#[cfg(test)]
pub mod test_support;
