pub mod id;
pub mod interval;
pub mod statistics;
