pub mod availability_cache;
pub mod interval_index;
pub mod resource_unit;
