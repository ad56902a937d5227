pub mod resource;
pub mod resource_store;
pub mod value_pattern;
