pub mod controller_store;
