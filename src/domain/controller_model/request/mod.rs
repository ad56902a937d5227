pub mod reservation_request;
pub mod specification;
