pub mod notification;
pub mod operator;
