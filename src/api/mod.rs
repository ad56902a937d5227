pub mod controller_dto;
