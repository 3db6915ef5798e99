pub mod monitor_dto;
pub mod public_dto;
