//! Data Transfer Objects for the health surface.

pub mod system_dto;

pub use system_dto::*;
