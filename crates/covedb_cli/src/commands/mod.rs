//! CLI command implementations.

pub mod delete;
pub mod inspect;
pub mod verify;
