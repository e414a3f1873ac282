//! CLI command implementations.

pub mod dump;
pub mod follow;
pub mod inspect;
pub mod serve;
pub mod verify;
