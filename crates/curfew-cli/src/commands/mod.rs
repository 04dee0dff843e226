//! CLI command implementations

pub mod daemon;
pub mod event;
pub mod status;
