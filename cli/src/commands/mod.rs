//! Command implementations

pub mod exec;
pub mod setup;
pub mod status;
pub mod teardown;
pub mod version;
