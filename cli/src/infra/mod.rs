//! Infrastructure layer: real transports, HTTP backends and on-disk stores
//! fulfilling the application ports.

pub mod command_runner;
pub mod config;
pub mod http_exec;
pub mod providers;
pub mod record_store;
pub mod repo_host;
pub mod ssh_exec;
