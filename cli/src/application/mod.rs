//! Application layer: port contracts and provisioning use-cases.
//!
//! Imports only from `crate::domain` and `roost_common`; all I/O is routed
//! through the port traits in [`ports`].

pub mod events;
pub mod ports;
pub mod services;
