//! Provisioning use-cases, leaves first: the step runner every higher-level
//! step is built from, the specialized installers and verifiers, and the
//! orchestrating state machine.

pub mod apt;
pub mod channel;
pub mod gateway;
pub mod install;
pub mod orchestrator;
pub mod readiness;
pub mod repo;
pub mod runner;
pub mod sessions;

#[cfg(test)]
pub mod test_support;
