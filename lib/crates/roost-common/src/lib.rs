//! Shared types for the roost provisioning orchestrator.

pub mod config;
pub mod record;

pub use config::{
    ChannelConfig, DigitalOceanConfig, HetznerConfig, RepoHostConfig, RoostConfig, RuntimeConfig,
    SandboxConfig,
};
pub use record::{
    HostStatus, ProviderKind, ProvisioningRecord, RecordPatch, StepFlagPatch, StepFlags,
};
