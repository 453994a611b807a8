//! Compute backend adapters, one per [`ProviderKind`](roost_common::ProviderKind).

pub mod digitalocean;
pub mod hetzner;
pub mod sandbox;

pub use digitalocean::DigitalOceanProvider;
pub use hetzner::HetznerProvider;
pub use sandbox::SandboxProvider;
