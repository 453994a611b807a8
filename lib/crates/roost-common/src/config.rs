//! User configuration document (`~/.roost/config.yaml`).

use serde::{Deserialize, Serialize};

use crate::record::ProviderKind;

/// DigitalOcean credentials and placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalOceanConfig {
    pub token: String,
    #[serde(default = "default_do_region")]
    pub region: String,
    /// Droplet size slug, e.g. `s-2vcpu-4gb`.
    #[serde(default = "default_do_size")]
    pub size: String,
    /// IDs of SSH keys already registered with the account.
    #[serde(default)]
    pub ssh_keys: Vec<String>,
}

fn default_do_region() -> String {
    "nyc3".to_owned()
}

fn default_do_size() -> String {
    "s-2vcpu-4gb".to_owned()
}

/// Hetzner Cloud credentials and placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HetznerConfig {
    pub token: String,
    #[serde(default = "default_hetzner_location")]
    pub location: String,
    /// Server type name, e.g. `cx32`.
    #[serde(default = "default_hetzner_type")]
    pub server_type: String,
    #[serde(default)]
    pub ssh_keys: Vec<String>,
}

fn default_hetzner_location() -> String {
    "fsn1".to_owned()
}

fn default_hetzner_type() -> String {
    "cx32".to_owned()
}

/// Hosted sandbox backend (RPC exec transport).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub base_url: String,
    pub token: String,
    #[serde(default = "default_sandbox_template")]
    pub template: String,
}

fn default_sandbox_template() -> String {
    "ubuntu-24.04".to_owned()
}

/// Repository host (GitHub-style API) used for the knowledge repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoHostConfig {
    pub token: String,
    /// Account that owns the knowledge repository.
    pub owner: String,
    #[serde(default = "default_repo_api_base")]
    pub api_base: String,
    #[serde(default = "default_repo_ssh_host")]
    pub ssh_host: String,
}

fn default_repo_api_base() -> String {
    "https://api.github.com".to_owned()
}

fn default_repo_ssh_host() -> String {
    "github.com".to_owned()
}

/// Messaging channel credentials for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub bot_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_peer: Option<String>,
}

/// Agent runtime package identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// npm package installed globally on the host.
    #[serde(default = "default_runtime_package")]
    pub package: String,
    /// Binary name the install must resolve on PATH afterwards.
    #[serde(default = "default_runtime_binary")]
    pub binary: String,
}

fn default_runtime_package() -> String {
    "roost-agent".to_owned()
}

fn default_runtime_binary() -> String {
    "roost-agent".to_owned()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            package: default_runtime_package(),
            binary: default_runtime_binary(),
        }
    }
}

/// Top-level configuration for a roost host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoostConfig {
    pub owner: String,
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digitalocean: Option<DigitalOceanConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hetzner: Option<HetznerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxConfig>,
    pub repo_host: RepoHostConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// When present the gateway is configured and started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelConfig>,
    /// Model API credential; persisted alone when no channel is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_key: Option<String>,
    /// Additional data-source repositories cloned next to the memory clone.
    #[serde(default)]
    pub data_repos: Vec<String>,
}
