//! On-host layout: fixed paths, the gateway control port, and host naming.
//!
//! Everything the pipeline writes on the remote machine lives at one of these
//! paths so resumed runs find the same artifacts.

use anyhow::Result;

/// Local control port the gateway binds. Liveness requires a process AND a
/// listener on this port.
pub const CONTROL_PORT: u16 = 18789;

/// Clone of the knowledge repository.
pub const MEMORY_DIR: &str = "/root/memory";

/// Runtime home directory on the host.
pub const RUNTIME_DIR: &str = "/root/.roost-agent";

/// Runtime configuration document (channel credentials + control token).
pub const RUNTIME_CONFIG_PATH: &str = "/root/.roost-agent/config.json";

/// Behavior/prompt document consumed by the runtime.
pub const BEHAVIOR_PATH: &str = "/root/.roost-agent/behavior.md";

/// Symlink from the runtime's knowledge path to the memory clone.
pub const KNOWLEDGE_LINK: &str = "/root/.roost-agent/knowledge";

/// Directory for additional data-source clones.
pub const DATA_DIR: &str = "/root/.roost-agent/data";

/// Periodic sync script installed for the sync daemon.
pub const SYNC_SCRIPT: &str = "/root/.roost-agent/sync-memory.sh";

/// Pidfile guarding the detached-loop fallback of the sync daemon.
pub const SYNC_PIDFILE: &str = "/root/.roost-agent/sync-memory.pid";

/// Deploy keypair; the public half is registered with the repository host.
pub const DEPLOY_KEY_PATH: &str = "/root/.ssh/roost_deploy";

/// Self-contained background install script.
pub const INSTALL_SCRIPT: &str = "/tmp/roost-install.sh";

/// Log the install script appends to; polled for the sentinel.
pub const INSTALL_LOG: &str = "/tmp/roost-install.log";

/// Sentinel line the install script appends on success.
pub const INSTALL_SENTINEL: &str = "ROOST_INSTALL_COMPLETE";

/// Gateway service log; its tail is captured on verification failure.
pub const GATEWAY_LOG: &str = "/tmp/roost-gateway.log";

/// Validate a host id: lowercase alphanumerics and hyphens, max 63 chars,
/// no leading/trailing hyphen. Host ids become server names and file names.
pub fn validate_host_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 63
        && id.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !id.starts_with('-')
        && !id.ends_with('-');
    anyhow::ensure!(
        valid,
        "invalid host id '{id}': must match ^[a-z0-9]([a-z0-9-]{{0,61}}[a-z0-9])?$"
    );
    Ok(())
}

/// Server name for a host id, as created on the backend.
#[must_use]
pub fn server_name(host_id: &str) -> String {
    format!("roost-{host_id}")
}

/// Knowledge repository name for a host id.
#[must_use]
pub fn memory_repo_name(host_id: &str) -> String {
    format!("{host_id}-memory")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_ids() {
        for id in ["agent", "agent-2", "a", "abc-def-0"] {
            assert!(validate_host_id(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn rejects_bad_ids() {
        for id in ["", "-agent", "agent-", "Agent", "ag ent", "a_b", &"x".repeat(64)] {
            assert!(validate_host_id(id).is_err(), "{id:?} should be rejected");
        }
    }

    #[test]
    fn names_derive_from_host_id() {
        assert_eq!(server_name("agent"), "roost-agent");
        assert_eq!(memory_repo_name("agent"), "agent-memory");
    }
}
