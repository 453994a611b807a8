//! Persistent exec transport over OpenSSH.
//!
//! One multiplexed connection per host via ControlMaster, so consecutive
//! commands reuse the authenticated channel. SSH exit code 255 is the
//! client's own failure code and is reported as a transport error, never as
//! a remote command result.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::application::ports::{ExecOutput, RemoteExecutor, Transport};
use crate::infra::command_runner::run_with_timeout;

/// Default per-command ceiling. Individual steps pass tighter timeouts.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Seconds the multiplexed master connection stays alive after the last use.
const CONTROL_PERSIST_SECS: u32 = 600;

pub struct SshExecutor {
    addr: String,
}

impl SshExecutor {
    #[must_use]
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_owned(),
        }
    }

    fn target(&self) -> String {
        format!("root@{}", self.addr)
    }
}

impl RemoteExecutor for SshExecutor {
    async fn execute(&self, command: &str) -> Result<ExecOutput> {
        self.execute_with_timeout(command, DEFAULT_TIMEOUT).await
    }

    async fn execute_with_timeout(&self, command: &str, timeout: Duration) -> Result<ExecOutput> {
        let target = self.target();
        let persist = format!("ControlPersist={CONTROL_PERSIST_SECS}");
        let args = [
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=accept-new",
            "-o",
            "ServerAliveInterval=15",
            "-o",
            "ServerAliveCountMax=4",
            "-o",
            "ControlMaster=auto",
            "-o",
            "ControlPath=~/.ssh/roost-%r@%h",
            "-o",
            persist.as_str(),
            target.as_str(),
            "bash",
            "-lc",
            command,
        ];
        let out = run_with_timeout("ssh", &args, timeout)
            .await
            .with_context(|| format!("ssh to {}", self.addr))?;

        let exit_code = out.status.code().unwrap_or(-1);
        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&out.stderr);
        if !stderr.trim().is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&stderr);
        }

        if exit_code == 255 {
            anyhow::bail!("ssh transport failure to {}: {}", self.addr, output.trim());
        }
        Ok(ExecOutput { output, exit_code })
    }

    fn transport(&self) -> Transport {
        Transport::Persistent
    }
}
