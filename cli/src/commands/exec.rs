//! Exec command: run one command on a provisioned host.

use anyhow::{Context, Result};
use clap::Args;

use roost_common::{ProviderKind, ProvisioningRecord};

use crate::application::ports::{ComputeProvider, ExecOutput, RecordStore, ServerHandle};
use crate::application::services::sessions::{SESSION_TTL, SessionRegistry};
use crate::infra::config::YamlConfigStore;
use crate::infra::providers::{DigitalOceanProvider, HetznerProvider, SandboxProvider};
use crate::infra::record_store::JsonRecordStore;
use crate::output::OutputContext;

/// Arguments for the exec command.
#[derive(Args)]
pub struct ExecArgs {
    /// Host identifier
    pub host_id: String,

    /// Command to run on the host
    pub command: String,
}

/// Run the exec command. Exits with the remote command's exit code.
///
/// # Errors
///
/// Returns an error when the host is not provisioned or the transport fails.
pub async fn run(ctx: &OutputContext, args: &ExecArgs) -> Result<()> {
    let store = JsonRecordStore::new()?;
    let record = store
        .load(&args.host_id)
        .await?
        .with_context(|| format!("no record for host '{}'", args.host_id))?;

    let config = YamlConfigStore.load()?;
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .context("building HTTP client")?;

    let out = match record.provider {
        ProviderKind::DigitalOcean => {
            let backend = config
                .digitalocean
                .context("record uses digitalocean but the config section is missing")?;
            let provider = DigitalOceanProvider::new(client, backend);
            let registry = SessionRegistry::new(SESSION_TTL);
            let result = exec_via(&registry, &provider, &record, &args.command).await;
            registry.drain().await;
            result?
        }
        ProviderKind::Hetzner => {
            let backend = config
                .hetzner
                .context("record uses hetzner but the config section is missing")?;
            let provider = HetznerProvider::new(client, backend);
            let registry = SessionRegistry::new(SESSION_TTL);
            let result = exec_via(&registry, &provider, &record, &args.command).await;
            registry.drain().await;
            result?
        }
        ProviderKind::Sandbox => {
            let backend = config
                .sandbox
                .context("record uses sandbox but the config section is missing")?;
            let provider = SandboxProvider::new(client, backend);
            let registry = SessionRegistry::new(SESSION_TTL);
            let result = exec_via(&registry, &provider, &record, &args.command).await;
            registry.drain().await;
            result?
        }
    };

    if !out.output.is_empty() {
        print!("{}", out.output);
        if !out.output.ends_with('\n') {
            println!();
        }
    }
    if !out.success() {
        ctx.error(&format!("command exited with code {}", out.exit_code));
        std::process::exit(out.exit_code.clamp(1, 255));
    }
    Ok(())
}

/// Run one command through the shared session registry. The caller owns the
/// registry for the life of the process and drains it before exit.
async fn exec_via<P: ComputeProvider>(
    registry: &SessionRegistry<P::Exec>,
    provider: &P,
    record: &ProvisioningRecord,
    command: &str,
) -> Result<ExecOutput> {
    let handle = handle_from_record(record)?;
    registry
        .run(&record.id, || provider.connect(&handle), command)
        .await
}

fn handle_from_record(record: &ProvisioningRecord) -> Result<ServerHandle> {
    let id = record
        .server_id
        .clone()
        .with_context(|| format!("host '{}' has no server; run setup first", record.id))?;
    Ok(ServerHandle {
        id,
        name: crate::domain::host::server_name(&record.id),
        addr: record.server_addr.clone(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::application::ports::Transport;
    use crate::application::services::test_support::RuleExecutor;
    use crate::domain::StepError;

    struct LoopbackProvider {
        connects: AtomicU32,
    }

    impl ComputeProvider for LoopbackProvider {
        type Exec = RuleExecutor;

        async fn create_server(&self, _name: &str) -> Result<ServerHandle, StepError> {
            Err(StepError::Transport("not a provisioning backend".to_owned()))
        }

        async fn describe_server(&self, _id: &str) -> Result<Option<ServerHandle>> {
            Ok(None)
        }

        async fn find_server(&self, _name: &str) -> Result<Option<ServerHandle>> {
            Ok(None)
        }

        async fn delete_server(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn connect(&self, _handle: &ServerHandle) -> Result<Self::Exec> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(RuleExecutor::new(Transport::Persistent))
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::Sandbox
        }
    }

    #[tokio::test]
    async fn repeated_commands_share_one_session_until_drained() {
        let provider = LoopbackProvider {
            connects: AtomicU32::new(0),
        };
        let mut record = ProvisioningRecord::new("agent", "alice", ProviderKind::Sandbox);
        record.server_id = Some("sbx-1".to_owned());

        let registry = SessionRegistry::new(SESSION_TTL);
        let one = exec_via(&registry, &provider, &record, "echo one").await.unwrap();
        let two = exec_via(&registry, &provider, &record, "echo two").await.unwrap();
        assert_eq!(one.output, "one");
        assert_eq!(two.output, "two");
        assert_eq!(provider.connects.load(Ordering::SeqCst), 1);

        registry.drain().await;
        assert_eq!(registry.len().await, 0);
    }

    #[test]
    fn record_without_server_has_no_handle() {
        let record = ProvisioningRecord::new("agent", "alice", ProviderKind::Hetzner);
        assert!(handle_from_record(&record).is_err());
    }

    #[test]
    fn handle_reconstructs_name_and_addr() {
        let mut record = ProvisioningRecord::new("agent", "alice", ProviderKind::Hetzner);
        record.server_id = Some("77".to_owned());
        record.server_addr = Some("198.51.100.3".to_owned());
        let handle = handle_from_record(&record).unwrap();
        assert_eq!(handle.name, "roost-agent");
        assert_eq!(handle.addr.as_deref(), Some("198.51.100.3"));
    }
}
