//! Teardown command: delete the compute resource and reset the record.

use anyhow::{Context, Result};
use clap::Args;

use roost_common::ProviderKind;

use crate::application::ports::{ComputeProvider, RecordStore};
use crate::infra::config::YamlConfigStore;
use crate::infra::providers::{DigitalOceanProvider, HetznerProvider, SandboxProvider};
use crate::infra::record_store::JsonRecordStore;
use crate::output::OutputContext;

/// Arguments for the teardown command.
#[derive(Args)]
pub struct TeardownArgs {
    /// Host identifier
    pub host_id: String,

    /// Also delete the local record (the upstream repository always survives)
    #[arg(long)]
    pub purge: bool,
}

/// Run the teardown command.
///
/// Deletes the backend resource if one is recorded, then resets the record
/// to `Pending` keeping repository fields, so a later setup reuses the
/// knowledge repository. `--purge` removes the record file entirely.
///
/// # Errors
///
/// Returns an error when the record is missing or deletion fails.
pub async fn run(ctx: &OutputContext, args: &TeardownArgs) -> Result<()> {
    let store = JsonRecordStore::new()?;
    let mut record = store
        .load(&args.host_id)
        .await?
        .with_context(|| format!("no record for host '{}'", args.host_id))?;

    if let Some(server_id) = record.server_id.clone() {
        let config = YamlConfigStore.load()?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("building HTTP client")?;
        match record.provider {
            ProviderKind::DigitalOcean => {
                let backend = config
                    .digitalocean
                    .context("record uses digitalocean but the config section is missing")?;
                DigitalOceanProvider::new(client, backend)
                    .delete_server(&server_id)
                    .await?;
            }
            ProviderKind::Hetzner => {
                let backend = config
                    .hetzner
                    .context("record uses hetzner but the config section is missing")?;
                HetznerProvider::new(client, backend)
                    .delete_server(&server_id)
                    .await?;
            }
            ProviderKind::Sandbox => {
                let backend = config
                    .sandbox
                    .context("record uses sandbox but the config section is missing")?;
                SandboxProvider::new(client, backend)
                    .delete_server(&server_id)
                    .await?;
            }
        }
        ctx.success(&format!("deleted server {server_id}"));
    } else {
        ctx.info("no server recorded; nothing to delete on the backend");
    }

    if args.purge {
        store.delete(&args.host_id).await?;
        ctx.success(&format!("removed record for '{}'", args.host_id));
    } else {
        record.reset();
        store.upsert(&record).await?;
        ctx.success(&format!(
            "reset record for '{}'; the knowledge repository is kept for reuse",
            args.host_id
        ));
    }
    Ok(())
}
