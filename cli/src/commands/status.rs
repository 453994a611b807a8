//! Status command: show the persisted record for a host.

use anyhow::{Context, Result};
use clap::Args;

use crate::application::ports::RecordStore;
use crate::infra::record_store::JsonRecordStore;
use crate::output::OutputContext;

/// Arguments for the status command.
#[derive(Args)]
pub struct StatusArgs {
    /// Host identifier
    pub host_id: String,
}

/// Run the status command.
///
/// # Errors
///
/// Returns an error when no record exists for the host.
pub async fn run(ctx: &OutputContext, args: &StatusArgs, json: bool) -> Result<()> {
    let store = JsonRecordStore::new()?;
    let record = store
        .load(&args.host_id)
        .await?
        .with_context(|| format!("no record for host '{}'; run `roost setup` first", args.host_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    ctx.header(&format!("Host '{}'", record.id));
    ctx.kv("provider", &record.provider.to_string());
    ctx.kv("status", &format!("{:?}", record.status));
    if let Some(id) = &record.server_id {
        ctx.kv("server", id);
    }
    if let Some(addr) = &record.server_addr {
        ctx.kv("address", addr);
    }
    if let Some(repo) = &record.repo_name {
        ctx.kv("repository", repo);
    }
    if let Some(version) = &record.runtime_version {
        ctx.kv("runtime", version);
    }
    if let Some(class) = &record.required_class {
        ctx.kv("required class", class);
    }
    if let Some(started_at) = record.run_started_at {
        ctx.kv("run started", &started_at.to_rfc3339());
    }
    if let Some(error) = &record.error_message {
        ctx.error(error);
    }

    let s = record.steps;
    let done: Vec<&str> = [
        ("resource", s.resource_created),
        ("repository", s.repository_ready),
        ("clone", s.repository_cloned),
        ("sync", s.sync_configured),
        ("runtime", s.runtime_installed),
        ("channel", s.channel_configured),
        ("gateway", s.gateway_started),
    ]
    .iter()
    .filter(|(_, flag)| *flag)
    .map(|(name, _)| *name)
    .collect();
    let steps = if done.is_empty() {
        "none".to_owned()
    } else {
        done.join(", ")
    };
    ctx.kv("steps done", &steps);
    ctx.kv("updated", &record.updated_at.to_rfc3339());
    Ok(())
}
