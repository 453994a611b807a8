//! Setup command: provision and bootstrap an agent host.

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;

use roost_common::{HostStatus, ProviderKind, ProvisioningRecord, RoostConfig};

use crate::application::events::NullSink;
use crate::application::ports::ProgressSink;
use crate::application::services::orchestrator::{self, ProvisionContext};
use crate::domain::StepError;
use crate::infra::config::YamlConfigStore;
use crate::infra::providers::{DigitalOceanProvider, HetznerProvider, SandboxProvider};
use crate::infra::record_store::JsonRecordStore;
use crate::infra::repo_host::GithubRepoHost;
use crate::output::OutputContext;
use crate::output::progress;
use crate::output::reporter::TerminalReporter;

/// Arguments for the setup command.
#[derive(Args)]
pub struct SetupArgs {
    /// Host identifier (lowercase alphanumerics and hyphens)
    pub host_id: String,

    /// Run in the background and return immediately
    #[arg(long)]
    pub detach: bool,
}

/// Run the setup command.
///
/// # Errors
///
/// Returns an error when configuration is missing, another run is already in
/// progress, or the run lands in a non-ready terminal status.
pub async fn run(ctx: &OutputContext, args: &SetupArgs) -> Result<()> {
    let config = YamlConfigStore.load()?;

    if args.detach {
        return detach(ctx, &args.host_id);
    }

    ctx.header(&format!("Setting up host '{}'", args.host_id));
    let spinner = ctx
        .show_progress()
        .then(|| progress::spinner("starting provisioning run"));
    let reporter = match spinner.clone() {
        Some(pb) => TerminalReporter::with_spinner(ctx, pb),
        None => TerminalReporter::new(ctx),
    };

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_on_signal.cancel();
        }
    });

    let outcome = provision(&config, &args.host_id, &reporter, cancel).await;
    if let Some(pb) = &spinner {
        match &outcome {
            Ok(record) if record.status == HostStatus::Ready => {
                progress::finish_ok(pb, "provisioning run complete");
            }
            _ => progress::finish_err(pb, "provisioning run stopped"),
        }
    }
    let record = outcome?;
    report_verdict(ctx, &record)
}

/// Entry point for the hidden background subcommand: same pipeline, no
/// terminal narration.
///
/// # Errors
///
/// Same as [`run`].
pub async fn run_detached(host_id: &str) -> Result<()> {
    let config = YamlConfigStore.load()?;
    let record = provision(&config, host_id, &NullSink, CancellationToken::new()).await?;
    anyhow::ensure!(
        record.status == HostStatus::Ready,
        "setup finished with status {:?}",
        record.status
    );
    Ok(())
}

fn detach(ctx: &OutputContext, host_id: &str) -> Result<()> {
    let exe = std::env::current_exe().unwrap_or_else(|_| std::path::PathBuf::from("roost"));
    std::process::Command::new(exe)
        .args(["_run", host_id])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("failed to start background run")?;
    ctx.success(&format!(
        "setup for '{host_id}' started in the background; follow it with `roost status {host_id}`"
    ));
    Ok(())
}

async fn provision<S: ProgressSink>(
    config: &RoostConfig,
    host_id: &str,
    sink: &S,
    cancel: CancellationToken,
) -> Result<ProvisioningRecord> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .context("building HTTP client")?;
    let store = JsonRecordStore::new()?;
    let repo_host = GithubRepoHost::new(client.clone(), &config.repo_host);

    let outcome = match config.provider {
        ProviderKind::DigitalOcean => {
            let backend = config
                .digitalocean
                .clone()
                .context("provider is digitalocean but the digitalocean section is missing")?;
            let provider = DigitalOceanProvider::new(client, backend);
            let ctx = ProvisionContext {
                provider: &provider,
                repo_host: &repo_host,
                store: &store,
                sink,
                config,
                cancel,
            };
            orchestrator::provision(&ctx, host_id).await
        }
        ProviderKind::Hetzner => {
            let backend = config
                .hetzner
                .clone()
                .context("provider is hetzner but the hetzner section is missing")?;
            let provider = HetznerProvider::new(client, backend);
            let ctx = ProvisionContext {
                provider: &provider,
                repo_host: &repo_host,
                store: &store,
                sink,
                config,
                cancel,
            };
            orchestrator::provision(&ctx, host_id).await
        }
        ProviderKind::Sandbox => {
            let backend = config
                .sandbox
                .clone()
                .context("provider is sandbox but the sandbox section is missing")?;
            let provider = SandboxProvider::new(client, backend);
            let ctx = ProvisionContext {
                provider: &provider,
                repo_host: &repo_host,
                store: &store,
                sink,
                config,
                cancel,
            };
            orchestrator::provision(&ctx, host_id).await
        }
    };

    match outcome {
        Ok(record) => Ok(record),
        Err(StepError::RunInProgress { started_at }) => Err(anyhow::anyhow!(
            "another setup run for this host started at {started_at}; \
             wait for it or retry after 30 minutes"
        )),
        Err(err) => Err(err.into()),
    }
}

fn report_verdict(ctx: &OutputContext, record: &ProvisioningRecord) -> Result<()> {
    match record.status {
        HostStatus::Ready => {
            ctx.success(&format!("host '{}' is ready", record.id));
            if let Some(addr) = &record.server_addr {
                ctx.kv("address", addr);
            }
            if let Some(version) = &record.runtime_version {
                ctx.kv("runtime", version);
            }
            Ok(())
        }
        HostStatus::RequiresPayment => {
            let class = record.required_class.as_deref().unwrap_or("unknown");
            ctx.error(&format!(
                "the backend refused resource class '{class}'; upgrade the account plan \
                 and run setup again"
            ));
            anyhow::bail!("setup requires payment")
        }
        status => {
            let detail = record.error_message.as_deref().unwrap_or("unknown error");
            ctx.error(&format!("setup failed: {detail}"));
            anyhow::bail!("setup finished with status {status:?}")
        }
    }
}
