//! The provisioning run: a resumable pipeline from record to ready host.
//!
//! Every step persists its completion flag before the next step starts, so a
//! crashed or failed run resumes from the last completed step. Whatever the
//! pipeline does, the record lands in a terminal status (`Ready`, `Failed`
//! or `RequiresPayment`) with the run marker cleared; only the advisory
//! duplicate-run guard rejects a run before it starts.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use roost_common::{
    HostStatus, ProvisioningRecord, RecordPatch, RoostConfig, StepFlagPatch,
};

use crate::application::events::ProgressEvent;
use crate::application::ports::{
    ComputeProvider, ProgressSink, RecordStore, RepoHost, ServerHandle,
};
use crate::application::services::runner::StepRunner;
use crate::application::services::{apt, channel, gateway, install, readiness, repo};
use crate::domain::StepError;
use crate::domain::host::{memory_repo_name, server_name, validate_host_id};

/// Create attempts before giving up on the backend.
const CREATE_ATTEMPTS: u32 = 3;
const CREATE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Polling for the resource's network address after creation.
const ADDR_ATTEMPTS: u32 = 30;
const ADDR_INTERVAL: Duration = Duration::from_secs(5);

/// A run marker older than this is considered abandoned and overridden.
const RUN_MARKER_STALE_MINS: i64 = 30;

/// Base packages installed before the runtime.
const BASE_PACKAGES: &[&str] = &["ca-certificates", "curl", "git", "nodejs", "npm"];

/// Everything a provisioning run needs, borrowed for the run's duration.
pub struct ProvisionContext<'a, P, H, R, S> {
    pub provider: &'a P,
    pub repo_host: &'a H,
    pub store: &'a R,
    pub sink: &'a S,
    pub config: &'a RoostConfig,
    pub cancel: CancellationToken,
}

/// Run the provisioning pipeline for `host_id` to a terminal status.
///
/// Returns the final record. The only pre-run rejections are an invalid host
/// id and [`StepError::RunInProgress`] when a fresh run marker shows another
/// run is live; every in-run failure is classified into the record instead
/// of being returned.
///
/// # Errors
///
/// [`StepError::RunInProgress`] or an invalid host id; record-store failures
/// while persisting the verdict.
pub async fn provision<P, H, R, S>(
    ctx: &ProvisionContext<'_, P, H, R, S>,
    host_id: &str,
) -> Result<ProvisioningRecord, StepError>
where
    P: ComputeProvider,
    H: RepoHost,
    R: RecordStore,
    S: ProgressSink,
{
    validate_host_id(host_id)?;

    let record = match ctx.store.load(host_id).await? {
        Some(existing) => existing,
        None => {
            let fresh =
                ProvisioningRecord::new(host_id, &ctx.config.owner, ctx.config.provider);
            ctx.store.upsert(&fresh).await?;
            fresh
        }
    };

    if let Some(started_at) = record.run_started_at
        && !record.status.is_terminal()
        && Utc::now() - started_at < chrono::Duration::minutes(RUN_MARKER_STALE_MINS)
    {
        return Err(StepError::RunInProgress { started_at });
    }

    let mark = RecordPatch {
        status: Some(HostStatus::Provisioning),
        error_message: Some(None),
        run_started_at: Some(Some(Utc::now())),
        ..RecordPatch::default()
    };
    let record = ctx.store.update(host_id, &mark).await?;

    let verdict = run_pipeline(ctx, host_id, record).await;
    settle(ctx, host_id, verdict).await
}

/// Classify the pipeline outcome into a terminal status and persist it.
async fn settle<P, H, R, S>(
    ctx: &ProvisionContext<'_, P, H, R, S>,
    host_id: &str,
    verdict: Result<(), StepError>,
) -> Result<ProvisioningRecord, StepError>
where
    P: ComputeProvider,
    H: RepoHost,
    R: RecordStore,
    S: ProgressSink,
{
    let patch = match verdict {
        Ok(()) => RecordPatch {
            status: Some(HostStatus::Ready),
            error_message: Some(None),
            run_started_at: Some(None),
            ..RecordPatch::default()
        },
        Err(StepError::BillingRestricted { class }) => RecordPatch {
            status: Some(HostStatus::RequiresPayment),
            required_class: Some(class.clone()),
            error_message: Some(Some(format!(
                "backend refused resource class '{class}' for plan or billing reasons"
            ))),
            run_started_at: Some(None),
            ..RecordPatch::default()
        },
        Err(err) => RecordPatch {
            status: Some(HostStatus::Failed),
            error_message: Some(Some(err.to_string())),
            run_started_at: Some(None),
            ..RecordPatch::default()
        },
    };
    let record = ctx.store.update(host_id, &patch).await?;
    ctx.sink.emit(ProgressEvent::new(
        "run",
        &format!("run finished with status {:?}", record.status),
        record.status == HostStatus::Ready,
    ));
    Ok(record)
}

async fn run_pipeline<P, H, R, S>(
    ctx: &ProvisionContext<'_, P, H, R, S>,
    host_id: &str,
    mut record: ProvisioningRecord,
) -> Result<(), StepError>
where
    P: ComputeProvider,
    H: RepoHost,
    R: RecordStore,
    S: ProgressSink,
{
    let handle = ensure_server(ctx, host_id, &mut record).await?;
    let handle = wait_for_addr(ctx, host_id, &mut record, handle).await?;

    let exec = ctx.provider.connect(&handle).await?;
    let runner = StepRunner::new(&exec, ctx.sink, ctx.cancel.clone());
    readiness::wait_until_reachable(&runner, ctx.sink).await?;

    record = ctx
        .store
        .update(host_id, &RecordPatch::status(HostStatus::CreatingRepo))
        .await?;
    ensure_repository_phase(ctx, host_id, &mut record, &runner).await?;

    record = ctx
        .store
        .update(host_id, &RecordPatch::status(HostStatus::ConfiguringVm))
        .await?;
    configure_host_phase(ctx, host_id, &mut record, &runner).await?;

    Ok(())
}

// ── Resource phase ────────────────────────────────────────────────────────────

/// Reconcile the record with the backend and return a live server handle.
///
/// A recorded server id is re-verified with a describe call; a create that
/// fails at the transport level is followed by a by-name lookup before it
/// counts as a failed attempt, because the create may have completed behind
/// the timed-out response.
async fn ensure_server<P, H, R, S>(
    ctx: &ProvisionContext<'_, P, H, R, S>,
    host_id: &str,
    record: &mut ProvisioningRecord,
) -> Result<ServerHandle, StepError>
where
    P: ComputeProvider,
    H: RepoHost,
    R: RecordStore,
    S: ProgressSink,
{
    let name = server_name(host_id);

    if record.steps.resource_created
        && let Some(server_id) = record.server_id.clone()
    {
        if let Some(handle) = ctx.provider.describe_server(&server_id).await? {
            ctx.sink.emit(ProgressEvent::new(
                "resource",
                &format!("reusing server {} ({})", handle.name, handle.id),
                true,
            ));
            return Ok(handle);
        }
        ctx.sink.emit(ProgressEvent::new(
            "resource",
            &format!("recorded server {server_id} is gone; creating a new one"),
            true,
        ));
    }

    let mut last_transport = String::new();
    for attempt in 1..=CREATE_ATTEMPTS {
        if ctx.cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }
        match ctx.provider.create_server(&name).await {
            Ok(handle) => {
                persist_handle(ctx, host_id, record, &handle).await?;
                return Ok(handle);
            }
            Err(StepError::BillingRestricted { class }) => {
                return Err(StepError::BillingRestricted { class });
            }
            Err(StepError::Transport(msg)) => {
                // The create may have landed despite the timed-out call.
                if let Some(handle) = ctx.provider.find_server(&name).await? {
                    ctx.sink.emit(ProgressEvent::new(
                        "resource",
                        &format!("create call failed but server {} exists; adopting it", handle.id),
                        true,
                    ));
                    persist_handle(ctx, host_id, record, &handle).await?;
                    return Ok(handle);
                }
                last_transport = msg;
                if attempt < CREATE_ATTEMPTS {
                    tokio::time::sleep(CREATE_RETRY_DELAY).await;
                }
            }
            Err(other) => return Err(other),
        }
    }

    Err(StepError::Transport(format!(
        "server creation failed after {CREATE_ATTEMPTS} attempts: {last_transport}"
    )))
}

async fn persist_handle<P, H, R, S>(
    ctx: &ProvisionContext<'_, P, H, R, S>,
    host_id: &str,
    record: &mut ProvisioningRecord,
    handle: &ServerHandle,
) -> Result<(), StepError>
where
    P: ComputeProvider,
    H: RepoHost,
    R: RecordStore,
    S: ProgressSink,
{
    let patch = RecordPatch {
        steps: StepFlagPatch {
            resource_created: true,
            ..StepFlagPatch::default()
        },
        server_id: Some(handle.id.clone()),
        server_addr: handle.addr.clone(),
        ..RecordPatch::default()
    };
    *record = ctx.store.update(host_id, &patch).await?;
    Ok(())
}

/// Poll until the resource has a reachable address.
async fn wait_for_addr<P, H, R, S>(
    ctx: &ProvisionContext<'_, P, H, R, S>,
    host_id: &str,
    record: &mut ProvisioningRecord,
    handle: ServerHandle,
) -> Result<ServerHandle, StepError>
where
    P: ComputeProvider,
    H: RepoHost,
    R: RecordStore,
    S: ProgressSink,
{
    if handle.addr.is_some() {
        return Ok(handle);
    }

    for _ in 0..ADDR_ATTEMPTS {
        if ctx.cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }
        tokio::time::sleep(ADDR_INTERVAL).await;
        if let Some(described) = ctx.provider.describe_server(&handle.id).await?
            && described.addr.is_some()
        {
            let patch = RecordPatch {
                server_addr: described.addr.clone(),
                ..RecordPatch::default()
            };
            *record = ctx.store.update(host_id, &patch).await?;
            return Ok(described);
        }
    }

    Err(StepError::Verification(format!(
        "server {} never acquired a network address",
        handle.id
    )))
}

// ── Repository phase ──────────────────────────────────────────────────────────

async fn ensure_repository_phase<P, H, R, S>(
    ctx: &ProvisionContext<'_, P, H, R, S>,
    host_id: &str,
    record: &mut ProvisioningRecord,
    runner: &StepRunner<'_, P::Exec, S>,
) -> Result<(), StepError>
where
    P: ComputeProvider,
    H: RepoHost,
    R: RecordStore,
    S: ProgressSink,
{
    // Upstream existence is re-verified even when the flag is already set.
    let outcome = repo::ensure_repository(
        ctx.repo_host,
        record.repo_name.as_deref(),
        &memory_repo_name(host_id),
        ctx.sink,
    )
    .await?;
    repo::install_deploy_key(runner, ctx.repo_host, &outcome.name).await?;
    let patch = RecordPatch {
        steps: StepFlagPatch {
            repository_ready: true,
            ..StepFlagPatch::default()
        },
        repo_name: Some(outcome.name.clone()),
        repo_url: Some(outcome.url.clone()),
        ..RecordPatch::default()
    };
    *record = ctx.store.update(host_id, &patch).await?;

    repo::clone_repository(runner, &outcome.url).await?;
    let patch = RecordPatch {
        steps: StepFlagPatch {
            repository_cloned: true,
            ..StepFlagPatch::default()
        },
        ..RecordPatch::default()
    };
    *record = ctx.store.update(host_id, &patch).await?;

    if !record.steps.sync_configured {
        repo::install_sync_daemon(runner, ctx.sink).await?;
        let patch = RecordPatch {
            steps: StepFlagPatch {
                sync_configured: true,
                ..StepFlagPatch::default()
            },
            ..RecordPatch::default()
        };
        *record = ctx.store.update(host_id, &patch).await?;
    }
    Ok(())
}

// ── Host configuration phase ──────────────────────────────────────────────────

async fn configure_host_phase<P, H, R, S>(
    ctx: &ProvisionContext<'_, P, H, R, S>,
    host_id: &str,
    record: &mut ProvisioningRecord,
    runner: &StepRunner<'_, P::Exec, S>,
) -> Result<(), StepError>
where
    P: ComputeProvider,
    H: RepoHost,
    R: RecordStore,
    S: ProgressSink,
{
    let sudo = apt::sudo_prefix(runner).await?;

    if !record.steps.runtime_installed {
        apt::wait_for_package_manager(runner, ctx.sink, sudo).await?;
        apt::install_packages(runner, sudo, BASE_PACKAGES).await?;
        let version =
            install::install_runtime(runner, ctx.sink, sudo, &ctx.config.runtime).await?;
        let patch = RecordPatch {
            steps: StepFlagPatch {
                runtime_installed: true,
                ..StepFlagPatch::default()
            },
            runtime_version: Some(version),
            ..RecordPatch::default()
        };
        *record = ctx.store.update(host_id, &patch).await?;
    } else {
        // Resumed runs re-verify the recorded install instead of trusting it.
        let version =
            install::verify_artifact(runner, ctx.sink, &ctx.config.runtime.binary).await?;
        if record.runtime_version.as_deref() != Some(version.as_str()) {
            let patch = RecordPatch {
                runtime_version: Some(version),
                ..RecordPatch::default()
            };
            *record = ctx.store.update(host_id, &patch).await?;
        }
    }

    repo::link_knowledge(runner).await?;
    repo::clone_data_repos(runner, ctx.repo_host, ctx.sink, &ctx.config.data_repos).await?;

    let control_token = channel::generate_control_token();
    channel::configure_runtime(runner, ctx.config, &control_token).await?;
    channel::ensure_behavior(runner).await?;

    if ctx.config.channel.is_some() {
        gateway::restart_gateway(runner, ctx.sink, &ctx.config.runtime.binary).await?;
        let patch = RecordPatch {
            steps: StepFlagPatch {
                channel_configured: true,
                gateway_started: true,
                ..StepFlagPatch::default()
            },
            ..RecordPatch::default()
        };
        *record = ctx.store.update(host_id, &patch).await?;
    }
    Ok(())
}
