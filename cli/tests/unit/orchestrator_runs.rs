//! End-to-end pipeline scenarios against scripted backends.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;

use roost_cli::application::events::EventBuffer;
use roost_cli::application::services::orchestrator::{self, ProvisionContext};
use roost_cli::domain::StepError;
use roost_common::{
    ChannelConfig, HostStatus, ProviderKind, ProvisioningRecord, RepoHostConfig, RoostConfig,
    RuntimeConfig,
};

use crate::mocks::{
    CreateAnswer, MemoryRecordStore, MockProvider, MockRepoHost, handle,
};

fn config(channel: bool) -> RoostConfig {
    RoostConfig {
        owner: "alice".to_owned(),
        provider: ProviderKind::Hetzner,
        digitalocean: None,
        hetzner: None,
        sandbox: None,
        repo_host: RepoHostConfig {
            token: "t".to_owned(),
            owner: "alice".to_owned(),
            api_base: "https://api.github.com".to_owned(),
            ssh_host: "github.com".to_owned(),
        },
        runtime: RuntimeConfig::default(),
        channel: channel.then(|| ChannelConfig {
            bot_token: "bot".to_owned(),
            allowed_peer: None,
        }),
        model_key: Some("mk-1".to_owned()),
        data_repos: Vec::new(),
    }
}

fn ctx<'a>(
    provider: &'a MockProvider,
    repo_host: &'a MockRepoHost,
    store: &'a MemoryRecordStore,
    sink: &'a EventBuffer,
    config: &'a RoostConfig,
) -> ProvisionContext<'a, MockProvider, MockRepoHost, MemoryRecordStore, EventBuffer> {
    ProvisionContext {
        provider,
        repo_host,
        store,
        sink,
        config,
        cancel: CancellationToken::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn fresh_host_without_channel_lands_ready() {
    let provider = MockProvider::new(vec![CreateAnswer::Ok(handle(
        "77",
        "roost-agent",
        Some("198.51.100.3"),
    ))]);
    let repo_host = MockRepoHost::default();
    let store = MemoryRecordStore::new();
    let sink = EventBuffer::new();
    let cfg = config(false);

    let record = orchestrator::provision(&ctx(&provider, &repo_host, &store, &sink, &cfg), "agent")
        .await
        .unwrap();

    assert_eq!(record.status, HostStatus::Ready);
    assert_eq!(record.server_id.as_deref(), Some("77"));
    assert_eq!(record.server_addr.as_deref(), Some("198.51.100.3"));
    assert_eq!(record.repo_name.as_deref(), Some("agent-memory"));
    assert_eq!(record.runtime_version.as_deref(), Some("1.2.3"));
    assert!(record.run_started_at.is_none(), "run marker must be cleared");
    assert!(record.error_message.is_none());

    assert!(record.steps.resource_created);
    assert!(record.steps.repository_ready);
    assert!(record.steps.repository_cloned);
    assert!(record.steps.sync_configured);
    assert!(record.steps.runtime_installed);
    assert!(!record.steps.channel_configured, "no channel was configured");
    assert!(!record.steps.gateway_started);

    assert_eq!(repo_host.created(), ["agent-memory"]);
    // No gateway launch without a channel.
    assert_eq!(provider.command_count("gateway"), 0);
}

#[tokio::test(start_paused = true)]
async fn channel_config_adds_a_verified_gateway() {
    let provider = MockProvider::new(vec![CreateAnswer::Ok(handle(
        "77",
        "roost-agent",
        Some("198.51.100.3"),
    ))]);
    let repo_host = MockRepoHost::default();
    let store = MemoryRecordStore::new();
    let sink = EventBuffer::new();
    let cfg = config(true);

    let record = orchestrator::provision(&ctx(&provider, &repo_host, &store, &sink, &cfg), "agent")
        .await
        .unwrap();

    assert_eq!(record.status, HostStatus::Ready);
    assert!(record.steps.channel_configured);
    assert!(record.steps.gateway_started);
    // Old instance cleared, new one launched, liveness verified.
    assert_eq!(provider.command_count("pkill -f"), 1);
    assert!(provider.command_count("nohup roost-agent gateway") >= 1);
    assert!(provider.command_count("ss -ltn") >= 1);
}

#[tokio::test(start_paused = true)]
async fn timed_out_create_adopts_the_server_found_by_name() {
    let mut provider = MockProvider::new(vec![CreateAnswer::Transport("client timeout")]);
    provider.find_answer = Some(handle("88", "roost-agent", Some("203.0.113.9")));
    let repo_host = MockRepoHost::default();
    let store = MemoryRecordStore::new();
    let sink = EventBuffer::new();
    let cfg = config(false);

    let record = orchestrator::provision(&ctx(&provider, &repo_host, &store, &sink, &cfg), "agent")
        .await
        .unwrap();

    assert_eq!(record.status, HostStatus::Ready);
    assert_eq!(record.server_id.as_deref(), Some("88"));
    assert_eq!(provider.create_calls(), 1, "adopting skips further creates");
}

#[tokio::test(start_paused = true)]
async fn billing_rejection_lands_requires_payment_without_retrying() {
    let provider = MockProvider::new(vec![CreateAnswer::Billing("cx32")]);
    let repo_host = MockRepoHost::default();
    let store = MemoryRecordStore::new();
    let sink = EventBuffer::new();
    let cfg = config(false);

    let record = orchestrator::provision(&ctx(&provider, &repo_host, &store, &sink, &cfg), "agent")
        .await
        .unwrap();

    assert_eq!(record.status, HostStatus::RequiresPayment);
    assert_eq!(record.required_class.as_deref(), Some("cx32"));
    assert!(record.run_started_at.is_none());
    assert_eq!(provider.create_calls(), 1, "billing rejections are not retried");
}

#[tokio::test(start_paused = true)]
async fn transport_exhaustion_lands_failed() {
    let provider = MockProvider::new(vec![CreateAnswer::Transport("gateway down")]);
    let repo_host = MockRepoHost::default();
    let store = MemoryRecordStore::new();
    let sink = EventBuffer::new();
    let cfg = config(false);

    let record = orchestrator::provision(&ctx(&provider, &repo_host, &store, &sink, &cfg), "agent")
        .await
        .unwrap();

    assert_eq!(record.status, HostStatus::Failed);
    assert!(record.error_message.as_deref().unwrap().contains("gateway down"));
    assert!(record.run_started_at.is_none());
    assert_eq!(provider.create_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn resumed_run_reuses_the_recorded_server() {
    let provider = MockProvider::new(vec![]);
    provider.described.lock().unwrap().insert(
        "77".to_owned(),
        handle("77", "roost-agent", Some("198.51.100.3")),
    );
    let repo_host = MockRepoHost::with_existing_repos();

    let mut record = ProvisioningRecord::new("agent", "alice", ProviderKind::Hetzner);
    record.status = HostStatus::Failed;
    record.steps.resource_created = true;
    record.server_id = Some("77".to_owned());
    record.server_addr = Some("198.51.100.3".to_owned());
    record.repo_name = Some("agent-memory".to_owned());
    record.repo_url = Some("git@example.com:alice/agent-memory.git".to_owned());
    let store = MemoryRecordStore::with_record(record);
    let sink = EventBuffer::new();
    let cfg = config(false);

    let final_record =
        orchestrator::provision(&ctx(&provider, &repo_host, &store, &sink, &cfg), "agent")
            .await
            .unwrap();

    assert_eq!(final_record.status, HostStatus::Ready);
    assert_eq!(provider.create_calls(), 0, "existing server must be reused");
    assert!(repo_host.created().is_empty(), "existing repository must be reused");
}

#[tokio::test(start_paused = true)]
async fn installed_runtime_is_reverified_not_reinstalled() {
    let provider = MockProvider::new(vec![]);
    provider.described.lock().unwrap().insert(
        "77".to_owned(),
        handle("77", "roost-agent", Some("198.51.100.3")),
    );
    let repo_host = MockRepoHost::with_existing_repos();

    let mut record = ProvisioningRecord::new("agent", "alice", ProviderKind::Hetzner);
    record.status = HostStatus::Failed;
    record.steps.resource_created = true;
    record.steps.runtime_installed = true;
    record.server_id = Some("77".to_owned());
    record.server_addr = Some("198.51.100.3".to_owned());
    record.repo_name = Some("agent-memory".to_owned());
    record.repo_url = Some("git@example.com:alice/agent-memory.git".to_owned());
    let store = MemoryRecordStore::with_record(record);
    let sink = EventBuffer::new();
    let cfg = config(false);

    let final_record =
        orchestrator::provision(&ctx(&provider, &repo_host, &store, &sink, &cfg), "agent")
            .await
            .unwrap();

    assert_eq!(final_record.status, HostStatus::Ready);
    assert_eq!(final_record.runtime_version.as_deref(), Some("1.2.3"));
    assert_eq!(provider.command_count("apt-get install"), 0);
    assert_eq!(provider.command_count("npm install"), 0);
    assert!(provider.command_count("command -v roost-agent") >= 1);
}

#[tokio::test(start_paused = true)]
async fn missing_upstream_repo_is_recreated_on_resume() {
    let provider = MockProvider::new(vec![]);
    provider.described.lock().unwrap().insert(
        "77".to_owned(),
        handle("77", "roost-agent", Some("198.51.100.3")),
    );
    // Record claims a repository, upstream says it is gone.
    let repo_host = MockRepoHost::default();

    let mut record = ProvisioningRecord::new("agent", "alice", ProviderKind::Hetzner);
    record.status = HostStatus::Failed;
    record.steps.resource_created = true;
    record.steps.repository_ready = true;
    record.server_id = Some("77".to_owned());
    record.server_addr = Some("198.51.100.3".to_owned());
    record.repo_name = Some("agent-memory".to_owned());
    let store = MemoryRecordStore::with_record(record);
    let sink = EventBuffer::new();
    let cfg = config(false);

    let final_record =
        orchestrator::provision(&ctx(&provider, &repo_host, &store, &sink, &cfg), "agent")
            .await
            .unwrap();

    assert_eq!(final_record.status, HostStatus::Ready);
    assert_eq!(repo_host.created(), ["agent-memory"]);
}

#[tokio::test]
async fn fresh_run_marker_rejects_a_second_run() {
    let provider = MockProvider::new(vec![]);
    let repo_host = MockRepoHost::default();

    let mut record = ProvisioningRecord::new("agent", "alice", ProviderKind::Hetzner);
    record.status = HostStatus::Provisioning;
    record.run_started_at = Some(Utc::now() - ChronoDuration::minutes(5));
    let store = MemoryRecordStore::with_record(record);
    let sink = EventBuffer::new();
    let cfg = config(false);

    let err = orchestrator::provision(&ctx(&provider, &repo_host, &store, &sink, &cfg), "agent")
        .await
        .unwrap_err();
    assert!(matches!(err, StepError::RunInProgress { .. }));
    assert_eq!(provider.create_calls(), 0);
    // The interrupted run's record is untouched.
    assert_eq!(
        store.snapshot("agent").unwrap().status,
        HostStatus::Provisioning
    );
}

#[tokio::test(start_paused = true)]
async fn stale_run_marker_is_overridden() {
    let provider = MockProvider::new(vec![CreateAnswer::Ok(handle(
        "77",
        "roost-agent",
        Some("198.51.100.3"),
    ))]);
    let repo_host = MockRepoHost::default();

    let mut record = ProvisioningRecord::new("agent", "alice", ProviderKind::Hetzner);
    record.status = HostStatus::Provisioning;
    record.run_started_at = Some(Utc::now() - ChronoDuration::hours(2));
    let store = MemoryRecordStore::with_record(record);
    let sink = EventBuffer::new();
    let cfg = config(false);

    let final_record =
        orchestrator::provision(&ctx(&provider, &repo_host, &store, &sink, &cfg), "agent")
            .await
            .unwrap();
    assert_eq!(final_record.status, HostStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn addressless_server_is_polled_until_it_has_one() {
    let provider = MockProvider::new(vec![CreateAnswer::Ok(handle("77", "roost-agent", None))]);
    provider.described.lock().unwrap().insert(
        "77".to_owned(),
        handle("77", "roost-agent", Some("198.51.100.3")),
    );
    let repo_host = MockRepoHost::default();
    let store = MemoryRecordStore::new();
    let sink = EventBuffer::new();
    let cfg = config(false);

    let record = orchestrator::provision(&ctx(&provider, &repo_host, &store, &sink, &cfg), "agent")
        .await
        .unwrap();
    assert_eq!(record.status, HostStatus::Ready);
    assert_eq!(record.server_addr.as_deref(), Some("198.51.100.3"));
}

#[tokio::test]
async fn invalid_host_id_is_rejected_before_any_backend_call() {
    let provider = MockProvider::new(vec![]);
    let repo_host = MockRepoHost::default();
    let store = MemoryRecordStore::new();
    let sink = EventBuffer::new();
    let cfg = config(false);

    let err = orchestrator::provision(
        &ctx(&provider, &repo_host, &store, &sink, &cfg),
        "Not Valid",
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("invalid host id"));
    assert_eq!(provider.create_calls(), 0);
    assert!(store.snapshot("Not Valid").is_none());
}
