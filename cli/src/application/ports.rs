//! Port trait definitions for the application layer.
//!
//! Ports are the contracts infrastructure must fulfill. This file imports
//! only from `crate::domain` and `roost_common`, never from `crate::infra`,
//! `crate::commands`, or `crate::output`.

use std::time::Duration;

use anyhow::Result;

use roost_common::{ProviderKind, ProvisioningRecord, RecordPatch};

use crate::application::events::ProgressEvent;
use crate::domain::StepError;

// ── Value types ───────────────────────────────────────────────────────────────

/// Result of one remote command. Ephemeral; never persisted.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Combined stdout/stderr text.
    pub output: String,
    pub exit_code: i32,
}

impl ExecOutput {
    /// Exit code 0 means success, regardless of output text.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Transport variant behind a [`RemoteExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// One network call per command; subject to transient gateway errors,
    /// retried by the step runner.
    Rpc,
    /// Long-lived authenticated channel governed by keep-alives; never
    /// retried by the step runner.
    Persistent,
}

/// Stable handle to a compute resource on one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandle {
    pub id: String,
    pub name: String,
    /// Reachable network address, present once the resource is ready.
    pub addr: Option<String>,
}

// ── Remote execution port ─────────────────────────────────────────────────────

/// Runs one command on one compute resource over a provider-specific
/// transport. Fails only on transport failure; never interprets command
/// semantics.
#[allow(async_fn_in_trait)]
pub trait RemoteExecutor {
    /// Run a command with the transport's default timeout.
    async fn execute(&self, command: &str) -> Result<ExecOutput>;

    /// Run a command with an explicit timeout, for known-long operations.
    async fn execute_with_timeout(&self, command: &str, timeout: Duration) -> Result<ExecOutput>;

    fn transport(&self) -> Transport;
}

// ── Compute provider port ─────────────────────────────────────────────────────

/// Backend lifecycle contract: create/describe/list/delete plus an executor
/// factory for the backend's transport.
#[allow(async_fn_in_trait)]
pub trait ComputeProvider {
    type Exec: RemoteExecutor;

    /// Create a resource. Billing-restricted rejections must surface as
    /// [`StepError::BillingRestricted`]; client-side timeouts as
    /// [`StepError::Transport`] so the caller can run race recovery.
    async fn create_server(&self, name: &str) -> Result<ServerHandle, StepError>;

    /// Describe a resource by id, `None` when it no longer exists.
    async fn describe_server(&self, id: &str) -> Result<Option<ServerHandle>>;

    /// Find a resource by name via a listing call (race recovery after a
    /// create that timed out client-side but may have completed).
    async fn find_server(&self, name: &str) -> Result<Option<ServerHandle>>;

    async fn delete_server(&self, id: &str) -> Result<()>;

    /// Build an executor for a ready resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle has no reachable address yet.
    async fn connect(&self, handle: &ServerHandle) -> Result<Self::Exec>;

    fn kind(&self) -> ProviderKind;
}

// ── Repository host port ──────────────────────────────────────────────────────

/// Repository host contract, keyed by repository name.
#[allow(async_fn_in_trait)]
pub trait RepoHost {
    /// Create the repository; returns its clone URL.
    async fn create_repo(&self, name: &str) -> Result<String>;

    /// Re-verify existence upstream. Never assume a recorded repository
    /// still exists.
    async fn repo_exists(&self, name: &str) -> Result<bool>;

    /// Register a deploy credential. Registering a key that is already in
    /// use must succeed.
    async fn register_deploy_key(&self, repo: &str, title: &str, public_key: &str) -> Result<()>;

    /// Write a file into the repository's default branch.
    async fn write_file(&self, repo: &str, path: &str, content: &str, message: &str) -> Result<()>;

    /// SSH clone URL for a repository name.
    fn clone_url(&self, name: &str) -> String;
}

// ── Record store port ─────────────────────────────────────────────────────────

/// Persisted-record contract: partial-field read/update keyed by host id,
/// safe to call repeatedly with identical values.
#[allow(async_fn_in_trait)]
pub trait RecordStore {
    async fn load(&self, id: &str) -> Result<Option<ProvisioningRecord>>;

    async fn upsert(&self, record: &ProvisioningRecord) -> Result<()>;

    /// Apply a partial update and return the record after the patch.
    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<ProvisioningRecord>;

    async fn delete(&self, id: &str) -> Result<()>;
}

// ── Progress port ─────────────────────────────────────────────────────────────

/// Observer for the progress stream. Sync trait, no async needed.
pub trait ProgressSink {
    fn emit(&self, event: ProgressEvent);
}
