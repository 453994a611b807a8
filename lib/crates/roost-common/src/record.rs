//! The persisted provisioning record and its partial-update patch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Compute backend hosting the agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    DigitalOcean,
    Hetzner,
    Sandbox,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DigitalOcean => write!(f, "digitalocean"),
            Self::Hetzner => write!(f, "hetzner"),
            Self::Sandbox => write!(f, "sandbox"),
        }
    }
}

/// Lifecycle status of a managed host.
///
/// `Ready`, `Failed` and `RequiresPayment` are terminal; a run must never
/// leave a record in one of the in-progress states after an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    #[default]
    Pending,
    Provisioning,
    CreatingRepo,
    ConfiguringVm,
    Ready,
    Failed,
    RequiresPayment,
}

impl HostStatus {
    /// Whether this status ends a provisioning run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::RequiresPayment)
    }
}

/// Per-step completion flags.
///
/// Flags are monotonic within a run: once a flag is true it is only cleared
/// by an explicit [`ProvisioningRecord::reset`] when the host is torn down.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StepFlags {
    pub resource_created: bool,
    pub repository_ready: bool,
    pub repository_cloned: bool,
    pub sync_configured: bool,
    pub runtime_installed: bool,
    pub channel_configured: bool,
    pub gateway_started: bool,
}

/// One persisted record per managed host. Mutated exclusively by the
/// orchestrator through [`RecordPatch`], one field-set per completed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    pub id: String,
    pub owner: String,
    pub provider: ProviderKind,
    pub status: HostStatus,
    #[serde(default)]
    pub steps: StepFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    /// Resource class the backend refused for plan reasons; set together
    /// with [`HostStatus::RequiresPayment`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Advisory run-in-progress marker checked before starting a run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProvisioningRecord {
    /// Create a fresh record in `Pending` state.
    #[must_use]
    pub fn new(id: &str, owner: &str, provider: ProviderKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_owned(),
            owner: owner.to_owned(),
            provider,
            status: HostStatus::Pending,
            steps: StepFlags::default(),
            server_id: None,
            server_addr: None,
            repo_name: None,
            repo_url: None,
            runtime_version: None,
            required_class: None,
            error_message: None,
            run_started_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Explicit teardown/reset: the only operation allowed to clear step
    /// flags and handles. Repository fields survive so a recreated host can
    /// reuse the knowledge repository if it still exists upstream.
    pub fn reset(&mut self) {
        self.status = HostStatus::Pending;
        self.steps = StepFlags::default();
        self.server_id = None;
        self.server_addr = None;
        self.runtime_version = None;
        self.required_class = None;
        self.error_message = None;
        self.run_started_at = None;
        self.updated_at = Utc::now();
    }
}

/// Flag updates a patch may apply. Only `true` values are representable, so
/// a patch can never silently reset a completed step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepFlagPatch {
    pub resource_created: bool,
    pub repository_ready: bool,
    pub repository_cloned: bool,
    pub sync_configured: bool,
    pub runtime_installed: bool,
    pub channel_configured: bool,
    pub gateway_started: bool,
}

/// Partial-field update for [`ProvisioningRecord`], safe to apply repeatedly
/// with identical values.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub status: Option<HostStatus>,
    pub steps: StepFlagPatch,
    pub server_id: Option<String>,
    pub server_addr: Option<String>,
    pub repo_name: Option<String>,
    pub repo_url: Option<String>,
    pub runtime_version: Option<String>,
    pub required_class: Option<String>,
    /// `Some(None)` clears the error, `Some(Some(m))` stores it.
    pub error_message: Option<Option<String>>,
    /// `Some(None)` clears the run marker.
    pub run_started_at: Option<Option<DateTime<Utc>>>,
}

impl RecordPatch {
    #[must_use]
    pub fn status(status: HostStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply this patch to a record, bumping `updated_at`.
    pub fn apply(&self, record: &mut ProvisioningRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        let s = &mut record.steps;
        s.resource_created |= self.steps.resource_created;
        s.repository_ready |= self.steps.repository_ready;
        s.repository_cloned |= self.steps.repository_cloned;
        s.sync_configured |= self.steps.sync_configured;
        s.runtime_installed |= self.steps.runtime_installed;
        s.channel_configured |= self.steps.channel_configured;
        s.gateway_started |= self.steps.gateway_started;
        if let Some(v) = &self.server_id {
            record.server_id = Some(v.clone());
        }
        if let Some(v) = &self.server_addr {
            record.server_addr = Some(v.clone());
        }
        if let Some(v) = &self.repo_name {
            record.repo_name = Some(v.clone());
        }
        if let Some(v) = &self.repo_url {
            record.repo_url = Some(v.clone());
        }
        if let Some(v) = &self.runtime_version {
            record.runtime_version = Some(v.clone());
        }
        if let Some(v) = &self.required_class {
            record.required_class = Some(v.clone());
        }
        if let Some(v) = &self.error_message {
            record.error_message = v.clone();
        }
        if let Some(v) = self.run_started_at {
            record.run_started_at = v;
        }
        record.updated_at = Utc::now();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn patch_sets_flags_but_never_clears_them() {
        let mut record = ProvisioningRecord::new("h1", "alice", ProviderKind::Hetzner);
        let patch = RecordPatch {
            steps: StepFlagPatch {
                resource_created: true,
                ..StepFlagPatch::default()
            },
            server_id: Some("42".into()),
            ..RecordPatch::default()
        };
        patch.apply(&mut record);
        assert!(record.steps.resource_created);

        // A later patch with no flag set must not clear the earlier one.
        RecordPatch::status(HostStatus::ConfiguringVm).apply(&mut record);
        assert!(record.steps.resource_created);
        assert_eq!(record.server_id.as_deref(), Some("42"));
    }

    #[test]
    fn patch_is_idempotent() {
        let mut record = ProvisioningRecord::new("h1", "alice", ProviderKind::Sandbox);
        let patch = RecordPatch {
            status: Some(HostStatus::Ready),
            repo_name: Some("memory".into()),
            ..RecordPatch::default()
        };
        patch.apply(&mut record);
        let snapshot = (record.status, record.repo_name.clone());
        patch.apply(&mut record);
        assert_eq!(snapshot, (record.status, record.repo_name.clone()));
    }

    #[test]
    fn reset_clears_flags_but_keeps_repo() {
        let mut record = ProvisioningRecord::new("h1", "alice", ProviderKind::DigitalOcean);
        let patch = RecordPatch {
            status: Some(HostStatus::Ready),
            steps: StepFlagPatch {
                resource_created: true,
                repository_ready: true,
                ..StepFlagPatch::default()
            },
            server_id: Some("s-1".into()),
            repo_name: Some("memory".into()),
            ..RecordPatch::default()
        };
        patch.apply(&mut record);
        record.reset();
        assert_eq!(record.status, HostStatus::Pending);
        assert!(!record.steps.resource_created);
        assert!(record.server_id.is_none());
        assert_eq!(record.repo_name.as_deref(), Some("memory"));
    }

    #[test]
    fn status_round_trips_through_json() {
        let record = ProvisioningRecord::new("h1", "alice", ProviderKind::Hetzner);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"pending\""));
        let back: ProvisioningRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, HostStatus::Pending);
    }

    #[test]
    fn terminal_statuses() {
        assert!(HostStatus::Ready.is_terminal());
        assert!(HostStatus::Failed.is_terminal());
        assert!(HostStatus::RequiresPayment.is_terminal());
        assert!(!HostStatus::Provisioning.is_terminal());
    }
}
