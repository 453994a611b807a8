//! Typed step-failure taxonomy.
//!
//! Every pipeline step resolves to either a [`crate::application::services::runner::StepResult`]
//! (ordinary command success/failure, branched on by the caller) or a
//! `StepError` that aborts the run. The orchestrator maps each variant to a
//! terminal record status, so a run is never left in progress after an error.

use thiserror::Error;

/// Pipeline-fatal failure kinds.
#[derive(Debug, Error)]
pub enum StepError {
    /// Network/timeout failure of a single remote command after all retries.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The package manager lock was never released and force remediation
    /// also failed.
    #[error("package manager remained locked after all remediation attempts")]
    LockContention,

    /// The background install exceeded every polling window with no live
    /// installer process left to justify further waiting.
    #[error("runtime install timed out with no live installer process")]
    InstallTimeout,

    /// An operation reported success but the expected artifact or process
    /// is absent.
    #[error("verification failed: {0}")]
    Verification(String),

    /// The backend refused to create the requested resource class for plan
    /// or billing reasons. Terminal; never retried.
    #[error("provider refused resource class '{class}'; a plan change is required")]
    BillingRestricted { class: String },

    /// Another provisioning run holds the advisory run marker.
    #[error("a provisioning run for this host is already in progress (started {started_at})")]
    RunInProgress {
        started_at: chrono::DateTime<chrono::Utc>,
    },

    /// The caller cancelled the run.
    #[error("provisioning cancelled")]
    Cancelled,

    /// Any other step failure; the message is stored verbatim on the record.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
