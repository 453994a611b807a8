//! Lock-aware package installation.
//!
//! Freshly provisioned machines frequently run unattended background updates
//! holding the package-manager lock, so a naive single-attempt install fails
//! nondeterministically. The wait loop runs the *actual* update command each
//! attempt and remediates based on its output, then escalates to force
//! remediation when the loop exhausts.

use std::time::Duration;

use crate::application::events::{ProgressEvent, truncate_output};
use crate::application::ports::{ProgressSink, RemoteExecutor};
use crate::application::services::runner::StepRunner;
use crate::domain::StepError;

const LOCK_WAIT_ATTEMPTS: u32 = 30;
const LOCK_WAIT_INTERVAL: Duration = Duration::from_secs(10);
const REPAIR_DELAY: Duration = Duration::from_secs(3);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Output markers meaning another process holds the package-manager lock.
const LOCK_MARKERS: &[&str] = &[
    "Could not get lock",
    "Unable to acquire the dpkg frontend lock",
    "is another process using it",
];

/// Output marker meaning a previous dpkg run was interrupted.
const INTERRUPTED_MARKER: &str = "dpkg was interrupted";

fn has_lock_marker(output: &str) -> bool {
    LOCK_MARKERS.iter().any(|m| output.contains(m))
}

/// Identity probe: decide whether subsequent commands need a sudo prefix.
///
/// # Errors
///
/// Propagates transport failure from the probe.
pub async fn sudo_prefix<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
) -> Result<&'static str, StepError> {
    let result = runner.run("package-install", "id -u").await?;
    if result.success && result.output.trim() == "0" {
        Ok("")
    } else {
        Ok("sudo ")
    }
}

/// Run the package index update, waiting out lock contention.
///
/// Each attempt runs the real `apt-get update`; a clean exit with no markers
/// already satisfies the need for an update. Interrupted-package markers get
/// a repair command; lock markers get a delay. Exhaustion falls through to
/// [`force_unlock`], which must leave a working package manager behind.
///
/// # Errors
///
/// Returns [`StepError::Other`] for a hard update failure with no known
/// marker, or propagates transport/cancellation errors.
pub async fn wait_for_package_manager<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    sink: &S,
    sudo: &str,
) -> Result<(), StepError> {
    let update = format!("{sudo}env DEBIAN_FRONTEND=noninteractive apt-get update 2>&1");
    let repair = format!("{sudo}dpkg --configure -a 2>&1");

    for attempt in 1..=LOCK_WAIT_ATTEMPTS {
        if runner.cancel_token().is_cancelled() {
            return Err(StepError::Cancelled);
        }

        let result = runner.run("package-install", &update).await?;
        if result.success && !has_lock_marker(&result.output) {
            return Ok(());
        }

        if result.output.contains(INTERRUPTED_MARKER) {
            sink.emit(ProgressEvent::new(
                "package-install",
                "dpkg was interrupted; repairing",
                true,
            ));
            let _ = runner.run("package-install", &repair).await?;
            tokio::time::sleep(REPAIR_DELAY).await;
            continue;
        }

        if has_lock_marker(&result.output) {
            if attempt < LOCK_WAIT_ATTEMPTS {
                tokio::time::sleep(LOCK_WAIT_INTERVAL).await;
            }
            continue;
        }

        // Nonzero exit without any known marker is a real update failure.
        return Err(StepError::Other(anyhow::anyhow!(
            "apt-get update failed: {}",
            truncate_output(&result.output)
        )));
    }

    force_unlock(runner, sink, sudo).await
}

/// Force remediation: terminate known blocking processes, remove lock files,
/// repair, then confirm the package manager actually works.
async fn force_unlock<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    sink: &S,
    sudo: &str,
) -> Result<(), StepError> {
    sink.emit(ProgressEvent::new(
        "package-install",
        "lock never released; force-removing blockers",
        true,
    ));
    let command = format!(
        "{sudo}pkill -9 -f unattended-upgrade 2>/dev/null; \
         {sudo}pkill -9 apt-get 2>/dev/null; \
         {sudo}pkill -9 dpkg 2>/dev/null; \
         {sudo}rm -f /var/lib/dpkg/lock /var/lib/dpkg/lock-frontend \
         /var/lib/apt/lists/lock /var/cache/apt/archives/lock; \
         {sudo}dpkg --configure -a 2>&1; true"
    );
    let _ = runner.run("package-install", &command).await?;

    let update = format!("{sudo}env DEBIAN_FRONTEND=noninteractive apt-get update 2>&1");
    let result = runner.run("package-install", &update).await?;
    if result.success && !has_lock_marker(&result.output) {
        return Ok(());
    }
    Err(StepError::LockContention)
}

/// Install the base dependency set after the lock wait has cleared.
///
/// # Errors
///
/// Returns [`StepError::Other`] when the install command fails.
pub async fn install_packages<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    sudo: &str,
    packages: &[&str],
) -> Result<(), StepError> {
    let command = format!(
        "{sudo}env DEBIAN_FRONTEND=noninteractive apt-get install -y {} 2>&1",
        packages.join(" ")
    );
    let result = runner
        .run_with_timeout("package-install", &command, INSTALL_TIMEOUT)
        .await?;
    if !result.success {
        return Err(StepError::Other(anyhow::anyhow!(
            "apt-get install failed: {}",
            truncate_output(&result.output)
        )));
    }
    Ok(())
}
