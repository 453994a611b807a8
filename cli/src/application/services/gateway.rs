//! Gateway start and liveness verification.
//!
//! Liveness is process-present AND port-listening: process presence is
//! observed to precede actual readiness, so either check alone is not enough.

use std::time::Duration;

use crate::application::events::{ProgressEvent, truncate_output};
use crate::application::ports::{ProgressSink, RemoteExecutor};
use crate::application::services::runner::StepRunner;
use crate::domain::StepError;
use crate::domain::host::{CONTROL_PORT, GATEWAY_LOG, RUNTIME_CONFIG_PATH};

const VERIFY_ATTEMPTS: u32 = 5;
const VERIFY_INTERVAL: Duration = Duration::from_secs(5);
/// Grace delay after clearing a previous instance so the port is released.
const PORT_RELEASE_GRACE: Duration = Duration::from_secs(2);

const STEP: &str = "gateway";

/// Clear any previous gateway instance and start a fresh one detached, then
/// verify liveness.
///
/// # Errors
///
/// [`StepError::Verification`] carrying the log tail when the gateway never
/// becomes ready.
pub async fn restart_gateway<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    sink: &S,
    binary: &str,
) -> Result<(), StepError> {
    // At most one live instance: replace, never duplicate.
    let stop = format!("pkill -f '{binary} gateway' 2>/dev/null; true");
    let _ = runner.run(STEP, &stop).await?;
    tokio::time::sleep(PORT_RELEASE_GRACE).await;

    let start = format!(
        "nohup {binary} gateway --config {RUNTIME_CONFIG_PATH} --port {CONTROL_PORT} \
         >> {GATEWAY_LOG} 2>&1 & disown; echo launched"
    );
    let launched = runner.run(STEP, &start).await?;
    if !launched.success {
        return Err(StepError::Other(anyhow::anyhow!(
            "failed to launch gateway: {}",
            truncate_output(&launched.output)
        )));
    }

    for attempt in 1..=VERIFY_ATTEMPTS {
        if runner.cancel_token().is_cancelled() {
            return Err(StepError::Cancelled);
        }
        tokio::time::sleep(VERIFY_INTERVAL).await;
        if is_gateway_ready(runner, binary).await? {
            sink.emit(ProgressEvent::new(
                STEP,
                &format!("gateway live on port {CONTROL_PORT} (attempt {attempt})"),
                true,
            ));
            return Ok(());
        }
    }

    let tail = runner
        .run(STEP, &format!("tail -n 40 {GATEWAY_LOG} 2>/dev/null; true"))
        .await?;
    Err(StepError::Verification(format!(
        "gateway did not become ready; log tail:\n{}",
        tail.output.trim()
    )))
}

/// One-shot liveness check: both process presence and port listening.
///
/// # Errors
///
/// Propagates transport failure from either probe.
pub async fn is_gateway_ready<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    binary: &str,
) -> Result<bool, StepError> {
    let process = runner
        .run(
            STEP,
            &format!("pgrep -f '{binary} gateway' >/dev/null && echo present; true"),
        )
        .await?;
    if !process.output.contains("present") {
        return Ok(false);
    }

    let port = runner
        .run(
            STEP,
            &format!("ss -ltn 2>/dev/null | grep -q ':{CONTROL_PORT} ' && echo listening; true"),
        )
        .await?;
    Ok(port.output.contains("listening"))
}
