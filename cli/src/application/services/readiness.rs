//! VM-readiness wait.
//!
//! Freshly created resources may reject all commands for tens of seconds
//! after creation, so before any setup step a trivial echo is polled until
//! the host answers.

use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::application::events::ProgressEvent;
use crate::application::ports::{ProgressSink, RemoteExecutor};
use crate::application::services::runner::StepRunner;
use crate::domain::StepError;

const READY_ATTEMPTS: u32 = 15;
const READY_INTERVAL: Duration = Duration::from_secs(4);

/// Poll an echo until the host executes commands.
///
/// Uses the raw executor rather than the retrying runner: transport errors
/// are the expected answer from a booting host and must not burn the retry
/// budget or emit a failure event per probe.
///
/// # Errors
///
/// Returns [`StepError::Verification`] if the host never answers, or
/// [`StepError::Cancelled`].
pub async fn wait_until_reachable<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    sink: &S,
) -> Result<(), StepError> {
    let nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let command = format!("echo roost-{nonce}");

    for attempt in 1..=READY_ATTEMPTS {
        if runner.cancel_token().is_cancelled() {
            return Err(StepError::Cancelled);
        }
        if let Ok(out) = runner.executor().execute(&command).await
            && out.success()
        {
            sink.emit(ProgressEvent::new(
                "readiness",
                &format!("host reachable after {attempt} probe(s)"),
                true,
            ));
            return Ok(());
        }
        if attempt < READY_ATTEMPTS {
            tokio::time::sleep(READY_INTERVAL).await;
        }
    }

    sink.emit(ProgressEvent::new(
        "readiness",
        "host never accepted commands",
        false,
    ));
    Err(StepError::Verification(
        "host never accepted commands after creation".to_owned(),
    ))
}
