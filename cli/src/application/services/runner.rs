//! Command-step runner: bounded retry with backoff over a [`RemoteExecutor`].
//!
//! The unit every higher-level step is built from. Ordinary command failure
//! (nonzero exit) is returned as `success = false`, never as an error;
//! callers branch on the flag. Only transport exhaustion raises
//! [`StepError::Transport`].

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::application::events::{ProgressEvent, truncate_output};
use crate::application::ports::{ProgressSink, RemoteExecutor, Transport};
use crate::domain::StepError;

/// Extra attempts after the first, RPC transport only.
pub const STEP_RETRIES: u32 = 2;

/// Backoff before retry n is `BACKOFF_BASE * 2^(n-1)`: 2s, 4s, ...
const BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Outcome of one step command.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub output: String,
    pub success: bool,
}

/// Wraps an executor with retry, backoff, cancellation and progress emission.
pub struct StepRunner<'a, E: RemoteExecutor, S: ProgressSink> {
    exec: &'a E,
    sink: &'a S,
    cancel: CancellationToken,
}

impl<'a, E: RemoteExecutor, S: ProgressSink> StepRunner<'a, E, S> {
    pub fn new(exec: &'a E, sink: &'a S, cancel: CancellationToken) -> Self {
        Self { exec, sink, cancel }
    }

    /// The wrapped executor, for callers that need raw access (readiness
    /// probing, where transport errors are expected and must not burn the
    /// retry budget).
    pub fn executor(&self) -> &'a E {
        self.exec
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one command with the transport's default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Transport`] when every attempt failed at the
    /// transport level, or [`StepError::Cancelled`].
    pub async fn run(&self, step: &str, command: &str) -> Result<StepResult, StepError> {
        self.run_inner(step, command, None).await
    }

    /// Run one command with an explicit timeout for known-long operations.
    ///
    /// # Errors
    ///
    /// Same as [`StepRunner::run`].
    pub async fn run_with_timeout(
        &self,
        step: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<StepResult, StepError> {
        self.run_inner(step, command, Some(timeout)).await
    }

    async fn run_inner(
        &self,
        step: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<StepResult, StepError> {
        let attempts = match self.exec.transport() {
            Transport::Rpc => STEP_RETRIES + 1,
            Transport::Persistent => 1,
        };

        let mut last_err = String::new();
        for attempt in 0..attempts {
            if self.cancel.is_cancelled() {
                return Err(StepError::Cancelled);
            }
            if attempt > 0 {
                tokio::time::sleep(BACKOFF_BASE * 2_u32.pow(attempt - 1)).await;
            }

            let result = match timeout {
                Some(t) => self.exec.execute_with_timeout(command, t).await,
                None => self.exec.execute(command).await,
            };
            match result {
                Ok(out) => {
                    let success = out.success();
                    self.sink.emit(ProgressEvent::new(
                        step,
                        &truncate_output(&out.output),
                        success,
                    ));
                    return Ok(StepResult {
                        output: out.output,
                        success,
                    });
                }
                Err(e) => last_err = format!("{e:#}"),
            }
        }

        self.sink
            .emit(ProgressEvent::new(step, &truncate_output(&last_err), false));
        Err(StepError::Transport(last_err))
    }
}
