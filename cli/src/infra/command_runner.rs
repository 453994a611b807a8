//! Local process execution with guaranteed timeout and kill.
//!
//! `tokio::time::timeout` around `.output().await` does not kill the child
//! when the timeout fires on every platform; the future is dropped but the
//! OS process keeps running. The select with an explicit `child.kill()`
//! guarantees termination.

use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;

/// Run a local program to completion, killing it when `timeout` elapses.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or times out.
pub async fn run_with_timeout(program: &str, args: &[&str], timeout: Duration) -> Result<Output> {
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    let mut stdout_handle = child.stdout.take();
    let mut stderr_handle = child.stderr.take();

    tokio::select! {
        result = async {
            let (status, stdout, stderr) = tokio::join!(
                child.wait(),
                async {
                    let mut buf = Vec::new();
                    if let Some(ref mut h) = stdout_handle {
                        let _ = h.read_to_end(&mut buf).await;
                    }
                    buf
                },
                async {
                    let mut buf = Vec::new();
                    if let Some(ref mut h) = stderr_handle {
                        let _ = h.read_to_end(&mut buf).await;
                    }
                    buf
                },
            );
            Ok(Output {
                status: status.with_context(|| format!("waiting for {program}"))?,
                stdout,
                stderr,
            })
        } => result,
        () = tokio::time::sleep(timeout) => {
            let _ = child.kill().await;
            anyhow::bail!("{program} timed out after {}s", timeout.as_secs())
        }
    }
}
