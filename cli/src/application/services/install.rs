//! Background runtime install with sentinel polling.
//!
//! Installing the runtime's dependency tree can exceed any single request's
//! timeout window, so the install runs as a detached script that survives the
//! bounded command that launched it, and completion is observed through a
//! sentinel appended to its log.

use std::time::Duration;

use regex::Regex;

use roost_common::RuntimeConfig;

use crate::application::events::{ProgressEvent, truncate_output};
use crate::application::ports::{ProgressSink, RemoteExecutor};
use crate::application::services::runner::StepRunner;
use crate::domain::StepError;
use crate::domain::host::{INSTALL_LOG, INSTALL_SCRIPT, INSTALL_SENTINEL};

const POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Primary polling window: 30 minutes.
const POLL_ATTEMPTS: u32 = 180;
/// Extension granted when the installer is still alive at the cap: 15 minutes.
const EXTENSION_ATTEMPTS: u32 = 90;

const STEP: &str = "runtime-install";

/// Install the agent runtime and return its version string.
///
/// Launches a self-contained install script detached, polls the log for the
/// completion sentinel, extends the wait once if the installer process is
/// still alive at the cap, then verifies the installed binary actually
/// resolves on disk rather than trusting the sentinel alone.
///
/// # Errors
///
/// [`StepError::InstallTimeout`] when every window elapses with no sentinel
/// and no live installer; [`StepError::Verification`] when the sentinel
/// appeared but the binary is missing.
pub async fn install_runtime<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    sink: &S,
    sudo: &str,
    runtime: &RuntimeConfig,
) -> Result<String, StepError> {
    write_install_script(runner, sudo, &runtime.package).await?;

    let launch = format!("nohup {INSTALL_SCRIPT} >/dev/null 2>&1 & disown; echo launched");
    let launched = runner.run(STEP, &launch).await?;
    if !launched.success {
        return Err(StepError::Other(anyhow::anyhow!(
            "failed to launch install script: {}",
            truncate_output(&launched.output)
        )));
    }

    wait_for_sentinel(runner, sink).await?;
    verify_artifact(runner, sink, &runtime.binary).await
}

async fn write_install_script<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    sudo: &str,
    package: &str,
) -> Result<(), StepError> {
    // All output is redirected to the log; the sentinel is appended only on
    // a clean install exit.
    let script = format!(
        "#!/usr/bin/env bash\n\
         {{\n\
         {sudo}npm install -g {package}\n\
         status=$?\n\
         if [ \"$status\" -eq 0 ]; then echo '{INSTALL_SENTINEL}'; fi\n\
         exit \"$status\"\n\
         }} >> {INSTALL_LOG} 2>&1\n"
    );
    let command = format!(
        "cat > {INSTALL_SCRIPT} <<'ROOST_EOF'\n{script}ROOST_EOF\n\
         chmod +x {INSTALL_SCRIPT} && : > {INSTALL_LOG}"
    );
    let result = runner.run(STEP, &command).await?;
    if !result.success {
        return Err(StepError::Other(anyhow::anyhow!(
            "failed to write install script: {}",
            truncate_output(&result.output)
        )));
    }
    Ok(())
}

async fn wait_for_sentinel<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    sink: &S,
) -> Result<(), StepError> {
    let poll = format!("grep -q '{INSTALL_SENTINEL}' {INSTALL_LOG} 2>/dev/null && echo found; true");
    let mut budget = POLL_ATTEMPTS;
    let mut extended = false;

    loop {
        for _ in 0..budget {
            if runner.cancel_token().is_cancelled() {
                return Err(StepError::Cancelled);
            }
            let result = runner.run(STEP, &poll).await?;
            if result.output.contains("found") {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        // Window exhausted: a still-running installer earns one second
        // window instead of a failure.
        if !extended && installer_alive(runner).await? {
            sink.emit(ProgressEvent::new(
                STEP,
                "install still running at the polling cap; extending the wait",
                true,
            ));
            budget = EXTENSION_ATTEMPTS;
            extended = true;
            continue;
        }

        sink.emit(ProgressEvent::new(
            STEP,
            "install produced no sentinel and the installer is gone",
            false,
        ));
        return Err(StepError::InstallTimeout);
    }
}

async fn installer_alive<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
) -> Result<bool, StepError> {
    let check = format!("pgrep -f {INSTALL_SCRIPT} >/dev/null && echo alive; true");
    let result = runner.run(STEP, &check).await?;
    Ok(result.output.contains("alive"))
}

/// Do not trust the sentinel alone: confirm the binary resolves on disk and
/// extract its version string for configuration templating.
pub async fn verify_artifact<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    sink: &S,
    binary: &str,
) -> Result<String, StepError> {
    let resolve = runner
        .run(STEP, &format!("command -v {binary} 2>/dev/null"))
        .await?;
    if !resolve.success || resolve.output.trim().is_empty() {
        return Err(StepError::Verification(format!(
            "install reported success but '{binary}' is not on PATH"
        )));
    }

    let version_out = runner
        .run(STEP, &format!("{binary} --version 2>/dev/null | head -n 1"))
        .await?;
    let version = extract_version(&version_out.output);
    sink.emit(ProgressEvent::new(
        STEP,
        &format!("runtime installed ({version})"),
        true,
    ));
    Ok(version)
}

fn extract_version(output: &str) -> String {
    #[allow(clippy::unwrap_used)] // compile-time constant pattern
    let re = Regex::new(r"\d+\.\d+\.\S+").unwrap();
    re.find(output).map_or_else(
        || output.trim().to_owned(),
        |m| m.as_str().to_owned(),
    )
}
