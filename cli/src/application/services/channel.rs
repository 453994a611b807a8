//! Runtime configuration document and behavior file.
//!
//! The config document carries secrets, so it is shipped base64-encoded
//! through the exec channel (no quoting hazards, nothing readable in process
//! listings beyond the encoded blob) and written mode 600.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;

use roost_common::RoostConfig;

use crate::application::events::truncate_output;
use crate::application::ports::{ProgressSink, RemoteExecutor};
use crate::application::services::runner::StepRunner;
use crate::domain::StepError;
use crate::domain::host::{BEHAVIOR_PATH, CONTROL_PORT, RUNTIME_CONFIG_PATH, RUNTIME_DIR};

const CONTROL_TOKEN_LEN: usize = 32;

const STEP: &str = "runtime-config";

/// Default behavior document for a fresh host. Never overwrites an existing
/// one, which may carry operator edits.
const DEFAULT_BEHAVIOR: &str = "\
# Behavior\n\n\
You are an autonomous agent running on a dedicated host.\n\
Your persistent memory lives in the knowledge directory; commit and push\n\
anything worth keeping, the local clone is reset to upstream periodically.\n";

#[derive(Serialize)]
struct RuntimeConfigDoc<'a> {
    control_port: u16,
    control_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<ChannelDoc<'a>>,
}

#[derive(Serialize)]
struct ChannelDoc<'a> {
    bot_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_peer: Option<&'a str>,
}

/// Fresh token authenticating local calls to the gateway's control port.
#[must_use]
pub fn generate_control_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CONTROL_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Render and upload the runtime configuration document.
///
/// Written whether or not a channel is configured: the model key and control
/// token are needed either way.
///
/// # Errors
///
/// [`StepError::Other`] when serialization or the upload fails.
pub async fn configure_runtime<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    config: &RoostConfig,
    control_token: &str,
) -> Result<(), StepError> {
    let doc = RuntimeConfigDoc {
        control_port: CONTROL_PORT,
        control_token,
        model_key: config.model_key.as_deref(),
        channel: config.channel.as_ref().map(|c| ChannelDoc {
            bot_token: &c.bot_token,
            allowed_peer: c.allowed_peer.as_deref(),
        }),
    };
    let json = serde_json::to_string_pretty(&doc)
        .map_err(|e| StepError::Other(anyhow::anyhow!("failed to render runtime config: {e}")))?;
    let encoded = BASE64.encode(json.as_bytes());

    let command = format!(
        "mkdir -p {RUNTIME_DIR} && \
         echo '{encoded}' | base64 -d > {RUNTIME_CONFIG_PATH} && \
         chmod 600 {RUNTIME_CONFIG_PATH}"
    );
    let result = runner.run(STEP, &command).await?;
    if !result.success {
        return Err(StepError::Other(anyhow::anyhow!(
            "failed to write runtime config: {}",
            truncate_output(&result.output)
        )));
    }
    Ok(())
}

/// Write the default behavior document if none exists yet.
///
/// # Errors
///
/// [`StepError::Other`] when the write fails.
pub async fn ensure_behavior<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
) -> Result<(), StepError> {
    let encoded = BASE64.encode(DEFAULT_BEHAVIOR.as_bytes());
    let command = format!(
        "test -f {BEHAVIOR_PATH} || \
         {{ mkdir -p {RUNTIME_DIR} && echo '{encoded}' | base64 -d > {BEHAVIOR_PATH}; }}"
    );
    let result = runner.run(STEP, &command).await?;
    if !result.success {
        return Err(StepError::Other(anyhow::anyhow!(
            "failed to write behavior document: {}",
            truncate_output(&result.output)
        )));
    }
    Ok(())
}
