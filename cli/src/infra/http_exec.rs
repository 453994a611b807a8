//! RPC exec transport for the hosted sandbox backend.
//!
//! Each command is one authenticated POST; transient gateway statuses are
//! reported as transport errors so the step runner's retry policy applies.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::application::ports::{ExecOutput, RemoteExecutor, Transport};

/// Default per-command timeout; the request timeout adds headroom on top so
/// the server-side bound fires first.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const REQUEST_HEADROOM: Duration = Duration::from_secs(15);

#[derive(Serialize)]
struct ExecRequest<'a> {
    command: &'a str,
    timeout_secs: u64,
}

#[derive(Deserialize)]
struct ExecResponse {
    output: String,
    exit_code: i32,
}

pub struct SandboxExecutor {
    client: reqwest::Client,
    base_url: String,
    token: String,
    sandbox_id: String,
}

impl SandboxExecutor {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, token: &str, sandbox_id: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
            sandbox_id: sandbox_id.to_owned(),
        }
    }

    fn exec_url(&self) -> String {
        format!("{}/v1/sandboxes/{}/exec", self.base_url, self.sandbox_id)
    }
}

impl RemoteExecutor for SandboxExecutor {
    async fn execute(&self, command: &str) -> Result<ExecOutput> {
        self.execute_with_timeout(command, DEFAULT_TIMEOUT).await
    }

    async fn execute_with_timeout(&self, command: &str, timeout: Duration) -> Result<ExecOutput> {
        let body = ExecRequest {
            command,
            timeout_secs: timeout.as_secs(),
        };
        let resp = self
            .client
            .post(self.exec_url())
            .bearer_auth(&self.token)
            .timeout(timeout + REQUEST_HEADROOM)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("exec request to sandbox {}", self.sandbox_id))?;

        let status = resp.status();
        if matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ) {
            anyhow::bail!("sandbox gateway unavailable ({status})");
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("sandbox exec failed: {status} {text}");
        }

        let parsed: ExecResponse = resp.json().await.context("decode exec response")?;
        Ok(ExecOutput {
            output: parsed.output,
            exit_code: parsed.exit_code,
        })
    }

    fn transport(&self) -> Transport {
        Transport::Rpc
    }
}
