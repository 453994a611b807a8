//! Hosted sandbox backend with an RPC exec transport.
//!
//! Sandboxes have no SSH address; the handle's `addr` field carries the
//! sandbox id once the backend reports it running, which is the readiness
//! signal the orchestrator polls for.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use roost_common::{ProviderKind, SandboxConfig};

use crate::application::ports::{ComputeProvider, ServerHandle};
use crate::domain::StepError;
use crate::infra::http_exec::SandboxExecutor;

#[derive(Serialize)]
struct CreateSandboxRequest<'a> {
    name: &'a str,
    template: &'a str,
}

#[derive(Deserialize)]
struct Sandbox {
    id: String,
    name: String,
    status: String,
}

#[derive(Deserialize)]
struct SandboxListEnvelope {
    sandboxes: Vec<Sandbox>,
}

fn handle_from(sandbox: &Sandbox) -> ServerHandle {
    ServerHandle {
        id: sandbox.id.clone(),
        name: sandbox.name.clone(),
        addr: (sandbox.status == "running").then(|| sandbox.id.clone()),
    }
}

pub struct SandboxProvider {
    client: reqwest::Client,
    config: SandboxConfig,
}

impl SandboxProvider {
    #[must_use]
    pub fn new(client: reqwest::Client, config: SandboxConfig) -> Self {
        Self { client, config }
    }

    fn base(&self) -> String {
        format!("{}/v1/sandboxes", self.config.base_url.trim_end_matches('/'))
    }
}

impl ComputeProvider for SandboxProvider {
    type Exec = SandboxExecutor;

    async fn create_server(&self, name: &str) -> Result<ServerHandle, StepError> {
        let body = CreateSandboxRequest {
            name,
            template: &self.config.template,
        };
        let resp = self
            .client
            .post(self.base())
            .bearer_auth(&self.config.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| StepError::Transport(format!("sandbox create request: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            return Err(StepError::BillingRestricted {
                class: self.config.template.clone(),
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StepError::Other(anyhow::anyhow!(
                "sandbox create rejected: {status} {text}"
            )));
        }

        let sandbox: Sandbox = resp
            .json()
            .await
            .map_err(|e| StepError::Transport(format!("decode sandbox create response: {e}")))?;
        Ok(handle_from(&sandbox))
    }

    async fn describe_server(&self, id: &str) -> Result<Option<ServerHandle>> {
        let resp = self
            .client
            .get(format!("{}/{id}", self.base()))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .with_context(|| format!("describe sandbox {id}"))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("describe sandbox {id} failed: {status} {text}");
        }
        let sandbox: Sandbox = resp.json().await.context("decode sandbox")?;
        Ok(Some(handle_from(&sandbox)))
    }

    async fn find_server(&self, name: &str) -> Result<Option<ServerHandle>> {
        let resp = self
            .client
            .get(format!("{}?name={name}", self.base()))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .context("list sandboxes")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("list sandboxes failed: {status} {text}");
        }
        let envelope: SandboxListEnvelope = resp.json().await.context("decode sandbox list")?;
        Ok(envelope.sandboxes.first().map(handle_from))
    }

    async fn delete_server(&self, id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{}/{id}", self.base()))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .with_context(|| format!("delete sandbox {id}"))?;
        let status = resp.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("delete sandbox {id} failed: {status} {text}")
    }

    async fn connect(&self, handle: &ServerHandle) -> Result<Self::Exec> {
        if handle.addr.is_none() {
            anyhow::bail!("sandbox {} is not running yet", handle.id);
        }
        Ok(SandboxExecutor::new(
            self.client.clone(),
            &self.config.base_url,
            &self.config.token,
            &handle.id,
        ))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Sandbox
    }
}
