//! Hetzner Cloud server backend.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use roost_common::{HetznerConfig, ProviderKind};

use crate::application::ports::{ComputeProvider, ServerHandle};
use crate::domain::StepError;
use crate::infra::ssh_exec::SshExecutor;

const DEFAULT_API_BASE: &str = "https://api.hetzner.cloud/v1";
const IMAGE: &str = "ubuntu-24.04";

/// Error codes meaning the account's plan, not the request, blocked the
/// create.
const BILLING_CODES: &[&str] = &["resource_limit_exceeded", "payment_required"];

#[derive(Serialize)]
struct CreateServerRequest<'a> {
    name: &'a str,
    server_type: &'a str,
    image: &'a str,
    location: &'a str,
    ssh_keys: &'a [String],
    start_after_create: bool,
}

#[derive(Deserialize)]
struct Server {
    id: u64,
    name: String,
    #[serde(default)]
    public_net: PublicNet,
}

#[derive(Deserialize, Default)]
struct PublicNet {
    ipv4: Option<Ipv4>,
}

#[derive(Deserialize)]
struct Ipv4 {
    ip: String,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: Server,
}

#[derive(Deserialize)]
struct ServerListEnvelope {
    servers: Vec<Server>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    code: String,
    message: String,
}

fn billing_code(body: &str) -> bool {
    serde_json::from_str::<ApiErrorEnvelope>(body)
        .is_ok_and(|e| BILLING_CODES.contains(&e.error.code.as_str()))
}

fn handle_from(server: &Server) -> ServerHandle {
    ServerHandle {
        id: server.id.to_string(),
        name: server.name.clone(),
        addr: server.public_net.ipv4.as_ref().map(|v| v.ip.clone()),
    }
}

pub struct HetznerProvider {
    client: reqwest::Client,
    config: HetznerConfig,
    api_base: String,
}

impl HetznerProvider {
    #[must_use]
    pub fn new(client: reqwest::Client, config: HetznerConfig) -> Self {
        Self {
            client,
            config,
            api_base: DEFAULT_API_BASE.to_owned(),
        }
    }
}

impl ComputeProvider for HetznerProvider {
    type Exec = SshExecutor;

    async fn create_server(&self, name: &str) -> Result<ServerHandle, StepError> {
        let body = CreateServerRequest {
            name,
            server_type: &self.config.server_type,
            image: IMAGE,
            location: &self.config.location,
            ssh_keys: &self.config.ssh_keys,
            start_after_create: true,
        };
        let resp = self
            .client
            .post(format!("{}/servers", self.api_base))
            .bearer_auth(&self.config.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| StepError::Transport(format!("server create request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            if billing_code(&text) {
                return Err(StepError::BillingRestricted {
                    class: self.config.server_type.clone(),
                });
            }
            let detail = serde_json::from_str::<ApiErrorEnvelope>(&text)
                .map_or(text.clone(), |e| e.error.message);
            return Err(StepError::Other(anyhow::anyhow!(
                "server create rejected: {status} {detail}"
            )));
        }

        let envelope: ServerEnvelope = resp
            .json()
            .await
            .map_err(|e| StepError::Transport(format!("decode server create response: {e}")))?;
        Ok(handle_from(&envelope.server))
    }

    async fn describe_server(&self, id: &str) -> Result<Option<ServerHandle>> {
        let resp = self
            .client
            .get(format!("{}/servers/{id}", self.api_base))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .with_context(|| format!("describe server {id}"))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("describe server {id} failed: {status} {text}");
        }
        let envelope: ServerEnvelope = resp.json().await.context("decode server")?;
        Ok(Some(handle_from(&envelope.server)))
    }

    async fn find_server(&self, name: &str) -> Result<Option<ServerHandle>> {
        let resp = self
            .client
            .get(format!("{}/servers?name={name}", self.api_base))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .context("list servers")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("list servers failed: {status} {text}");
        }
        let envelope: ServerListEnvelope = resp.json().await.context("decode server list")?;
        Ok(envelope.servers.first().map(handle_from))
    }

    async fn delete_server(&self, id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{}/servers/{id}", self.api_base))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .with_context(|| format!("delete server {id}"))?;
        let status = resp.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("delete server {id} failed: {status} {text}")
    }

    async fn connect(&self, handle: &ServerHandle) -> Result<Self::Exec> {
        let addr = handle
            .addr
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("server {} has no public address yet", handle.id))?;
        Ok(SshExecutor::new(addr))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Hetzner
    }
}
