//! DigitalOcean droplet backend.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use roost_common::{DigitalOceanConfig, ProviderKind};

use crate::application::ports::{ComputeProvider, ServerHandle};
use crate::domain::StepError;
use crate::infra::ssh_exec::SshExecutor;

const DEFAULT_API_BASE: &str = "https://api.digitalocean.com/v2";
const IMAGE: &str = "ubuntu-24-04-x64";

#[derive(Serialize)]
struct CreateDropletRequest<'a> {
    name: &'a str,
    region: &'a str,
    size: &'a str,
    image: &'a str,
    ssh_keys: &'a [String],
    tags: Vec<&'a str>,
}

#[derive(Deserialize)]
struct Droplet {
    id: u64,
    name: String,
    #[serde(default)]
    networks: Networks,
}

#[derive(Deserialize, Default)]
struct Networks {
    #[serde(default)]
    v4: Vec<NetworkV4>,
}

#[derive(Deserialize)]
struct NetworkV4 {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Deserialize)]
struct DropletListEnvelope {
    droplets: Vec<Droplet>,
}

/// Whether a rejection body indicates a plan or billing restriction rather
/// than a malformed request.
fn is_billing_restricted(body: &str) -> bool {
    let lower = body.to_lowercase();
    ["payment", "billing", "verify your account", "droplet limit"]
        .iter()
        .any(|marker| lower.contains(marker))
}

fn handle_from(droplet: &Droplet) -> ServerHandle {
    let addr = droplet
        .networks
        .v4
        .iter()
        .find(|n| n.kind == "public")
        .map(|n| n.ip_address.clone());
    ServerHandle {
        id: droplet.id.to_string(),
        name: droplet.name.clone(),
        addr,
    }
}

pub struct DigitalOceanProvider {
    client: reqwest::Client,
    config: DigitalOceanConfig,
    api_base: String,
}

impl DigitalOceanProvider {
    #[must_use]
    pub fn new(client: reqwest::Client, config: DigitalOceanConfig) -> Self {
        Self {
            client,
            config,
            api_base: DEFAULT_API_BASE.to_owned(),
        }
    }
}

impl ComputeProvider for DigitalOceanProvider {
    type Exec = SshExecutor;

    async fn create_server(&self, name: &str) -> Result<ServerHandle, StepError> {
        let body = CreateDropletRequest {
            name,
            region: &self.config.region,
            size: &self.config.size,
            image: IMAGE,
            ssh_keys: &self.config.ssh_keys,
            tags: vec!["roost"],
        };
        let resp = self
            .client
            .post(format!("{}/droplets", self.api_base))
            .bearer_auth(&self.config.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| StepError::Transport(format!("droplet create request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            if is_billing_restricted(&text) {
                return Err(StepError::BillingRestricted {
                    class: self.config.size.clone(),
                });
            }
            return Err(StepError::Other(anyhow::anyhow!(
                "droplet create rejected: {status} {text}"
            )));
        }

        let envelope: DropletEnvelope = resp
            .json()
            .await
            .map_err(|e| StepError::Transport(format!("decode droplet create response: {e}")))?;
        Ok(handle_from(&envelope.droplet))
    }

    async fn describe_server(&self, id: &str) -> Result<Option<ServerHandle>> {
        let resp = self
            .client
            .get(format!("{}/droplets/{id}", self.api_base))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .with_context(|| format!("describe droplet {id}"))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("describe droplet {id} failed: {status} {text}");
        }
        let envelope: DropletEnvelope = resp.json().await.context("decode droplet")?;
        Ok(Some(handle_from(&envelope.droplet)))
    }

    async fn find_server(&self, name: &str) -> Result<Option<ServerHandle>> {
        // The list endpoint has no name filter; filter client-side on the
        // roost tag's listing.
        let resp = self
            .client
            .get(format!("{}/droplets?tag_name=roost&per_page=200", self.api_base))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .context("list droplets")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("list droplets failed: {status} {text}");
        }
        let envelope: DropletListEnvelope = resp.json().await.context("decode droplet list")?;
        Ok(envelope
            .droplets
            .iter()
            .find(|d| d.name == name)
            .map(handle_from))
    }

    async fn delete_server(&self, id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{}/droplets/{id}", self.api_base))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .with_context(|| format!("delete droplet {id}"))?;
        let status = resp.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("delete droplet {id} failed: {status} {text}")
    }

    async fn connect(&self, handle: &ServerHandle) -> Result<Self::Exec> {
        let addr = handle
            .addr
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("droplet {} has no public address yet", handle.id))?;
        Ok(SshExecutor::new(addr))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::DigitalOcean
    }
}
