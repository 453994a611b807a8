//! GitHub-style repository host adapter.

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::json;

use roost_common::RepoHostConfig;

use crate::application::ports::RepoHost;

const USER_AGENT: &str = concat!("roost-cli/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    private: bool,
    auto_init: bool,
}

pub struct GithubRepoHost {
    client: reqwest::Client,
    token: String,
    owner: String,
    api_base: String,
    ssh_host: String,
}

impl GithubRepoHost {
    #[must_use]
    pub fn new(client: reqwest::Client, config: &RepoHostConfig) -> Self {
        Self {
            client,
            token: config.token.clone(),
            owner: config.owner.clone(),
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            ssh_host: config.ssh_host.clone(),
        }
    }

    fn repo_url(&self, name: &str) -> String {
        format!("{}/repos/{}/{}", self.api_base, self.owner, name)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }
}

impl RepoHost for GithubRepoHost {
    async fn create_repo(&self, name: &str) -> Result<String> {
        let body = CreateRepoRequest {
            name,
            private: true,
            auto_init: true,
        };
        let resp = self
            .request(self.client.post(format!("{}/user/repos", self.api_base)))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("create repository '{name}'"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("failed to create repository '{name}': {status} {text}");
        }
        Ok(self.clone_url(name))
    }

    async fn repo_exists(&self, name: &str) -> Result<bool> {
        let resp = self
            .request(self.client.get(self.repo_url(name)))
            .send()
            .await
            .with_context(|| format!("check repository '{name}'"))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => {
                let text = resp.text().await.unwrap_or_default();
                anyhow::bail!("failed to check repository '{name}': {s} {text}")
            }
        }
    }

    async fn register_deploy_key(&self, repo: &str, title: &str, public_key: &str) -> Result<()> {
        let body = json!({
            "title": title,
            "key": public_key,
            "read_only": false,
        });
        let resp = self
            .request(self.client.post(format!("{}/keys", self.repo_url(repo))))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("register deploy key on '{repo}'"))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        // Re-registering the same key answers 422; that key already grants
        // the access we want.
        if status == StatusCode::UNPROCESSABLE_ENTITY && text.contains("already in use") {
            return Ok(());
        }
        anyhow::bail!("failed to register deploy key on '{repo}': {status} {text}")
    }

    async fn write_file(&self, repo: &str, path: &str, content: &str, message: &str) -> Result<()> {
        let body = json!({
            "message": message,
            "content": BASE64.encode(content.as_bytes()),
        });
        let resp = self
            .request(
                self.client
                    .put(format!("{}/contents/{path}", self.repo_url(repo))),
            )
            .json(&body)
            .send()
            .await
            .with_context(|| format!("write {path} to '{repo}'"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("failed to write {path} to '{repo}': {status} {text}");
        }
        Ok(())
    }

    fn clone_url(&self, name: &str) -> String {
        format!("git@{}:{}/{}.git", self.ssh_host, self.owner, name)
    }
}
