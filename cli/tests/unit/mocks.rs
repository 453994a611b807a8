//! Shared mock infrastructure for unit tests.
//!
//! Provides a scripted compute backend, an in-memory record store and a
//! repository-host spy so each test file doesn't re-define the same
//! boilerplate.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use roost_cli::application::ports::{
    ComputeProvider, ExecOutput, RemoteExecutor, RepoHost, RecordStore, ServerHandle, Transport,
};
use roost_cli::domain::StepError;
use roost_common::{ProviderKind, ProvisioningRecord, RecordPatch};

// ── Executor ──────────────────────────────────────────────────────────────────

/// Pattern-scripted executor. The first rule whose pattern the command
/// contains answers it; unmatched commands echo `echo` arguments and exit 0.
pub struct MockExecutor {
    rules: Vec<(&'static str, &'static str, i32)>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MockExecutor {
    /// An executor behaving like a fully healthy host: every pipeline probe
    /// answers positively. Rule order matters where patterns overlap.
    pub fn healthy(log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            rules: vec![
                ("command -v crontab", "cron", 0),
                ("ss -ltn", "listening", 0),
                ("ROOST_INSTALL_COMPLETE", "found", 0),
                ("command -v", "/usr/local/bin/roost-agent", 0),
                ("roost_deploy.pub", "ssh-ed25519 AAAAC3 roost-deploy", 0),
                ("--version", "roost-agent 1.2.3", 0),
                ("pgrep -f", "present", 0),
                ("id -u", "0", 0),
            ],
            log,
        }
    }
}

impl RemoteExecutor for MockExecutor {
    async fn execute(&self, command: &str) -> Result<ExecOutput> {
        self.log.lock().unwrap().push(command.to_owned());
        if let Some((_, out, code)) = self.rules.iter().find(|(p, _, _)| command.contains(p)) {
            return Ok(ExecOutput {
                output: (*out).to_owned(),
                exit_code: *code,
            });
        }
        let output = command
            .strip_prefix("echo ")
            .map(str::to_owned)
            .unwrap_or_default();
        Ok(ExecOutput {
            output,
            exit_code: 0,
        })
    }

    async fn execute_with_timeout(&self, command: &str, _timeout: Duration) -> Result<ExecOutput> {
        self.execute(command).await
    }

    fn transport(&self) -> Transport {
        Transport::Persistent
    }
}

// ── Compute provider ──────────────────────────────────────────────────────────

pub enum CreateAnswer {
    Ok(ServerHandle),
    Transport(&'static str),
    Billing(&'static str),
}

pub fn handle(id: &str, name: &str, addr: Option<&str>) -> ServerHandle {
    ServerHandle {
        id: id.to_owned(),
        name: name.to_owned(),
        addr: addr.map(str::to_owned),
    }
}

/// Scripted backend: create answers are consumed in order (the last one
/// repeats), describe and find are canned, connect hands out a healthy
/// executor sharing one command log.
pub struct MockProvider {
    create_answers: Mutex<Vec<CreateAnswer>>,
    pub create_calls: AtomicU32,
    pub find_answer: Option<ServerHandle>,
    pub described: Mutex<HashMap<String, ServerHandle>>,
    pub exec_log: Arc<Mutex<Vec<String>>>,
}

impl MockProvider {
    pub fn new(create_answers: Vec<CreateAnswer>) -> Self {
        Self {
            create_answers: Mutex::new(create_answers),
            create_calls: AtomicU32::new(0),
            find_answer: None,
            described: Mutex::new(HashMap::new()),
            exec_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.exec_log.lock().unwrap().clone()
    }

    pub fn command_count(&self, pattern: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(pattern)).count()
    }
}

impl ComputeProvider for MockProvider {
    type Exec = MockExecutor;

    async fn create_server(&self, _name: &str) -> Result<ServerHandle, StepError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut answers = self.create_answers.lock().unwrap();
        let answer = if answers.len() > 1 {
            answers.remove(0)
        } else {
            match answers.first() {
                Some(CreateAnswer::Ok(h)) => CreateAnswer::Ok(h.clone()),
                Some(CreateAnswer::Transport(m)) => CreateAnswer::Transport(m),
                Some(CreateAnswer::Billing(c)) => CreateAnswer::Billing(c),
                None => CreateAnswer::Transport("no scripted answer"),
            }
        };
        match answer {
            CreateAnswer::Ok(h) => Ok(h),
            CreateAnswer::Transport(m) => Err(StepError::Transport(m.to_owned())),
            CreateAnswer::Billing(c) => Err(StepError::BillingRestricted {
                class: c.to_owned(),
            }),
        }
    }

    async fn describe_server(&self, id: &str) -> Result<Option<ServerHandle>> {
        Ok(self.described.lock().unwrap().get(id).cloned())
    }

    async fn find_server(&self, _name: &str) -> Result<Option<ServerHandle>> {
        Ok(self.find_answer.clone())
    }

    async fn delete_server(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, _handle: &ServerHandle) -> Result<Self::Exec> {
        Ok(MockExecutor::healthy(self.exec_log.clone()))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Hetzner
    }
}

// ── Record store ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, ProvisioningRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: ProvisioningRecord) -> Self {
        let store = Self::default();
        store
            .records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
        store
    }

    pub fn snapshot(&self, id: &str) -> Option<ProvisioningRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }
}

impl RecordStore for MemoryRecordStore {
    async fn load(&self, id: &str) -> Result<Option<ProvisioningRecord>> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn upsert(&self, record: &ProvisioningRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<ProvisioningRecord> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("no record for host '{id}'"))?;
        patch.apply(record);
        Ok(record.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records.lock().unwrap().remove(id);
        Ok(())
    }
}

// ── Repository host ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockRepoHost {
    pub exists: bool,
    pub created: Mutex<Vec<String>>,
    pub keys_registered: AtomicU32,
    pub files_written: Mutex<Vec<String>>,
}

impl MockRepoHost {
    pub fn with_existing_repos() -> Self {
        Self {
            exists: true,
            ..Self::default()
        }
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }
}

impl RepoHost for MockRepoHost {
    async fn create_repo(&self, name: &str) -> Result<String> {
        self.created.lock().unwrap().push(name.to_owned());
        Ok(self.clone_url(name))
    }

    async fn repo_exists(&self, _name: &str) -> Result<bool> {
        Ok(self.exists)
    }

    async fn register_deploy_key(&self, _repo: &str, _title: &str, _key: &str) -> Result<()> {
        self.keys_registered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write_file(&self, _repo: &str, path: &str, _content: &str, _message: &str) -> Result<()> {
        self.files_written.lock().unwrap().push(path.to_owned());
        Ok(())
    }

    fn clone_url(&self, name: &str) -> String {
        format!("git@example.com:alice/{name}.git")
    }
}
