//! Knowledge repository wiring: ensure the upstream repo, deploy key, local
//! clone, periodic sync daemon, and runtime linking.

use std::time::Duration;

use crate::application::events::{ProgressEvent, truncate_output};
use crate::application::ports::{ProgressSink, RemoteExecutor, RepoHost};
use crate::application::services::runner::StepRunner;
use crate::domain::StepError;
use crate::domain::host::{
    DATA_DIR, DEPLOY_KEY_PATH, KNOWLEDGE_LINK, MEMORY_DIR, RUNTIME_DIR, SYNC_PIDFILE, SYNC_SCRIPT,
};

const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

/// Seed document written into a freshly created knowledge repository.
const MEMORY_SEED: &str = "\
# Agent memory\n\n\
This repository is the persistent memory of a roost-managed agent.\n\
The host hard-resets its local clone to this upstream on a fixed interval,\n\
so durable knowledge must be pushed here.\n";

/// Upstream repository resolution result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoOutcome {
    pub name: String,
    pub url: String,
    /// True when an existing upstream repository was reused.
    pub reused: bool,
}

/// Create or reuse the knowledge repository.
///
/// A recorded repository is re-verified upstream, never assumed: when it no
/// longer exists a fresh one is created under the same name.
///
/// # Errors
///
/// Propagates repository-host API failures.
pub async fn ensure_repository<H: RepoHost, S: ProgressSink>(
    host: &H,
    recorded_name: Option<&str>,
    default_name: &str,
    sink: &S,
) -> Result<RepoOutcome, StepError> {
    let name = recorded_name.unwrap_or(default_name);

    if host.repo_exists(name).await? {
        sink.emit(ProgressEvent::new(
            "repository",
            &format!("reusing upstream repository '{name}'"),
            true,
        ));
        return Ok(RepoOutcome {
            name: name.to_owned(),
            url: host.clone_url(name),
            reused: true,
        });
    }

    if recorded_name.is_some() {
        sink.emit(ProgressEvent::new(
            "repository",
            &format!("recorded repository '{name}' is gone upstream; creating a new one"),
            true,
        ));
    }
    let url = host.create_repo(name).await?;
    host.write_file(name, "AGENTS.md", MEMORY_SEED, "seed agent memory")
        .await?;
    sink.emit(ProgressEvent::new(
        "repository",
        &format!("created repository '{name}'"),
        true,
    ));
    Ok(RepoOutcome {
        name: name.to_owned(),
        url,
        reused: false,
    })
}

/// Generate the deploy keypair on the host (once) and register its public
/// half with the repository host. The private half never leaves the resource.
///
/// # Errors
///
/// [`StepError::Verification`] if no public key material can be read back.
pub async fn install_deploy_key<E: RemoteExecutor, H: RepoHost, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    host: &H,
    repo_name: &str,
) -> Result<(), StepError> {
    let keygen = format!(
        "test -f {DEPLOY_KEY_PATH} || \
         ssh-keygen -t ed25519 -N '' -f {DEPLOY_KEY_PATH} -C roost-deploy 2>&1"
    );
    let generated = runner.run("deploy-key", &keygen).await?;
    if !generated.success {
        return Err(StepError::Other(anyhow::anyhow!(
            "deploy key generation failed: {}",
            truncate_output(&generated.output)
        )));
    }

    let read = runner
        .run("deploy-key", &format!("cat {DEPLOY_KEY_PATH}.pub"))
        .await?;
    let public_key = read.output.trim().to_owned();
    if !read.success || public_key.is_empty() {
        return Err(StepError::Verification(
            "deploy keypair was generated but no public key could be read".to_owned(),
        ));
    }

    host.register_deploy_key(repo_name, "roost-deploy", &public_key)
        .await?;
    Ok(())
}

/// Configure git identity and clone the knowledge repository. Returns true
/// when a valid clone already existed.
///
/// # Errors
///
/// [`StepError::Other`] on clone failure.
pub async fn clone_repository<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    url: &str,
) -> Result<bool, StepError> {
    let identity = format!(
        "git config --global user.name 'Roost Agent' && \
         git config --global user.email 'agent@roost.invalid' && \
         git config --global core.sshCommand \
         'ssh -i {DEPLOY_KEY_PATH} -o StrictHostKeyChecking=accept-new'"
    );
    let configured = runner.run("repository-clone", &identity).await?;
    if !configured.success {
        return Err(StepError::Other(anyhow::anyhow!(
            "git identity configuration failed: {}",
            truncate_output(&configured.output)
        )));
    }

    let existing = runner
        .run("repository-clone", &format!("test -d {MEMORY_DIR}/.git"))
        .await?;
    if existing.success {
        return Ok(true);
    }

    let clone = runner
        .run_with_timeout(
            "repository-clone",
            &format!("git clone {url} {MEMORY_DIR} 2>&1"),
            CLONE_TIMEOUT,
        )
        .await?;
    if !clone.success {
        return Err(StepError::Other(anyhow::anyhow!(
            "git clone failed: {}",
            truncate_output(&clone.output)
        )));
    }
    Ok(false)
}

/// Install the periodic sync daemon that hard-resets the clone to upstream.
///
/// Preferred registration is a crontab entry, installed replace-not-duplicate
/// so at most one daemon exists per resource. When cron is absent the
/// fallback is a detached loop guarded by a pidfile.
///
/// # Errors
///
/// [`StepError::Other`] when the script cannot be written or registered.
pub async fn install_sync_daemon<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    sink: &S,
) -> Result<(), StepError> {
    let script = format!(
        "#!/usr/bin/env bash\n\
         cd {MEMORY_DIR} || exit 1\n\
         git fetch origin && git reset --hard '@{{u}}'\n"
    );
    let write = format!(
        "mkdir -p {RUNTIME_DIR} && cat > {SYNC_SCRIPT} <<'ROOST_EOF'\n{script}ROOST_EOF\n\
         chmod +x {SYNC_SCRIPT}"
    );
    let written = runner.run("sync-daemon", &write).await?;
    if !written.success {
        return Err(StepError::Other(anyhow::anyhow!(
            "failed to write sync script: {}",
            truncate_output(&written.output)
        )));
    }

    let probe = runner
        .run("sync-daemon", "command -v crontab >/dev/null && echo cron; true")
        .await?;
    if probe.output.contains("cron") {
        // Filter any previous registration before appending the new line.
        let register = format!(
            "( crontab -l 2>/dev/null | grep -v 'sync-memory.sh'; \
             echo '*/10 * * * * {SYNC_SCRIPT}' ) | crontab -"
        );
        let registered = runner.run("sync-daemon", &register).await?;
        if !registered.success {
            return Err(StepError::Other(anyhow::anyhow!(
                "failed to register sync cron entry: {}",
                truncate_output(&registered.output)
            )));
        }
        sink.emit(ProgressEvent::new("sync-daemon", "cron entry installed", true));
        return Ok(());
    }

    // Fallback: detached loop. The pidfile kill makes reinstalling replace
    // rather than duplicate the daemon.
    let launch = format!(
        "[ -f {SYNC_PIDFILE} ] && kill \"$(cat {SYNC_PIDFILE})\" 2>/dev/null; \
         nohup bash -c 'while true; do {SYNC_SCRIPT}; sleep 600; done' \
         >/dev/null 2>&1 & echo $! > {SYNC_PIDFILE}; disown; echo launched"
    );
    let launched = runner.run("sync-daemon", &launch).await?;
    if !launched.success {
        return Err(StepError::Other(anyhow::anyhow!(
            "failed to launch sync loop: {}",
            truncate_output(&launched.output)
        )));
    }
    sink.emit(ProgressEvent::new(
        "sync-daemon",
        "cron unavailable; detached sync loop installed",
        true,
    ));
    Ok(())
}

/// Link the memory clone into the runtime's knowledge path.
///
/// # Errors
///
/// [`StepError::Other`] when the link cannot be created.
pub async fn link_knowledge<E: RemoteExecutor, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
) -> Result<(), StepError> {
    let link = format!("mkdir -p {RUNTIME_DIR} && ln -sfn {MEMORY_DIR} {KNOWLEDGE_LINK}");
    let result = runner.run("knowledge-link", &link).await?;
    if !result.success {
        return Err(StepError::Other(anyhow::anyhow!(
            "failed to link knowledge path: {}",
            truncate_output(&result.output)
        )));
    }
    Ok(())
}

/// Clone additional data-source repositories under the runtime's data
/// directory. Existing clones are left alone.
///
/// # Errors
///
/// [`StepError::Other`] when a clone fails.
pub async fn clone_data_repos<E: RemoteExecutor, H: RepoHost, S: ProgressSink>(
    runner: &StepRunner<'_, E, S>,
    host: &H,
    sink: &S,
    names: &[String],
) -> Result<(), StepError> {
    for name in names {
        let dir = format!("{DATA_DIR}/{name}");
        let existing = runner
            .run("data-repos", &format!("test -d {dir}/.git"))
            .await?;
        if existing.success {
            continue;
        }
        let url = host.clone_url(name);
        let clone = runner
            .run_with_timeout(
                "data-repos",
                &format!("mkdir -p {DATA_DIR} && git clone {url} {dir} 2>&1"),
                CLONE_TIMEOUT,
            )
            .await?;
        if !clone.success {
            return Err(StepError::Other(anyhow::anyhow!(
                "failed to clone data repository '{name}': {}",
                truncate_output(&clone.output)
            )));
        }
        sink.emit(ProgressEvent::new(
            "data-repos",
            &format!("cloned data repository '{name}'"),
            true,
        ));
    }
    Ok(())
}
