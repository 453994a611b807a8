//! Exec session registry with idle expiry.
//!
//! Persistent transports are expensive to establish, so ad-hoc `exec` calls
//! share a cached executor per host. Sessions idle past the TTL are dropped
//! on the next registry access; there is no background reaper task.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::application::ports::{ExecOutput, RemoteExecutor};

/// Idle lifetime of a cached session.
pub const SESSION_TTL: Duration = Duration::from_secs(600);

struct Session<E> {
    exec: E,
    last_used: Instant,
}

/// Keyed cache of live executors, one per host id.
pub struct SessionRegistry<E> {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session<E>>>,
}

impl<E: RemoteExecutor> SessionRegistry<E> {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Run a command through the host's session, connecting via `connect`
    /// when no live session exists.
    ///
    /// # Errors
    ///
    /// Propagates connection and transport failures.
    pub async fn run<F, Fut>(&self, host_id: &str, connect: F, command: &str) -> Result<ExecOutput>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<E>>,
    {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        sessions.retain(|_, s| now.duration_since(s.last_used) < self.ttl);

        if !sessions.contains_key(host_id) {
            let exec = connect().await?;
            sessions.insert(
                host_id.to_owned(),
                Session {
                    exec,
                    last_used: now,
                },
            );
        }
        // Present by construction; the guard is held across the insert.
        let Some(session) = sessions.get_mut(host_id) else {
            anyhow::bail!("session for '{host_id}' vanished under lock");
        };
        session.last_used = now;
        session.exec.execute(command).await
    }

    /// Drop the host's session if one exists; returns whether one did.
    pub async fn close(&self, host_id: &str) -> bool {
        self.sessions.lock().await.remove(host_id).is_some()
    }

    /// Drop every session.
    pub async fn drain(&self) {
        self.sessions.lock().await.clear();
    }

    /// Number of live (non-expired) sessions.
    pub async fn len(&self) -> usize {
        let sessions = self.sessions.lock().await;
        let now = Instant::now();
        sessions
            .values()
            .filter(|s| now.duration_since(s.last_used) < self.ttl)
            .count()
    }
}
