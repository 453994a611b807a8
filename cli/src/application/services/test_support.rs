//! Shared test helpers for service tests.
//!
//! `RuleExecutor` scripts a remote host: each rule matches a command
//! substring and yields a queue of answers (the last answer repeats).
//! Commands with no matching rule echo back `echo` arguments and succeed.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;

use crate::application::ports::{ExecOutput, RemoteExecutor, Transport};

pub enum Answer {
    /// Canned `(output, exit_code)`.
    Out(&'static str, i32),
    /// Transport-level failure.
    Fail(&'static str),
}

struct Rule {
    pattern: &'static str,
    answers: Vec<Answer>,
}

pub struct RuleExecutor {
    transport: Transport,
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<String>>,
}

impl RuleExecutor {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            rules: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Add a rule; earlier rules win when several patterns match.
    pub fn rule(self, pattern: &'static str, answers: Vec<Answer>) -> Self {
        self.rules.lock().unwrap().push(Rule { pattern, answers });
        self
    }

    /// Every command executed, in order.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// How many executed commands contained `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }
}

impl RemoteExecutor for RuleExecutor {
    async fn execute(&self, command: &str) -> Result<ExecOutput> {
        self.log.lock().unwrap().push(command.to_owned());

        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules.iter_mut().find(|r| command.contains(r.pattern)) {
            let answer = if rule.answers.len() > 1 {
                rule.answers.remove(0)
            } else {
                match rule.answers.first() {
                    Some(Answer::Out(out, code)) => Answer::Out(out, *code),
                    Some(Answer::Fail(msg)) => Answer::Fail(msg),
                    None => Answer::Out("", 0),
                }
            };
            return match answer {
                Answer::Out(out, code) => Ok(ExecOutput {
                    output: out.to_owned(),
                    exit_code: code,
                }),
                Answer::Fail(msg) => anyhow::bail!("{msg}"),
            };
        }

        // Unmatched commands behave like a healthy host: echo echoes, the
        // rest exit 0 silently.
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
        self.transport
    }
}
