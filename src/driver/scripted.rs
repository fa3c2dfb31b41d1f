//! In-memory driver with canned replies
//!
//! Commands are keyed by their arguments joined with spaces, without the
//! `--machine-readable`/`--debug` flags, e.g. `"stop --force foo"`. Each key
//! holds a queue of replies; the last reply in a queue is repeated for any
//! further calls. Commands without a scripted reply succeed with an empty
//! body, and guest commands without one succeed with no output.

use super::protocol::MachineReadableOutput;
use super::{CommandDriver, GuestOutput, ProgressSink};
use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A canned reply for one command
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// The command printed this result (an ERROR status becomes `CommandFailed`)
    Output(MachineReadableOutput),

    /// The command printed nothing
    MissingOutput,

    /// The tool could not be started
    LaunchFailure(String),
}

#[derive(Debug, Default)]
pub struct ScriptedDriver {
    replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    progress: Mutex<HashMap<String, Vec<String>>>,
    guest_replies: Mutex<HashMap<String, VecDeque<GuestOutput>>>,
    commands: Mutex<Vec<String>>,
    guest_inputs: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn next_from<T: Clone>(queues: &Mutex<HashMap<String, VecDeque<T>>>, key: &str) -> Option<T> {
    let mut queues = lock(queues);
    let queue = queues.get_mut(key)?;
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `command`
    pub fn reply(&self, command: &str, reply: ScriptedReply) -> &Self {
        lock(&self.replies)
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue a successful result with `body`
    pub fn reply_ok(&self, command: &str, body: serde_json::Value) -> &Self {
        self.reply(
            command,
            ScriptedReply::Output(MachineReadableOutput::ok(body)),
        )
    }

    /// Queue an ERROR result with `code`
    pub fn reply_error(&self, command: &str, code: i64, message: &str) -> &Self {
        self.reply(
            command,
            ScriptedReply::Output(MachineReadableOutput::error(code, message)),
        )
    }

    /// Lines emitted to the progress sink when `command` is streamed
    pub fn progress(&self, command: &str, lines: &[&str]) -> &Self {
        lock(&self.progress).insert(
            command.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    /// Queue a reply for a guest command, keyed by the shell input
    pub fn guest_reply(&self, input: &str, output: GuestOutput) -> &Self {
        lock(&self.guest_replies)
            .entry(input.to_string())
            .or_default()
            .push_back(output);
        self
    }

    /// Every command issued so far, in order
    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }

    /// Shell input of every guest command issued so far, in order
    pub fn guest_inputs(&self) -> Vec<String> {
        lock(&self.guest_inputs).clone()
    }

    /// Number of issued commands starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.commands)
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, args: &[String]) -> String {
        let key = args.join(" ");
        lock(&self.commands).push(key.clone());
        key
    }

    fn answer(&self, key: &str) -> Result<MachineReadableOutput> {
        match next_from(&self.replies, key) {
            None => Ok(MachineReadableOutput::ok(serde_json::json!({}))),
            Some(ScriptedReply::Output(output)) => Ok(output.into_result()?),
            Some(ScriptedReply::MissingOutput) => Err(ProvisionError::MissingOutput {
                command: key.to_string(),
            }),
            Some(ScriptedReply::LaunchFailure(reason)) => Err(ProvisionError::ProcessLaunch {
                program: "scripted".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, reason),
            }),
        }
    }
}

#[async_trait]
impl CommandDriver for ScriptedDriver {
    async fn invoke(&self, args: &[String]) -> Result<MachineReadableOutput> {
        let key = self.record(args);
        self.answer(&key)
    }

    async fn invoke_streaming(
        &self,
        args: &[String],
        progress: &ProgressSink<'_>,
    ) -> Result<MachineReadableOutput> {
        let key = self.record(args);
        let lines = lock(&self.progress).get(&key).cloned().unwrap_or_default();
        for line in &lines {
            progress(line);
        }
        self.answer(&key)
    }

    async fn run_in_guest(&self, args: &[String], input: &str) -> Result<GuestOutput> {
        self.record(args);
        lock(&self.guest_inputs).push(input.to_string());
        Ok(next_from(&self.guest_replies, input).unwrap_or_else(|| GuestOutput::success("")))
    }
}
