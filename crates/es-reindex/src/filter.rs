//! External filter process.
//!
//! Every worker owns one long-lived `sh -c <command>` child. Records are
//! exchanged one line at a time: the serialized record goes to the child's
//! stdin and exactly one line is read back from its stdout. An empty answer
//! drops the record.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::Record;

/// How hard [`FilterAdapter::transform`] tries before giving up on a record.
///
/// The default never gives up, pausing one second between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterRetryPolicy {
    /// Attempts per record; `None` is unbounded.
    pub max_attempts: Option<u32>,
    /// Pause between attempts.
    pub pause: Duration,
    /// Overall time budget per record; `None` is unbounded.
    pub deadline: Option<Duration>,
}

impl Default for FilterRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            pause: Duration::from_secs(1),
            deadline: None,
        }
    }
}

/// Result of passing one record through the filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// The filter answered with a record.
    Keep {
        /// Replacement record.
        record: Record,
        /// Whether it differs from the input.
        changed: bool,
    },
    /// The filter answered with an empty line.
    Drop,
}

/// Lifecycle of the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No usable child yet; the next exchange spawns one.
    Starting,
    /// Child running with pipes bound.
    Ready,
    /// Child exited or lost protocol sync; the next exchange respawns it.
    Failed,
}

struct FilterProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

/// One worker's handle on the filter command.
pub struct FilterAdapter {
    command: String,
    id: String,
    dir: Option<PathBuf>,
    policy: FilterRetryPolicy,
    state: ProcessState,
    process: Option<FilterProcess>,
    restarts: u64,
    attempts: u32,
    close_grace: Duration,
}

impl FilterAdapter {
    /// Spawns the filter command for worker `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is empty or cannot be spawned.
    pub fn spawn(
        command: &str,
        id: impl Into<String>,
        dir: Option<PathBuf>,
        policy: FilterRetryPolicy,
    ) -> Result<Self> {
        let id = id.into();
        let command = command.trim();
        if command.is_empty() {
            return Err(Error::Filter(format!(
                "empty command line for filter, id={}",
                id
            )));
        }
        let mut adapter = Self {
            command: command.to_string(),
            id,
            dir,
            policy,
            state: ProcessState::Starting,
            process: None,
            restarts: 0,
            attempts: 0,
            close_grace: Duration::from_secs(5),
        };
        adapter.start()?;
        Ok(adapter)
    }

    /// How long [`FilterAdapter::close`] waits for the child to exit.
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Current process state.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Times the child has been respawned.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    fn start(&mut self) -> Result<()> {
        if self.state == ProcessState::Failed || self.process.is_some() {
            self.restarts += 1;
        }
        if let Some(mut old) = self.process.take() {
            let _ = old.child.start_kill();
        }
        self.state = ProcessState::Starting;
        info!(id = %self.id, cmd = %self.command, "filter process starting");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            self.state = ProcessState::Failed;
            Error::Filter(format!("spawn [{}] failed: {}", self.command, e))
        })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Filter("child stdout not captured".to_string()))?;

        // Drain stderr so a chatty filter never blocks on a full pipe.
        if let Some(stderr) = child.stderr.take() {
            let id = self.id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(id = %id, "cmd_stderr: {}", line.trim());
                }
                debug!(id = %id, "filter stderr closed");
            });
        }

        self.process = Some(FilterProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        });
        self.state = ProcessState::Ready;
        info!(id = %self.id, "filter process started");
        Ok(())
    }

    fn has_exited(&mut self) -> bool {
        match self.process.as_mut() {
            Some(process) => !matches!(process.child.try_wait(), Ok(None)),
            None => true,
        }
    }

    /// Kills the child; the next exchange starts a fresh one.
    fn discard(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.child.start_kill();
        }
        self.state = ProcessState::Failed;
    }

    async fn exchange(&mut self, line: &str) -> Result<String> {
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| Error::Filter("filter process not running".to_string()))?;
        let stdin = process
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Filter("filter stdin already closed".to_string()))?;

        let mut payload = line.trim_matches('\n').to_string();
        payload.push('\n');
        stdin.write_all(payload.as_bytes()).await?;
        stdin.flush().await?;

        let mut response = String::new();
        if process.stdout.read_line(&mut response).await? == 0 {
            return Err(Error::Filter("filter closed its stdout".to_string()));
        }
        Ok(response.trim().to_string())
    }

    /// Sends one line and reads one line back.
    ///
    /// A child that has exited is respawned and the same line is sent again
    /// right away; any other failure is returned to the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails on a live child, or fails
    /// again after a respawn.
    pub async fn deal(&mut self, line: &str) -> Result<String> {
        if self.state != ProcessState::Ready {
            self.start()?;
        }
        match self.exchange(line).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(id = %self.id, "filter exchange error: {}", e);
                if !self.has_exited() {
                    return Err(e);
                }
                self.state = ProcessState::Failed;
                self.start()?;
                let retried = self.exchange(line).await;
                if retried.is_err() && self.has_exited() {
                    self.state = ProcessState::Failed;
                }
                retried
            }
        }
    }

    /// Passes `record` through the filter, retrying per the policy.
    ///
    /// I/O failures, failed respawns and malformed answers are all retried
    /// after a pause.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FilterExhausted`] once the policy gives up, or an
    /// error if the record cannot be serialized.
    pub async fn transform(&mut self, record: &Record) -> Result<FilterOutcome> {
        let raw = record.to_line()?;
        let Some(deadline) = self.policy.deadline else {
            return self.transform_line(record, &raw).await;
        };
        match tokio::time::timeout(deadline, self.transform_line(record, &raw)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // A late answer would be read as the reply to the next record.
                self.discard();
                Err(Error::FilterExhausted {
                    identity: record.identity(),
                    attempts: self.attempts,
                    last_error: format!("deadline of {:?} exceeded", deadline),
                })
            }
        }
    }

    async fn transform_line(&mut self, record: &Record, raw: &str) -> Result<FilterOutcome> {
        self.attempts = 0;
        loop {
            self.attempts += 1;
            let attempts = self.attempts;
            let error = match self.deal(raw).await {
                Ok(response) if response.is_empty() => return Ok(FilterOutcome::Drop),
                Ok(response) => match parse_output(record, &response) {
                    Ok(new_record) => {
                        debug!(id = %self.id, raw = %raw, new = %response, "filter result");
                        let changed = new_record != *record;
                        return Ok(FilterOutcome::Keep {
                            record: new_record,
                            changed,
                        });
                    }
                    Err(e) => e,
                },
                Err(e) => e,
            };

            warn!(
                id = %self.id,
                try_times = attempts,
                input = %raw,
                "filter deal with error: {}",
                error
            );
            if self.policy.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(Error::FilterExhausted {
                    identity: record.identity(),
                    attempts,
                    last_error: error.to_string(),
                });
            }
            tokio::time::sleep(self.policy.pause).await;
        }
    }

    /// Closes the child's stdin so it can exit on its own.
    ///
    /// Waits up to the close grace for the exit; a child still running after
    /// that is left alone and reaped in the background.
    pub async fn close(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };
        drop(process.stdin.take());
        self.state = ProcessState::Starting;
        match tokio::time::timeout(self.close_grace, process.child.wait()).await {
            Ok(Ok(status)) => info!(id = %self.id, "filter process exited: {}", status),
            Ok(Err(e)) => warn!(id = %self.id, "filter process wait failed: {}", e),
            Err(_) => {
                warn!(id = %self.id, "filter process still running after stdin close");
                let id = self.id.clone();
                tokio::spawn(async move {
                    match process.child.wait().await {
                        Ok(status) => info!(id = %id, "filter process exited: {}", status),
                        Err(e) => warn!(id = %id, "filter process wait failed: {}", e),
                    }
                });
            }
        }
    }
}

impl Drop for FilterAdapter {
    // Reached without `close` only when the worker is aborted.
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.child.start_kill();
        }
    }
}

/// Parses a filter answer, insisting that it keeps a type when the input had one.
fn parse_output(input: &Record, response: &str) -> Result<Record> {
    let record = Record::from_line(response)?;
    if record.doc_type.is_empty() && !input.doc_type.is_empty() {
        return Err(Error::MalformedRecord(format!(
            "_type is empty, input={:?}",
            response
        )));
    }
    Ok(record)
}

#[cfg(test)]
#[path = "filter_tests.rs"]
mod tests;
