//! Stage backed by an external shell command.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::progress::{ProgressReporter, StageProgress};
use super::traits::PipelineStage;
use super::types::{StageDescriptor, StageOutcome, StageOutput};
use crate::config::CommandStageConfig;
use crate::orchestrator::StageContext;

/// `EX_DATAERR`: the input was malformed.
pub const EXIT_VALIDATION: i32 = 65;
/// `EX_UNAVAILABLE`: a provider or quota is exhausted.
pub const EXIT_RESOURCE_EXHAUSTED: i32 = 69;
/// `EX_TEMPFAIL`: try again later.
pub const EXIT_TRANSIENT: i32 = 75;

const STDERR_TAIL_LINES: usize = 20;

/// Runs `sh -c <command>` as a pipeline stage.
///
/// The child sees `REELFORGE_JOB_ID`, `REELFORGE_STAGE`, `REELFORGE_ATTEMPT`
/// and `REELFORGE_INPUT` (JSON). It talks back through stdout:
///
/// - `progress <percent> [message]` reports stage progress
/// - `artifact <path>` names the produced file
///
/// Any other stdout line is collected into the output value.
pub struct CommandStage {
    descriptor: StageDescriptor,
    command: String,
    working_dir: Option<String>,
}

impl CommandStage {
    pub fn new(descriptor: StageDescriptor, command: impl Into<String>) -> Self {
        Self {
            descriptor,
            command: command.into(),
            working_dir: None,
        }
    }

    pub fn from_config(config: &CommandStageConfig) -> Self {
        let descriptor = StageDescriptor::new(&config.name)
            .with_display_name(
                config
                    .display_name
                    .clone()
                    .unwrap_or_else(|| config.name.clone()),
            )
            .with_weight(config.weight)
            .with_timeout(Duration::from_secs(config.timeout_secs))
            .with_retry(config.supports_retry)
            .with_max_retry_attempts(config.max_retry_attempts)
            .with_resume(config.supports_resume);

        Self {
            descriptor,
            command: config.command.clone(),
            working_dir: config.working_dir.clone(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn build_command(&self, ctx: &StageContext<'_>) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", &self.command])
            .env("REELFORGE_JOB_ID", ctx.job_id())
            .env("REELFORGE_STAGE", ctx.stage())
            .env("REELFORGE_ATTEMPT", ctx.attempt().to_string())
            .env("REELFORGE_INPUT", ctx.input().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// A parsed stdout line.
#[derive(Debug, PartialEq)]
enum Directive<'a> {
    Progress(f32, Option<&'a str>),
    Artifact(&'a str),
    Text(&'a str),
}

fn parse_line(line: &str) -> Directive<'_> {
    if let Some(rest) = line.strip_prefix("progress ") {
        let mut parts = rest.trim().splitn(2, char::is_whitespace);
        if let Some(Ok(percent)) = parts.next().map(str::parse::<f32>) {
            let message = parts.next().map(str::trim).filter(|m| !m.is_empty());
            return Directive::Progress(percent.clamp(0.0, 100.0), message);
        }
    }
    if let Some(path) = line.strip_prefix("artifact ") {
        let path = path.trim();
        if !path.is_empty() {
            return Directive::Artifact(path);
        }
    }
    Directive::Text(line)
}

fn classify_exit(code: Option<i32>, stderr: &str) -> StageOutcome {
    let detail = if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    };
    match code {
        Some(EXIT_TRANSIENT) => StageOutcome::transient(format!("command asked for retry{}", detail)),
        Some(EXIT_RESOURCE_EXHAUSTED) => {
            StageOutcome::resource_exhausted(format!("command reported exhaustion{}", detail))
        }
        Some(EXIT_VALIDATION) => StageOutcome::validation(format!("command rejected input{}", detail)),
        Some(code) => StageOutcome::internal(format!("command exited with code {}{}", code, detail)),
        None => StageOutcome::internal(format!("command terminated by signal{}", detail)),
    }
}

#[async_trait]
impl PipelineStage for CommandStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        ctx: &mut StageContext<'_>,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> StageOutcome {
        info!(
            job_id = %ctx.job_id(),
            stage = %ctx.stage(),
            attempt = ctx.attempt(),
            "Running stage command"
        );

        let mut child = match self.build_command(ctx).spawn() {
            Ok(child) => child,
            Err(e) => return StageOutcome::internal(format!("failed to spawn command: {}", e)),
        };

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_handle = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&stderr_tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("stderr: {}", line);
                    if let Ok(mut tail) = tail.lock() {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
            })
        });

        let Some(stdout) = child.stdout.take() else {
            return StageOutcome::internal("command stdout was not captured");
        };
        let mut lines = BufReader::new(stdout).lines();
        let mut text = Vec::new();
        let mut artifact = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!(stage = %ctx.stage(), "Failed to kill canceled command: {}", e);
                    }
                    return StageOutcome::Canceled;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match parse_line(&line) {
                        Directive::Progress(percent, message) => {
                            let mut report = StageProgress::new(percent);
                            if let Some(message) = message {
                                report = report.with_message(message);
                            }
                            progress.report(report);
                        }
                        Directive::Artifact(path) => artifact = Some(path.to_string()),
                        Directive::Text(line) => text.push(line.to_string()),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(stage = %ctx.stage(), "Failed to read command stdout: {}", e);
                        break;
                    }
                },
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(stage = %ctx.stage(), "Failed to kill canceled command: {}", e);
                }
                return StageOutcome::Canceled;
            }
            status = child.wait() => status,
        };

        if let Some(handle) = stderr_handle {
            let _ = handle.await;
        }

        let status = match status {
            Ok(status) => status,
            Err(e) => return StageOutcome::internal(format!("failed to wait for command: {}", e)),
        };

        if !status.success() {
            let stderr = stderr_tail
                .lock()
                .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
                .unwrap_or_default();
            return classify_exit(status.code(), &stderr);
        }

        StageOutcome::Success(StageOutput {
            value: serde_json::json!({ "stdout": text }),
            artifact,
        })
    }
}
