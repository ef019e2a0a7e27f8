use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ProcessError;
use crate::fanout::FanOutRegistry;
use crate::types::{CorrelationKey, RunResult, StreamEvent};

const DEFAULT_OUTPUT_CAP_BYTES: usize = 8 * 1024 * 1024;
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
enum Source {
    Stdout,
    Stderr,
}

struct Line {
    source: Source,
    text: String,
}

/// Spawns `cmd` under the host shell (`sh -c`) for correct quoting,
/// draining stdout/stderr concurrently, applying `timeout`, and capping
/// combined output at `output_cap_bytes` (truncating with a marker past
/// the cap). General-purpose: callers outside the IaC lifecycle also use
/// it, which is why it supports a per-call output cap and cancellation.
pub async fn run(
    cmd: &str,
    workdir: &std::path::Path,
    env: &HashMap<String, String>,
    timeout: Duration,
    output_cap_bytes: Option<usize>,
    cancel: CancellationToken,
) -> Result<RunResult, ProcessError> {
    let cap = output_cap_bytes.unwrap_or(DEFAULT_OUTPUT_CAP_BYTES);
    let started = Instant::now();

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(cmd)
        .current_dir(workdir)
        .envs(env)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = command.spawn().map_err(|e| ProcessError::Spawn(e.to_string()))?;
    let pid = child.id();

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Line>();

    let tx1 = tx.clone();
    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(text)) = lines.next_line().await {
            let _ = tx1.send(Line { source: Source::Stdout, text });
        }
    });
    let tx2 = tx.clone();
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(text)) = lines.next_line().await {
            let _ = tx2.send(Line { source: Source::Stderr, text });
        }
    });
    drop(tx);

    let mut stdout_buf = String::new();
    let mut stderr_buf = String::new();
    let mut total_bytes = 0usize;
    let mut truncated = false;

    let collect = async {
        while let Some(line) = rx.recv().await {
            total_bytes += line.text.len() + 1;
            if total_bytes > cap {
                truncated = true;
                continue;
            }
            match line.source {
                Source::Stdout => {
                    stdout_buf.push_str(&line.text);
                    stdout_buf.push('\n');
                }
                Source::Stderr => {
                    stderr_buf.push_str(&line.text);
                    stderr_buf.push('\n');
                }
            }
        }
    };

    let outcome = tokio::select! {
        _ = collect => Outcome::Drained,
        _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
        _ = cancel.cancelled() => Outcome::Cancelled,
    };

    stdout_task.abort();
    stderr_task.abort();

    if truncated {
        stdout_buf.push_str("\n[... output truncated, exceeded cap ...]\n");
    }

    match outcome {
        Outcome::Drained => {
            let status = child.wait().await.map_err(|e| ProcessError::Internal(e.to_string()))?;
            let exit_code = status.code().unwrap_or(-1);
            Ok(RunResult {
                exit_code,
                stdout: stdout_buf,
                stderr: stderr_buf,
                duration_ms: started.elapsed().as_millis() as i64,
                truncated,
            })
        }
        Outcome::TimedOut => {
            graceful_kill(pid, &mut child).await;
            Err(ProcessError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
                partial_output: format!("{stdout_buf}{stderr_buf}"),
            })
        }
        Outcome::Cancelled => {
            graceful_kill(pid, &mut child).await;
            Err(ProcessError::Cancelled)
        }
    }
}

enum Outcome {
    Drained,
    TimedOut,
    Cancelled,
}

/// SIGTERM, then SIGKILL after a grace period if the process is still
/// alive. `pid` is `None` on platforms where the child id could not be
/// read (already reaped) — falls back to tokio's own `kill()` (SIGKILL).
async fn graceful_kill(pid: Option<u32>, child: &mut tokio::process::Child) {
    if let Some(pid) = pid {
        let nix_pid = Pid::from_raw(pid as i32);
        if signal::kill(nix_pid, Signal::SIGTERM).is_ok() {
            let grace = tokio::time::sleep(KILL_GRACE);
            tokio::select! {
                _ = child.wait() => return,
                _ = grace => {}
            }
        }
    }
    let _ = child.kill().await;
}

/// Streaming variant of [`run`]: forwards each line to `registry` under
/// `key` as it arrives, publishing a terminal `End`/`Error` event on
/// completion.
pub async fn run_streaming(
    cmd: &str,
    workdir: &std::path::Path,
    env: &HashMap<String, String>,
    timeout: Duration,
    output_cap_bytes: Option<usize>,
    cancel: CancellationToken,
    registry: &FanOutRegistry,
    key: &CorrelationKey,
) -> Result<i32, ProcessError> {
    let cap = output_cap_bytes.unwrap_or(DEFAULT_OUTPUT_CAP_BYTES);
    let started = Instant::now();

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(cmd)
        .current_dir(workdir)
        .envs(env)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = command.spawn().map_err(|e| ProcessError::Spawn(e.to_string()))?;
    let pid = child.id();

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Line>();
    let tx1 = tx.clone();
    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(text)) = lines.next_line().await {
            let _ = tx1.send(Line { source: Source::Stdout, text });
        }
    });
    let tx2 = tx.clone();
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(text)) = lines.next_line().await {
            let _ = tx2.send(Line { source: Source::Stderr, text });
        }
    });
    drop(tx);

    let mut final_buf = String::new();
    let mut total_bytes = 0usize;

    let collect = async {
        while let Some(line) = rx.recv().await {
            total_bytes += line.text.len() + 1;
            let event = match line.source {
                Source::Stdout => StreamEvent::Stdout { text: line.text.clone(), at: Utc::now() },
                Source::Stderr => StreamEvent::Stderr { text: line.text.clone(), at: Utc::now() },
            };
            registry.publish(key, event).await;
            if total_bytes <= cap {
                final_buf.push_str(&line.text);
                final_buf.push('\n');
            }
            debug!(operation_kind = %key.operation_kind, "{}", line.text);
        }
    };

    let outcome = tokio::select! {
        _ = collect => Outcome::Drained,
        _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
        _ = cancel.cancelled() => Outcome::Cancelled,
    };

    stdout_task.abort();
    stderr_task.abort();

    match outcome {
        Outcome::Drained => {
            let status = child.wait().await.map_err(|e| ProcessError::Internal(e.to_string()))?;
            let exit_code = status.code().unwrap_or(-1);
            registry
                .publish(key, StreamEvent::End { exit_code, final_output: final_buf, at: Utc::now() })
                .await;
            registry.retire(key).await;
            Ok(exit_code)
        }
        Outcome::TimedOut => {
            graceful_kill(pid, &mut child).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            warn!(elapsed_ms, "streamed process timed out");
            registry
                .publish(key, StreamEvent::Error { message: "timeout".into(), at: Utc::now() })
                .await;
            registry.retire(key).await;
            Err(ProcessError::Timeout { elapsed_ms, partial_output: final_buf })
        }
        Outcome::Cancelled => {
            graceful_kill(pid, &mut child).await;
            registry
                .publish(key, StreamEvent::Error { message: "cancelled".into(), at: Utc::now() })
                .await;
            registry.retire(key).await;
            Err(ProcessError::Cancelled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_returns_exit_code_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(
            "echo hello; echo world 1>&2",
            dir.path(),
            &HashMap::new(),
            Duration::from_secs(5),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
        assert!(result.stderr.contains("world"));
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = run("exit 7", dir.path(), &HashMap::new(), Duration::from_secs(5), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 7);
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(
            "sleep 30",
            dir.path(),
            &HashMap::new(),
            Duration::from_millis(200),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_token_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel2.cancel();
        });
        let err = run("sleep 30", dir.path(), &HashMap::new(), Duration::from_secs(30), None, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled));
    }

    #[tokio::test]
    async fn output_beyond_cap_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(
            "for i in $(seq 1 200); do echo aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa; done",
            dir.path(),
            &HashMap::new(),
            Duration::from_secs(5),
            Some(100),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(result.truncated);
        assert!(result.stdout.contains("truncated"));
    }
}
