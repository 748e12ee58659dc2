//! One-shot subprocess runner for backend invocations.
//!
//! Every command runs as the leader of a fresh process group, so a deadline
//! or an output overflow takes down the whole subtree (wrapper scripts, node
//! workers, shells) with a single group kill instead of orphaning it.

use crate::error::{ExitReason, OutputStream, RunError};
use crate::logging::truncate_for_log;

use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWriteExt as _};
use tokio::process::{Child, Command};
use tokio::time::Instant;

/// Ceiling on bytes accumulated from either stdout or stderr.
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Maximum characters of stderr embedded in an abnormal-exit error.
const MAX_STDERR_REPORT_CHARS: usize = 8 * 1024;

/// How long to wait for a killed child to be reaped.
const REAP_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Per-run options for [`run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Wall-clock allowance for this run.
    pub timeout: Duration,
    /// Payload written to stdin before it is closed. `None` gives the child an
    /// already-closed stdin.
    pub input: Option<String>,
    /// Per-stream output ceiling.
    pub max_output_bytes: usize,
}

impl RunOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            input: None,
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }
}

/// Output of a process that exited cleanly.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// Stdout when it has content, otherwise stderr, with trailing whitespace trimmed.
    pub output: String,
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,
    pub duration: Duration,
}

enum CollectError {
    Overflow(OutputStream),
    Io(std::io::Error),
}

/// Run `command` with `args` to completion, enforcing the timeout and output
/// ceiling from `options`.
pub async fn run(
    command: &str,
    args: &[String],
    options: RunOptions,
) -> Result<ProcessResult, RunError> {
    let started = Instant::now();
    let deadline = started + options.timeout;
    let timeout_ms = options.timeout.as_millis() as u64;

    let mut cmd = Command::new(command);
    cmd.args(args)
        .env("NO_COLOR", "1")
        .stdin(if options.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
        command: command.to_string(),
        source,
    })?;
    let pid = child.id();

    tracing::debug!(command, ?pid, timeout_ms, "spawned backend process");

    if let Some(payload) = options.input
        && let Some(mut stdin) = child.stdin.take()
    {
        let command_name = command.to_string();
        tokio::spawn(async move {
            if let Err(error) = stdin.write_all(payload.as_bytes()).await {
                tracing::debug!(command = %command_name, %error, "failed to write prompt to stdin");
            }
            if let Err(error) = stdin.shutdown().await {
                tracing::debug!(command = %command_name, %error, "failed to close stdin");
            }
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| missing_pipe(command, "stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| missing_pipe(command, "stderr"))?;
    let limit = options.max_output_bytes;

    let collected = tokio::time::timeout_at(deadline, async {
        tokio::try_join!(
            read_capped(stdout, OutputStream::Stdout, limit),
            read_capped(stderr, OutputStream::Stderr, limit),
            async { child.wait().await.map_err(CollectError::Io) },
        )
    })
    .await;

    let (stdout, stderr, status) = match collected {
        Ok(Ok(parts)) => parts,
        Ok(Err(CollectError::Overflow(stream))) => {
            tracing::warn!(command, ?pid, %stream, limit, "output ceiling exceeded, killing process group");
            terminate(&mut child, pid).await;
            return Err(RunError::OutputLimit {
                command: command.to_string(),
                stream,
                limit,
            });
        }
        Ok(Err(CollectError::Io(source))) => {
            terminate(&mut child, pid).await;
            return Err(RunError::Io {
                command: command.to_string(),
                source,
            });
        }
        Err(_elapsed) => {
            tracing::warn!(command, ?pid, timeout_ms, "deadline reached, killing process group");
            terminate(&mut child, pid).await;
            return Err(RunError::Timeout {
                command: command.to_string(),
                timeout_ms,
            });
        }
    };

    let duration = started.elapsed();
    let stderr_text = String::from_utf8_lossy(&stderr);

    if !status.success() {
        let reason = exit_reason(status);
        tracing::debug!(command, %reason, duration_ms = duration.as_millis() as u64, "backend process failed");
        return Err(RunError::Exit {
            command: command.to_string(),
            reason,
            stderr: truncate_for_report(stderr_text.trim(), MAX_STDERR_REPORT_CHARS),
        });
    }

    let stdout_text = String::from_utf8_lossy(&stdout);
    let selected = if stdout_text.trim().is_empty() {
        &stderr_text
    } else {
        &stdout_text
    };

    Ok(ProcessResult {
        output: selected.trim_end().to_string(),
        stdout_bytes: stdout.len(),
        stderr_bytes: stderr.len(),
        duration,
    })
}

async fn read_capped<R>(
    mut reader: R,
    stream: OutputStream,
    limit: usize,
) -> Result<Vec<u8>, CollectError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        let read = reader.read(&mut chunk).await.map_err(CollectError::Io)?;
        if read == 0 {
            return Ok(buffer);
        }
        if buffer.len() + read > limit {
            return Err(CollectError::Overflow(stream));
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

/// Kill the child's whole process group and reap the leader.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        signal_process_group(pid, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;

    // Covers platforms without process groups and a leader that is somehow
    // outside its own group.
    let _ = child.start_kill();

    if tokio::time::timeout(REAP_GRACE, child.wait()).await.is_err() {
        tracing::warn!(?pid, "killed process was not reaped in time");
    }
}

/// Send `signal` to every process in the group led by `pid`.
#[cfg(unix)]
pub fn signal_process_group(pid: u32, signal: i32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group.
    let result = unsafe { libc::kill(-pgid, signal) };
    if result != 0 {
        let error = std::io::Error::last_os_error();
        if error.raw_os_error() != Some(libc::ESRCH) {
            tracing::debug!(pid, signal, %error, "failed to signal process group");
        }
    }
}

fn exit_reason(status: ExitStatus) -> ExitReason {
    if let Some(code) = status.code() {
        return ExitReason::Code(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(signal) = status.signal() {
            return ExitReason::Signal(signal_name(signal));
        }
    }

    ExitReason::Code(-1)
}

/// Conventional name for a signal number.
pub fn signal_name(signal: i32) -> String {
    #[cfg(unix)]
    {
        let name = match signal {
            libc::SIGHUP => "SIGHUP",
            libc::SIGINT => "SIGINT",
            libc::SIGQUIT => "SIGQUIT",
            libc::SIGILL => "SIGILL",
            libc::SIGABRT => "SIGABRT",
            libc::SIGBUS => "SIGBUS",
            libc::SIGFPE => "SIGFPE",
            libc::SIGKILL => "SIGKILL",
            libc::SIGSEGV => "SIGSEGV",
            libc::SIGPIPE => "SIGPIPE",
            libc::SIGALRM => "SIGALRM",
            libc::SIGTERM => "SIGTERM",
            _ => return signal.to_string(),
        };
        name.to_string()
    }
    #[cfg(not(unix))]
    {
        signal.to_string()
    }
}

fn missing_pipe(command: &str, stream: &str) -> RunError {
    RunError::Io {
        command: command.to_string(),
        source: std::io::Error::other(format!("{stream} was not captured")),
    }
}

/// Keep the first `max_chars` characters, noting how many bytes were dropped.
fn truncate_for_report(value: &str, max_chars: usize) -> String {
    let (kept, truncated) = truncate_for_log(value, max_chars);
    if !truncated {
        return kept.to_string();
    }

    let omitted = value.len() - kept.len();
    format!("{kept}\n...[{omitted} bytes truncated]")
}

/// True when `pid` no longer exists or is only a zombie waiting to be reaped.
#[cfg(all(test, target_os = "linux"))]
pub(crate) fn process_is_gone(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return true;
    };
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.trim_start().chars().next())
        .is_some_and(|state| state == 'Z' || state == 'X')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    fn options(timeout_ms: u64) -> RunOptions {
        RunOptions::new(Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn returns_stdout_without_trailing_whitespace() {
        let result = run("sh", &sh("printf 'hello\\n\\n  '"), options(5_000))
            .await
            .expect("clean exit");

        assert_eq!(result.output, "hello");
        assert_eq!(result.stdout_bytes, 9);
        assert_eq!(result.stderr_bytes, 0);
    }

    #[tokio::test]
    async fn writes_input_and_closes_stdin() {
        let result = run("cat", &[], options(5_000).with_input("what is 2+2?"))
            .await
            .expect("cat exits after EOF");

        assert_eq!(result.output, "what is 2+2?");
    }

    #[tokio::test]
    async fn closes_stdin_when_no_input_given() {
        let started = std::time::Instant::now();
        let result = run("cat", &[], options(5_000))
            .await
            .expect("cat sees EOF immediately");

        assert_eq!(result.output, "");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn falls_back_to_stderr_when_stdout_is_blank() {
        let result = run("sh", &sh("echo '  '; echo 'from stderr' >&2"), options(5_000))
            .await
            .expect("clean exit");

        assert_eq!(result.output, "from stderr");
        assert!(result.stderr_bytes > 0);
    }

    #[tokio::test]
    async fn disables_colored_output() {
        let result = run("sh", &sh("printf '%s' \"$NO_COLOR\""), options(5_000))
            .await
            .expect("clean exit");

        assert_eq!(result.output, "1");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_code_and_stderr() {
        let error = run("sh", &sh("echo 'model not found' >&2; exit 3"), options(5_000))
            .await
            .expect_err("non-zero exit");

        match error {
            RunError::Exit {
                command,
                reason,
                stderr,
            } => {
                assert_eq!(command, "sh");
                assert_eq!(reason, ExitReason::Code(3));
                assert_eq!(stderr, "model not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn signal_termination_is_named() {
        let error = run("sh", &sh("kill -TERM $$"), options(5_000))
            .await
            .expect_err("killed by signal");

        match error {
            RunError::Exit { reason, .. } => {
                assert_eq!(reason, ExitReason::Signal("SIGTERM".into()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_executable_fails_to_start() {
        let error = run("/nonexistent/mcp-agents-backend", &[], options(5_000))
            .await
            .expect_err("spawn failure");

        assert!(matches!(error, RunError::Spawn { .. }));
        assert!(error.to_string().starts_with("failed to start"));
    }

    #[tokio::test]
    async fn stdout_overflow_names_stdout() {
        let error = run(
            "sh",
            &sh("head -c 4096 /dev/zero"),
            options(5_000).with_max_output_bytes(1024),
        )
        .await
        .expect_err("overflow");

        match error {
            RunError::OutputLimit { stream, limit, .. } => {
                assert_eq!(stream, OutputStream::Stdout);
                assert_eq!(limit, 1024);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn stderr_overflow_names_stderr() {
        let error = run(
            "sh",
            &sh("echo small; head -c 4096 /dev/zero >&2"),
            options(5_000).with_max_output_bytes(1024),
        )
        .await
        .expect_err("overflow");

        match error {
            RunError::OutputLimit { stream, .. } => assert_eq!(stream, OutputStream::Stderr),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn endless_output_is_cut_off_before_the_deadline() {
        let started = std::time::Instant::now();
        let error = run(
            "sh",
            &sh("yes"),
            options(30_000).with_max_output_bytes(64 * 1024),
        )
        .await
        .expect_err("overflow");

        assert!(matches!(error, RunError::OutputLimit { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_the_whole_process_group() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("grandchild.pid");
        let args = vec![
            "-c".to_string(),
            "sleep 30 & echo $! > \"$1\"; wait".to_string(),
            "sh".to_string(),
            pid_file.display().to_string(),
        ];

        let started = std::time::Instant::now();
        let error = run("sh", &args, options(200)).await.expect_err("timeout");
        assert!(error.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(3));

        let grandchild: u32 = std::fs::read_to_string(&pid_file)
            .expect("pid file written")
            .trim()
            .parse()
            .expect("numeric pid");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(process_is_gone(grandchild), "grandchild {grandchild} survived");
    }

    #[test]
    fn names_common_signals() {
        #[cfg(unix)]
        {
            assert_eq!(signal_name(libc::SIGKILL), "SIGKILL");
            assert_eq!(signal_name(libc::SIGINT), "SIGINT");
        }
        assert_eq!(signal_name(250), "250");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(
            truncate_for_report("abc→def", 4),
            "abc→\n...[3 bytes truncated]"
        );
        assert_eq!(truncate_for_report("short", 10), "short");
    }
}
