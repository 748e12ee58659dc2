//! Pass-through session for backends that speak MCP themselves.
//!
//! The child inherits our stdin and stdout, so protocol frames flow straight
//! between client and child. We keep only its stderr, which is relayed into
//! our own logs, and we stay alive exactly as long as it does.

use crate::backend::PassthroughConfig;
use crate::error::PassthroughError;
use crate::process::signal_name;
#[cfg(unix)]
use crate::process::signal_process_group;

use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::{ChildStderr, Command};

/// How long a forwarded termination signal may take before the child's group
/// is killed outright.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bound on waiting for the stderr relay after the child is gone. A
/// descendant can hold the pipe open past the child's exit.
const STDERR_DRAIN: Duration = Duration::from_millis(500);

pub struct PassthroughSession {
    config: PassthroughConfig,
    grace: Duration,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Signalled(i32),
}

impl PassthroughSession {
    pub fn new(config: PassthroughConfig) -> Self {
        Self {
            config,
            grace: SHUTDOWN_GRACE,
        }
    }

    /// Override how long a forwarded signal may take before the group is killed.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run the child to completion and return the exit code the host should
    /// exit with.
    pub async fn run(self) -> Result<i32, PassthroughError> {
        let args = self.config.build_args();
        let command_name = self.config.command.as_str();

        #[cfg(unix)]
        let mut signals = TerminationSignals::install()?;

        let mut command = Command::new(command_name);
        command
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .env("NO_COLOR", "1")
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| PassthroughError::Spawn {
            command: command_name.to_string(),
            source,
        })?;
        let pid = child.id();

        tracing::info!(command = command_name, ?args, pid, "started pass-through session");

        let relay = child.stderr.take().map(|stderr| tokio::spawn(relay_stderr(stderr)));

        #[cfg(unix)]
        let received = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            signal = signals.recv() => Outcome::Signalled(signal),
        };
        #[cfg(not(unix))]
        let received = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::signal::ctrl_c() => Outcome::Signalled(INTERRUPT_SIGNAL),
        };

        let code = match received {
            Outcome::Exited(status) => {
                let status = status.map_err(PassthroughError::Wait)?;
                let code = exit_code_for_status(status);
                tracing::info!(%status, code, "pass-through session exited");
                code
            }
            Outcome::Signalled(signal) => {
                tracing::info!(
                    signal = %signal_name(signal),
                    pid,
                    "forwarding termination signal to pass-through session"
                );
                forward(&mut child, pid, signal);

                match tokio::time::timeout(self.grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        let code = exit_code_for_status(status);
                        tracing::info!(%status, code, "pass-through session exited after signal");
                        code
                    }
                    Ok(Err(error)) => return Err(PassthroughError::Wait(error)),
                    Err(_) => {
                        tracing::warn!(
                            grace_ms = self.grace.as_millis() as u64,
                            pid,
                            "pass-through session ignored signal, killing"
                        );
                        kill(&mut child, pid).await;
                        128 + signal
                    }
                }
            }
        };

        if let Some(relay) = relay {
            let _ = tokio::time::timeout(STDERR_DRAIN, relay).await;
        }

        Ok(code)
    }
}

#[cfg(not(unix))]
const INTERRUPT_SIGNAL: i32 = 2;

#[cfg(unix)]
fn forward(_child: &mut tokio::process::Child, pid: Option<u32>, signal: i32) {
    if let Some(pid) = pid {
        signal_process_group(pid, signal);
    }
}

#[cfg(not(unix))]
fn forward(child: &mut tokio::process::Child, _pid: Option<u32>, _signal: i32) {
    let _ = child.start_kill();
}

async fn kill(child: &mut tokio::process::Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        signal_process_group(pid, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(error) = child.kill().await {
        tracing::debug!(%error, "pass-through child already reaped");
    }
}

/// Relay the child's stderr into our log, one line at a time.
async fn relay_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !line.trim().is_empty() {
                    tracing::info!(target: "codex", "{line}");
                }
            }
            Ok(None) => break,
            Err(error) => {
                tracing::debug!(%error, "stopped relaying pass-through stderr");
                break;
            }
        }
    }
}

/// Host exit code mirroring how the child ended: its own code, or
/// `128 + signal` when it was killed by one.
pub fn exit_code_for_status(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

#[cfg(unix)]
struct TerminationSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    fn install() -> Result<Self, PassthroughError> {
        use tokio::signal::unix::{SignalKind, signal};

        let listen = |kind: SignalKind, name: &'static str| {
            signal(kind).map_err(|source| PassthroughError::Signal {
                signal: name,
                source,
            })
        };

        Ok(Self {
            interrupt: listen(SignalKind::interrupt(), "SIGINT")?,
            terminate: listen(SignalKind::terminate(), "SIGTERM")?,
            hangup: listen(SignalKind::hangup(), "SIGHUP")?,
        })
    }

    async fn recv(&mut self) -> i32 {
        tokio::select! {
            _ = self.interrupt.recv() => libc::SIGINT,
            _ = self.terminate.recv() => libc::SIGTERM,
            _ = self.hangup.recv() => libc::SIGHUP,
        }
    }
}
