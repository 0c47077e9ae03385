//! `execute_shell`: runs a command via `bash -c`, killing the whole
//! process group on cancellation or timeout. Grounded on
//! `deepseek_tools::shell::PlatformShellRunner`, narrowed from its
//! sh/bash/cmd/powershell candidate chain to bash alone (NatShell is
//! POSIX-shell-scoped) and generalized to kill the process *group* rather
//! than only the direct child, since a child that forks (e.g. `sleep 999 &`)
//! would otherwise survive a timeout.

use natshell_core::CancelToken;
use std::collections::HashMap;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const LONG_RUNNING_TIMEOUT: Duration = Duration::from_secs(600);
const SUDO_CACHE_TTL: Duration = Duration::from_secs(300);

const LONG_RUNNING_MARKERS: &[&str] = &[
    "git clone",
    "npm install",
    "npm ci",
    "yarn install",
    "pip install",
    "cargo build",
    "cargo test",
    "docker build",
    "docker pull",
    "apt-get install",
    "apt install",
];

#[derive(Debug, Clone)]
pub struct ShellOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub cancelled: bool,
    /// Set when the command looked like a `sudo` invocation and failed for
    /// lack of a cached password — the agent loop's `AWAIT_SUDO` branch
    /// prompts the user and replays the command once with a password.
    pub needs_sudo_password: bool,
}

/// Whether `cmd` starts (ignoring leading whitespace) with a bare `sudo`
/// invocation.
pub fn is_sudo_command(cmd: &str) -> bool {
    let trimmed = cmd.trim_start();
    trimmed == "sudo" || trimmed.starts_with("sudo ") || trimmed.starts_with("sudo\t")
}

fn sudo_password_was_required(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("password is required") || lower.contains("a password is required") || lower.contains("sudo: no tty")
}

/// Caches a sudo password in memory for the lifetime of the session so the
/// user isn't re-prompted on every elevated command; the cache self-expires
/// so a stale password isn't replayed indefinitely.
#[derive(Default)]
pub struct SudoCache {
    entry: Mutex<Option<(String, Instant)>>,
}

impl SudoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<String> {
        let mut guard = self.entry.lock().unwrap();
        match guard.as_ref() {
            Some((password, cached_at)) if cached_at.elapsed() < SUDO_CACHE_TTL => {
                Some(password.clone())
            }
            _ => {
                *guard = None;
                None
            }
        }
    }

    pub fn set(&self, password: String) {
        *self.entry.lock().unwrap() = Some((password, Instant::now()));
    }

    pub fn clear(&self) {
        *self.entry.lock().unwrap() = None;
    }
}

pub fn looks_long_running(cmd: &str) -> bool {
    let lower = cmd.to_lowercase();
    LONG_RUNNING_MARKERS.iter().any(|marker| lower.contains(marker))
}

pub fn timeout_for(cmd: &str) -> Duration {
    if looks_long_running(cmd) {
        LONG_RUNNING_TIMEOUT
    } else {
        DEFAULT_TIMEOUT
    }
}

/// Strip environment variables that look like credentials before the child
/// inherits them. `AWS_*` and `GITHUB_TOKEN` are named explicitly; anything
/// else containing KEY/TOKEN/SECRET/PASSWORD/CREDENTIAL (case-insensitive)
/// is caught by the general rule.
pub fn filtered_env() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(key, _)| !is_secret_like(key))
        .collect()
}

fn is_secret_like(name: &str) -> bool {
    if name.starts_with("AWS_") || name == "GITHUB_TOKEN" {
        return true;
    }
    let upper = name.to_uppercase();
    ["KEY", "TOKEN", "SECRET", "PASSWORD", "CREDENTIAL"]
        .iter()
        .any(|marker| upper.contains(marker))
}

pub fn run(
    cmd: &str,
    cwd: &Path,
    timeout: Duration,
    cancel: &CancelToken,
    sudo_password: Option<&str>,
) -> std::io::Result<ShellOutcome> {
    // `sudo` reads from the tty by default; with a cached password the
    // first `sudo` invocation is rewritten to `sudo -S` so it reads from
    // stdin instead, which is what we actually have to give it.
    let rewritten;
    let effective_cmd = if sudo_password.is_some() && is_sudo_command(cmd) && !cmd.contains("sudo -S") {
        rewritten = cmd.replacen("sudo", "sudo -S", 1);
        rewritten.as_str()
    } else {
        cmd
    };

    let mut command = Command::new("bash");
    command.arg("-c").arg(effective_cmd);
    command.current_dir(cwd);
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    if sudo_password.is_some() {
        command.stdin(Stdio::piped());
    } else {
        command.stdin(Stdio::null());
    }
    command.env_clear();
    command.envs(filtered_env());
    command.env("LC_ALL", "C");

    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;
        command.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }

    let mut child = command.spawn()?;
    if let Some(password) = sudo_password {
        use std::io::Write;
        if let Some(stdin) = child.stdin.take() {
            let mut stdin = stdin;
            let _ = writeln!(stdin, "{password}");
        }
    }
    let pid = child.id() as i32;
    let deadline = Instant::now() + timeout;

    loop {
        if cancel.is_cancelled() {
            kill_process_group(pid);
            let output = child.wait_with_output()?;
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Ok(ShellOutcome {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                needs_sudo_password: is_sudo_command(cmd)
                    && sudo_password.is_none()
                    && sudo_password_was_required(&stderr),
                stderr,
                timed_out: false,
                cancelled: true,
            });
        }

        match child.try_wait()? {
            Some(status) => {
                let output = child.wait_with_output()?;
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                return Ok(ShellOutcome {
                    exit_code: status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    needs_sudo_password: is_sudo_command(cmd)
                        && sudo_password.is_none()
                        && sudo_password_was_required(&stderr),
                    stderr,
                    timed_out: false,
                    cancelled: false,
                });
            }
            None => {
                if Instant::now() >= deadline {
                    kill_process_group(pid);
                    let output = child.wait_with_output()?;
                    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                    return Ok(ShellOutcome {
                        exit_code: output.status.code(),
                        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                        needs_sudo_password: false,
                        stderr,
                        timed_out: true,
                        cancelled: false,
                    });
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: i32) {
    unsafe {
        libc::killpg(pid, libc::SIGTERM);
    }
    std::thread::sleep(Duration::from_millis(200));
    unsafe {
        libc::killpg(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: i32) {}
