//! Shell tool: danger filtering, timeout enforcement, output capping.

use std::process::Stdio;

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use bc_domain::{Error, Result};

/// Output is truncated to this many bytes.
pub const MAX_OUTPUT_BYTES: usize = 100 * 1024;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct ShellOutcome {
    pub output: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

/// Commands matching any of these patterns are refused outright.
fn danger_patterns() -> &'static regex::RegexSet {
    use std::sync::OnceLock;
    static SET: OnceLock<regex::RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        regex::RegexSet::new([
            r"rm\s+(-[a-zA-Z]*\s+)*-[a-zA-Z]*[rf][a-zA-Z]*\s+/\s*$",
            r"rm\s+(-[a-zA-Z]*\s+)*-[a-zA-Z]*[rf][a-zA-Z]*\s+/\s",
            // Command position only, so quoted mentions don't trip it.
            r"(?:^|[;&|]\s*|sudo\s+)mkfs",
            r"(?:^|[;&|]\s*|sudo\s+)dd\s+if=",
            r">\s*/dev/sd[a-z]",
            r"chmod\s+-R\s+777\s+/\s*$",
            r":\(\)\s*\{\s*:\|:\s*&\s*\}\s*;?\s*:",
        ])
        .expect("danger patterns compile")
    })
}

/// Check a command against the danger filter.
pub fn is_dangerous(command: &str) -> bool {
    danger_patterns().is_match(command)
}

/// Locate a coreutils timeout binary, preferring `timeout` over `gtimeout`.
fn timeout_binary() -> Option<&'static str> {
    use std::sync::OnceLock;
    static FOUND: OnceLock<Option<&'static str>> = OnceLock::new();
    *FOUND.get_or_init(|| {
        for candidate in ["timeout", "gtimeout"] {
            let found = std::process::Command::new("sh")
                .arg("-c")
                .arg(format!("command -v {candidate}"))
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false);
            if found {
                return Some(candidate);
            }
        }
        None
    })
}

/// Run a command through `sh -c`, enforcing the timeout via the coreutils
/// `timeout` binary when present, else a poll-kill fallback. Output
/// (stdout + stderr) is capped at [`MAX_OUTPUT_BYTES`].
pub async fn run_shell(command: &str, timeout_secs: u64) -> Result<ShellOutcome> {
    if is_dangerous(command) {
        return Err(Error::ToolBlocked(
            "dangerous command pattern detected".into(),
        ));
    }

    let timeout_secs = if timeout_secs == 0 {
        DEFAULT_TIMEOUT_SECS
    } else {
        timeout_secs
    };

    let mut cmd = match timeout_binary() {
        Some(bin) => {
            let mut c = Command::new(bin);
            c.arg(format!("{timeout_secs}s")).arg("sh").arg("-c").arg(command);
            c
        }
        None => {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        }
    };
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::ToolValidation(format!("failed to spawn: {e}")))?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let read_all = async {
        let mut out = Vec::new();
        let mut err = Vec::new();
        if let Some(ref mut s) = stdout {
            let _ = s.read_to_end(&mut out).await;
        }
        if let Some(ref mut s) = stderr {
            let _ = s.read_to_end(&mut err).await;
        }
        let status = child.wait().await;
        (out, err, status)
    };

    // The poll-kill fallback: even with the timeout binary in front we keep
    // an outer deadline with slack so a wedged child cannot hold the turn.
    let deadline = std::time::Duration::from_secs(timeout_secs + 5);
    let (out, err, status, timed_out) = match tokio::time::timeout(deadline, read_all).await {
        Ok((out, err, status)) => {
            let status = status
                .map_err(|e| Error::ToolValidation(format!("wait failed: {e}")))?;
            // coreutils timeout exits 124 on expiry.
            let timed_out = status.code() == Some(124);
            (out, err, status.code().unwrap_or(-1), timed_out)
        }
        Err(_) => {
            return Err(Error::ToolTimeout(format!(
                "command exceeded {timeout_secs}s"
            )));
        }
    };

    let mut combined = String::from_utf8_lossy(&out).into_owned();
    if !err.is_empty() {
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined.push_str(&String::from_utf8_lossy(&err));
    }

    let truncated = combined.len() > MAX_OUTPUT_BYTES;
    if truncated {
        let mut end = MAX_OUTPUT_BYTES;
        while !combined.is_char_boundary(end) {
            end -= 1;
        }
        combined.truncate(end);
    }

    Ok(ShellOutcome {
        output: combined,
        exit_code: status,
        truncated,
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn danger_filter_blocks_known_patterns() {
        assert!(is_dangerous("rm -rf /"));
        assert!(is_dangerous("sudo rm -rf / --no-preserve-root"));
        assert!(is_dangerous("mkfs.ext4 /dev/sda1"));
        assert!(is_dangerous("dd if=/dev/zero of=/dev/sda"));
        assert!(is_dangerous("echo x > /dev/sda"));
        assert!(is_dangerous("chmod -R 777 /"));
        assert!(is_dangerous(":(){ :|:& };:"));
    }

    #[test]
    fn danger_filter_allows_normal_commands() {
        assert!(!is_dangerous("ls -la"));
        assert!(!is_dangerous("rm -rf ./build"));
        assert!(!is_dangerous("grep -r 'dd if=' docs/"));
        assert!(!is_dangerous("chmod -R 777 ./tmp"));
    }

    #[tokio::test]
    async fn simple_command_returns_output() {
        let outcome = run_shell("echo hello", 10).await.unwrap();
        assert_eq!(outcome.output.trim(), "hello");
        assert_eq!(outcome.exit_code, 0);
        assert!(!outcome.truncated);
    }

    #[tokio::test]
    async fn exit_code_is_propagated() {
        let outcome = run_shell("exit 3", 10).await.unwrap();
        assert_eq!(outcome.exit_code, 3);
    }

    #[tokio::test]
    async fn dangerous_command_is_rejected_before_spawn() {
        let err = run_shell("rm -rf /", 10).await.unwrap_err();
        assert!(matches!(err, Error::ToolBlocked(_)));
    }

    #[tokio::test]
    async fn stderr_is_captured() {
        let outcome = run_shell("echo oops 1>&2", 10).await.unwrap();
        assert!(outcome.output.contains("oops"));
    }
}
