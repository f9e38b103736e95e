//! External tool lookup and bounded subprocess execution.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::util::captured_text;

/// How to find one external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSpec {
    /// Name used in diagnostics
    pub label: &'static str,
    /// Environment variable holding an override
    pub env_var: &'static str,
    /// Names looked up on `PATH`, in order
    pub candidates: &'static [&'static str],
}

/// Resolve a tool binary.
///
/// Order: `configured` path, then the tool's environment override, then a
/// `PATH` lookup over its candidate names. An absolute override must exist;
/// a bare-name override that is not on `PATH` falls back to the candidates.
pub fn resolve_binary(spec: &ToolSpec, configured: Option<&Path>) -> Result<PathBuf, String> {
    let from_env = std::env::var_os(spec.env_var)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty());
    let (override_path, source) = match configured {
        Some(path) => (Some(path.to_path_buf()), "configured"),
        None => (from_env, spec.env_var),
    };

    if let Some(path) = override_path {
        if path.is_absolute() || path.components().count() > 1 {
            if path.exists() {
                return Ok(path);
            }
            return Err(format!(
                "{} {} binary {} does not exist",
                source,
                spec.label,
                path.display()
            ));
        }
        match which::which(&path) {
            Ok(resolved) => return Ok(resolved),
            Err(e) => debug!("{} override {} not on PATH: {}", spec.label, path.display(), e),
        }
    }

    let mut misses = Vec::with_capacity(spec.candidates.len());
    for candidate in spec.candidates {
        match which::which(candidate) {
            Ok(resolved) => return Ok(resolved),
            Err(e) => misses.push(format!("{candidate}: {e}")),
        }
    }
    Err(format!("{} binary not found: {}", spec.label, misses.join("; ")))
}

/// Deadline from a seconds setting; `0` means unbounded.
pub fn deadline(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_text(&self) -> String {
        captured_text(&self.stdout)
    }

    pub fn stderr_text(&self) -> String {
        captured_text(&self.stderr)
    }

    /// Standard error if non-empty, else standard output, else the exit status.
    pub fn diagnostic(&self) -> String {
        [self.stderr_text(), self.stdout_text()]
            .into_iter()
            .find(|text| !text.is_empty())
            .unwrap_or_else(|| format!("exited with {}", self.status))
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("{program} did not finish within {}s", .limit.as_secs())]
    TimedOut { program: String, limit: Duration },

    #[error("failed to collect output of {program}: {source}")]
    Wait { program: String, source: io::Error },
}

/// Run `command` to completion with piped output and an optional deadline.
///
/// The child is killed if the deadline passes or the future is dropped.
pub async fn run_bounded(
    mut command: Command,
    limit: Option<Duration>,
) -> Result<CommandOutput, RunError> {
    let program = Path::new(command.as_std().get_program())
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!("Running {:?}", command.as_std());

    let child = command.spawn().map_err(|source| RunError::Spawn {
        program: program.clone(),
        source,
    })?;
    let waiting = child.wait_with_output();

    let output = match limit {
        Some(limit) => tokio::time::timeout(limit, waiting)
            .await
            .map_err(|_| RunError::TimedOut {
                program: program.clone(),
                limit,
            })?,
        None => waiting.await,
    }
    .map_err(|source| RunError::Wait { program, source })?;

    Ok(CommandOutput {
        status: output.status,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING_TOOL: ToolSpec = ToolSpec {
        label: "helper",
        env_var: "DOCFILL_TEST_UNSET_OVERRIDE",
        candidates: &["docfill-no-such-binary-1", "docfill-no-such-binary-2"],
    };

    #[test]
    fn test_missing_absolute_override_is_reported() {
        let err =
            resolve_binary(&MISSING_TOOL, Some(Path::new("/nonexistent/docfill/tool"))).unwrap_err();
        assert!(err.contains("/nonexistent/docfill/tool"), "{err}");
        assert!(err.contains("does not exist"), "{err}");
    }

    #[test]
    fn test_existing_absolute_override_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tool");
        std::fs::write(&tool, b"").unwrap();
        assert_eq!(resolve_binary(&MISSING_TOOL, Some(&tool)).unwrap(), tool);
    }

    #[test]
    fn test_unresolvable_candidates_list_every_name() {
        let err = resolve_binary(&MISSING_TOOL, None).unwrap_err();
        assert!(err.starts_with("helper binary not found"), "{err}");
        assert!(err.contains("docfill-no-such-binary-1"));
        assert!(err.contains("docfill-no-such-binary-2"));
    }

    #[test]
    fn test_deadline_zero_is_unbounded() {
        assert_eq!(deadline(0), None);
        assert_eq!(deadline(5), Some(Duration::from_secs(5)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_bounded_captures_output() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = run_bounded(command, deadline(10)).await.unwrap();

        assert!(!output.success());
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout_text(), "out");
        assert_eq!(output.diagnostic(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_bounded_enforces_deadline() {
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 5"]);
        let err = run_bounded(command, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::TimedOut { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let command = Command::new("/nonexistent/docfill/tool");
        let err = run_bounded(command, None).await.unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
        assert!(err.to_string().starts_with("failed to start tool"));
    }
}
