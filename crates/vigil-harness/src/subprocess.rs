//! A single wrapper all external-process invocations go through: explicit
//! timeout, byte-capped stdout/stderr capture, and a three-way outcome
//! (`not_found`, `timed_out`, `exited`) instead of ad-hoc `io::Error`
//! matching at every call site.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Internal timeout exit code, matching the conventional shell timeout
/// sentinel so logs read the same whether a command failed or hung.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, thiserror::Error)]
pub enum SubprocessError {
    #[error("{program} not found on PATH")]
    NotFound { program: String },
    #[error("failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct SubprocessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<std::path::PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub timeout: Duration,
    pub byte_cap: usize,
}

impl SubprocessSpec {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
            timeout: Duration::from_secs(60),
            byte_cap: 1_000_000,
        }
    }

    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, text: impl Into<String>) -> Self {
        self.stdin = Some(text.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn byte_cap(mut self, cap: usize) -> Self {
        self.byte_cap = cap;
        self
    }
}

/// Run a subprocess to completion per `spec`, capturing output up to
/// `byte_cap` bytes per stream and enforcing `timeout`.
pub async fn run(spec: SubprocessSpec) -> Result<CapturedOutput, SubprocessError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    for (k, v) in &spec.env {
        cmd.env(k, v);
    }
    cmd.stdin(if spec.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    debug!(program = %spec.program, args = ?spec.args, "spawning subprocess");

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SubprocessError::NotFound {
                program: spec.program.clone(),
            });
        }
        Err(e) => {
            return Err(SubprocessError::SpawnFailed {
                program: spec.program.clone(),
                source: e,
            });
        }
    };

    if let (Some(text), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
        let _ = stdin.write_all(text.as_bytes()).await;
        drop(stdin);
    }

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let capture = async {
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let (stdout_truncated, stderr_truncated) = tokio::join!(
            read_capped(&mut stdout_pipe, &mut stdout_buf, spec.byte_cap),
            read_capped(&mut stderr_pipe, &mut stderr_buf, spec.byte_cap),
        );
        let status = child.wait().await;
        (stdout_buf, stderr_buf, stdout_truncated, stderr_truncated, status)
    };

    match tokio::time::timeout(spec.timeout, capture).await {
        Ok((stdout_buf, stderr_buf, stdout_truncated, stderr_truncated, status)) => {
            let exit_code = status.ok().and_then(|s| s.code());
            Ok(CapturedOutput {
                stdout: String::from_utf8_lossy(&stdout_buf).to_string(),
                stderr: String::from_utf8_lossy(&stderr_buf).to_string(),
                exit_code,
                timed_out: false,
                stdout_truncated,
                stderr_truncated,
            })
        }
        Err(_) => {
            warn!(program = %spec.program, timeout = ?spec.timeout, "subprocess timed out");
            let _ = child.start_kill();
            let _ = child.wait().await;
            Ok(CapturedOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(TIMEOUT_EXIT_CODE),
                timed_out: true,
                stdout_truncated: false,
                stderr_truncated: false,
            })
        }
    }
}

async fn read_capped(
    pipe: &mut Option<impl tokio::io::AsyncRead + Unpin>,
    buf: &mut Vec<u8>,
    cap: usize,
) -> bool {
    let Some(pipe) = pipe.as_mut() else {
        return false;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => return false,
            Ok(n) => {
                if buf.len() + n > cap {
                    let remaining = cap.saturating_sub(buf.len());
                    buf.extend_from_slice(&chunk[..remaining]);
                    return true;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            Err(_) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let spec = SubprocessSpec::new("definitely-not-a-real-binary-xyz", Vec::<String>::new());
        let err = run(spec).await.unwrap_err();
        assert!(matches!(err, SubprocessError::NotFound { .. }));
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let spec = SubprocessSpec::new("printf", vec!["hello"]);
        let out = run(spec).await.unwrap();
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.exit_code, Some(0));
        assert!(out.success());
    }

    #[tokio::test]
    async fn timeout_produces_sentinel_exit_code() {
        let spec = SubprocessSpec::new("sleep", vec!["5"]).timeout(Duration::from_millis(50));
        let out = run(spec).await.unwrap();
        assert!(out.timed_out);
        assert_eq!(out.exit_code, Some(TIMEOUT_EXIT_CODE));
        assert!(!out.success());
    }

    #[tokio::test]
    async fn stdin_is_piped_through() {
        let spec = SubprocessSpec::new("cat", Vec::<String>::new()).stdin("from the prompt\n");
        let out = run(spec).await.unwrap();
        assert_eq!(out.stdout, "from the prompt\n");
    }

    #[tokio::test]
    async fn byte_cap_truncates_large_output() {
        let spec = SubprocessSpec::new("yes", Vec::<String>::new())
            .timeout(Duration::from_millis(200))
            .byte_cap(100);
        let out = run(spec).await.unwrap();
        assert!(out.stdout.len() <= 100);
    }
}
