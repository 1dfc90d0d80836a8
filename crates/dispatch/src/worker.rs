use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::protocol::READY_LINE;
use crate::types::{DispatchError, PoolConfig};

/// A single decode worker managing one child process.
///
/// Each worker owns one child holding its own model replica and talks to it
/// with JSON lines over stdin/stdout. The child's stderr is inherited so its
/// logs reach the parent's terminal.
pub struct DecodeProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    tasks_handled: u64,
}

impl DecodeProcess {
    /// Spawn a worker and wait for its `ready.` line.
    pub async fn spawn(config: &PoolConfig) -> Result<Self, DispatchError> {
        let (child, stdin, stdout) = Self::spawn_process(config)?;
        let mut worker = Self {
            child,
            stdin,
            stdout,
            tasks_handled: 0,
        };

        if let Err(e) = worker.consume_ready_line(config.startup_timeout_secs).await {
            worker.kill().await;
            return Err(e);
        }

        tracing::debug!(
            program = %config.program.display(),
            pid = worker.child.id().unwrap_or_default(),
            "Spawned decode worker"
        );
        Ok(worker)
    }

    fn spawn_process(
        config: &PoolConfig,
    ) -> Result<(Child, BufWriter<ChildStdin>, BufReader<ChildStdout>), DispatchError> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = BufWriter::new(
            child
                .stdin
                .take()
                .ok_or_else(|| DispatchError::Protocol("failed to capture stdin".into()))?,
        );
        let stdout = BufReader::new(
            child
                .stdout
                .take()
                .ok_or_else(|| DispatchError::Protocol("failed to capture stdout".into()))?,
        );
        Ok((child, stdin, stdout))
    }

    async fn consume_ready_line(&mut self, timeout_secs: u64) -> Result<(), DispatchError> {
        let mut line = String::new();
        let timeout = Duration::from_secs(timeout_secs);

        match tokio::time::timeout(timeout, self.stdout.read_line(&mut line)).await {
            Ok(Ok(0)) => Err(DispatchError::ProcessDied),
            Ok(Ok(_)) if line.trim() == READY_LINE => Ok(()),
            Ok(Ok(_)) => Err(DispatchError::Protocol(format!(
                "expected '{READY_LINE}' from decode worker, got '{}'",
                line.trim()
            ))),
            Ok(Err(e)) => Err(DispatchError::Io(e)),
            Err(_) => Err(DispatchError::Timeout(timeout_secs)),
        }
    }

    /// Send one task line and read the worker's one response line.
    ///
    /// No timeout: decoding is bounded by the model's step limit.
    pub async fn request(&mut self, task_line: &str) -> Result<String, DispatchError> {
        self.stdin.write_all(task_line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;

        let mut response = String::new();
        match self.stdout.read_line(&mut response).await? {
            0 => Err(DispatchError::ProcessDied),
            _ => {
                self.tasks_handled += 1;
                Ok(response)
            }
        }
    }

    pub fn tasks_handled(&self) -> u64 {
        self.tasks_handled
    }

    /// Kill the process. Errors are ignored; it may already be dead.
    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }

    /// Close stdin so the worker exits on EOF, then reap it.
    pub async fn shutdown(mut self) {
        let _ = self.stdin.shutdown().await;
        drop(self.stdin);
        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("Decode worker did not exit after EOF, killing");
                let _ = self.child.kill().await;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> PoolConfig {
        let mut config = PoolConfig::new(1, "sh", vec!["-c".into(), script.into()]);
        config.startup_timeout_secs = 5;
        config
    }

    #[tokio::test]
    async fn test_echo_worker() {
        let mut worker = DecodeProcess::spawn(&sh("echo ready.; while read -r l; do echo \"got $l\"; done"))
            .await
            .unwrap();
        assert_eq!(worker.request("a").await.unwrap(), "got a\n");
        assert_eq!(worker.request("b").await.unwrap(), "got b\n");
        assert_eq!(worker.tasks_handled(), 2);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_wrong_ready_line() {
        let err = DecodeProcess::spawn(&sh("echo hello")).await.err().unwrap();
        assert!(matches!(err, DispatchError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_exit_before_ready() {
        let err = DecodeProcess::spawn(&sh("exit 3")).await.err().unwrap();
        assert!(matches!(err, DispatchError::ProcessDied));
    }

    #[tokio::test]
    async fn test_startup_timeout() {
        let mut config = sh("sleep 5");
        config.startup_timeout_secs = 1;
        let err = DecodeProcess::spawn(&config).await.err().unwrap();
        assert!(matches!(err, DispatchError::Timeout(1)));
    }

    #[tokio::test]
    async fn test_death_mid_request() {
        let mut worker = DecodeProcess::spawn(&sh("echo ready.; read -r l; exit 1"))
            .await
            .unwrap();
        assert!(matches!(
            worker.request("task").await,
            Err(DispatchError::ProcessDied)
        ));
    }
}
