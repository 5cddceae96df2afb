//! Remote shell execution
//!
//! The remote deploy flow needs three things from the target host: run a
//! command, copy a blob of bytes to a path, and run a long command with
//! line-streamed output. `SshShell` drives the OpenSSH client binary;
//! the private key from the project record is materialized into a
//! mode-0600 identity file for the session's lifetime.

use std::process::Stdio;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use drydock_core::{Error, Result};

/// An authenticated session against one remote host
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Runs a command, returning combined output; non-zero exit is an error
    async fn run(&self, command: &str) -> Result<String>;

    /// Writes `content` to `remote_path` on the host
    async fn copy(&self, content: &[u8], remote_path: &str) -> Result<()>;

    /// Runs a command, sending each stdout/stderr line into `lines` as it
    /// arrives; returns once the command exits
    async fn run_streamed(&self, command: &str, lines: mpsc::Sender<String>) -> Result<()>;
}

/// Opens `RemoteShell` sessions; swapped for a fake in tests
#[async_trait]
pub trait ShellDialer: Send + Sync {
    async fn dial(
        &self,
        host: &str,
        user: &str,
        private_key: &str,
    ) -> Result<Box<dyn RemoteShell>>;
}

/// Dialer producing OpenSSH-backed sessions
pub struct SshDialer;

impl SshDialer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SshDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShellDialer for SshDialer {
    async fn dial(
        &self,
        host: &str,
        user: &str,
        private_key: &str,
    ) -> Result<Box<dyn RemoteShell>> {
        let shell = SshShell::open(host, user, private_key)?;
        Ok(Box::new(shell))
    }
}

/// Remote shell over the OpenSSH client
pub struct SshShell {
    target: String,
    port: String,
    identity: NamedTempFile,
}

impl SshShell {
    /// Prepares a session against `user@host[:port]`
    pub fn open(host: &str, user: &str, private_key: &str) -> Result<Self> {
        let (hostname, port) = match host.rsplit_once(':') {
            Some((hostname, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
                (hostname, port.to_string())
            }
            _ => (host, "22".to_string()),
        };

        let identity = write_identity_file(private_key)?;

        Ok(Self {
            target: format!("{user}@{hostname}"),
            port,
            identity,
        })
    }

    fn command(&self) -> Command {
        let mut command = Command::new("ssh");
        command
            .arg("-i")
            .arg(self.identity.path())
            .args(["-p", &self.port])
            // Deploy targets are provisioned hosts without a curated
            // known_hosts file; key auth is the only factor here.
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "UserKnownHostsFile=/dev/null"])
            .args(["-o", "BatchMode=yes"])
            .arg(&self.target);
        command
    }
}

fn write_identity_file(private_key: &str) -> Result<NamedTempFile> {
    use std::io::Write;

    let mut file = NamedTempFile::new().map_err(|e| Error::Remote(format!(
        "failed to create identity file: {e}"
    )))?;
    file.write_all(private_key.as_bytes())
        .map_err(|e| Error::Remote(format!("failed to write identity file: {e}")))?;
    if !private_key.ends_with('\n') {
        file.write_all(b"\n")
            .map_err(|e| Error::Remote(format!("failed to write identity file: {e}")))?;
    }

    // ssh refuses keys readable by anyone else.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::Remote(format!("failed to chmod identity file: {e}")))?;
    }

    Ok(file)
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn run(&self, command: &str) -> Result<String> {
        debug!(target = %self.target, command, "running remote command");

        let output = self
            .command()
            .arg(command)
            .output()
            .await
            .map_err(|e| Error::Remote(format!("failed to spawn ssh: {e}")))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(Error::Remote(format!(
                "remote command exited with {}: {}",
                output.status.code().unwrap_or(-1),
                combined.trim()
            )));
        }
        Ok(combined)
    }

    async fn copy(&self, content: &[u8], remote_path: &str) -> Result<()> {
        debug!(target = %self.target, remote_path, "copying file to remote");

        let mut child = self
            .command()
            .arg(format!("cat > {remote_path}"))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Remote(format!("failed to spawn ssh: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Remote("ssh stdin unavailable".to_string()))?;
        stdin
            .write_all(content)
            .await
            .map_err(|e| Error::Remote(format!("failed to stream file content: {e}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Remote(format!("ssh copy failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Remote(format!(
                "failed to copy to {remote_path}: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn run_streamed(&self, command: &str, lines: mpsc::Sender<String>) -> Result<()> {
        info!(target = %self.target, command, "running streamed remote command");

        let mut child = self
            .command()
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Remote(format!("failed to spawn ssh: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Remote("ssh stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Remote("ssh stderr unavailable".to_string()))?;

        let out_task = forward_lines(stdout, lines.clone());
        let err_task = forward_lines(stderr, lines);

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Remote(format!("ssh wait failed: {e}")))?;

        let _ = out_task.await;
        let _ = err_task.await;

        if !status.success() {
            return Err(Error::Remote(format!(
                "remote command exited with {}",
                status.code().unwrap_or(-1)
            )));
        }
        Ok(())
    }
}

fn forward_lines<R>(reader: R, lines: mpsc::Sender<String>) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if lines.send(line).await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port_parsing() {
        let shell = SshShell::open("10.0.0.5:2222", "deploy", "key").unwrap();
        assert_eq!(shell.target, "deploy@10.0.0.5");
        assert_eq!(shell.port, "2222");

        let shell = SshShell::open("10.0.0.5", "deploy", "key").unwrap();
        assert_eq!(shell.port, "22");
    }

    #[test]
    fn test_ipv6_ish_host_without_port_keeps_default() {
        // A trailing segment that is not numeric is part of the host.
        let shell = SshShell::open("host.example.com", "deploy", "key").unwrap();
        assert_eq!(shell.target, "deploy@host.example.com");
        assert_eq!(shell.port, "22");
    }

    #[cfg(unix)]
    #[test]
    fn test_identity_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let shell = SshShell::open("host", "deploy", "-----BEGIN KEY-----").unwrap();
        let mode = std::fs::metadata(shell.identity.path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);

        let content = std::fs::read_to_string(shell.identity.path()).unwrap();
        assert_eq!(content, "-----BEGIN KEY-----\n");
    }
}
