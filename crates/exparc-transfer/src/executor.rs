//! Remote command execution over ssh.
//!
//! A rendered command line is prefixed with the rendered `ssh` template and run
//! through the local shell as a child process. Stdout and stderr are captured
//! combined. Copies (`scp_*` operations) run locally without the ssh prefix.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

use crate::commands::safe_substitute;
use crate::traits::{TransferError, TransferResult};

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Captured result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Stdout and stderr, interleaved as written.
    pub output: String,
    pub status: i32,
}

/// Connection parameters for one remote host.
#[derive(Debug, Clone)]
pub struct RemoteExecutor {
    hostname: String,
    username: String,
    port: u16,
    key_filename: Option<String>,
    ssh_template: String,
}

impl RemoteExecutor {
    pub fn new(
        hostname: impl Into<String>,
        username: impl Into<String>,
        port: u16,
        key_filename: Option<String>,
        ssh_template: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            username: username.into(),
            port,
            key_filename,
            ssh_template: ssh_template.into(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Options for `scp`, which spells the port flag `-P`.
    pub fn scp_opts(&self) -> String {
        self.opts("-P")
    }

    /// Options for `ssh`, which spells the port flag `-p`.
    pub fn ssh_opts(&self) -> String {
        self.opts("-p")
    }

    fn opts(&self, port_flag: &str) -> String {
        let mut opts = String::new();
        if let Some(key) = &self.key_filename {
            opts.push_str(&format!(" -i {}", key));
        }
        if self.port != DEFAULT_SSH_PORT {
            opts.push_str(&format!(" {} {}", port_flag, self.port));
        }
        opts
    }

    /// The rendered `ssh` prefix. Empty when the template is blank, in which
    /// case commands run on the local shell.
    pub fn ssh_prefix(&self) -> String {
        let params: HashMap<&str, String> = [
            ("username", self.username.clone()),
            ("hostname", self.hostname.clone()),
            ("opts", self.ssh_opts()),
        ]
        .into_iter()
        .collect();
        safe_substitute(&self.ssh_template, &params)
    }

    /// Full command line for `remote_command`, optionally wrapped in ssh.
    pub fn compose(&self, remote_command: &str, via_ssh: bool) -> String {
        let prefix = if via_ssh {
            self.ssh_prefix()
        } else {
            String::new()
        };
        if prefix.trim().is_empty() {
            remote_command.to_string()
        } else {
            format!("{} {}", prefix, remote_command)
        }
    }

    /// Run `command_line` and capture its combined output. A non-zero exit
    /// status is returned as [`TransferError::CommandFailed`].
    pub async fn execute(&self, command_line: &str) -> TransferResult<CommandOutput> {
        let start = Instant::now();
        tracing::debug!(command = %command_line, host = %self.hostname, "Running command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(format!("exec 2>&1; {}", command_line))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TransferError::Channel {
                command: command_line.to_string(),
                source: e,
            })?;

        let combined = String::from_utf8_lossy(&output.stdout).into_owned();

        if !output.status.success() {
            tracing::debug!(
                command = %command_line,
                status = ?output.status.code(),
                output = %combined,
                "Command failed"
            );
            return Err(TransferError::CommandFailed {
                command: command_line.to_string(),
                status: output.status.code(),
                output: combined,
            });
        }

        tracing::debug!(
            command = %command_line,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Command succeeded"
        );

        Ok(CommandOutput {
            output: combined,
            status: output.status.code().unwrap_or_default(),
        })
    }
}
