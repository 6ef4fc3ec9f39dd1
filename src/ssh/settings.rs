//! SSH connection settings and argv construction.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, HilError};

/// Parameters for reaching one SSH destination.
///
/// Deserializes from the `[ssh]` section of the configuration file, with
/// every field overridable from the environment or the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    /// Hostname or address of the device.
    #[serde(default)]
    pub host: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Remote user.
    #[serde(default = "default_user")]
    pub user: String,
    /// Private key path; `~` is expanded.
    #[serde(default)]
    pub identity_file: Option<String>,
    /// TCP connect timeout handed to the client.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// ServerAliveInterval for long-lived sessions.
    #[serde(default = "default_keepalive_interval", with = "humantime_serde")]
    pub keepalive_interval: Duration,
    /// ServerAliveCountMax before the client declares the peer dead.
    #[serde(default = "default_keepalive_count")]
    pub keepalive_count: u32,
    /// Client binary to invoke.
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,
    /// Copy binary to invoke for transfers.
    #[serde(default = "default_scp_binary")]
    pub scp_binary: String,
    /// Extra `-o Key=Value` options appended verbatim.
    #[serde(default)]
    pub extra_options: Vec<String>,
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_keepalive_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_keepalive_count() -> u32 {
    3
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_scp_binary() -> String {
    "scp".to_string()
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            user: default_user(),
            identity_file: None,
            connect_timeout: default_connect_timeout(),
            keepalive_interval: default_keepalive_interval(),
            keepalive_count: default_keepalive_count(),
            ssh_binary: default_ssh_binary(),
            scp_binary: default_scp_binary(),
            extra_options: Vec::new(),
        }
    }
}

impl SshSettings {
    /// Settings for the given host with lab defaults everywhere else.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Sets the remote user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the private key path (tilde allowed).
    pub fn with_identity_file(mut self, path: impl Into<String>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Sets the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Appends an extra `-o` option.
    pub fn with_extra_option(mut self, option: impl Into<String>) -> Self {
        self.extra_options.push(option.into());
        self
    }

    /// Checks that the settings name a reachable destination.
    pub fn validate(&self) -> AppResult<()> {
        if self.host.is_empty() {
            return Err(HilError::Configuration(
                "ssh host cannot be empty".to_string(),
            ));
        }
        if self.user.is_empty() {
            return Err(HilError::Configuration(
                "ssh user cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The `user@host` destination string.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Options shared by `ssh` and `scp` invocations.
    ///
    /// Lab devices reflash constantly and rotate host keys with every image,
    /// so keys are neither checked nor recorded. BatchMode keeps a missing
    /// key from degenerating into a password prompt that hangs the run.
    fn common_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.keepalive_interval.as_secs()),
            "-o".to_string(),
            format!("ServerAliveCountMax={}", self.keepalive_count),
        ];
        if let Some(identity) = &self.identity_file {
            let expanded = shellexpand::tilde(identity);
            args.push("-i".to_string());
            args.push(expanded.into_owned());
        }
        for option in &self.extra_options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args
    }

    /// Full argv for running `remote_command` on the destination.
    pub fn command_argv(&self, remote_command: &str) -> Vec<String> {
        let mut argv = vec![self.ssh_binary.clone()];
        argv.extend(self.common_options());
        argv.push("-p".to_string());
        argv.push(self.port.to_string());
        argv.push(self.destination());
        argv.push(remote_command.to_string());
        argv
    }

    /// Full argv for copying a local file to the destination.
    pub fn upload_argv(&self, local: &Path, remote: &str) -> Vec<String> {
        let mut argv = vec![self.scp_binary.clone()];
        argv.extend(self.common_options());
        argv.push("-P".to_string());
        argv.push(self.port.to_string());
        argv.push(local.display().to_string());
        argv.push(format!("{}:{}", self.destination(), remote));
        argv
    }

    /// Full argv for copying a remote file to the local host.
    pub fn download_argv(&self, remote: &str, local: &Path) -> Vec<String> {
        let mut argv = vec![self.scp_binary.clone()];
        argv.extend(self.common_options());
        argv.push("-P".to_string());
        argv.push(self.port.to_string());
        argv.push(format!("{}:{}", self.destination(), remote));
        argv.push(local.display().to_string());
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_defaults() {
        let settings = SshSettings::new("dut-3.lab");
        assert_eq!(settings.port, 22);
        assert_eq!(settings.user, "root");
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.destination(), "root@dut-3.lab");
    }

    #[test]
    fn test_validate_requires_host() {
        let settings = SshSettings::default();
        assert!(settings.validate().is_err());
        assert!(SshSettings::new("dut-3.lab").validate().is_ok());
    }

    #[test]
    fn test_command_argv_shape() {
        let settings = SshSettings::new("dut-3.lab").with_user("fuchsia").with_port(8022);
        let argv = settings.command_argv("wlan status");

        assert_eq!(argv[0], "ssh");
        assert!(argv.contains(&"BatchMode=yes".to_string()));
        assert!(argv.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(argv.contains(&"ConnectTimeout=10".to_string()));
        assert!(argv.contains(&"8022".to_string()));
        // Destination comes right before the command, command is last.
        assert_eq!(argv[argv.len() - 2], "fuchsia@dut-3.lab");
        assert_eq!(argv[argv.len() - 1], "wlan status");
    }

    #[test]
    fn test_identity_file_tilde_expansion() {
        let settings = SshSettings::new("dut-3.lab").with_identity_file("~/keys/lab_ed25519");
        let argv = settings.command_argv("true");
        let identity_pos = argv.iter().position(|a| a == "-i").unwrap();
        let identity = &argv[identity_pos + 1];
        assert!(!identity.starts_with('~'));
        assert!(identity.ends_with("keys/lab_ed25519"));
    }

    #[test]
    fn test_extra_options_appended() {
        let settings = SshSettings::new("dut-3.lab").with_extra_option("ProxyJump=bastion.lab");
        let argv = settings.command_argv("true");
        assert!(argv.contains(&"ProxyJump=bastion.lab".to_string()));
    }

    #[test]
    fn test_scp_argv_uses_capital_p() {
        let settings = SshSettings::new("dut-3.lab").with_port(8022);
        let up = settings.upload_argv(&PathBuf::from("/tmp/fw.bin"), "/data/fw.bin");
        assert_eq!(up[0], "scp");
        assert!(up.windows(2).any(|w| w[0] == "-P" && w[1] == "8022"));
        assert_eq!(up[up.len() - 1], "root@dut-3.lab:/data/fw.bin");
        assert_eq!(up[up.len() - 2], "/tmp/fw.bin");

        let down = settings.download_argv("/data/log.txt", &PathBuf::from("/tmp/log.txt"));
        assert_eq!(down[down.len() - 2], "root@dut-3.lab:/data/log.txt");
        assert_eq!(down[down.len() - 1], "/tmp/log.txt");
    }
}
