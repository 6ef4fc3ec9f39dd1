//! Command-line front end for the rust_hil framework.
//!
//! Thin wrapper over the library for use from shell scripts and CI: run a
//! command locally with capture and a wall-clock limit, run a command on a
//! device over SSH, or probe whether a device answers at all.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tracing::{error, info};

use rust_hil::config::Settings;
use rust_hil::job::{self, JobOutput, JobSpec};
use rust_hil::ssh::{SshConnection, SshSettings};
use rust_hil::HilError;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command locally with output capture
    Run {
        /// Wall-clock limit in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Do not treat a non-zero exit as an error
        #[arg(long)]
        unchecked: bool,
        /// Pass the command to /bin/sh instead of exec'ing it directly
        #[arg(short, long)]
        shell: bool,
        /// Command and arguments to execute
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Run a command on a device over SSH
    Ssh {
        /// Device hostname or address (overrides configuration)
        #[arg(long)]
        host: Option<String>,
        /// Remote user (overrides configuration)
        #[arg(long)]
        user: Option<String>,
        /// SSH port (overrides configuration)
        #[arg(long)]
        port: Option<u16>,
        /// Identity file for key authentication
        #[arg(short, long)]
        identity: Option<String>,
        /// Wall-clock limit in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Command to run on the device
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Check whether a device answers over SSH
    Probe {
        /// Device hostname or address (overrides configuration)
        #[arg(long)]
        host: Option<String>,
        /// Remote user (overrides configuration)
        #[arg(long)]
        user: Option<String>,
        /// SSH port (overrides configuration)
        #[arg(long)]
        port: Option<u16>,
        /// Identity file for key authentication
        #[arg(short, long)]
        identity: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_configuration(&cli)?;
    setup_logging(cli.verbose, &settings);

    let code = match cli.command {
        Commands::Run {
            timeout,
            unchecked,
            shell,
            command,
        } => run_local(&settings, timeout, unchecked, shell, command).await?,
        Commands::Ssh {
            host,
            user,
            port,
            identity,
            timeout,
            command,
        } => {
            let connection = connect(&settings, host, user, port, identity)?;
            run_remote(&connection, timeout, command).await?
        }
        Commands::Probe {
            host,
            user,
            port,
            identity,
        } => {
            let connection = connect(&settings, host, user, port, identity)?;
            probe(&connection).await?
        }
    };

    std::process::exit(code);
}

/// Load configuration from the given file or the default search path
fn load_configuration(cli: &Cli) -> Result<Settings> {
    match &cli.config {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            Ok(Settings::load_from(path)?)
        }
        None => Ok(Settings::load()?),
    }
}

/// Initialize the tracing subscriber from settings and flags
fn setup_logging(verbose: bool, settings: &Settings) {
    let level = if verbose {
        "debug".to_string()
    } else {
        settings.logging.level.clone()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if settings.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_local(
    settings: &Settings,
    timeout: Option<u64>,
    unchecked: bool,
    shell: bool,
    command: Vec<String>,
) -> Result<i32> {
    let mut spec = if shell {
        JobSpec::shell(command.join(" "))
    } else {
        JobSpec::exec(command)
    };

    spec = spec
        .with_retention_limit(settings.execution.retention_limit)
        .with_stop_grace(settings.execution.stop_grace);
    if let Some(limit) = timeout
        .map(Duration::from_secs)
        .or(settings.execution.default_timeout)
    {
        spec = spec.with_timeout(limit);
    }
    if unchecked {
        spec = spec.unchecked();
    }

    report(job::run(spec).await)
}

fn connect(
    settings: &Settings,
    host: Option<String>,
    user: Option<String>,
    port: Option<u16>,
    identity: Option<String>,
) -> Result<SshConnection> {
    let mut ssh: SshSettings = settings.ssh.clone();
    if let Some(host) = host {
        ssh.host = host;
    }
    if let Some(user) = user {
        ssh.user = user;
    }
    if let Some(port) = port {
        ssh.port = port;
    }
    if let Some(identity) = identity {
        ssh.identity_file = Some(identity);
    }

    Ok(SshConnection::new(ssh)?)
}

async fn run_remote(
    connection: &SshConnection,
    timeout: Option<u64>,
    command: Vec<String>,
) -> Result<i32> {
    let command = command.join(" ");
    let result = match timeout.map(Duration::from_secs) {
        Some(limit) => connection.run_with_timeout(&command, limit).await,
        None => connection.run(&command).await,
    };
    report(result)
}

async fn probe(connection: &SshConnection) -> Result<i32> {
    if connection.check_alive().await? {
        println!("{} is reachable", connection.destination());
        Ok(0)
    } else {
        println!("{} is unreachable", connection.destination());
        Ok(1)
    }
}

/// Print captured output and map the result to a process exit code
fn report(result: rust_hil::AppResult<JobOutput>) -> Result<i32> {
    match result {
        Ok(output) => {
            print_output(&output);
            Ok(exit_code_for(&output))
        }
        Err(error) => {
            if let Some(output) = error.output() {
                print_output(output);
            }
            error!("{error}");
            match error {
                // Same convention as timeout(1).
                HilError::CommandTimeout(_) => Ok(124),
                HilError::CommandFailed(output) => Ok(exit_code_for(&output)),
                other => Err(other.into()),
            }
        }
    }
}

/// Exit code mirroring the child: its own code, or 128+signal like a shell
fn exit_code_for(output: &JobOutput) -> i32 {
    match (output.exit_code, output.signal) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

fn print_output(output: &JobOutput) {
    let _ = std::io::stdout().write_all(&output.stdout);
    let _ = std::io::stderr().write_all(&output.stderr);
}
