//! SSH session walkthrough against a real device
//!
//! Point it at a device with environment variables:
//!
//! ```text
//! RUSTHIL_SSH_HOST=fuchsia-5254-0063-5e7a.local \
//! RUSTHIL_SSH_USER=fuchsia \
//! cargo run --example ssh_session
//! ```
//!
//! The identity file and other multi-word settings come from
//! `config/hil.toml`.

use std::time::Duration;

use rust_hil::config::Settings;
use rust_hil::ssh::SshConnection;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    println!("=== SSH Session Demo ===\n");

    let settings = Settings::load()?;
    if settings.ssh.host.is_empty() {
        println!("No device configured.");
        println!("Set RUSTHIL_SSH_HOST (and RUSTHIL_SSH_USER etc.) or fill in config/hil.toml.");
        return Ok(());
    }

    let connection = SshConnection::new(settings.ssh)?;
    println!("Target: {}\n", connection.destination());

    // Step 1: reachability probe
    println!("Step 1: Probe");
    if !connection.check_alive().await? {
        anyhow::bail!("{} did not answer", connection.destination());
    }
    println!("  Device is reachable\n");

    // Step 2: run a command and read its output
    println!("Step 2: uname -a");
    let output = connection.run("uname -a").await?;
    println!("  {}", output.stdout_text().trim());

    // Step 3: a bounded command
    println!("Step 3: Bounded command");
    let output = connection
        .run_with_timeout("cat /proc/uptime 2>/dev/null || uptime", Duration::from_secs(10))
        .await?;
    println!("  {}", output.stdout_text().trim());

    println!("\n=== Demo Complete ===");
    Ok(())
}
