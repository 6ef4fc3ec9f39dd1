//! Local job execution walkthrough

use std::time::Duration;

use rust_hil::job::{self, BackgroundJob, JobSpec};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    println!("=== Local Job Demo ===\n");

    // Demo 1: run a shell pipeline to completion
    println!("Demo 1: Checked shell pipeline");
    let output = job::run(JobSpec::shell("printf 'ap\\ndut\\nsniffer\\n' | sort")).await?;
    println!("  Output:\n{}", indent(&output.stdout_text()));

    // Demo 2: stream output from a background job as it is produced
    println!("Demo 2: Live output from a background job");
    let spec = JobSpec::shell("for i in 1 2 3 4 5; do echo tick $i; sleep 0.2; done");
    let mut ticker = BackgroundJob::spawn(spec).await?;
    let mut live = ticker.output_channel();
    let printer = tokio::spawn(async move {
        while let Ok(chunk) = live.recv().await {
            print!("  [{}] {}", chunk.stream.as_str(), String::from_utf8_lossy(&chunk.data));
        }
    });
    let output = ticker.wait().await?;
    let _ = printer.await;
    println!("  Finished with {}\n", output.status_display());

    // Demo 3: a wall-clock limit kills a hung command
    println!("Demo 3: Timeout");
    let spec = JobSpec::shell("echo probing; sleep 30").with_timeout(Duration::from_secs(1));
    match job::run(spec).await {
        Err(error) if error.is_timeout() => {
            let partial = error.output().map(|o| o.stdout_text().into_owned());
            println!("  Timed out as expected; partial output: {:?}\n", partial);
        }
        other => anyhow::bail!("expected a timeout, got {:?}", other.map(|o| o.status_display())),
    }

    // Demo 4: stop a long-running job early
    println!("Demo 4: Stop");
    let mut daemon = BackgroundJob::spawn(JobSpec::shell("sleep 300").unchecked()).await?;
    let output = daemon.stop().await?;
    println!("  Stopped with {}", output.status_display());

    println!("\n=== Demo Complete ===");
    Ok(())
}

fn indent(text: &str) -> String {
    text.lines().map(|l| format!("    {l}\n")).collect()
}
