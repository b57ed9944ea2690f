//! `resq replay` – push the durable queue through the retry layer now.

use anyhow::Result;

use crate::cli::Context;

pub async fn run_replay(ctx: &Context) -> Result<()> {
    if ctx.layer.queue().is_empty().await {
        println!("No queued operations.");
        return Ok(());
    }
    let report = ctx.layer.replay_pending().await;
    println!(
        "Delivered {}, still queued {}",
        report.delivered.len(),
        report.failed.len()
    );
    if report.interrupted {
        println!("Network went away; remaining operations stay queued.");
    }
    Ok(())
}
