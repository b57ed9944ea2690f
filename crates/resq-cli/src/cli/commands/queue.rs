//! `resq queue` – list operations waiting in the durable queue.

use anyhow::Result;

use crate::cli::Context;

pub async fn run_queue(ctx: &Context) -> Result<()> {
    let pending = ctx.layer.queue().list_pending().await;
    if pending.is_empty() {
        println!("No queued operations.");
        return Ok(());
    }
    println!("{:<36} {:<8} {:<8} {:<28} {}", "ID", "REPLAYS", "BYTES", "KEY", "TARGET");
    for op in pending {
        println!(
            "{:<36} {:<8} {:<8} {:<28} {} {}",
            op.id,
            op.attempt_count,
            op.payload.len(),
            op.operation_key,
            op.endpoint.method,
            op.endpoint.url
        );
    }
    Ok(())
}
