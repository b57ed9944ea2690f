//! `resq watch` – follow connectivity and replay the queue on reconnect.

use std::time::Duration;

use anyhow::Result;
use resq_core::connectivity::spawn_probe;

use crate::cli::Context;

pub async fn run_watch(
    ctx: &Context,
    probe_url: Option<String>,
    interval_secs: Option<u64>,
) -> Result<()> {
    let probe_url = probe_url.or_else(|| ctx.cfg.connectivity.probe_url.clone());
    let interval = Duration::from_secs(
        interval_secs
            .unwrap_or(ctx.cfg.connectivity.probe_interval_secs)
            .max(1),
    );

    let probe = match probe_url {
        Some(url) => {
            println!("Watching {url} every {}s; Ctrl-C to stop.", interval.as_secs());
            Some(spawn_probe(
                ctx.transport.clone(),
                url,
                interval,
                ctx.signal.clone(),
            ))
        }
        None => {
            println!("No probe URL configured; assuming online. Ctrl-C to stop.");
            None
        }
    };

    tokio::select! {
        _ = ctx.layer.monitor().run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("watch interrupted");
        }
    }
    if let Some(task) = probe {
        task.abort();
    }

    let left = ctx.layer.queue().len().await;
    println!("{left} operation(s) still queued.");
    Ok(())
}
