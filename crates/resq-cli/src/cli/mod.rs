//! CLI for the resq resilient request layer.

mod commands;
mod notify;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use resq_core::config::{self, ResqConfig};
use resq_core::{CurlTransport, NetworkSignal, RequestLayer};

use commands::{run_cancel, run_circuits, run_queue, run_replay, run_submit, run_watch, SubmitArgs};

/// Top-level CLI for resq.
#[derive(Debug, Parser)]
#[command(name = "resq")]
#[command(about = "resq: retrying, circuit-breaking request sender with a durable offline queue", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Send a request with retries; durable requests are queued when they cannot be delivered.
    Submit {
        /// Operation key (circuit breaker and policy scope), e.g. "form_submit:/expenses/add".
        key: String,
        /// HTTP/HTTPS URL to send to.
        url: String,
        /// HTTP method.
        #[arg(long, short = 'X', default_value = "POST")]
        method: String,
        /// Request body.
        #[arg(long, short = 'd', conflicts_with = "data_file")]
        data: Option<String>,
        /// Read the request body from a file.
        #[arg(long, value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Extra header as "Name: value" (repeatable).
        #[arg(long = "header", short = 'H', value_name = "NAME:VALUE")]
        headers: Vec<String>,
        /// Queue the request for later delivery instead of failing when offline or exhausted.
        #[arg(long)]
        durable: bool,
    },

    /// List operations waiting in the durable queue.
    Queue,

    /// Remove a queued operation by its ID.
    Cancel {
        /// Queued operation ID (UUID).
        id: String,
    },

    /// Replay the durable queue now.
    Replay,

    /// Watch connectivity and replay the queue whenever the network comes back.
    Watch {
        /// URL to probe with HEAD (overrides [connectivity].probe_url).
        #[arg(long, value_name = "URL")]
        probe_url: Option<String>,
        /// Seconds between probes (overrides [connectivity].probe_interval_secs).
        #[arg(long, value_name = "SECS")]
        interval_secs: Option<u64>,
    },

    /// Show circuit breaker and retry settings.
    Circuits,
}

/// Everything a command needs: config plus the wired request layer.
pub struct Context {
    pub cfg: ResqConfig,
    pub transport: CurlTransport,
    pub signal: NetworkSignal,
    pub layer: RequestLayer,
}

impl Context {
    async fn open(cfg: ResqConfig) -> Result<Self> {
        let transport = CurlTransport::default();
        // One-shot commands probe once; without a probe URL the network is assumed up.
        let online = match cfg.connectivity.probe_url.as_deref() {
            Some(url) => transport.probe(url).await,
            None => true,
        };
        let signal = NetworkSignal::new(online);
        let store = cfg.open_store().await?;
        let layer = RequestLayer::open(
            cfg.breaker_config(),
            store,
            &cfg.queue.namespace,
            Arc::new(transport.clone()),
            signal.subscribe(),
            Arc::new(notify::ConsoleSink),
        )
        .await;
        if layer.queue().is_degraded() {
            eprintln!("warning: queue store unavailable; queued operations will not survive this session");
        }
        Ok(Self {
            cfg,
            transport,
            signal,
            layer,
        })
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        if let CliCommand::Circuits = cli.command {
            return run_circuits(&cfg);
        }
        let ctx = Context::open(cfg).await?;

        match cli.command {
            CliCommand::Submit {
                key,
                url,
                method,
                data,
                data_file,
                headers,
                durable,
            } => {
                let args = SubmitArgs {
                    key,
                    url,
                    method,
                    data,
                    data_file,
                    headers,
                    durable,
                };
                run_submit(&ctx, args).await?
            }
            CliCommand::Queue => run_queue(&ctx).await?,
            CliCommand::Cancel { id } => run_cancel(&ctx, &id).await?,
            CliCommand::Replay => run_replay(&ctx).await?,
            CliCommand::Watch {
                probe_url,
                interval_secs,
            } => run_watch(&ctx, probe_url, interval_secs).await?,
            CliCommand::Circuits => run_circuits(&ctx.cfg)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
