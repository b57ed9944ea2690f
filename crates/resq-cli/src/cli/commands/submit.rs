//! `resq submit <key> <url>` – send one request through the retry layer.

use std::path::PathBuf;

use anyhow::{anyhow, Context as _, Result};
use resq_core::{CancelHandle, DurableRequest, EndpointDescriptor, OperationKey, Submitted};

use crate::cli::Context;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitArgs {
    pub key: String,
    pub url: String,
    pub method: String,
    pub data: Option<String>,
    pub data_file: Option<PathBuf>,
    pub headers: Vec<String>,
    pub durable: bool,
}

/// Split a "Name: value" header argument.
pub fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("header {raw:?} must look like \"Name: value\""))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("header {raw:?} has an empty name"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

pub async fn run_submit(ctx: &Context, args: SubmitArgs) -> Result<()> {
    let mut endpoint = EndpointDescriptor::new(&args.method, &args.url)?;
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        endpoint = endpoint.with_header(name, value);
    }
    let payload = match (&args.data, &args.data_file) {
        (Some(data), _) => data.clone().into_bytes(),
        (None, Some(path)) => tokio::fs::read(path)
            .await
            .with_context(|| format!("read request body: {}", path.display()))?,
        (None, None) => Vec::new(),
    };

    let key = OperationKey::new(args.key);
    let policy = ctx.cfg.policy_for(&key)?;
    let mut req = DurableRequest::new(key, endpoint, payload).with_policy(policy);
    if args.durable {
        req = req.durable();
    }

    // Ctrl-C abandons the request; a durable one is parked rather than lost.
    let handle = CancelHandle::new();
    let interrupt = {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.cancel_and_queue();
            }
        })
    };
    let outcome = ctx.layer.submit_cancellable(req, &handle).await;
    interrupt.abort();

    match outcome? {
        Submitted::Delivered(resp) => {
            println!("Delivered (HTTP {})", resp.status);
            if !resp.body.is_empty() {
                println!("{}", String::from_utf8_lossy(&resp.body));
            }
        }
        Submitted::Queued(id) => println!("Queued {id}"),
    }
    Ok(())
}
