//! `resq cancel <id>` – drop a queued operation.

use anyhow::{bail, Context as _, Result};
use uuid::Uuid;

use crate::cli::Context;

pub async fn run_cancel(ctx: &Context, id: &str) -> Result<()> {
    let id: Uuid = id
        .trim()
        .parse()
        .with_context(|| format!("invalid queued operation id {id:?}"))?;
    if !ctx.layer.cancel(id).await {
        bail!("no queued operation {id}");
    }
    println!("Cancelled {id}");
    Ok(())
}
