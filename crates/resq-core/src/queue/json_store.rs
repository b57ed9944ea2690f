//! Queue store backed by one JSON file per namespace (XDG state dir).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::store::{QueueStore, Records};

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Store rooted at `dir`; the directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default location: `~/.local/state/resq/queue/`.
    pub fn default_dir() -> Result<PathBuf> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("resq")?;
        Ok(xdg_dirs.get_state_home().join("queue"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        let file: String = namespace
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

#[async_trait]
impl QueueStore for JsonFileStore {
    async fn get(&self, namespace: &str) -> Result<Records> {
        let path = self.path_for(namespace);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Records::new()),
            Err(e) => return Err(e).with_context(|| format!("read queue: {}", path.display())),
        };
        serde_json::from_slice(&bytes).with_context(|| format!("parse queue: {}", path.display()))
    }

    async fn set(&self, namespace: &str, records: &Records) -> Result<()> {
        let path = self.path_for(namespace);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create dir: {}", self.dir.display()))?;
        let json = serde_json::to_vec_pretty(records).context("serialize queue")?;
        // Write-then-rename so a crash never leaves a truncated file behind.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("write queue: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replace queue: {}", path.display()))?;
        Ok(())
    }

    async fn delete(&self, namespace: &str) -> Result<()> {
        let path = self.path_for(namespace);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("delete queue: {}", path.display())),
        }
    }
}
