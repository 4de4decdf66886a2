//! Pretty-printed JSON copies of submissions and aggregates under the model directory.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ExportWriter {
    dir: PathBuf,
}

impl ExportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

    pub fn dir(&self) -> &Path { &self.dir }

    pub async fn ensure_dir(&self) -> io::Result<()> { tokio::fs::create_dir_all(&self.dir).await }

    /// `<dir>/<key>_Dy.json`
    pub fn params_path(&self, key: &str) -> PathBuf { self.dir.join(format!("{key}_Dy.json")) }

    /// `<dir>/<group>_AllUser_Round<round>.json`
    pub fn round_path(&self, group: &str, round: &str) -> PathBuf { self.dir.join(format!("{group}_AllUser_Round{round}.json")) }

    pub async fn write_params<T: Serialize>(&self, key: &str, params: &T) -> io::Result<PathBuf> {
        let path = self.params_path(key);
        write_pretty(&path, params).await?;
        Ok(path)
    }

    /// Every user's readback for one round, keyed by user id.
    pub async fn write_round<T: Serialize>(&self, group: &str, round: &str, by_user: &BTreeMap<String, T>) -> io::Result<PathBuf> {
        let path = self.round_path(group, round);
        write_pretty(&path, by_user).await?;
        Ok(path)
    }
}

async fn write_pretty<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, &body).await?;
    debug!(path=%path.display(), bytes=body.len(), "export_written");
    Ok(())
}
