//! Local-training adapter. Training itself happens in an external program; this side only launches
//! it and knows where it leaves its parameter file.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::TrainerConfig;

#[async_trait]
pub trait Trainer: Send + Sync + 'static {
    /// Initial local training for `worker`.
    async fn train(&self, worker: usize) -> Result<()>;
    /// Load the aggregate at `aggregate` and keep training from it.
    async fn load_and_train(&self, aggregate: &Path, worker: usize) -> Result<()>;
    /// Where `worker`'s latest parameters are written.
    fn param_file(&self, worker: usize) -> PathBuf;
}

/// Runs `<program> <script> [aggregate] <worker>` as a child process.
#[derive(Debug, Clone)]
pub struct ProcessTrainer {
    cfg: TrainerConfig,
    model_dir: PathBuf,
}

impl ProcessTrainer {
    pub fn new(cfg: TrainerConfig, model_dir: impl Into<PathBuf>) -> Self { Self { cfg, model_dir: model_dir.into() } }

    async fn run(&self, script: &str, args: &[String]) -> Result<()> {
        // a timed-out task drops this future, which must take the child down with it
        let output = Command::new(&self.cfg.program)
            .arg(script)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to launch {} {script}", self.cfg.program))?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            bail!("{script} exited with {}: {}", output.status, stderr.trim());
        }
        if !stderr.trim().is_empty() { warn!(%script, stderr=%stderr.trim(), "trainer_stderr"); }
        debug!(%script, stdout=%String::from_utf8_lossy(&output.stdout).trim(), "trainer_finished");
        Ok(())
    }
}

#[async_trait]
impl Trainer for ProcessTrainer {
    #[instrument(skip(self))]
    async fn train(&self, worker: usize) -> Result<()> {
        self.run(&self.cfg.train_script, &[worker.to_string()]).await
    }

    #[instrument(skip(self))]
    async fn load_and_train(&self, aggregate: &Path, worker: usize) -> Result<()> {
        self.run(&self.cfg.load_train_script, &[aggregate.display().to_string(), worker.to_string()]).await
    }

    fn param_file(&self, worker: usize) -> PathBuf {
        self.model_dir.join(format!("model_parameters_{worker}_{}layer.json", self.cfg.layer_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_file_follows_naming_scheme() {
        let t = ProcessTrainer::new(TrainerConfig::default(), "./modelData");
        assert_eq!(t.param_file(3), PathBuf::from("./modelData/model_parameters_3_4layer.json"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn scripts_receive_worker_and_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let train = dir.path().join("train.sh");
        let load = dir.path().join("load.sh");
        std::fs::write(&train, format!("printf '{{\"w\":[%s]}}' \"$1\" > {}/model_parameters_$1_4layer.json\n", dir.path().display())).unwrap();
        std::fs::write(&load, "echo \"loaded $1\" 1>&2\nexit 3\n").unwrap();
        let cfg = TrainerConfig {
            program: "sh".into(),
            train_script: train.display().to_string(),
            load_train_script: load.display().to_string(),
            layer_count: 4,
        };
        let t = ProcessTrainer::new(cfg, dir.path());

        t.train(7).await.unwrap();
        let written = std::fs::read_to_string(t.param_file(7)).unwrap();
        assert_eq!(written.trim(), r#"{"w":[7]}"#);

        let err = t.load_and_train(Path::new("/agg/G_AGGREPARAM_0_Dy.json"), 1).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exited with") && msg.contains("loaded /agg/G_AGGREPARAM_0_Dy.json"), "{msg}");
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let cfg = TrainerConfig { program: "/nonexistent/fl-trainer".into(), ..TrainerConfig::default() };
        let err = ProcessTrainer::new(cfg, ".").train(0).await.unwrap_err();
        assert!(err.to_string().contains("failed to launch"));
    }
}
