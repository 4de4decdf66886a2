use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use fedledger_core::{AggregationGuard, QuorumPolicy, ThresholdTrigger};
use fedledger_resilience::RetryConfig;
use serde::{Deserialize, Serialize};

use crate::orchestrator::OrchestratorError;

/// Which parameter layout the contract decodes uploads into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamSchema {
    #[default]
    Dynamic,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub program: String,
    pub train_script: String,
    pub load_train_script: String,
    pub layer_count: u32,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self { program: "python3".into(), train_script: "./train.py".into(), load_train_script: "./load_and_train.py".into(), layer_count: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub attempts: usize,
    pub delay_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self { Self { attempts: 5, delay_ms: 200 } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub group: String,
    pub users: Vec<String>,
    pub rounds: usize,
    pub max_users: usize,
    pub schema: ParamSchema,
    pub ledger_path: PathBuf,
    pub model_dir: PathBuf,
    pub trainer: TrainerConfig,
    pub task_timeout_secs: u64,
    pub max_concurrent_tasks: usize,
    pub aggregate_poll: PollConfig,
    pub quorum_ratio: f64,
    pub aggregation_guard: AggregationGuard,
    pub log_level: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            group: "fl-group".into(),
            users: Vec::new(),
            rounds: 3,
            max_users: 10,
            schema: ParamSchema::default(),
            ledger_path: PathBuf::from("./ledger"),
            model_dir: PathBuf::from("./modelData"),
            trainer: TrainerConfig::default(),
            task_timeout_secs: 600,
            max_concurrent_tasks: 10,
            aggregate_poll: PollConfig::default(),
            quorum_ratio: 0.8,
            aggregation_guard: AggregationGuard::default(),
            log_level: "info".into(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let fail = |msg: String| Err(OrchestratorError::Config(msg));
        if self.group.is_empty() { return fail("group name must not be empty".into()); }
        if self.users.is_empty() { return fail("at least one user is required".into()); }
        if self.users.len() > self.max_users {
            return fail(format!("{} users configured, at most {} supported", self.users.len(), self.max_users));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.users.iter().find(|u| !seen.insert(u.as_str())) {
            return fail(format!("user {dup} listed twice"));
        }
        if self.users.iter().any(|u| u.is_empty()) { return fail("user ids must not be empty".into()); }
        // `_` separates the parts of ledger keys, so ids containing it could alias each other
        if let Some(id) = std::iter::once(&self.group).chain(&self.users).find(|id| id.contains('_')) {
            return fail(format!("id {id} must not contain '_'"));
        }
        if self.rounds == 0 { return fail("rounds must be at least 1".into()); }
        if self.task_timeout_secs == 0 { return fail("task_timeout_secs must be positive".into()); }
        QuorumPolicy::new(self.quorum_ratio).map_err(OrchestratorError::Config)?;
        Ok(())
    }

    pub fn trigger(&self) -> Result<ThresholdTrigger, OrchestratorError> {
        let policy = QuorumPolicy::new(self.quorum_ratio).map_err(OrchestratorError::Config)?;
        Ok(ThresholdTrigger::new(policy, self.aggregation_guard))
    }

    pub fn task_timeout(&self) -> Duration { Duration::from_secs(self.task_timeout_secs) }

    /// Backoff used while the round aggregate is still missing.
    pub fn aggregate_retry(&self) -> RetryConfig {
        let base = Duration::from_millis(self.aggregate_poll.delay_ms);
        RetryConfig { max_retries: self.aggregate_poll.attempts.saturating_sub(1), base_delay: base, max_delay: base * 8, jitter: 0.2 }
    }
}

/// Layer defaults, an optional file (`path`, else `FEDLEDGER_CONFIG_FILE`) and `FEDLEDGER__*` env vars.
pub fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    let mut builder = config::Config::builder();
    let file = path.map(Path::to_path_buf).or_else(|| std::env::var("FEDLEDGER_CONFIG_FILE").ok().map(PathBuf::from));
    if let Some(file) = &file {
        builder = builder.add_source(config::File::from(file.as_path()).required(true));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("FEDLEDGER")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("users")
            .try_parsing(true),
    );
    let cfg: OrchestratorConfig = builder.build()?.try_deserialize()?;
    Ok(cfg)
}
