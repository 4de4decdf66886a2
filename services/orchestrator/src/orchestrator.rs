//! Multi-round driver: register, train, upload, read back the aggregate, seed the next round.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use fedledger_core::contract::{GET_AGGREGATED_PARAMS, GET_GROUPS_NAME_LIST, GET_PARAM, REGISTER_USER, UPLOAD_MODEL_PARAM};
use fedledger_core::{aggregate_key, submission_key, Gateway, GatewayError, GroupNames, Submission};
use fedledger_resilience::{retry_async_if, TaskGroup};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::export::ExportWriter;
use crate::trainer::Trainer;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("aggregate for round {round} not available")]
    AggregateUnavailable { round: usize },
    #[error("illegal phase transition {from:?} -> {to:?}")]
    InvalidTransition { from: RoundPhase, to: RoundPhase },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("malformed ledger response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("export failed: {0}")]
    Export(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoundPhase { Idle, Training, Uploading, AwaitingAggregate, Advancing, Done }

impl RoundPhase {
    fn can_enter(self, next: RoundPhase) -> bool {
        use RoundPhase::*;
        matches!(
            (self, next),
            (Idle, Training) | (Training, Uploading) | (Uploading, AwaitingAggregate) | (AwaitingAggregate, Advancing)
                | (AwaitingAggregate, Done) | (Advancing, Idle)
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseRecord {
    pub round: usize,
    pub phase: RoundPhase,
    pub duration: Duration,
}

/// Run-wide phase FSM; records how long every round spent in each phase.
#[derive(Debug)]
struct PhaseTracker {
    round: usize,
    phase: RoundPhase,
    phase_started_at: Instant,
    records: Vec<PhaseRecord>,
}

impl PhaseTracker {
    fn new() -> Self { Self { round: 0, phase: RoundPhase::Idle, phase_started_at: Instant::now(), records: Vec::new() } }

    fn enter(&mut self, next: RoundPhase) -> Result<(), OrchestratorError> {
        if !self.phase.can_enter(next) {
            return Err(OrchestratorError::InvalidTransition { from: self.phase, to: next });
        }
        let now = Instant::now();
        self.records.push(PhaseRecord { round: self.round, phase: self.phase, duration: now - self.phase_started_at });
        if next == RoundPhase::Idle { self.round += 1; }
        debug!(round = self.round, from = ?self.phase, to = ?next, "phase_transition");
        self.phase = next;
        self.phase_started_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoundReport {
    pub round: usize,
    pub uploaded: Vec<String>,
    /// `(user, reason)` for every member whose upload did not happen.
    pub failed_uploads: Vec<(String, String)>,
    /// Users whose training task launched in this round (initial or load-then-train) did not succeed.
    pub failed_tasks: Vec<String>,
    pub aggregate_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub rounds: Vec<RoundReport>,
    pub phases: Vec<PhaseRecord>,
    pub final_phase: RoundPhase,
}

pub struct RoundOrchestrator {
    cfg: OrchestratorConfig,
    gateway: Arc<dyn Gateway>,
    trainer: Arc<dyn Trainer>,
    exports: ExportWriter,
}

impl RoundOrchestrator {
    pub fn new(cfg: OrchestratorConfig, gateway: Arc<dyn Gateway>, trainer: Arc<dyn Trainer>) -> Self {
        let exports = ExportWriter::new(cfg.model_dir.clone());
        Self { cfg, gateway, trainer, exports }
    }

    pub fn config(&self) -> &OrchestratorConfig { &self.cfg }

    #[instrument(skip(self), fields(group = %self.cfg.group))]
    pub async fn run(&self) -> Result<RunSummary, OrchestratorError> {
        self.cfg.validate()?;
        let run_id = Uuid::new_v4();
        info!(%run_id, rounds = self.cfg.rounds, users = self.cfg.users.len(), "run_started");
        self.exports.ensure_dir().await?;

        let mut tracker = PhaseTracker::new();
        let mut reports = Vec::with_capacity(self.cfg.rounds);
        let mut untrained = BTreeSet::new();
        for round in 0..self.cfg.rounds {
            if round > 0 { tracker.enter(RoundPhase::Idle)?; }
            let report = self.run_round(round, &mut tracker, &mut untrained).await?;
            reports.push(report);
        }
        tracker.enter(RoundPhase::Done)?;
        info!(%run_id, "run_finished");
        Ok(RunSummary { run_id, rounds: reports, phases: tracker.records, final_phase: tracker.phase })
    }

    #[instrument(skip(self, tracker, untrained))]
    async fn run_round(&self, round: usize, tracker: &mut PhaseTracker, untrained: &mut BTreeSet<String>) -> Result<RoundReport, OrchestratorError> {
        let round_id = round.to_string();
        let group = self.cfg.group.as_str();
        let mut report = RoundReport { round, ..RoundReport::default() };

        if round == 0 {
            self.register_all().await;
        }

        tracker.enter(RoundPhase::Training)?;
        if round == 0 {
            let failed = self.fan_out("train", |trainer, worker| async move { trainer.train(worker).await }).await;
            *untrained = failed.iter().cloned().collect();
            report.failed_tasks = failed;
        }

        tracker.enter(RoundPhase::Uploading)?;
        for (worker, user) in self.cfg.users.iter().enumerate() {
            if untrained.contains(user) {
                warn!(%user, round, "upload_skipped_untrained");
                report.failed_uploads.push((user.clone(), "local training failed".into()));
                continue;
            }
            match self.upload(worker, user, &round_id).await {
                Ok(()) => report.uploaded.push(user.clone()),
                Err(e) => {
                    warn!(%user, round, error = %format!("{e:#}"), "upload_failed");
                    report.failed_uploads.push((user.clone(), format!("{e:#}")));
                }
            }
        }

        tracker.enter(RoundPhase::AwaitingAggregate)?;
        self.export_readbacks(&round_id).await;
        self.log_group_names().await;
        let aggregate = self.await_aggregate(round).await?;
        report.aggregate_path = self.exports.write_params(&aggregate_key(group, &round_id), &aggregate).await?;
        info!(round, uploaded = report.uploaded.len(), path = %report.aggregate_path.display(), "round_aggregate_ready");

        if round + 1 < self.cfg.rounds {
            tracker.enter(RoundPhase::Advancing)?;
            let aggregate_path = report.aggregate_path.clone();
            let failed = self
                .fan_out("load_train", move |trainer, worker| {
                    let aggregate_path = aggregate_path.clone();
                    async move { trainer.load_and_train(&aggregate_path, worker).await }
                })
                .await;
            *untrained = failed.iter().cloned().collect();
            report.failed_tasks.extend(failed);
        }
        Ok(report)
    }

    /// Sequential, in member order. Existing registrations are expected on reruns.
    async fn register_all(&self) {
        for user in &self.cfg.users {
            match self.gateway.submit_transaction(REGISTER_USER, &[self.cfg.group.as_str(), user.as_str()]).await {
                Ok(_) => info!(%user, "user_registered"),
                Err(e) if e.is_already_registered() => info!(%user, "user_already_registered"),
                Err(e) => warn!(%user, error = %e, "registration_failed"),
            }
        }
    }

    /// One task per user under the group limits; returns the users whose task failed.
    async fn fan_out<F, Fut>(&self, name: &str, make: F) -> Vec<String>
    where
        F: Fn(Arc<dyn Trainer>, usize) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut tasks = TaskGroup::new(name, self.cfg.max_concurrent_tasks, Some(self.cfg.task_timeout()));
        for (worker, user) in self.cfg.users.iter().enumerate() {
            tasks.spawn(user.clone(), make(self.trainer.clone(), worker));
        }
        let report = tasks.join_all().await;
        report.failures().map(|(user, _)| user.to_string()).collect()
    }

    async fn upload(&self, worker: usize, user: &str, round_id: &str) -> anyhow::Result<()> {
        let path = self.trainer.param_file(worker);
        let params = tokio::fs::read_to_string(&path).await.with_context(|| format!("reading {}", path.display()))?;
        // a rerun finds this round's earlier submission in place; it is kept as is
        match self.gateway.submit_transaction(UPLOAD_MODEL_PARAM, &[self.cfg.group.as_str(), round_id, user, params.as_str()]).await {
            Ok(_) => debug!(%user, path = %path.display(), "params_uploaded"),
            Err(e) if e.is_already_submitted() => info!(%user, round = %round_id, "params_already_uploaded"),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn read_params(&self, key: &str) -> Result<Value, OrchestratorError> {
        let raw = self.gateway.evaluate_transaction(GET_PARAM, &[key]).await?;
        let sub: Submission<Value> = serde_json::from_slice(&raw)?;
        Ok(sub.params)
    }

    /// Per-user `_Dy.json` copies plus the all-users file. Diagnostic only, so failures are logged.
    async fn export_readbacks(&self, round_id: &str) {
        let mut by_user = BTreeMap::new();
        for user in &self.cfg.users {
            let key = submission_key(&self.cfg.group, user, round_id);
            match self.read_params(&key).await {
                Ok(params) => {
                    if let Err(e) = self.exports.write_params(&key, &params).await { warn!(%key, error = %e, "export_failed"); }
                    by_user.insert(user.clone(), params);
                }
                Err(e) => debug!(%key, error = %e, "readback_missing"),
            }
        }
        if by_user.is_empty() { return; }
        if let Err(e) = self.exports.write_round(&self.cfg.group, round_id, &by_user).await {
            warn!(round = %round_id, error = %e, "export_failed");
        }
    }

    async fn log_group_names(&self) {
        let listing = match self.gateway.evaluate_transaction(GET_GROUPS_NAME_LIST, &[]).await {
            Ok(raw) => serde_json::from_slice::<GroupNames>(&raw).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match listing {
            Ok(listing) => info!(groups = ?listing.names, "group_listing"),
            Err(e) => warn!(error = %e, "group_listing_failed"),
        }
    }

    /// Poll until the aggregate exists; only "not found yet" is retried.
    async fn await_aggregate(&self, round: usize) -> Result<Value, OrchestratorError> {
        let round_id = round.to_string();
        let (group, round_arg) = (self.cfg.group.as_str(), round_id.as_str());
        let polled = retry_async_if(
            &self.cfg.aggregate_retry(),
            |attempt| async move {
                debug!(attempt, "aggregate_poll");
                self.gateway.evaluate_transaction(GET_AGGREGATED_PARAMS, &[group, round_arg]).await
            },
            GatewayError::is_not_found,
        )
        .await;
        match polled {
            Ok(raw) => Ok(serde_json::from_slice::<Submission<Value>>(&raw)?.params),
            Err(e) if e.is_not_found() => {
                warn!(round, "aggregate_unavailable");
                Err(OrchestratorError::AggregateUnavailable { round })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_walks_rounds_and_rejects_skips() {
        let mut t = PhaseTracker::new();
        for next in [RoundPhase::Training, RoundPhase::Uploading, RoundPhase::AwaitingAggregate, RoundPhase::Advancing, RoundPhase::Idle] {
            t.enter(next).unwrap();
        }
        assert_eq!(t.round, 1);
        assert!(matches!(
            t.enter(RoundPhase::Uploading),
            Err(OrchestratorError::InvalidTransition { from: RoundPhase::Idle, to: RoundPhase::Uploading })
        ));
        let rounds: Vec<_> = t.records.iter().map(|r| (r.round, r.phase)).collect();
        assert_eq!(rounds.last(), Some(&(0, RoundPhase::Advancing)));
        assert_eq!(rounds.len(), 5);
    }

    #[test]
    fn done_is_terminal() {
        assert!(RoundPhase::AwaitingAggregate.can_enter(RoundPhase::Done));
        for next in [RoundPhase::Idle, RoundPhase::Training, RoundPhase::Done] {
            assert!(!RoundPhase::Done.can_enter(next));
        }
    }
}
