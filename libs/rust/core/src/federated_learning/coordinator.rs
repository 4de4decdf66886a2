use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::aggregation::Accumulator;
use super::params::ParameterTree;
use crate::error::{AggregationError, ContractError};
use crate::ledger::TxContext;
use crate::round_store::{aggregate_key, submission_key, RoundStore};
use crate::telemetry::FED_METRICS;

/// Fraction of the group that must have submitted before a round is aggregated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuorumPolicy { ratio: f64 }

impl Default for QuorumPolicy {
    fn default() -> Self { Self { ratio: 0.8 } }
}

impl QuorumPolicy {
    /// `ratio` must lie in `(0, 1]`.
    pub fn new(ratio: f64) -> Result<Self, String> {
        if ratio.is_finite() && ratio > 0.0 && ratio <= 1.0 { Ok(Self { ratio }) }
        else { Err(format!("quorum ratio must be in (0, 1], got {ratio}")) }
    }

    pub fn ratio(&self) -> f64 { self.ratio }

    /// `ratio × members` rounded half away from zero, never below one.
    pub fn quorum(&self, members: usize) -> usize {
        ((self.ratio * members as f64).round() as usize).max(1)
    }
}

/// What happens when a round that already has an aggregate reaches quorum again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationGuard {
    /// Every qualifying submission recomputes and overwrites the aggregate.
    #[default]
    LastWriterWins,
    /// The first aggregate written for a round is final.
    WriteOnce,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TriggerOutcome {
    Pending { present: usize, quorum: usize },
    Aggregated { participants: usize, quorum: usize },
    AlreadyAggregated,
    /// Aggregation ran and failed; the triggering submission is still committed.
    Failed { reason: String },
}

/// Scan-and-decide quorum check, re-run after every submission write.
#[derive(Clone, Debug, Default)]
pub struct ThresholdTrigger {
    policy: QuorumPolicy,
    guard: AggregationGuard,
}

impl ThresholdTrigger {
    pub fn new(policy: QuorumPolicy, guard: AggregationGuard) -> Self { Self { policy, guard } }

    pub fn policy(&self) -> QuorumPolicy { self.policy }

    pub fn guard(&self) -> AggregationGuard { self.guard }

    pub fn on_submission<P: ParameterTree>(&self, ctx: &dyn TxContext, store: &RoundStore<P>, group: &str, members: &[String], round: &str) -> Result<TriggerOutcome, ContractError> {
        let quorum = self.policy.quorum(members.len());
        let mut remaining = quorum as isize;
        let mut present = 0usize;
        for user in members {
            if ctx.get_state(&submission_key(group, user, round))?.is_some() {
                remaining -= 1;
                present += 1;
            }
        }
        if remaining > 0 {
            debug!(%group, %round, present, quorum, "quorum_pending");
            return Ok(TriggerOutcome::Pending { present, quorum });
        }
        if self.guard == AggregationGuard::WriteOnce && ctx.get_state(&aggregate_key(group, round))?.is_some() {
            debug!(%group, %round, "aggregate_already_committed");
            return Ok(TriggerOutcome::AlreadyAggregated);
        }

        let start = Instant::now();
        match aggregate_round(ctx, store, group, members, round) {
            Ok(participants) => {
                FED_METRICS.aggregation_latency_ms.record(start.elapsed().as_secs_f64() * 1000.0, &[]);
                FED_METRICS.aggregations_total.add(1, &[]);
                info!(%group, %round, participants, quorum, "round_aggregated");
                Ok(TriggerOutcome::Aggregated { participants, quorum })
            }
            Err(ContractError::Ledger(e)) => Err(ContractError::Ledger(e)),
            Err(e) => {
                FED_METRICS.aggregation_failures_total.add(1, &[]);
                error!(%group, %round, error=%e, "aggregation_failed");
                Ok(TriggerOutcome::Failed { reason: e.to_string() })
            }
        }
    }
}

/// Average every member's submission present for `round` and store it as the round aggregate.
/// Returns the number of submissions folded, which is what the mean is divided by.
pub fn aggregate_round<P: ParameterTree>(ctx: &dyn TxContext, store: &RoundStore<P>, group: &str, members: &[String], round: &str) -> Result<usize, ContractError> {
    let mut acc = Accumulator::new();
    for user in members {
        let key = submission_key(group, user, round);
        let Some(sub) = store.find(ctx, &key)? else { continue };
        if sub.round_id != round { warn!(%key, stored_round=%sub.round_id, "submission_round_mismatch"); }
        acc.fold(sub.params).map_err(|e| AggregationError::within(e, user))?;
    }
    let participants = acc.count();
    let mean = acc.finish()?;
    store.put_aggregate(ctx, group, round, mean)?;
    Ok(participants)
}
