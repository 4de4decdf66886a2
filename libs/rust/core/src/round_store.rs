//! Per-user and per-round parameter blobs in ledger state.
//!
//! Key layout (shared with every other client of the ledger, so it must not change):
//! - `<group>`: group membership
//! - `<group>_PARAM_<userID>_<roundID>`: one user's submission for a round
//! - `<group>_AGGREPARAM_<roundID>`: the round aggregate

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::ContractError;
use crate::federated_learning::coordinator::{ThresholdTrigger, TriggerOutcome};
use crate::federated_learning::params::ParameterTree;
use crate::ledger::TxContext;
use crate::registry::{GroupNames, GroupRegistry};
use crate::telemetry::FED_METRICS;

/// User id recorded on aggregate results.
pub const AGGREGATE_USER_ID: &str = "ALL";

pub fn submission_key(group: &str, user: &str, round: &str) -> String { format!("{group}_PARAM_{user}_{round}") }

pub fn aggregate_key(group: &str, round: &str) -> String { format!("{group}_AGGREPARAM_{round}") }

/// A user's parameters for one round. Aggregates use the same shape with user id `ALL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission<P> {
    pub params: P,
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "roundID")]
    pub round_id: String,
}

pub type AggregateResult<P> = Submission<P>;

impl<P> Submission<P> {
    pub fn is_aggregate(&self) -> bool { self.user_id == AGGREGATE_USER_ID }
}

pub struct RoundStore<P> {
    registry: GroupRegistry,
    trigger: ThresholdTrigger,
    _schema: PhantomData<fn() -> P>,
}

impl<P: ParameterTree> RoundStore<P> {
    pub fn new(registry: GroupRegistry, trigger: ThresholdTrigger) -> Self {
        Self { registry, trigger, _schema: PhantomData }
    }

    pub fn registry(&self) -> &GroupRegistry { &self.registry }

    pub fn trigger(&self) -> &ThresholdTrigger { &self.trigger }

    /// Write `user`'s parameters for `round`, then run the quorum check for that round.
    /// Submissions are write-once: a second upload for the same round aborts the transaction.
    #[instrument(skip(self, ctx, params))]
    pub fn put_submission(&self, ctx: &dyn TxContext, group: &str, round: &str, user: &str, params: P) -> Result<TriggerOutcome, ContractError> {
        let members = match self.registry.group(ctx, group)? {
            Some(g) if g.contains(user) => g.members,
            _ => return Err(ContractError::NotRegistered { group: group.to_string(), user: user.to_string() }),
        };
        let key = submission_key(group, user, round);
        if ctx.get_state(&key)?.is_some() {
            return Err(ContractError::AlreadySubmitted { group: group.to_string(), user: user.to_string(), round: round.to_string() });
        }
        let submission = Submission { params, user_id: user.to_string(), round_id: round.to_string() };
        let data = serde_json::to_vec(&submission).map_err(ContractError::encode("submission"))?;
        ctx.put_state(&key, &data)?;
        FED_METRICS.submissions_total.add(1, &[]);
        info!(bytes = data.len(), "submission_written");
        self.trigger.on_submission(ctx, self, group, &members, round)
    }

    /// Read a submission (or aggregate) by its full key, `None` if absent.
    pub fn find(&self, ctx: &dyn TxContext, key: &str) -> Result<Option<Submission<P>>, ContractError> {
        match ctx.get_state(key)? {
            Some(raw) => serde_json::from_slice(&raw).map(Some).map_err(ContractError::decode("submission")),
            None => Ok(None),
        }
    }

    pub fn get_submission(&self, ctx: &dyn TxContext, key: &str) -> Result<Submission<P>, ContractError> {
        self.find(ctx, key)?.ok_or_else(|| ContractError::NotFound(key.to_string()))
    }

    pub fn get_aggregate(&self, ctx: &dyn TxContext, group: &str, round: &str) -> Result<AggregateResult<P>, ContractError> {
        self.get_submission(ctx, &aggregate_key(group, round))
    }

    pub(crate) fn put_aggregate(&self, ctx: &dyn TxContext, group: &str, round: &str, params: P) -> Result<(), ContractError> {
        let result = Submission { params, user_id: AGGREGATE_USER_ID.to_string(), round_id: round.to_string() };
        let data = serde_json::to_vec(&result).map_err(ContractError::encode("aggregate"))?;
        ctx.put_state(&aggregate_key(group, round), &data)?;
        Ok(())
    }

    pub fn list_group_names(&self, ctx: &dyn TxContext) -> Result<GroupNames, ContractError> { self.registry.group_names(ctx) }
}
