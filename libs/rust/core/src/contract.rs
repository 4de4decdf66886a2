//! Ledger-side transaction functions, addressed by name with string arguments.

use tracing::{debug, instrument};

use crate::error::ContractError;
use crate::federated_learning::coordinator::{ThresholdTrigger, TriggerOutcome};
use crate::federated_learning::params::ParameterTree;
use crate::ledger::TxContext;
use crate::registry::GroupRegistry;
use crate::round_store::RoundStore;

pub const REGISTER_USER: &str = "RegisterUser";
pub const UPLOAD_MODEL_PARAM: &str = "UploadModelParam";
pub const GET_PARAM: &str = "GetParam";
pub const GET_AGGREGATED_PARAMS: &str = "GetAggregatedParams";
pub const GET_GROUPS_NAME_LIST: &str = "GetGroupsNameList";

pub struct FlContract<P> {
    store: RoundStore<P>,
}

fn expect_args<'a, const N: usize>(function: &str, args: &[&'a str]) -> Result<[&'a str; N], ContractError> {
    <[&str; N]>::try_from(args).map_err(|_| ContractError::InvalidArguments { function: function.to_string(), expected: N, got: args.len() })
}

impl<P: ParameterTree> FlContract<P> {
    pub fn new(trigger: ThresholdTrigger) -> Self {
        Self { store: RoundStore::new(GroupRegistry::new(), trigger) }
    }

    pub fn store(&self) -> &RoundStore<P> { &self.store }

    /// Dispatch a named transaction. Writes return an empty payload, reads return JSON.
    pub fn invoke(&self, ctx: &dyn TxContext, function: &str, args: &[&str]) -> Result<Vec<u8>, ContractError> {
        match function {
            REGISTER_USER => {
                let [group, user] = expect_args::<2>(function, args)?;
                self.register_user(ctx, group, user)?;
                Ok(Vec::new())
            }
            UPLOAD_MODEL_PARAM => {
                let [group, round, user, params] = expect_args::<4>(function, args)?;
                self.upload_model_param(ctx, group, round, user, params)?;
                Ok(Vec::new())
            }
            GET_PARAM => {
                let [key] = expect_args::<1>(function, args)?;
                self.get_param(ctx, key)
            }
            GET_AGGREGATED_PARAMS => {
                let [group, round] = expect_args::<2>(function, args)?;
                self.get_aggregated_params(ctx, group, round)
            }
            GET_GROUPS_NAME_LIST => {
                let [] = expect_args::<0>(function, args)?;
                self.get_groups_name_list(ctx)
            }
            other => Err(ContractError::UnknownFunction(other.to_string())),
        }
    }

    #[instrument(skip(self, ctx))]
    pub fn register_user(&self, ctx: &dyn TxContext, group: &str, user: &str) -> Result<(), ContractError> {
        self.store.registry().register(ctx, group, user).map(|_| ())
    }

    #[instrument(skip(self, ctx, params_json), fields(bytes = params_json.len()))]
    pub fn upload_model_param(&self, ctx: &dyn TxContext, group: &str, round: &str, user: &str, params_json: &str) -> Result<TriggerOutcome, ContractError> {
        let params: P = serde_json::from_str(params_json).map_err(ContractError::decode("model params"))?;
        let outcome = self.store.put_submission(ctx, group, round, user, params)?;
        debug!(?outcome, "upload_complete");
        Ok(outcome)
    }

    pub fn get_param(&self, ctx: &dyn TxContext, key: &str) -> Result<Vec<u8>, ContractError> {
        let sub = self.store.get_submission(ctx, key)?;
        serde_json::to_vec(&sub).map_err(ContractError::encode("submission"))
    }

    pub fn get_aggregated_params(&self, ctx: &dyn TxContext, group: &str, round: &str) -> Result<Vec<u8>, ContractError> {
        let agg = self.store.get_aggregate(ctx, group, round)?;
        serde_json::to_vec(&agg).map_err(ContractError::encode("aggregate"))
    }

    pub fn get_groups_name_list(&self, ctx: &dyn TxContext) -> Result<Vec<u8>, ContractError> {
        let names = self.store.list_group_names(ctx)?;
        serde_json::to_vec(&names).map_err(ContractError::encode("group name list"))
    }
}
