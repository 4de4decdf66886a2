//! Ledger-backed federated-learning round coordination.
//!
//! Participants register into groups, upload per-round parameter trees, and the ledger averages a
//! round once enough of the group has submitted. Everything here runs inside ledger transactions;
//! the async orchestration side lives in the `fl-orchestrator` service.

pub mod contract;
pub mod error;
pub mod federated_learning;
pub mod gateway;
pub mod ledger;
pub mod registry;
pub mod round_store;
pub mod telemetry;

pub use contract::FlContract;
pub use error::{AggregationError, ContractError, LedgerError};
pub use federated_learning::{
    AggregationGuard, DynamicParams, ModelParams, ParamNode, ParameterTree, QuorumPolicy, ThresholdTrigger,
    TriggerOutcome,
};
pub use gateway::{Gateway, GatewayError, LocalGateway};
pub use ledger::{Ledger, MemoryLedger, SledLedger, TxContext};
pub use registry::{Group, GroupNames, GroupRegistry};
pub use round_store::{aggregate_key, submission_key, AggregateResult, RoundStore, Submission};
pub use telemetry::{init_tracing, FedMetrics, FED_METRICS};
