//! Parameter trees, FedAvg arithmetic and the per-round quorum trigger.

pub mod aggregation;
pub mod coordinator;
pub mod params;

pub use aggregation::{divide, mean, sum, Accumulator};
pub use coordinator::{aggregate_round, AggregationGuard, QuorumPolicy, ThresholdTrigger, TriggerOutcome};
pub use params::{DynamicParams, ModelParams, ParamNode, ParameterTree};
