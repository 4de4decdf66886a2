//! Client-side driver for multi-round federated training against the ledger contract.

pub mod config;
pub mod export;
pub mod orchestrator;
pub mod trainer;

pub use config::{load_config, OrchestratorConfig, ParamSchema};
pub use orchestrator::{OrchestratorError, PhaseRecord, RoundOrchestrator, RoundPhase, RoundReport, RunSummary};
pub use trainer::{ProcessTrainer, Trainer};
