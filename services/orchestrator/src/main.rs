use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use fedledger_core::{init_tracing, DynamicParams, FlContract, Gateway, Ledger, LocalGateway, ModelParams, SledLedger};
use fl_orchestrator::{load_config, ParamSchema, ProcessTrainer, RoundOrchestrator};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(cfg_path.as_deref())?;
    init_tracing("fl-orchestrator", &cfg.log_level)?;
    cfg.validate()?;
    info!(target: "fl-orchestrator", group = %cfg.group, users = ?cfg.users, rounds = cfg.rounds, schema = ?cfg.schema, "Starting fl-orchestrator");

    let ledger: Arc<dyn Ledger> = Arc::new(SledLedger::open(&cfg.ledger_path)?);
    let contract_trigger = cfg.trigger()?;
    let gateway: Arc<dyn Gateway> = match cfg.schema {
        ParamSchema::Dynamic => Arc::new(LocalGateway::new(ledger, FlContract::<DynamicParams>::new(contract_trigger))),
        ParamSchema::Fixed => Arc::new(LocalGateway::new(ledger, FlContract::<ModelParams>::new(contract_trigger))),
    };
    let trainer = Arc::new(ProcessTrainer::new(cfg.trainer.clone(), cfg.model_dir.clone()));
    let orchestrator = RoundOrchestrator::new(cfg, gateway, trainer);

    tokio::select! {
        res = orchestrator.run() => {
            let summary = res?;
            for r in &summary.rounds {
                info!(round = r.round, uploaded = r.uploaded.len(), failed_uploads = r.failed_uploads.len(), failed_tasks = r.failed_tasks.len(), "round_summary");
            }
            info!(run_id = %summary.run_id, final_phase = ?summary.final_phase, "run_complete");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown_signal_received");
        }
    }
    Ok(())
}
