//! Client-side transport to the contract: submit a named transaction or evaluate a query.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::contract::FlContract;
use crate::error::ContractError;
use crate::federated_learning::params::ParameterTree;
use crate::ledger::Ledger;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("gateway transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool { matches!(self, GatewayError::Contract(e) if e.is_not_found()) }

    pub fn is_already_registered(&self) -> bool {
        matches!(self, GatewayError::Contract(ContractError::AlreadyRegistered { .. }))
    }

    pub fn is_already_submitted(&self) -> bool {
        matches!(self, GatewayError::Contract(ContractError::AlreadySubmitted { .. }))
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Run a state-changing transaction and wait for it to commit.
    async fn submit_transaction(&self, name: &str, args: &[&str]) -> Result<Vec<u8>, GatewayError>;
    /// Run a read-only query.
    async fn evaluate_transaction(&self, name: &str, args: &[&str]) -> Result<Vec<u8>, GatewayError>;
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Submit,
    Evaluate,
}

/// Gateway that executes the contract in-process against a local ledger. Ledger calls block (locks,
/// sled flushes), so they run on the blocking pool.
pub struct LocalGateway<P> {
    ledger: Arc<dyn Ledger>,
    contract: Arc<FlContract<P>>,
}

impl<P: ParameterTree> LocalGateway<P> {
    pub fn new(ledger: Arc<dyn Ledger>, contract: FlContract<P>) -> Self { Self { ledger, contract: Arc::new(contract) } }

    pub fn ledger(&self) -> &Arc<dyn Ledger> { &self.ledger }

    async fn run(&self, mode: Mode, name: &str, args: &[&str]) -> Result<Vec<u8>, GatewayError> {
        let (ledger, contract) = (self.ledger.clone(), self.contract.clone());
        let name = name.to_string();
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let joined = tokio::task::spawn_blocking(move || {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            match mode {
                Mode::Submit => ledger.submit(&|ctx| contract.invoke(ctx, &name, &args)),
                Mode::Evaluate => ledger.evaluate(&|ctx| contract.invoke(ctx, &name, &args)),
            }
        })
        .await;
        match joined {
            Ok(res) => Ok(res?),
            Err(e) => Err(GatewayError::Transport(format!("ledger task did not complete: {e}"))),
        }
    }
}

#[async_trait]
impl<P: ParameterTree> Gateway for LocalGateway<P> {
    #[instrument(skip(self, args), fields(argc = args.len()))]
    async fn submit_transaction(&self, name: &str, args: &[&str]) -> Result<Vec<u8>, GatewayError> {
        let out = self.run(Mode::Submit, name, args).await?;
        debug!(bytes = out.len(), "transaction_committed");
        Ok(out)
    }

    async fn evaluate_transaction(&self, name: &str, args: &[&str]) -> Result<Vec<u8>, GatewayError> {
        self.run(Mode::Evaluate, name, args).await
    }
}
