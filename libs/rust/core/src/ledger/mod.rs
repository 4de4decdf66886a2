//! Transactional key-value ledger seam.
//!
//! The contract never talks to storage directly: every operation runs as a transaction function
//! against a [`TxContext`]. A [`Ledger`] backend guarantees that a submitted transaction commits all
//! of its writes or none of them, and that transactions touching the same keys are serializable.

mod memory;
mod sled_store;

pub use memory::MemoryLedger;
pub use sled_store::SledLedger;

use crate::error::{ContractError, LedgerError};

/// Per-transaction view of ledger state with read-your-writes semantics.
pub trait TxContext {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError>;
    fn put_state(&self, key: &str, value: &[u8]) -> Result<(), LedgerError>;
}

/// A transaction body. Backends may run it more than once (optimistic retries), so it must be `Fn`.
pub type TxFn<'a> = dyn Fn(&dyn TxContext) -> Result<Vec<u8>, ContractError> + Sync + 'a;

pub trait Ledger: Send + Sync {
    /// Run `tx` atomically; its writes are committed only when it returns `Ok`.
    fn submit(&self, tx: &TxFn<'_>) -> Result<Vec<u8>, ContractError>;
    /// Run a read-only query; any write attempt fails with [`LedgerError::ReadOnly`].
    fn evaluate(&self, query: &TxFn<'_>) -> Result<Vec<u8>, ContractError>;
}
