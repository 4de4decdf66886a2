use std::cell::RefCell;
use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree, UnabortableTransactionError};
use tracing::{debug, info};

use super::{Ledger, TxContext, TxFn};
use crate::error::{ContractError, LedgerError};

/// Durable ledger on sled. Submitted transactions use sled's optimistic serializable transactions
/// and are flushed to disk after commit.
#[derive(Clone)]
pub struct SledLedger {
    db: sled::Db,
}

impl SledLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let db = sled::open(path.as_ref())?;
        info!(path=%path.as_ref().display(), recovered=db.was_recovered(), "sled_ledger_opened");
        Ok(Self { db })
    }

    /// Throwaway database removed on drop.
    pub fn temporary() -> Result<Self, LedgerError> {
        Ok(Self { db: sled::Config::new().temporary(true).open()? })
    }
}

struct SledTx<'a> {
    tree: &'a TransactionalTree,
    // sled needs conflicts surfaced to its retry loop, not swallowed by the contract
    conflict: RefCell<Option<UnabortableTransactionError>>,
}

impl SledTx<'_> {
    fn record(&self, e: UnabortableTransactionError) -> LedgerError {
        let msg = e.to_string();
        self.conflict.borrow_mut().get_or_insert(e);
        LedgerError::Storage(msg)
    }
}

impl TxContext for SledTx<'_> {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        self.tree.get(key).map(|v| v.map(|iv| iv.to_vec())).map_err(|e| self.record(e))
    }

    fn put_state(&self, key: &str, value: &[u8]) -> Result<(), LedgerError> {
        self.tree.insert(key, value).map(|_| ()).map_err(|e| self.record(e))
    }
}

struct SledQuery<'a> { db: &'a sled::Db }

impl TxContext for SledQuery<'_> {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(self.db.get(key)?.map(|iv| iv.to_vec()))
    }

    fn put_state(&self, key: &str, _value: &[u8]) -> Result<(), LedgerError> { Err(LedgerError::ReadOnly(key.to_string())) }
}

impl Ledger for SledLedger {
    fn submit(&self, tx: &TxFn<'_>) -> Result<Vec<u8>, ContractError> {
        let res = self.db.transaction(|tree| {
            let ctx = SledTx { tree, conflict: RefCell::new(None) };
            let out = tx(&ctx);
            if let Some(e) = ctx.conflict.into_inner() {
                debug!(error=%e, "sled_tx_retry_or_storage_error");
                return Err(e.into());
            }
            out.map_err(ConflictableTransactionError::Abort)
        });
        let out = match res {
            Ok(out) => out,
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => return Err(LedgerError::from(e).into()),
        };
        self.db.flush().map_err(LedgerError::from)?;
        Ok(out)
    }

    fn evaluate(&self, query: &TxFn<'_>) -> Result<Vec<u8>, ContractError> {
        query(&SledQuery { db: &self.db })
    }
}
