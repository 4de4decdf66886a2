use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::trace;

use super::{Ledger, TxContext, TxFn};
use crate::error::{ContractError, LedgerError};

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, Vec<u8>>,
    versions: HashMap<String, u64>,
}

/// In-process ledger. Transactions hold the state lock for their whole run, so they are fully
/// serialized. Each committed write bumps the key's version.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self { Self::default() }

    /// Number of committed writes to `key` (0 if never written).
    pub fn version(&self, key: &str) -> u64 { self.state.lock().versions.get(key).copied().unwrap_or(0) }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> { self.state.lock().entries.get(key).cloned() }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.state.lock().entries.range(prefix.to_string()..).take_while(|(k, _)| k.starts_with(prefix)).map(|(k, _)| k.clone()).collect()
    }
}

struct Overlay<'a> {
    base: &'a BTreeMap<String, Vec<u8>>,
    writes: RefCell<BTreeMap<String, Vec<u8>>>,
    read_only: bool,
}

impl TxContext for Overlay<'_> {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        if let Some(v) = self.writes.borrow().get(key) { return Ok(Some(v.clone())); }
        Ok(self.base.get(key).cloned())
    }

    fn put_state(&self, key: &str, value: &[u8]) -> Result<(), LedgerError> {
        if self.read_only { return Err(LedgerError::ReadOnly(key.to_string())); }
        self.writes.borrow_mut().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

impl Ledger for MemoryLedger {
    fn submit(&self, tx: &TxFn<'_>) -> Result<Vec<u8>, ContractError> {
        let mut state = self.state.lock();
        let overlay = Overlay { base: &state.entries, writes: RefCell::new(BTreeMap::new()), read_only: false };
        let out = tx(&overlay)?;
        let writes = overlay.writes.into_inner();
        trace!(writes = writes.len(), "memory_ledger_commit");
        for (key, value) in writes {
            *state.versions.entry(key.clone()).or_insert(0) += 1;
            state.entries.insert(key, value);
        }
        Ok(out)
    }

    fn evaluate(&self, query: &TxFn<'_>) -> Result<Vec<u8>, ContractError> {
        let state = self.state.lock();
        let overlay = Overlay { base: &state.entries, writes: RefCell::new(BTreeMap::new()), read_only: true };
        query(&overlay)
    }
}
