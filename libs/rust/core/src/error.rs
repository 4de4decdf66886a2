//! Error types shared by the ledger, contract and aggregation layers.

use thiserror::Error;

/// Failures while folding parameter trees together.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    #[error("no submissions available to aggregate")]
    NoSubmissions,
    #[error("shape mismatch at `{path}`: expected length {expected}, found {found}")]
    ShapeMismatch { path: String, expected: usize, found: usize },
    #[error("cannot combine {left} with {right} at `{path}`")]
    KindMismatch { path: String, left: &'static str, right: &'static str },
}

impl AggregationError {
    /// Prefix the error path with the enclosing field name or `[index]` segment.
    pub(crate) fn within(self, segment: &str) -> Self {
        let join = |path: String| {
            if path.is_empty() { segment.to_string() }
            else if path.starts_with('[') { format!("{segment}{path}") }
            else { format!("{segment}.{path}") }
        };
        match self {
            AggregationError::NoSubmissions => AggregationError::NoSubmissions,
            AggregationError::ShapeMismatch { path, expected, found } => AggregationError::ShapeMismatch { path: join(path), expected, found },
            AggregationError::KindMismatch { path, left, right } => AggregationError::KindMismatch { path: join(path), left, right },
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger storage error: {0}")]
    Storage(String),
    #[error("write to `{0}` rejected: query transactions are read-only")]
    ReadOnly(String),
}

impl From<sled::Error> for LedgerError {
    fn from(e: sled::Error) -> Self { LedgerError::Storage(e.to_string()) }
}

/// Errors surfaced by contract transactions. Any of them aborts the transaction.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("user {user} is already registered in group {group}")]
    AlreadyRegistered { group: String, user: String },
    #[error("user {user} is not registered in group {group}")]
    NotRegistered { group: String, user: String },
    #[error("user {user} already submitted parameters for round {round} of group {group}")]
    AlreadySubmitted { group: String, user: String, round: String },
    #[error("the model params {0} do not exist")]
    NotFound(String),
    #[error("failed to decode {what}: {source}")]
    Decode { what: &'static str, #[source] source: serde_json::Error },
    #[error("failed to encode {what}: {source}")]
    Encode { what: &'static str, #[source] source: serde_json::Error },
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("unknown contract function {0}")]
    UnknownFunction(String),
    #[error("{function} expects {expected} arguments, got {got}")]
    InvalidArguments { function: String, expected: usize, got: usize },
}

impl ContractError {
    pub(crate) fn decode(what: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| ContractError::Decode { what, source }
    }

    pub(crate) fn encode(what: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| ContractError::Encode { what, source }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, ContractError::NotFound(_)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_compose_outside_in() {
        let e = AggregationError::ShapeMismatch { path: String::new(), expected: 3, found: 2 }
            .within("[1]")
            .within("[0]")
            .within("conv1.weight");
        assert_eq!(e, AggregationError::ShapeMismatch { path: "conv1.weight[0][1]".into(), expected: 3, found: 2 });

        let k = AggregationError::KindMismatch { path: "[2]".into(), left: "number", right: "sequence" }.within("b").within("a");
        assert!(k.to_string().contains("`a.b[2]`"));
    }
}
