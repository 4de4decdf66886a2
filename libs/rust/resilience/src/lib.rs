//! Resilience utilities: retry with backoff and bounded task groups.
use once_cell::sync::Lazy;
use opentelemetry::{global, metrics::Counter};

pub mod retry;
pub mod task_group;

pub use retry::{retry_async_if, RetryConfig};
pub use task_group::{TaskError, TaskGroup, TaskOutcome, TaskReport};

static RETRY_ATTEMPTS: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("fedledger-resilience")
        .u64_counter("fl_resilience_retry_attempts_total")
        .with_description("Total retry attempts executed")
        .build()
});

static TASK_FAILURES: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("fedledger-resilience")
        .u64_counter("fl_resilience_task_failures_total")
        .with_description("Grouped tasks that failed, timed out or panicked")
        .build()
});
