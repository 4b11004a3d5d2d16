pub mod memory;

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

use crate::domain::ids::WorkloadKey;
use crate::domain::workload::Workload;
use crate::error::{Error, Result};

pub use memory::InMemoryStore;

/// Number of optimistic-concurrency retries before a conflict is surfaced.
const CONFLICT_RETRIES: u32 = 5;
/// Base backoff between conflict retries; doubled per attempt, with jitter.
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// The external persistence the admission engine reads workloads from and
/// writes status updates to.
///
/// Updates are optimistic: the submitted workload carries the resource version
/// it was read at, and the store rejects the write with [`Error::Conflict`] when
/// someone else won the race. In-memory operations of the engine never block on
/// this trait; it is the only I/O surface of the core.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    async fn get(&self, key: &WorkloadKey) -> Result<Workload>;

    async fn list(&self) -> Result<Vec<Workload>>;

    /// Persists a new workload, assigning its uid and first resource version.
    async fn create(&self, workload: Workload) -> Result<Workload>;

    /// Replaces the stored workload iff `workload.resource_version` still
    /// matches. The returned object carries the incremented version.
    async fn update(&self, workload: Workload) -> Result<Workload>;

    async fn delete(&self, key: &WorkloadKey) -> Result<()>;
}

/// Structured event sink (admission, preemption, eviction acknowledgement).
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn event(&self, object: &WorkloadKey, reason: &str, message: String);
}

/// Recorder that forwards events to the log.
#[derive(Debug, Default)]
pub struct LogRecorder;

#[async_trait]
impl EventRecorder for LogRecorder {
    async fn event(&self, object: &WorkloadKey, reason: &str, message: String) {
        log::info!("Event for {}: {}: {}", object, reason, message);
    }
}

/// Read-modify-write against the store with bounded conflict retries.
///
/// Each attempt fetches the latest revision, applies `mutate`, and submits the
/// update. A lost race backs off exponentially with jitter and tries again;
/// after [`CONFLICT_RETRIES`] lost races the conflict is returned to the
/// caller. Non-conflict errors are surfaced immediately.
pub async fn update_with_retry<F>(store: &dyn WorkloadStore, key: &WorkloadKey, mutate: F) -> Result<Workload>
where
    F: Fn(&mut Workload) + Send + Sync,
{
    let mut attempt: u32 = 0;
    loop {
        let mut workload = store.get(key).await?;
        mutate(&mut workload);

        match store.update(workload).await {
            Ok(updated) => return Ok(updated),
            Err(Error::Conflict { key, expected, found }) => {
                attempt += 1;
                if attempt >= CONFLICT_RETRIES {
                    log::warn!("Giving up on workload {} after {} conflicting updates.", key, attempt);
                    return Err(Error::Conflict { key, expected, found });
                }

                let backoff = RETRY_BACKOFF * 2u32.saturating_pow(attempt - 1);
                let jitter = rand::rng().random_range(0..=backoff.as_millis() as u64);
                tokio::time::sleep(backoff + Duration::from_millis(jitter)).await;
            }
            Err(other) => return Err(other),
        }
    }
}
