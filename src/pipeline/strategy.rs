//! Search strategy selection and batch execution.
//!
//! Given N query variants and a capacity descriptor from the plan
//! collaborator, the strategy is decided once, before execution:
//! parallel when `max_concurrent_units >= N`, sequential otherwise.
//!
//! The parallel runner uses settle-all semantics (no unit's failure cancels
//! siblings) raced against one overall group timeout. When the timeout
//! elapses first, whatever has settled is used and outstanding units are
//! downgraded to failed batches; the group never blocks indefinitely on a
//! slow unit. The sequential runner bounds every unit by the per-unit
//! timeout and keeps going past failures.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::collaborators::{Capacity, CollaboratorError, SearchProvider};
use crate::task::{Lead, QueryVariant};

/// Execution mode for a group of search units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    /// All units launched concurrently, settle-all with a group timeout.
    Parallel,
    /// Units run one at a time, each bounded by the per-unit timeout.
    Sequential,
}

impl SearchStrategy {
    /// Chooses the execution mode for `unit_count` units.
    ///
    /// Static pre-execution decision; it is not renegotiated mid-run.
    pub fn select(capacity: &Capacity, unit_count: usize) -> Self {
        if capacity.max_concurrent_units >= unit_count {
            SearchStrategy::Parallel
        } else {
            SearchStrategy::Sequential
        }
    }
}

impl std::fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchStrategy::Parallel => write!(f, "parallel"),
            SearchStrategy::Sequential => write!(f, "sequential"),
        }
    }
}

/// Outcome of one search unit.
///
/// A failed or timed-out unit contributes an empty batch; it never fails
/// the task (partial-failure absorption).
#[derive(Debug, Clone)]
pub struct SearchBatch {
    /// The query variant this unit ran.
    pub query: QueryVariant,
    /// Raw leads returned; empty on failure.
    pub leads: Vec<Lead>,
    /// Failure description, if the unit failed or timed out.
    pub error: Option<String>,
}

impl SearchBatch {
    /// A settled, successful batch (possibly empty — that is not an error).
    pub fn succeeded(query: QueryVariant, leads: Vec<Lead>) -> Self {
        Self {
            query,
            leads,
            error: None,
        }
    }

    /// A failed or timed-out unit, downgraded to an empty batch.
    pub fn failed(query: QueryVariant, error: impl Into<String>) -> Self {
        Self {
            query,
            leads: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Returns whether the unit failed.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Runs all query variants under the selected strategy.
pub async fn run_search(
    provider: Arc<dyn SearchProvider>,
    queries: &[QueryVariant],
    capacity: Capacity,
    group_timeout: Duration,
) -> Vec<SearchBatch> {
    let strategy = SearchStrategy::select(&capacity, queries.len());
    debug!(
        strategy = %strategy,
        units = queries.len(),
        max_concurrent_units = capacity.max_concurrent_units,
        "Search strategy selected"
    );

    match strategy {
        SearchStrategy::Parallel => run_parallel(provider, queries, capacity, group_timeout).await,
        SearchStrategy::Sequential => run_sequential(provider, queries, capacity).await,
    }
}

/// Runs one unit, bounded by the per-unit timeout.
async fn run_unit(
    provider: &Arc<dyn SearchProvider>,
    query: QueryVariant,
    capacity: &Capacity,
) -> SearchBatch {
    match timeout(capacity.per_unit_timeout, provider.search(&query, capacity)).await {
        Ok(Ok(leads)) => SearchBatch::succeeded(query, leads),
        Ok(Err(e)) => {
            warn!(query = %query.text, error = %e, "Search unit failed");
            SearchBatch::failed(query, e.to_string())
        }
        Err(_) => {
            let e = CollaboratorError::Timeout(capacity.per_unit_timeout);
            warn!(query = %query.text, error = %e, "Search unit timed out");
            SearchBatch::failed(query, e.to_string())
        }
    }
}

async fn run_parallel(
    provider: Arc<dyn SearchProvider>,
    queries: &[QueryVariant],
    capacity: Capacity,
    group_timeout: Duration,
) -> Vec<SearchBatch> {
    let slots: Arc<Mutex<Vec<Option<SearchBatch>>>> =
        Arc::new(Mutex::new(queries.iter().map(|_| None).collect()));

    let handles: Vec<_> = queries
        .iter()
        .cloned()
        .enumerate()
        .map(|(idx, query)| {
            let provider = Arc::clone(&provider);
            let slots = Arc::clone(&slots);
            tokio::spawn(async move {
                let batch = run_unit(&provider, query, &capacity).await;
                if let Ok(mut settled) = slots.lock() {
                    settled[idx] = Some(batch);
                }
            })
        })
        .collect();

    let mut joined = join_all(handles);

    if timeout(group_timeout, &mut joined).await.is_err() {
        warn!(
            group_timeout_ms = group_timeout.as_millis() as u64,
            "Search group timeout elapsed, proceeding with settled units"
        );

        match harvest(&slots, queries) {
            Some(batches) => return batches,
            None => {
                // Harvesting failed; settle all units unconditionally so
                // partial results are never silently dropped.
                joined.await;
            }
        }
    }

    harvest(&slots, queries).unwrap_or_else(|| {
        // All units have settled by now; recover the slots even if a
        // panicking unit poisoned the lock.
        let settled = slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        collect_slots(&settled, queries)
    })
}

async fn run_sequential(
    provider: Arc<dyn SearchProvider>,
    queries: &[QueryVariant],
    capacity: Capacity,
) -> Vec<SearchBatch> {
    let mut batches = Vec::with_capacity(queries.len());
    for query in queries {
        // A failed or timed-out unit does not stop the loop.
        batches.push(run_unit(&provider, query.clone(), &capacity).await);
    }
    batches
}

/// Reads the settled slots, substituting failed batches for outstanding
/// units. Returns `None` when the slot lock is poisoned.
fn harvest(
    slots: &Mutex<Vec<Option<SearchBatch>>>,
    queries: &[QueryVariant],
) -> Option<Vec<SearchBatch>> {
    let settled = slots.lock().ok()?;
    Some(collect_slots(&settled, queries))
}

fn collect_slots(settled: &[Option<SearchBatch>], queries: &[QueryVariant]) -> Vec<SearchBatch> {
    settled
        .iter()
        .zip(queries)
        .map(|(slot, query)| match slot {
            Some(batch) => batch.clone(),
            None => SearchBatch::failed(
                query.clone(),
                "unit did not settle before the group timeout",
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    /// Provider whose behavior is scripted by the query text.
    struct ScriptedProvider {
        slow_delay: Duration,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            Self {
                slow_delay: Duration::from_millis(200),
            }
        }
    }

    #[async_trait]
    impl SearchProvider for ScriptedProvider {
        async fn search(
            &self,
            query: &QueryVariant,
            _capacity: &Capacity,
        ) -> Result<Vec<Lead>, CollaboratorError> {
            match query.text.as_str() {
                "slow" => {
                    tokio::time::sleep(self.slow_delay).await;
                    Ok(vec![Lead::new("slow-1", "Slow Result")])
                }
                "fail" => Err(CollaboratorError::Unavailable("upstream 502".to_string())),
                "empty" => Ok(Vec::new()),
                text => Ok(vec![Lead::new(format!("{}-1", text), text)]),
            }
        }
    }

    fn queries(texts: &[&str]) -> Vec<QueryVariant> {
        texts.iter().map(|t| QueryVariant::new(*t, "en")).collect()
    }

    fn capacity(units: usize, per_unit_ms: u64) -> Capacity {
        Capacity::new(units, Duration::from_millis(per_unit_ms))
    }

    #[test]
    fn test_strategy_selection() {
        let cap = capacity(3, 1_000);
        assert_eq!(SearchStrategy::select(&cap, 2), SearchStrategy::Parallel);
        assert_eq!(SearchStrategy::select(&cap, 3), SearchStrategy::Parallel);
        assert_eq!(SearchStrategy::select(&cap, 4), SearchStrategy::Sequential);
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(format!("{}", SearchStrategy::Parallel), "parallel");
        assert_eq!(format!("{}", SearchStrategy::Sequential), "sequential");
    }

    #[tokio::test]
    async fn test_parallel_all_settle() {
        let provider: Arc<dyn SearchProvider> = Arc::new(ScriptedProvider::new());
        let batches = run_search(
            provider,
            &queries(&["alpha", "beta", "empty"]),
            capacity(3, 1_000),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(batches.len(), 3);
        assert!(!batches[0].is_failed());
        assert_eq!(batches[0].leads.len(), 1);
        // Empty-but-successful is not a failure.
        assert!(!batches[2].is_failed());
        assert!(batches[2].leads.is_empty());
    }

    #[tokio::test]
    async fn test_parallel_failure_does_not_cancel_siblings() {
        let provider: Arc<dyn SearchProvider> = Arc::new(ScriptedProvider::new());
        let batches = run_search(
            provider,
            &queries(&["fail", "alpha"]),
            capacity(2, 1_000),
            Duration::from_secs(5),
        )
        .await;

        assert!(batches[0].is_failed());
        assert!(batches[0].leads.is_empty());
        assert!(!batches[1].is_failed());
        assert_eq!(batches[1].leads.len(), 1);
    }

    #[tokio::test]
    async fn test_parallel_group_timeout_keeps_settled_units() {
        let provider: Arc<dyn SearchProvider> = Arc::new(ScriptedProvider::new());
        // Group timeout shorter than the slow unit, longer than the fast ones.
        let batches = run_search(
            provider,
            &queries(&["alpha", "slow", "beta"]),
            capacity(3, 1_000),
            Duration::from_millis(80),
        )
        .await;

        assert_eq!(batches.len(), 3);
        assert!(!batches[0].is_failed());
        assert!(!batches[2].is_failed());
        // Outstanding unit downgraded to an empty failed batch.
        assert!(batches[1].is_failed());
        assert!(batches[1].leads.is_empty());
    }

    #[tokio::test]
    async fn test_parallel_group_timeout_shorter_than_all_units() {
        let provider: Arc<dyn SearchProvider> = Arc::new(ScriptedProvider {
            slow_delay: Duration::from_millis(300),
        });
        let batches = run_search(
            provider,
            &queries(&["slow", "slow", "slow"]),
            capacity(3, 1_000),
            Duration::from_millis(20),
        )
        .await;

        // No indefinite block, every unit downgraded.
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.is_failed()));
    }

    #[tokio::test]
    async fn test_sequential_continues_past_failures() {
        let provider: Arc<dyn SearchProvider> = Arc::new(ScriptedProvider::new());
        // Capacity below unit count forces the sequential path.
        let batches = run_search(
            provider,
            &queries(&["fail", "alpha", "beta"]),
            capacity(1, 1_000),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(batches.len(), 3);
        assert!(batches[0].is_failed());
        assert!(!batches[1].is_failed());
        assert!(!batches[2].is_failed());
    }

    #[tokio::test]
    async fn test_sequential_per_unit_timeout() {
        let provider: Arc<dyn SearchProvider> = Arc::new(ScriptedProvider::new());
        // Per-unit timeout shorter than the slow unit.
        let batches = run_search(
            provider,
            &queries(&["slow", "alpha"]),
            capacity(1, 50),
            Duration::from_secs(5),
        )
        .await;

        assert!(batches[0].is_failed());
        assert!(batches[0]
            .error
            .as_deref()
            .unwrap_or("")
            .contains("timed out"));
        assert!(!batches[1].is_failed());
    }
}
