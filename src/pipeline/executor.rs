//! Pipeline executor.
//!
//! Runs one claimed task through its stage sequence, writing progress and
//! intermediate data to the store after every boundary. The executor never
//! claims tasks itself and never writes `FAILED`; it returns classified
//! errors and leaves the retry/fail decision to the scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborators::{
    Capacity, CapacityDetector, CollaboratorError, ContactDetails, ContactEnricher, EnrichTarget,
    QueryGenerator, QueryRequest, SearchProvider,
};
use crate::store::{StoreError, TaskStore};
use crate::task::{IntermediateData, Lead, Task, TaskInput};

use super::config::PipelineConfig;
use super::progress::{ProgressBroadcaster, ProgressReporter};
use super::stages::{aggregate_leads, dedup_queries, filter_contacts, score_leads};
use super::strategy::run_search;

/// Cooperative cancellation flag shared between the scheduler and one run.
///
/// Checked at stage boundaries; a running stage is never interrupted
/// mid-flight.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    /// Creates a fresh, untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Errors surfaced by a pipeline run, classified for retry handling.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An external collaborator failed.
    #[error("{stage}: {source}")]
    Collaborator {
        stage: &'static str,
        #[source]
        source: CollaboratorError,
    },

    /// A required store write failed.
    #[error("{stage}: {source}")]
    Store {
        stage: &'static str,
        #[source]
        source: StoreError,
    },

    /// The task payload is unusable; retrying cannot help.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PipelineError {
    fn collaborator(stage: &'static str, source: CollaboratorError) -> Self {
        PipelineError::Collaborator { stage, source }
    }

    fn store(stage: &'static str, source: StoreError) -> Self {
        PipelineError::Store { stage, source }
    }

    /// Returns whether the failure is transient (eligible for requeue).
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Collaborator { source, .. } => source.is_transient(),
            PipelineError::Store { source, .. } => source.is_transient(),
            PipelineError::InvalidInput(_) => false,
        }
    }

    /// The stage the failure surfaced in.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Collaborator { stage, .. } => stage,
            PipelineError::Store { stage, .. } => stage,
            PipelineError::InvalidInput(_) => "initialize",
        }
    }
}

/// How a pipeline run ended, short of an error.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// All stages ran; the task is `COMPLETED` with these leads.
    Completed { leads: Vec<Lead> },
    /// A cancellation request was observed at a stage boundary; the task is
    /// `CANCELLED` and no further stages ran.
    Cancelled,
}

/// Runs claimed tasks through their stage sequence.
///
/// Holds shared handles only; one executor serves any number of concurrent
/// runs.
pub struct PipelineExecutor {
    store: Arc<dyn TaskStore>,
    queries: Arc<dyn QueryGenerator>,
    search: Arc<dyn SearchProvider>,
    enricher: Arc<dyn ContactEnricher>,
    capacity: Arc<dyn CapacityDetector>,
    events: ProgressBroadcaster,
    config: PipelineConfig,
}

impl PipelineExecutor {
    /// Creates an executor over the given collaborators.
    pub fn new(
        store: Arc<dyn TaskStore>,
        queries: Arc<dyn QueryGenerator>,
        search: Arc<dyn SearchProvider>,
        enricher: Arc<dyn ContactEnricher>,
        capacity: Arc<dyn CapacityDetector>,
        events: ProgressBroadcaster,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            queries,
            search,
            enricher,
            capacity,
            events,
            config,
        }
    }

    /// Executes one already-claimed (`RUNNING`) task to an outcome.
    ///
    /// # Errors
    ///
    /// Returns a classified [`PipelineError`] when a stage fails; the caller
    /// decides between requeue and `FAILED` based on
    /// [`PipelineError::is_transient`].
    pub async fn execute(
        &self,
        task: Task,
        cancel: CancelSignal,
    ) -> Result<ExecutionOutcome, PipelineError> {
        let reporter = ProgressReporter::new(
            Arc::clone(&self.store),
            self.events.clone(),
            task.id,
            task.kind.stage_total(),
        );

        info!(task_id = %task.id, kind = %task.kind, retry_count = task.retry_count, "Pipeline run started");

        match task.input.clone() {
            TaskInput::AiSearch {
                query,
                location,
                languages,
                max_queries,
            } => {
                self.run_ai_search(
                    task.id,
                    &reporter,
                    &cancel,
                    query,
                    location,
                    languages,
                    max_queries,
                )
                .await
            }
            TaskInput::UrlParse { url } => self.run_url_parse(task.id, &reporter, &cancel, url).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_ai_search(
        &self,
        id: Uuid,
        reporter: &ProgressReporter,
        cancel: &CancelSignal,
        query: String,
        location: Option<String>,
        languages: Vec<String>,
        max_queries: usize,
    ) -> Result<ExecutionOutcome, PipelineError> {
        // Stage 1: query generation.
        if cancel.is_cancelled() {
            return self.finish_cancelled(id).await;
        }
        reporter.stage_started("query_generation", 0).await;
        let stage_start = Instant::now();

        let request = QueryRequest {
            input: query.clone(),
            location: location.clone(),
            languages,
            count: max_queries,
        };
        let queries = self.generate_with_retry(&request).await?;

        self.store
            .save_intermediate(
                id,
                IntermediateData {
                    queries: queries.clone(),
                    raw_leads: Vec::new(),
                },
            )
            .await
            .map_err(|e| PipelineError::store("query_generation", e))?;
        reporter
            .stage_completed(
                "query_generation",
                1,
                format!("generated {} query variants", queries.len()),
            )
            .await;
        debug!(task_id = %id, stage = "query_generation", elapsed_ms = stage_start.elapsed().as_millis() as u64, "Stage finished");

        // Stage 2: batched search.
        if cancel.is_cancelled() {
            return self.finish_cancelled(id).await;
        }
        reporter.stage_started("search", 1).await;
        let stage_start = Instant::now();

        let capacity = self.detect_capacity().await;
        let mut batches = run_search(
            Arc::clone(&self.search),
            &queries,
            capacity,
            self.config.group_timeout,
        )
        .await;

        for batch in &mut batches {
            for lead in &mut batch.leads {
                if lead.source_query.is_none() {
                    lead.source_query = Some(batch.query.text.clone());
                }
            }
        }

        let raw_leads: Vec<Lead> = batches.iter().flat_map(|b| b.leads.clone()).collect();
        let failed_units = batches.iter().filter(|b| b.is_failed()).count();
        self.store
            .save_intermediate(
                id,
                IntermediateData {
                    queries: queries.clone(),
                    raw_leads: raw_leads.clone(),
                },
            )
            .await
            .map_err(|e| PipelineError::store("search", e))?;
        reporter
            .stage_completed(
                "search",
                2,
                format!(
                    "collected {} raw leads from {} search units ({} failed)",
                    raw_leads.len(),
                    batches.len(),
                    failed_units
                ),
            )
            .await;
        debug!(task_id = %id, stage = "search", elapsed_ms = stage_start.elapsed().as_millis() as u64, "Stage finished");

        // Stage 3: aggregation.
        if cancel.is_cancelled() {
            return self.finish_cancelled(id).await;
        }
        reporter.stage_started("aggregation", 2).await;
        let total_raw = raw_leads.len();
        let mut leads = aggregate_leads(batches);
        reporter
            .stage_completed(
                "aggregation",
                3,
                format!("{} unique leads from {} raw", leads.len(), total_raw),
            )
            .await;

        // Stage 4: enrichment. Per-item failures are tolerated; the lead is
        // kept with enrichment fields left empty.
        if cancel.is_cancelled() {
            return self.finish_cancelled(id).await;
        }
        reporter.stage_started("enrichment", 3).await;
        let stage_start = Instant::now();

        let mut enriched = 0usize;
        for lead in &mut leads {
            match timeout(
                self.config.enrichment_timeout,
                self.enricher.enrich(EnrichTarget::Lead(lead)),
            )
            .await
            {
                Ok(Ok(details)) => {
                    apply_contact(lead, details);
                    enriched += 1;
                }
                Ok(Err(e)) => {
                    warn!(task_id = %id, provider_id = %lead.provider_id, error = %e, "Enrichment failed for lead");
                }
                Err(_) => {
                    warn!(task_id = %id, provider_id = %lead.provider_id, "Enrichment timed out for lead");
                }
            }
        }
        reporter
            .stage_completed(
                "enrichment",
                4,
                format!("enriched {} of {} leads", enriched, leads.len()),
            )
            .await;
        debug!(task_id = %id, stage = "enrichment", elapsed_ms = stage_start.elapsed().as_millis() as u64, "Stage finished");

        // Stage 5: contact filtering.
        if cancel.is_cancelled() {
            return self.finish_cancelled(id).await;
        }
        reporter.stage_started("contact_filtering", 4).await;
        let before = leads.len();
        let leads = filter_contacts(leads, &self.config.email_blocklist);
        reporter
            .stage_completed(
                "contact_filtering",
                5,
                format!("kept {} of {} leads with contacts", leads.len(), before),
            )
            .await;

        // Stage 6: scoring.
        if cancel.is_cancelled() {
            return self.finish_cancelled(id).await;
        }
        reporter.stage_started("scoring", 5).await;
        let leads = score_leads(leads, &query, location.as_deref(), &self.config);
        reporter
            .stage_completed("scoring", 6, format!("scored {} leads", leads.len()))
            .await;

        // Stage 7: finalize.
        if cancel.is_cancelled() {
            return self.finish_cancelled(id).await;
        }
        reporter.stage_started("finalize", 6).await;
        // The final progress write must land before `complete` makes the
        // record terminal; the store drops progress writes after that.
        reporter
            .stage_completed("finalize", 7, format!("completed with {} leads", leads.len()))
            .await;
        self.store
            .complete(id, leads.clone())
            .await
            .map_err(|e| PipelineError::store("finalize", e))?;

        info!(task_id = %id, leads = leads.len(), "Pipeline run completed");
        Ok(ExecutionOutcome::Completed { leads })
    }

    async fn run_url_parse(
        &self,
        id: Uuid,
        reporter: &ProgressReporter,
        cancel: &CancelSignal,
        url: String,
    ) -> Result<ExecutionOutcome, PipelineError> {
        // Stage 1: initialize (URL validation).
        if cancel.is_cancelled() {
            return self.finish_cancelled(id).await;
        }
        reporter.stage_started("initialize", 0).await;

        let host = parse_host(&url).ok_or_else(|| {
            PipelineError::InvalidInput(format!("'{}' is not a valid http(s) URL", url))
        })?;
        let host = host.to_string();
        reporter
            .stage_completed("initialize", 1, format!("parsing {}", host))
            .await;

        // Stage 2: enrichment. Unlike the per-lead tolerance above, the URL
        // is the whole task; its enrichment failure fails the run.
        if cancel.is_cancelled() {
            return self.finish_cancelled(id).await;
        }
        reporter.stage_started("enrichment", 1).await;

        let details = match timeout(
            self.config.enrichment_timeout,
            self.enricher.enrich(EnrichTarget::Url(&url)),
        )
        .await
        {
            Ok(Ok(details)) => details,
            Ok(Err(e)) => return Err(PipelineError::collaborator("enrichment", e)),
            Err(_) => {
                return Err(PipelineError::collaborator(
                    "enrichment",
                    CollaboratorError::Timeout(self.config.enrichment_timeout),
                ))
            }
        };

        let mut lead = Lead::new(url.clone(), host).with_website(url.clone());
        apply_contact(&mut lead, details);
        reporter
            .stage_completed("enrichment", 2, "contact details fetched")
            .await;

        // Stage 3: finalize.
        if cancel.is_cancelled() {
            return self.finish_cancelled(id).await;
        }
        reporter.stage_started("finalize", 2).await;
        let leads = vec![lead];
        // Final progress before the terminal write, same as the search path.
        reporter
            .stage_completed("finalize", 3, "completed with 1 lead")
            .await;
        self.store
            .complete(id, leads.clone())
            .await
            .map_err(|e| PipelineError::store("finalize", e))?;

        info!(task_id = %id, "Pipeline run completed");
        Ok(ExecutionOutcome::Completed { leads })
    }

    /// Calls the generator with a single in-stage retry on transient
    /// failures. An empty result after dedup counts as one: it is
    /// indistinguishable from a degraded service.
    async fn generate_with_retry(
        &self,
        request: &QueryRequest,
    ) -> Result<Vec<crate::task::QueryVariant>, PipelineError> {
        match self.generate_once(request).await {
            Ok(queries) => Ok(queries),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Query generation failed, retrying in-stage");
                self.generate_once(request)
                    .await
                    .map_err(|e| PipelineError::collaborator("query_generation", e))
            }
            Err(e) => Err(PipelineError::collaborator("query_generation", e)),
        }
    }

    /// One generation attempt: call the generator, dedup and cap the
    /// variants, and treat an empty outcome as a transient failure.
    async fn generate_once(
        &self,
        request: &QueryRequest,
    ) -> Result<Vec<crate::task::QueryVariant>, CollaboratorError> {
        let variants = self.queries.generate(request).await?;
        let queries = dedup_queries(variants, request.count);
        if queries.is_empty() {
            return Err(CollaboratorError::Unavailable(
                "generator returned no query variants".to_string(),
            ));
        }
        Ok(queries)
    }

    /// Detects plan capacity, degrading to a conservative single-unit
    /// fallback when the detector is unavailable.
    async fn detect_capacity(&self) -> Capacity {
        match self.capacity.detect().await {
            Ok(capacity) => capacity,
            Err(e) => {
                let fallback = Capacity::fallback(self.config.fallback_unit_timeout);
                warn!(error = %e, ?fallback, "Capacity detection failed, using fallback");
                fallback
            }
        }
    }

    /// Writes the terminal `CANCELLED` status and stops the run.
    ///
    /// The cancel requester usually wrote the terminal status already; the
    /// resulting illegal transition is not an error here.
    async fn finish_cancelled(&self, id: Uuid) -> Result<ExecutionOutcome, PipelineError> {
        match self.store.cancel(id).await {
            Ok(_) | Err(StoreError::InvalidTransition { .. }) => {}
            Err(e) => return Err(PipelineError::store("cancel", e)),
        }
        info!(task_id = %id, "Pipeline run cancelled");
        Ok(ExecutionOutcome::Cancelled)
    }
}

/// Fills the lead's contact fields from enrichment output without
/// overwriting anything the search provider already supplied.
fn apply_contact(lead: &mut Lead, details: ContactDetails) {
    if lead.email.is_none() {
        lead.email = details.email;
    }
    if lead.phone.is_none() {
        lead.phone = details.phone;
    }
    if lead.website.is_none() {
        lead.website = details.website;
    }
}

/// Extracts the host from an http(s) URL, or `None` if the URL is unusable.
fn parse_host(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::collaborators::fixture::{
        FixedCapacity, FixtureEnricher, FixtureQueryGenerator, FixtureSearchProvider,
    };
    use crate::store::MemoryTaskStore;
    use crate::task::{QueryVariant, TaskStatus};

    use super::*;

    /// Fails a scripted number of times before delegating to the fixture.
    struct FlakyGenerator {
        failures: AtomicUsize,
        calls: AtomicUsize,
        error_is_transient: bool,
        inner: FixtureQueryGenerator,
    }

    impl FlakyGenerator {
        fn failing(failures: usize, transient: bool) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
                error_is_transient: transient,
                inner: FixtureQueryGenerator::new(),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueryGenerator for FlakyGenerator {
        async fn generate(
            &self,
            request: &QueryRequest,
        ) -> Result<Vec<QueryVariant>, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(if self.error_is_transient {
                    CollaboratorError::Unavailable("503".to_string())
                } else {
                    CollaboratorError::InvalidRequest("rejected".to_string())
                });
            }
            self.inner.generate(request).await
        }
    }

    struct Harness {
        store: Arc<MemoryTaskStore>,
        executor: PipelineExecutor,
    }

    fn harness_with(queries: Arc<dyn QueryGenerator>, leads_per_query: usize) -> Harness {
        let store = Arc::new(MemoryTaskStore::new());
        let executor = PipelineExecutor::new(
            store.clone() as Arc<dyn TaskStore>,
            queries,
            Arc::new(FixtureSearchProvider::new(leads_per_query)),
            Arc::new(FixtureEnricher::new()),
            Arc::new(FixedCapacity::new(4, Duration::from_secs(5))),
            ProgressBroadcaster::default(),
            PipelineConfig::default().with_group_timeout(Duration::from_secs(10)),
        );
        Harness { store, executor }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(FixtureQueryGenerator::new()), 3)
    }

    async fn claimed_task(store: &MemoryTaskStore, input: TaskInput) -> Task {
        let task = Task::new("user-1", input);
        let id = task.id;
        store.insert(task).await.expect("insert should work");
        assert!(store.claim(id).await.expect("claim should work"));
        store.get(id).await.expect("get should work")
    }

    #[tokio::test]
    async fn test_ai_search_happy_path() {
        let h = harness();
        let task = claimed_task(&h.store, TaskInput::ai_search("gymnastics clubs UAE")).await;
        let id = task.id;

        let outcome = h
            .executor
            .execute(task, CancelSignal::new())
            .await
            .expect("run should succeed");

        let leads = match outcome {
            ExecutionOutcome::Completed { leads } => leads,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert!(!leads.is_empty());

        let fetched = h.store.get(id).await.expect("get should work");
        assert_eq!(fetched.status, TaskStatus::Completed);
        assert_eq!(fetched.current_stage, "finalize");
        assert_eq!(fetched.progress.current, 7);
        assert_eq!(fetched.progress.total, 7);
        assert_eq!(fetched.final_result, Some(leads));
        assert!(fetched.intermediate.is_none());
    }

    #[tokio::test]
    async fn test_ai_search_transient_generation_retried_in_stage() {
        let generator = Arc::new(FlakyGenerator::failing(1, true));
        let h = harness_with(generator.clone(), 3);
        let task = claimed_task(&h.store, TaskInput::ai_search("gymnastics clubs UAE")).await;

        let outcome = h
            .executor
            .execute(task, CancelSignal::new())
            .await
            .expect("second attempt should succeed");

        assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_ai_search_transient_generation_exhausts_in_stage_retry() {
        let generator = Arc::new(FlakyGenerator::failing(2, true));
        let h = harness_with(generator.clone(), 3);
        let task = claimed_task(&h.store, TaskInput::ai_search("gymnastics clubs UAE")).await;
        let id = task.id;

        let err = h
            .executor
            .execute(task, CancelSignal::new())
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(err.stage(), "query_generation");
        assert_eq!(generator.call_count(), 2);
        // The executor never writes FAILED; the task is still RUNNING for
        // the scheduler to requeue or fail.
        let fetched = h.store.get(id).await.expect("get should work");
        assert_eq!(fetched.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_ai_search_permanent_generation_not_retried() {
        let generator = Arc::new(FlakyGenerator::failing(1, false));
        let h = harness_with(generator.clone(), 3);
        let task = claimed_task(&h.store, TaskInput::ai_search("gymnastics clubs UAE")).await;

        let err = h
            .executor
            .execute(task, CancelSignal::new())
            .await
            .unwrap_err();

        assert!(!err.is_transient());
        assert_eq!(generator.call_count(), 1);
    }

    /// Returns no variants for a scripted number of calls, then delegates.
    struct EmptyGenerator {
        empties: AtomicUsize,
        calls: AtomicUsize,
        inner: FixtureQueryGenerator,
    }

    impl EmptyGenerator {
        fn empty_for(empties: usize) -> Self {
            Self {
                empties: AtomicUsize::new(empties),
                calls: AtomicUsize::new(0),
                inner: FixtureQueryGenerator::new(),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueryGenerator for EmptyGenerator {
        async fn generate(
            &self,
            request: &QueryRequest,
        ) -> Result<Vec<QueryVariant>, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.empties.load(Ordering::SeqCst);
            if remaining > 0 {
                self.empties.store(remaining - 1, Ordering::SeqCst);
                return Ok(Vec::new());
            }
            self.inner.generate(request).await
        }
    }

    #[tokio::test]
    async fn test_ai_search_empty_generation_retried_in_stage() {
        let generator = Arc::new(EmptyGenerator::empty_for(1));
        let h = harness_with(generator.clone(), 3);
        let task = claimed_task(&h.store, TaskInput::ai_search("gymnastics clubs UAE")).await;

        let outcome = h
            .executor
            .execute(task, CancelSignal::new())
            .await
            .expect("second attempt should succeed");

        assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_ai_search_persistently_empty_generation_is_transient() {
        let generator = Arc::new(EmptyGenerator::empty_for(2));
        let h = harness_with(generator.clone(), 3);
        let task = claimed_task(&h.store, TaskInput::ai_search("gymnastics clubs UAE")).await;

        let err = h
            .executor
            .execute(task, CancelSignal::new())
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(err.stage(), "query_generation");
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_ai_search_empty_results_complete_successfully() {
        // Provider returns zero leads per query; the run still completes.
        let h = harness_with(Arc::new(FixtureQueryGenerator::new()), 0);
        let task = claimed_task(&h.store, TaskInput::ai_search("gymnastics clubs UAE")).await;
        let id = task.id;

        let outcome = h
            .executor
            .execute(task, CancelSignal::new())
            .await
            .expect("run should succeed");

        match outcome {
            ExecutionOutcome::Completed { leads } => assert!(leads.is_empty()),
            other => panic!("unexpected outcome: {:?}", other),
        }
        let fetched = h.store.get(id).await.expect("get should work");
        assert_eq!(fetched.status, TaskStatus::Completed);
        assert_eq!(fetched.final_result, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_cancellation_observed_at_stage_boundary() {
        let h = harness();
        let task = claimed_task(&h.store, TaskInput::ai_search("gymnastics clubs UAE")).await;
        let id = task.id;

        let cancel = CancelSignal::new();
        cancel.trigger();

        let outcome = h
            .executor
            .execute(task, cancel)
            .await
            .expect("cancellation is not an error");

        assert!(matches!(outcome, ExecutionOutcome::Cancelled));
        let fetched = h.store.get(id).await.expect("get should work");
        assert_eq!(fetched.status, TaskStatus::Cancelled);
        assert!(fetched.final_result.is_none());
    }

    /// Enricher that takes long enough for a cancellation to land mid-stage.
    struct SlowEnricher {
        delay: Duration,
        inner: FixtureEnricher,
    }

    #[async_trait]
    impl ContactEnricher for SlowEnricher {
        async fn enrich(
            &self,
            target: EnrichTarget<'_>,
        ) -> Result<ContactDetails, CollaboratorError> {
            tokio::time::sleep(self.delay).await;
            self.inner.enrich(target).await
        }
    }

    #[tokio::test]
    async fn test_cancel_during_enrichment_lands_before_finalize() {
        let store = Arc::new(MemoryTaskStore::new());
        let executor = PipelineExecutor::new(
            store.clone() as Arc<dyn TaskStore>,
            Arc::new(FixtureQueryGenerator::new()),
            Arc::new(FixtureSearchProvider::new(3)),
            Arc::new(SlowEnricher {
                delay: Duration::from_millis(50),
                inner: FixtureEnricher::new(),
            }),
            Arc::new(FixedCapacity::new(4, Duration::from_secs(5))),
            ProgressBroadcaster::default(),
            PipelineConfig::default(),
        );
        let task = claimed_task(&store, TaskInput::ai_search("gymnastics clubs UAE")).await;
        let id = task.id;

        let cancel = CancelSignal::new();
        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { executor.execute(task, cancel).await })
        };

        // Let the run reach enrichment, then signal; the in-flight item
        // finishes, but the run stops at the next boundary.
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.trigger();

        let outcome = run
            .await
            .expect("run should not panic")
            .expect("cancellation is not an error");
        assert!(matches!(outcome, ExecutionOutcome::Cancelled));

        let fetched = store.get(id).await.expect("get should work");
        assert_eq!(fetched.status, TaskStatus::Cancelled);
        assert!(fetched.final_result.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_tolerates_already_cancelled_record() {
        let h = harness();
        let task = claimed_task(&h.store, TaskInput::ai_search("gymnastics clubs UAE")).await;
        let id = task.id;

        // The requester already wrote the terminal status.
        h.store.cancel(id).await.expect("cancel should work");

        let cancel = CancelSignal::new();
        cancel.trigger();
        let outcome = h
            .executor
            .execute(task, cancel)
            .await
            .expect("duplicate cancel write is tolerated");
        assert!(matches!(outcome, ExecutionOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_url_parse_happy_path() {
        let h = harness();
        let task = claimed_task(&h.store, TaskInput::url_parse("https://example.ae/contact")).await;
        let id = task.id;

        let outcome = h
            .executor
            .execute(task, CancelSignal::new())
            .await
            .expect("run should succeed");

        let leads = match outcome {
            ExecutionOutcome::Completed { leads } => leads,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].name, "example.ae");
        assert!(leads[0].website.is_some());
        assert!(leads[0].has_contact());

        let fetched = h.store.get(id).await.expect("get should work");
        assert_eq!(fetched.status, TaskStatus::Completed);
        assert_eq!(fetched.progress.current, 3);
        assert_eq!(fetched.progress.total, 3);
    }

    #[tokio::test]
    async fn test_url_parse_rejects_invalid_url() {
        let h = harness();
        let task = claimed_task(&h.store, TaskInput::url_parse("ftp://example.ae")).await;

        let err = h
            .executor
            .execute(task, CancelSignal::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_host() {
        assert_eq!(parse_host("https://example.ae"), Some("example.ae"));
        assert_eq!(parse_host("http://example.ae/path?q=1"), Some("example.ae"));
        assert_eq!(parse_host("https://"), None);
        assert_eq!(parse_host("example.ae"), None);
        assert_eq!(parse_host("ftp://example.ae"), None);
    }

    #[test]
    fn test_apply_contact_keeps_existing_fields() {
        let mut lead = Lead::new("p1", "Lead").with_email("kept@x.ae");
        apply_contact(
            &mut lead,
            ContactDetails {
                email: Some("new@x.ae".to_string()),
                phone: Some("+971-4-1234567".to_string()),
                website: None,
            },
        );

        assert_eq!(lead.email, Some("kept@x.ae".to_string()));
        assert_eq!(lead.phone, Some("+971-4-1234567".to_string()));
    }
}
