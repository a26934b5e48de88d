//! Abstract contracts of the external collaborators.
//!
//! The engine never talks to concrete AI, search or scraping services
//! directly; every dependency enters through one of the narrow traits
//! defined here:
//!
//! - **QueryGenerator**: turns free-text input into localized query variants
//! - **SearchProvider**: runs one query variant against the external search
//!   service and returns raw leads
//! - **ContactEnricher**: fetches contact details for a lead or a URL
//! - **CapacityDetector**: reports how many search units may run
//!   concurrently and the per-unit timeout
//!
//! All collaborator failures are classified through `CollaboratorError`:
//! timeouts and 5xx-equivalent responses are transient, malformed or
//! unauthorized requests are permanent, and an empty-but-successful response
//! is not an error at all.

pub mod fixture;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{Lead, QueryVariant};

/// Errors returned by external collaborators.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The call did not complete within its timeout budget.
    #[error("Collaborator call timed out after {0:?}")]
    Timeout(Duration),

    /// The service reported a 5xx-equivalent or connectivity failure.
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    /// The request was malformed or failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication or authorization failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl CollaboratorError {
    /// Returns whether the failure is transient (retryable).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollaboratorError::Timeout(_) | CollaboratorError::Unavailable(_)
        )
    }
}

/// Request passed to the query-generation collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRequest {
    /// The user's free-text input.
    pub input: String,
    /// Optional location bias.
    #[serde(default)]
    pub location: Option<String>,
    /// Languages to produce variants for.
    #[serde(default)]
    pub languages: Vec<String>,
    /// Number of variants requested. The generator may legitimately
    /// over-return; callers must deduplicate and cap.
    pub count: usize,
}

/// Contact details returned by the enrichment collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContactDetails {
    /// Contact email, if found.
    #[serde(default)]
    pub email: Option<String>,
    /// Contact phone, if found.
    #[serde(default)]
    pub phone: Option<String>,
    /// Website, if found (used for URL-parse leads).
    #[serde(default)]
    pub website: Option<String>,
}

/// What the enrichment collaborator should look at.
#[derive(Debug, Clone)]
pub enum EnrichTarget<'a> {
    /// An aggregated lead from the search stage.
    Lead(&'a Lead),
    /// A bare URL (URL-parse pipeline).
    Url(&'a str),
}

/// Capacity descriptor supplied by the external plan/quota collaborator.
///
/// Bounds how many search units may run concurrently and how long each unit
/// may take. The search strategy decision is made once, before execution,
/// and is not renegotiated mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    /// Maximum number of concurrently running search units.
    pub max_concurrent_units: usize,
    /// Timeout applied to each individual unit.
    pub per_unit_timeout: Duration,
}

impl Capacity {
    /// Creates a new capacity descriptor.
    pub fn new(max_concurrent_units: usize, per_unit_timeout: Duration) -> Self {
        Self {
            max_concurrent_units,
            per_unit_timeout,
        }
    }

    /// Conservative single-unit fallback used when detection fails.
    pub fn fallback(per_unit_timeout: Duration) -> Self {
        Self::new(1, per_unit_timeout)
    }
}

/// Produces localized query variants from free-text input.
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    /// Generates query variants. May over-return (e.g. duplicate variants
    /// per language); the pipeline deduplicates and caps the result.
    async fn generate(&self, request: &QueryRequest) -> Result<Vec<QueryVariant>, CollaboratorError>;
}

/// Runs one query variant against the external search service.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Returns the raw leads for one query variant. An empty vector is a
    /// legitimate successful response.
    async fn search(
        &self,
        query: &QueryVariant,
        capacity: &Capacity,
    ) -> Result<Vec<Lead>, CollaboratorError>;
}

/// Fetches contact details from the secondary scraping service.
#[async_trait]
pub trait ContactEnricher: Send + Sync {
    /// Enriches one lead or URL. Per-item failures are tolerated by the
    /// pipeline; the item is kept with enrichment fields left empty.
    async fn enrich(&self, target: EnrichTarget<'_>) -> Result<ContactDetails, CollaboratorError>;
}

/// Detects the current plan capacity.
#[async_trait]
pub trait CapacityDetector: Send + Sync {
    /// Returns the capacity descriptor for the current plan.
    async fn detect(&self) -> Result<Capacity, CollaboratorError>;
}
