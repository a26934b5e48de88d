//! Deterministic offline collaborator implementations.
//!
//! Used by the demo binary and the test suite. Every implementation is
//! fully in-memory and produces the same output for the same input, which
//! keeps pipeline runs reproducible without any external service.

use std::time::Duration;

use async_trait::async_trait;

use crate::task::{Lead, QueryVariant};

use super::{
    Capacity, CapacityDetector, CollaboratorError, ContactDetails, ContactEnricher, EnrichTarget,
    QueryGenerator, QueryRequest, SearchProvider,
};

/// Generates one variant per requested language by tagging the input text.
///
/// Languages beyond the first produce `"<input> (<lang>)"`, which mimics the
/// real generator's habit of returning near-duplicate localized variants.
#[derive(Debug, Default)]
pub struct FixtureQueryGenerator {
    /// When set, every variant is emitted twice to exercise downstream
    /// deduplication, the way the real generator over-returns.
    pub duplicate_variants: bool,
}

impl FixtureQueryGenerator {
    /// Creates a generator that returns exactly one variant per language.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator that over-returns duplicated variants.
    pub fn over_returning() -> Self {
        Self {
            duplicate_variants: true,
        }
    }
}

#[async_trait]
impl QueryGenerator for FixtureQueryGenerator {
    async fn generate(
        &self,
        request: &QueryRequest,
    ) -> Result<Vec<QueryVariant>, CollaboratorError> {
        if request.input.trim().is_empty() {
            return Err(CollaboratorError::InvalidRequest(
                "empty query input".to_string(),
            ));
        }

        let languages = if request.languages.is_empty() {
            vec!["en".to_string()]
        } else {
            request.languages.clone()
        };

        let mut variants = Vec::new();
        for (idx, language) in languages.iter().enumerate() {
            let text = if idx == 0 {
                request.input.clone()
            } else {
                format!("{} ({})", request.input, language)
            };
            let variant = QueryVariant::new(text, language.clone());
            if self.duplicate_variants {
                variants.push(variant.clone());
            }
            variants.push(variant);
        }

        Ok(variants)
    }
}

/// Returns a fixed number of synthetic leads per query variant.
///
/// Lead identifiers are derived from the query text, so distinct variants
/// overlap on a shared lead (`provider_id` `"shared-0"`) to exercise
/// aggregation.
#[derive(Debug)]
pub struct FixtureSearchProvider {
    /// Leads produced per query variant.
    pub leads_per_query: usize,
    /// Artificial latency per call, for timeout tests.
    pub delay: Duration,
}

impl Default for FixtureSearchProvider {
    fn default() -> Self {
        Self {
            leads_per_query: 3,
            delay: Duration::ZERO,
        }
    }
}

impl FixtureSearchProvider {
    /// Creates a provider returning `leads_per_query` leads per variant.
    pub fn new(leads_per_query: usize) -> Self {
        Self {
            leads_per_query,
            ..Default::default()
        }
    }

    /// Sets an artificial per-call delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SearchProvider for FixtureSearchProvider {
    async fn search(
        &self,
        query: &QueryVariant,
        _capacity: &Capacity,
    ) -> Result<Vec<Lead>, CollaboratorError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let slug: String = query
            .normalized_text()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();

        let mut leads = Vec::with_capacity(self.leads_per_query);
        for i in 0..self.leads_per_query {
            let lead = if i == 0 {
                // Shared across variants so aggregation has duplicates to merge.
                Lead::new("shared-0", format!("{} Center", query.text))
                    .with_rating(4.0)
                    .with_source_query(query.text.clone())
            } else {
                Lead::new(format!("{}-{}", slug, i), format!("{} Club {}", query.text, i))
                    .with_address(format!("Street {}, Dubai", i))
                    .with_rating(3.0 + i as f64 * 0.5)
                    .with_source_query(query.text.clone())
            };
            leads.push(lead);
        }

        Ok(leads)
    }
}

/// Derives deterministic contact details from the target identity.
///
/// Every second lead gets an email, every third a phone, so filtering has
/// both kept and dropped items to work with.
#[derive(Debug, Default)]
pub struct FixtureEnricher;

impl FixtureEnricher {
    /// Creates a new fixture enricher.
    pub fn new() -> Self {
        Self
    }

    fn details_for(&self, key: &str) -> ContactDetails {
        let sum: u32 = key.bytes().map(u32::from).sum();
        let mut details = ContactDetails::default();

        if sum % 2 == 0 {
            details.email = Some(format!("info@{}.example", sum % 97));
        }
        if sum % 3 == 0 {
            details.phone = Some(format!("+971-4-{:07}", sum % 10_000_000));
        }

        details
    }
}

#[async_trait]
impl ContactEnricher for FixtureEnricher {
    async fn enrich(&self, target: EnrichTarget<'_>) -> Result<ContactDetails, CollaboratorError> {
        match target {
            EnrichTarget::Lead(lead) => Ok(self.details_for(&lead.provider_id)),
            EnrichTarget::Url(url) => {
                let mut details = self.details_for(url);
                details.website = Some(url.to_string());
                // A bare URL always yields at least one channel, matching a
                // successful direct parse.
                if details.email.is_none() && details.phone.is_none() {
                    details.email = Some("contact@parsed.example".to_string());
                }
                Ok(details)
            }
        }
    }
}

/// Reports a fixed capacity descriptor.
#[derive(Debug, Clone, Copy)]
pub struct FixedCapacity(pub Capacity);

impl FixedCapacity {
    /// Creates a detector reporting the given capacity.
    pub fn new(max_concurrent_units: usize, per_unit_timeout: Duration) -> Self {
        Self(Capacity::new(max_concurrent_units, per_unit_timeout))
    }
}

#[async_trait]
impl CapacityDetector for FixedCapacity {
    async fn detect(&self) -> Result<Capacity, CollaboratorError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(count: usize, languages: &[&str]) -> QueryRequest {
        QueryRequest {
            input: "gymnastics clubs UAE".to_string(),
            location: Some("UAE".to_string()),
            languages: languages.iter().map(|s| s.to_string()).collect(),
            count,
        }
    }

    #[tokio::test]
    async fn test_generator_one_variant_per_language() {
        let generator = FixtureQueryGenerator::new();
        let variants = generator
            .generate(&request(3, &["en", "ru", "ar"]))
            .await
            .expect("generation should work");

        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0].text, "gymnastics clubs UAE");
        assert_eq!(variants[1].text, "gymnastics clubs UAE (ru)");
        assert_eq!(variants[2].language, "ar");
    }

    #[tokio::test]
    async fn test_generator_over_returns() {
        let generator = FixtureQueryGenerator::over_returning();
        let variants = generator
            .generate(&request(3, &["en", "ru"]))
            .await
            .expect("generation should work");

        // Two languages, each duplicated.
        assert_eq!(variants.len(), 4);
    }

    #[tokio::test]
    async fn test_generator_rejects_empty_input() {
        let generator = FixtureQueryGenerator::new();
        let mut req = request(3, &["en"]);
        req.input = "   ".to_string();

        let err = generator.generate(&req).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_search_shares_a_lead_across_variants() {
        let provider = FixtureSearchProvider::new(3);
        let capacity = Capacity::new(4, Duration::from_secs(30));

        let a = provider
            .search(&QueryVariant::new("alpha", "en"), &capacity)
            .await
            .expect("search should work");
        let b = provider
            .search(&QueryVariant::new("beta", "en"), &capacity)
            .await
            .expect("search should work");

        assert_eq!(a.len(), 3);
        assert_eq!(a[0].provider_id, "shared-0");
        assert_eq!(b[0].provider_id, "shared-0");
        assert_ne!(a[1].provider_id, b[1].provider_id);
    }

    #[tokio::test]
    async fn test_enricher_is_deterministic() {
        let enricher = FixtureEnricher::new();
        let lead = Lead::new("place-42", "Somewhere");

        let first = enricher
            .enrich(EnrichTarget::Lead(&lead))
            .await
            .expect("enrich should work");
        let second = enricher
            .enrich(EnrichTarget::Lead(&lead))
            .await
            .expect("enrich should work");

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_enricher_url_always_has_contact() {
        let enricher = FixtureEnricher::new();
        let details = enricher
            .enrich(EnrichTarget::Url("https://example.ae"))
            .await
            .expect("enrich should work");

        assert_eq!(details.website, Some("https://example.ae".to_string()));
        assert!(details.email.is_some() || details.phone.is_some());
    }
}
