//! Result item and query variant types.

use serde::{Deserialize, Serialize};

/// One localized query variant produced by the query-generation collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryVariant {
    /// The query text, as it will be sent to the search provider.
    pub text: String,
    /// ISO 639-1 language code (e.g. "en", "ru").
    pub language: String,
    /// Optional region hint (e.g. "AE").
    #[serde(default)]
    pub region: Option<String>,
}

impl QueryVariant {
    /// Creates a new query variant without a region hint.
    pub fn new(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
            region: None,
        }
    }

    /// Sets the region hint.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Normalized form of the query text, used for deduplication.
    ///
    /// Lowercased, trimmed, with internal whitespace runs collapsed to a
    /// single space.
    pub fn normalized_text(&self) -> String {
        self.text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// One collected lead.
///
/// Produced partially populated by the search stage and filled in by the
/// enrichment stage. `provider_id` is the external provider's stable
/// identifier and is the only field deduplication may key on (names are not
/// reliable).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lead {
    /// Stable identifier assigned by the external search provider.
    pub provider_id: String,
    /// Display name of the lead.
    pub name: String,
    /// Postal address, if the provider returned one.
    #[serde(default)]
    pub address: Option<String>,
    /// Website URL, if known.
    #[serde(default)]
    pub website: Option<String>,
    /// Contact email, filled by enrichment.
    #[serde(default)]
    pub email: Option<String>,
    /// Contact phone, filled by enrichment.
    #[serde(default)]
    pub phone: Option<String>,
    /// External rating value (provider scale, typically 0-5).
    #[serde(default)]
    pub rating: Option<f64>,
    /// Text of the query variant that surfaced this lead.
    #[serde(default)]
    pub source_query: Option<String>,
    /// Relevance score assigned by the scoring stage.
    #[serde(default)]
    pub score: f64,
}

impl Lead {
    /// Creates a new lead with only the identifying fields set.
    pub fn new(provider_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            name: name.into(),
            address: None,
            website: None,
            email: None,
            phone: None,
            rating: None,
            source_query: None,
            score: 0.0,
        }
    }

    /// Sets the address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the website.
    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    /// Sets the email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the phone.
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Sets the rating.
    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    /// Sets the source query text.
    pub fn with_source_query(mut self, query: impl Into<String>) -> Self {
        self.source_query = Some(query.into());
        self
    }

    /// Returns whether at least one contact channel is present.
    pub fn has_contact(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.is_empty())
            || self.phone.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Number of populated optional fields.
    ///
    /// Used by aggregation to decide which duplicate occurrence to prefer.
    pub fn populated_fields(&self) -> usize {
        [
            self.address.is_some(),
            self.website.is_some(),
            self.email.is_some(),
            self.phone.is_some(),
            self.rating.is_some(),
        ]
        .iter()
        .filter(|&&set| set)
        .count()
    }

    /// Merges fields from a duplicate occurrence of the same lead.
    ///
    /// Fields already set on `self` are kept; empty ones are taken from
    /// `other`. The caller decides which occurrence becomes `self` (the one
    /// with more populated fields, first-seen on ties).
    pub fn absorb(&mut self, other: Lead) {
        if self.address.is_none() {
            self.address = other.address;
        }
        if self.website.is_none() {
            self.website = other.website;
        }
        if self.email.is_none() {
            self.email = other.email;
        }
        if self.phone.is_none() {
            self.phone = other.phone;
        }
        if self.rating.is_none() {
            self.rating = other.rating;
        }
        if self.source_query.is_none() {
            self.source_query = other.source_query;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_variant_normalized_text() {
        let variant = QueryVariant::new("  Gymnastics   Clubs  UAE ", "en");
        assert_eq!(variant.normalized_text(), "gymnastics clubs uae");
    }

    #[test]
    fn test_query_variant_region() {
        let variant = QueryVariant::new("gymnastics clubs", "ru").with_region("AE");
        assert_eq!(variant.region, Some("AE".to_string()));
    }

    #[test]
    fn test_lead_builder() {
        let lead = Lead::new("place-1", "Flip Academy")
            .with_address("Dubai Marina")
            .with_email("coach@flip.ae")
            .with_rating(4.5);

        assert_eq!(lead.provider_id, "place-1");
        assert_eq!(lead.address, Some("Dubai Marina".to_string()));
        assert_eq!(lead.populated_fields(), 3);
        assert!(lead.has_contact());
    }

    #[test]
    fn test_lead_has_contact_empty_strings() {
        let mut lead = Lead::new("place-2", "Empty Contacts");
        lead.email = Some(String::new());
        lead.phone = Some(String::new());
        assert!(!lead.has_contact());

        lead.phone = Some("+971-50-0000000".to_string());
        assert!(lead.has_contact());
    }

    #[test]
    fn test_lead_absorb_keeps_existing_fields() {
        let mut kept = Lead::new("place-3", "Kept")
            .with_address("Address A")
            .with_rating(4.0);
        let other = Lead::new("place-3", "Other")
            .with_address("Address B")
            .with_phone("+971-4-1234567")
            .with_website("https://example.ae");

        kept.absorb(other);

        assert_eq!(kept.address, Some("Address A".to_string()));
        assert_eq!(kept.phone, Some("+971-4-1234567".to_string()));
        assert_eq!(kept.website, Some("https://example.ae".to_string()));
        assert_eq!(kept.rating, Some(4.0));
    }

    #[test]
    fn test_lead_serialization_defaults() {
        let json = r#"{"provider_id":"p","name":"n"}"#;
        let lead: Lead = serde_json::from_str(json).expect("deserialization should work");

        assert!(lead.email.is_none());
        assert!((lead.score - 0.0).abs() < f64::EPSILON);
    }
}
