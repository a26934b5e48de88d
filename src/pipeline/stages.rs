//! Pure stage helpers: query deduplication, aggregation, contact filtering
//! and relevance scoring.
//!
//! Everything in this module is synchronous and deterministic; the executor
//! supplies inputs and persists outputs.

use std::collections::{HashMap, HashSet};

use crate::task::{Lead, QueryVariant};

use super::config::PipelineConfig;
use super::strategy::SearchBatch;

/// Deduplicates generated query variants and caps the result.
///
/// The generator may legitimately over-return (duplicate variants per
/// language). Variants are deduplicated by normalized text, first-seen
/// order preserved, then hard-capped at `max_queries`.
pub fn dedup_queries(variants: Vec<QueryVariant>, max_queries: usize) -> Vec<QueryVariant> {
    let mut seen = HashSet::new();
    let mut unique: Vec<QueryVariant> = variants
        .into_iter()
        .filter(|v| seen.insert(v.normalized_text()))
        .collect();
    unique.truncate(max_queries);
    unique
}

/// Flattens search batches and deduplicates leads by provider id.
///
/// Duplicate occurrences are merged: the occurrence with more populated
/// fields becomes the base and absorbs the other's fields; exact ties keep
/// the first-seen occurrence. First-seen position order is preserved.
pub fn aggregate_leads(batches: Vec<SearchBatch>) -> Vec<Lead> {
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<Lead> = Vec::new();

    for batch in batches {
        for lead in batch.leads {
            match by_id.get(&lead.provider_id) {
                Some(&idx) => {
                    let existing = &mut merged[idx];
                    if lead.populated_fields() > existing.populated_fields() {
                        let previous = std::mem::replace(existing, lead);
                        existing.absorb(previous);
                    } else {
                        existing.absorb(lead);
                    }
                }
                None => {
                    by_id.insert(lead.provider_id.clone(), merged.len());
                    merged.push(lead);
                }
            }
        }
    }

    merged
}

/// Retains only leads with a usable contact channel.
///
/// A lead is kept when at least one of email/phone is non-empty and the
/// email, if present, is not a structural role account (blocked local-part
/// at any domain). A blocked email excludes the lead even when a phone is
/// present.
pub fn filter_contacts(leads: Vec<Lead>, blocklist: &[String]) -> Vec<Lead> {
    let blocked: HashSet<String> = blocklist.iter().map(|s| s.to_lowercase()).collect();

    leads
        .into_iter()
        .filter(|lead| {
            if let Some(email) = lead.email.as_deref().filter(|e| !e.is_empty()) {
                let local_part = email.split('@').next().unwrap_or("").to_lowercase();
                if blocked.contains(&local_part) {
                    return false;
                }
            }
            lead.has_contact()
        })
        .collect()
}

/// Scores leads against the original query and sorts them.
///
/// Score combines keyword overlap between the lead's text fields and the
/// query, a location-match boost, and the normalized external rating.
/// Ordering is descending by score; the sort is stable, so exact ties keep
/// insertion order.
pub fn score_leads(
    mut leads: Vec<Lead>,
    query: &str,
    location: Option<&str>,
    config: &PipelineConfig,
) -> Vec<Lead> {
    let query_tokens = tokenize(query);

    for lead in &mut leads {
        lead.score = relevance_score(lead, &query_tokens, location, config);
    }

    leads.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    leads
}

/// Lowercased alphanumeric tokens of a text.
fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn relevance_score(
    lead: &Lead,
    query_tokens: &HashSet<String>,
    location: Option<&str>,
    config: &PipelineConfig,
) -> f64 {
    let mut text = lead.name.clone();
    if let Some(address) = &lead.address {
        text.push(' ');
        text.push_str(address);
    }
    if let Some(website) = &lead.website {
        text.push(' ');
        text.push_str(website);
    }
    let lead_tokens = tokenize(&text);

    let keyword = if query_tokens.is_empty() {
        0.0
    } else {
        let overlap = query_tokens.intersection(&lead_tokens).count();
        overlap as f64 / query_tokens.len() as f64
    };

    let location_boost = match (location, &lead.address) {
        (Some(loc), Some(address)) if !loc.is_empty() => {
            if address.to_lowercase().contains(&loc.to_lowercase()) {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    };

    let rating = lead
        .rating
        .map(|r| (r / 5.0).clamp(0.0, 1.0))
        .unwrap_or(0.0);

    keyword * config.keyword_weight
        + location_boost * config.location_weight
        + rating * config.rating_weight
}
