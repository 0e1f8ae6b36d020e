//! TF-IDF scoring over memory entries.
//!
//! Query terms are matched against each entry's key (weight 2.0), tags
//! (1.5), and value text (1.0). Term frequency is weighted by inverse
//! document frequency across the whole store so common words contribute
//! less than discriminating ones.

use std::collections::HashMap;

use crate::store::MemoryEntry;

const KEY_WEIGHT: f64 = 2.0;
const TAG_WEIGHT: f64 = 1.5;
const VALUE_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: MemoryEntry,
    pub score: f64,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(String::from)
        .collect()
}

/// Per-entry weighted term frequencies.
fn term_frequencies(entry: &MemoryEntry) -> HashMap<String, f64> {
    let mut tf: HashMap<String, f64> = HashMap::new();
    for term in tokenize(&entry.key) {
        *tf.entry(term).or_default() += KEY_WEIGHT;
    }
    for tag in &entry.tags {
        for term in tokenize(tag) {
            *tf.entry(term).or_default() += TAG_WEIGHT;
        }
    }
    for term in tokenize(&entry.value) {
        *tf.entry(term).or_default() += VALUE_WEIGHT;
    }
    tf
}

/// Inverse document frequency per term across the corpus.
fn document_frequencies(entries: &[MemoryEntry]) -> HashMap<String, usize> {
    let mut df: HashMap<String, usize> = HashMap::new();
    for entry in entries {
        let mut seen = std::collections::HashSet::new();
        for term in term_frequencies(entry).into_keys() {
            if seen.insert(term.clone()) {
                *df.entry(term).or_default() += 1;
            }
        }
    }
    df
}

/// Score one entry against the query terms.
pub fn score_entry(
    entry: &MemoryEntry,
    query_terms: &[String],
    df: &HashMap<String, usize>,
    corpus_size: usize,
) -> f64 {
    let tf = term_frequencies(entry);
    let n = corpus_size.max(1) as f64;
    query_terms
        .iter()
        .map(|term| {
            let Some(freq) = tf.get(term) else { return 0.0 };
            let docs = df.get(term).copied().unwrap_or(1) as f64;
            let idf = (1.0 + n / docs).ln();
            freq * idf
        })
        .sum()
}

/// Rank entries against a query, best first. Entries with zero score are
/// dropped, so a query matching nothing returns an empty list.
pub fn search_entries(entries: Vec<MemoryEntry>, query: &str, limit: usize) -> Vec<SearchHit> {
    let query_terms = tokenize(query);
    if query_terms.is_empty() {
        return Vec::new();
    }
    let df = document_frequencies(&entries);
    let corpus_size = entries.len();

    let mut hits: Vec<SearchHit> = entries
        .into_iter()
        .filter_map(|entry| {
            let score = score_entry(&entry, &query_terms, &df, corpus_size);
            (score > 0.0).then_some(SearchHit { entry, score })
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(key: &str, value: &str, tags: &[&str]) -> MemoryEntry {
        MemoryEntry {
            key: key.into(),
            value: value.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            source: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            access_count: 0,
        }
    }

    #[test]
    fn no_match_returns_empty() {
        let entries = vec![entry("coffee-order", "oat milk latte", &[])];
        let hits = search_entries(entries, "kubernetes", 10);
        assert!(hits.is_empty());
    }

    #[test]
    fn value_substring_outranks_non_matching() {
        let entries = vec![
            entry("a", "the deploy runs on fridays", &[]),
            entry("b", "unrelated note about cats", &[]),
        ];
        let hits = search_entries(entries, "deploy", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.key, "a");
    }

    #[test]
    fn key_match_outweighs_value_match() {
        let entries = vec![
            entry("deploy-schedule", "some text", &[]),
            entry("notes", "about the deploy", &[]),
        ];
        let hits = search_entries(entries, "deploy", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.key, "deploy-schedule");
    }

    #[test]
    fn tag_match_outweighs_value_match() {
        let entries = vec![
            entry("x1", "mentions testing once", &[]),
            entry("x2", "nothing relevant", &["testing"]),
        ];
        let hits = search_entries(entries, "testing", 10);
        assert_eq!(hits[0].entry.key, "x2");
    }

    #[test]
    fn limit_is_honored() {
        let entries = (0..10)
            .map(|i| entry(&format!("note-{i}"), "shared term", &[]))
            .collect();
        let hits = search_entries(entries, "shared", 3);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn empty_query_returns_empty() {
        let entries = vec![entry("a", "text", &[])];
        assert!(search_entries(entries, "  ", 10).is_empty());
    }
}
