//! Approximate term lookup over the terminology's term universe.
//!
//! Similarity is normalized Levenshtein distance over Unicode scalar values,
//! scaled to 0-100:
//!
//! `score = 100 * (1 - lev(a, b) / max(chars(a), chars(b)))`
//!
//! Identical strings score 100. Scores are compared against the integer
//! threshold without rounding. Before scoring, two lower bounds on the edit
//! distance discard candidates that cannot reach the threshold: the length
//! difference, and half the L1 distance between character histograms. Both
//! bounds are exact, so pruning never changes the result.

use icd_terms::TerminologyIndex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// a-z, 0-9, space, everything else
const SLOTS: usize = 38;

type Profile = [u8; SLOTS];

/// A dictionary term that approximately matches a query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FuzzyCandidate {
    pub term: String,
    pub score: f64,
}

/// Terms bucketed by character length with per-term character histograms.
#[derive(Debug, Clone, Default)]
pub struct CandidateIndex {
    lens: Vec<Option<LenBucket>>,
    total: usize,
}

#[derive(Debug, Clone)]
struct LenBucket {
    terms: Vec<String>,
    profiles: Vec<Profile>,
}

struct Search {
    hits: Vec<FuzzyCandidate>,
    scored: usize,
}

impl CandidateIndex {
    /// Bucket every term of `index`.
    pub fn build(index: &TerminologyIndex) -> Self {
        Self::from_terms(index.all_terms())
    }

    pub fn from_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut buckets: Vec<Vec<String>> = Vec::new();
        for term in terms {
            let term = term.as_ref();
            if term.is_empty() {
                continue;
            }
            let len = term.chars().count();
            if buckets.len() <= len {
                buckets.resize_with(len + 1, Vec::new);
            }
            buckets[len].push(term.to_string());
        }

        let mut lens = Vec::with_capacity(buckets.len());
        let mut total = 0usize;
        for (len, bucket) in buckets.into_iter().enumerate() {
            let mut sorted = bucket;
            sorted.sort();
            sorted.dedup();
            let count = sorted.len();
            let built = LenBucket::build(sorted);
            if built.is_some() {
                debug!("bucketed {count} terms of length {len}");
                total += count;
            }
            lens.push(built);
        }

        info!("fuzzy candidates indexed: {total}");
        Self { lens, total }
    }

    /// Number of distinct candidate terms.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn search(&self, term: &str, limit: usize, threshold: u8) -> Search {
        let mut search = Search {
            hits: Vec::new(),
            scored: 0,
        };
        if term.is_empty() || limit == 0 {
            return search;
        }

        let threshold = f64::from(threshold);
        let query_len = term.chars().count();
        let query_profile = profile(term);

        for (len, bucket) in self.lens.iter().enumerate() {
            let Some(bucket) = bucket else {
                continue;
            };
            let max_len = len.max(query_len);
            let len_gap = len.abs_diff(query_len);
            if score_bound(len_gap, max_len) < threshold {
                continue;
            }

            for (candidate, candidate_profile) in bucket.terms.iter().zip(&bucket.profiles) {
                let lower = profile_distance(&query_profile, candidate_profile)
                    .div_ceil(2)
                    .max(len_gap);
                if score_bound(lower, max_len) < threshold {
                    continue;
                }
                search.scored += 1;
                let score = similarity(term, candidate);
                if score >= threshold {
                    search.hits.push(FuzzyCandidate {
                        term: candidate.clone(),
                        score,
                    });
                }
            }
        }

        rank(&mut search.hits);
        search.hits.truncate(limit);
        search
    }
}

impl LenBucket {
    fn build(terms: Vec<String>) -> Option<Self> {
        if terms.is_empty() {
            return None;
        }
        let profiles = terms.iter().map(|t| profile(t)).collect();
        Some(Self { terms, profiles })
    }
}

/// Similarity between two strings on a 0-100 scale.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Best-scoring terms for `term`, at most `limit`, each scoring at least `threshold`.
///
/// Ordered by score descending, then shorter term first, then lexicographically.
/// An empty result is the normal outcome for an unresolvable mention.
pub fn match_fuzzy(
    term: &str,
    candidates: &CandidateIndex,
    limit: usize,
    threshold: u8,
) -> Vec<FuzzyCandidate> {
    candidates.search(term, limit, threshold).hits
}

fn rank(hits: &mut [FuzzyCandidate]) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.term.chars().count().cmp(&b.term.chars().count()))
            .then_with(|| a.term.cmp(&b.term))
    });
}

// Same arithmetic as `similarity`, so a bound on the distance bounds the score.
fn score_bound(min_edits: usize, max_len: usize) -> f64 {
    if max_len == 0 {
        return 100.0;
    }
    (1.0 - min_edits as f64 / max_len as f64) * 100.0
}

fn slot(c: char) -> usize {
    match c {
        'a'..='z' => (c as u8 - b'a') as usize,
        '0'..='9' => 26 + (c as u8 - b'0') as usize,
        ' ' => 36,
        _ => 37,
    }
}

fn profile(term: &str) -> Profile {
    let mut counts = [0u8; SLOTS];
    for c in term.chars() {
        let idx = slot(c);
        counts[idx] = counts[idx].saturating_add(1);
    }
    counts
}

fn profile_distance(a: &Profile, b: &Profile) -> usize {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.abs_diff(*y) as usize)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TERMS: &[&str] = &[
        "hypertension",
        "high blood pressure",
        "chronic kidney disease",
        "deep vein thrombosis",
        "atrial fibrillation",
        "cancer",
        "diabetes",
        "diabetes mellitus",
        "diabetes insipidus",
        "chronic obstructive pulmonary disease",
        "fever",
        "hypotension",
        "covid-19",
    ];

    fn brute_force(term: &str, limit: usize, threshold: u8) -> Vec<FuzzyCandidate> {
        let mut hits: Vec<FuzzyCandidate> = TERMS
            .iter()
            .map(|t| FuzzyCandidate {
                term: t.to_string(),
                score: similarity(term, t),
            })
            .filter(|c| c.score >= f64::from(threshold))
            .collect();
        rank(&mut hits);
        hits.truncate(limit);
        hits
    }

    #[test]
    fn finds_misspelled_compound_term() {
        let index = CandidateIndex::from_terms(TERMS);
        let hits = match_fuzzy("diabetis melitus", &index, 3, 85);
        assert_eq!(hits[0].term, "diabetes mellitus");
        assert!(hits[0].score >= 85.0 && hits[0].score < 100.0);
    }

    #[test]
    fn nonsense_yields_nothing() {
        let index = CandidateIndex::from_terms(TERMS);
        assert!(match_fuzzy("xyzxyz", &index, 3, 85).is_empty());
    }

    #[test]
    fn empty_query_and_zero_limit_yield_nothing() {
        let index = CandidateIndex::from_terms(TERMS);
        assert!(match_fuzzy("", &index, 3, 0).is_empty());
        assert!(match_fuzzy("hypertensoin", &index, 0, 0).is_empty());
    }

    #[test]
    fn ties_prefer_shorter_then_lexicographic() {
        let index = CandidateIndex::from_terms(["bbcdef", "abcdeh", "abcdeg", "abcde"]);
        let hits = match_fuzzy("abcdef", &index, 3, 80);
        let terms: Vec<_> = hits.iter().map(|h| h.term.as_str()).collect();
        assert_eq!(terms, vec!["abcde", "abcdeg", "abcdeh"]);
        assert!(hits.iter().all(|h| h.score == hits[0].score));
    }

    #[test]
    fn raising_threshold_only_removes_candidates() {
        let index = CandidateIndex::from_terms(TERMS);
        for query in ["hypertenshun", "diabetes melitus", "chronic kidney diseases", "fevr"] {
            let mut previous = match_fuzzy(query, &index, TERMS.len(), 0);
            for threshold in (5..=100).step_by(5) {
                let current = match_fuzzy(query, &index, TERMS.len(), threshold);
                assert!(
                    current.iter().all(|c| previous.contains(c)),
                    "{query} at {threshold}"
                );
                previous = current;
            }
        }
    }

    #[test]
    fn pruning_matches_brute_force() {
        let index = CandidateIndex::from_terms(TERMS);
        let queries = [
            "hypertenshun",
            "hypotensoin",
            "diabetes melitus",
            "atrial fibrilation",
            "deep vein thrombosys",
            "cancers",
            "covid 19",
            "x",
        ];
        for query in queries {
            for threshold in [0, 40, 60, 75, 85, 95] {
                for limit in [1, 3, 20] {
                    assert_eq!(
                        match_fuzzy(query, &index, limit, threshold),
                        brute_force(query, limit, threshold),
                        "{query} / {threshold} / {limit}"
                    );
                }
            }
        }
    }

    #[test]
    fn length_and_histogram_bounds_skip_far_terms() {
        let index = CandidateIndex::from_terms(TERMS);
        let search = index.search("hypertenson", 3, 85);
        assert_eq!(search.hits[0].term, "hypertension");
        assert!(search.scored < 4, "scored {} terms", search.scored);
    }

    #[test]
    fn duplicate_and_empty_terms_are_ignored() {
        let index = CandidateIndex::from_terms(["fever", "fever", ""]);
        assert_eq!(index.len(), 1);
        assert!(!index.is_empty());
    }
}
