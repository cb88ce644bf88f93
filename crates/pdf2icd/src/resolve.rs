//! Mention → diagnosis code resolution: normalize, exact lookup, fuzzy fallback.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use icd_normalize::Normalizer;
use icd_terms::TerminologyIndex;
use icd_types::{CodeMatch, ConceptId, DiagnosisCode, EXACT_CONFIDENCE, MatchKind, MatchResult, Mention};
use thiserror::Error;
use tracing::debug;

use crate::config::MatchConfig;
use crate::fuzzy::{CandidateIndex, FuzzyCandidate, match_fuzzy};

/// Upper bound on cached fuzzy lookups; once full, new results are not cached.
pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;

/// Result of the exact dictionary lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExactOutcome<'a> {
    Hit(&'a BTreeSet<ConceptId>),
    FallbackNeeded,
}

/// Exact lookup of a normalized term.
pub fn match_exact<'a>(term: &str, index: &'a TerminologyIndex) -> ExactOutcome<'a> {
    let concepts = index.lookup_term(term);
    if concepts.is_empty() {
        ExactOutcome::FallbackNeeded
    } else {
        ExactOutcome::Hit(concepts)
    }
}

/// Cooperative cancellation shared between a batch and its caller.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("resolution cancelled")]
    Cancelled,
}

/// Resolve one mention with the default clinical normalizer.
///
/// Exact hits are returned with confidence 100 and fuzzy matching is skipped.
/// Otherwise each fuzzy candidate's concepts are expanded to codes scored with
/// the candidate's similarity. An unresolvable mention yields an empty match list.
pub fn resolve(
    mention: Mention,
    index: &TerminologyIndex,
    candidates: &CandidateIndex,
    config: &MatchConfig,
) -> MatchResult {
    let normalized = icd_normalize::normalize(&mention.text);
    resolve_normalized(mention, normalized, index, |term| {
        match_fuzzy(term, candidates, config.fuzzy_limit, config.fuzzy_threshold)
    })
}

fn resolve_normalized<F>(
    mention: Mention,
    normalized: String,
    index: &TerminologyIndex,
    fuzzy: F,
) -> MatchResult
where
    F: FnOnce(&str) -> Vec<FuzzyCandidate>,
{
    if normalized.is_empty() {
        return MatchResult::unresolved(mention, normalized);
    }

    let mut collector = Collector::new(index);
    match match_exact(&normalized, index) {
        ExactOutcome::Hit(concepts) => {
            collector.add(concepts, &normalized, EXACT_CONFIDENCE, MatchKind::Exact);
        }
        ExactOutcome::FallbackNeeded => {
            let found = fuzzy(&normalized);
            debug!("fuzzy fallback for {normalized:?}: {} candidates", found.len());
            for candidate in &found {
                collector.add(
                    index.lookup_term(&candidate.term),
                    &candidate.term,
                    candidate.score,
                    MatchKind::Fuzzy,
                );
            }
        }
    }
    collector.finish(mention, normalized)
}

struct Collector<'a> {
    index: &'a TerminologyIndex,
    best: BTreeMap<DiagnosisCode, CodeMatch>,
    unmapped: BTreeSet<ConceptId>,
}

impl<'a> Collector<'a> {
    fn new(index: &'a TerminologyIndex) -> Self {
        Self {
            index,
            best: BTreeMap::new(),
            unmapped: BTreeSet::new(),
        }
    }

    fn add(
        &mut self,
        concepts: &BTreeSet<ConceptId>,
        matched: &str,
        confidence: f64,
        kind: MatchKind,
    ) {
        for concept in concepts {
            let codes = self.index.lookup_concept(concept);
            if codes.is_empty() {
                self.unmapped.insert(concept.clone());
                continue;
            }
            for code in codes {
                let candidate = CodeMatch {
                    code: code.clone(),
                    concept: concept.clone(),
                    matched: matched.to_string(),
                    confidence,
                    kind,
                };
                match self.best.entry(code.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(candidate);
                    }
                    Entry::Occupied(mut slot) => {
                        if outranks(&candidate, slot.get()) {
                            slot.insert(candidate);
                        }
                    }
                }
            }
        }
    }

    fn finish(self, mention: Mention, normalized: String) -> MatchResult {
        let mut matches: Vec<CodeMatch> = self.best.into_values().collect();
        matches.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.code.cmp(&b.code))
        });
        MatchResult {
            mention,
            normalized,
            matches,
            unmapped_concepts: self.unmapped.into_iter().collect(),
        }
    }
}

// Higher confidence wins; ties go to the smallest (concept, matched term).
fn outranks(new: &CodeMatch, current: &CodeMatch) -> bool {
    new.confidence
        .total_cmp(&current.confidence)
        .then_with(|| current.concept.cmp(&new.concept))
        .then_with(|| current.matched.cmp(&new.matched))
        .is_gt()
}

type CacheKey = (String, usize, u8);

/// Shared resolution engine: index, fuzzy candidates, normalizer and a fuzzy cache.
///
/// Cached values depend only on the key, so caching never changes results.
#[derive(Debug)]
pub struct Resolver {
    index: Arc<TerminologyIndex>,
    candidates: CandidateIndex,
    normalizer: Normalizer,
    config: MatchConfig,
    cache: DashMap<CacheKey, Vec<FuzzyCandidate>>,
    cache_capacity: usize,
}

impl Resolver {
    /// Resolver using the built-in clinical normalizer.
    pub fn new(index: Arc<TerminologyIndex>, config: MatchConfig) -> Self {
        Self::with_normalizer(index, Normalizer::clinical(), config)
    }

    pub fn with_normalizer(
        index: Arc<TerminologyIndex>,
        normalizer: Normalizer,
        config: MatchConfig,
    ) -> Self {
        let candidates = CandidateIndex::build(&index);
        Self {
            index,
            candidates,
            normalizer,
            config,
            cache: DashMap::new(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// Cap the number of cached fuzzy lookups (0 disables caching).
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn index(&self) -> &Arc<TerminologyIndex> {
        &self.index
    }

    pub fn candidates(&self) -> &CandidateIndex {
        &self.candidates
    }

    pub fn config(&self) -> MatchConfig {
        self.config
    }

    pub fn normalize(&self, raw: &str) -> String {
        self.normalizer.normalize(raw)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn resolve(&self, mention: Mention) -> MatchResult {
        self.resolve_with_config(mention, &self.config)
    }

    /// Resolve with per-call options instead of the resolver's defaults.
    pub fn resolve_with_config(&self, mention: Mention, config: &MatchConfig) -> MatchResult {
        let normalized = self.normalizer.normalize(&mention.text);
        resolve_normalized(mention, normalized, &self.index, |term| {
            self.fuzzy_cached(term, config)
        })
    }

    pub fn resolve_batch(
        &self,
        mentions: Vec<Mention>,
        cancel: &CancelFlag,
    ) -> Result<Vec<MatchResult>, ResolveError> {
        self.resolve_batch_with_config(mentions, &self.config, cancel)
    }

    /// Resolve independent mentions, preserving input order.
    ///
    /// `cancel` is checked before each mention; once set, the batch fails
    /// with [`ResolveError::Cancelled`] and partial results are discarded.
    pub fn resolve_batch_with_config(
        &self,
        mentions: Vec<Mention>,
        config: &MatchConfig,
        cancel: &CancelFlag,
    ) -> Result<Vec<MatchResult>, ResolveError> {
        let total = mentions.len();
        let step = |mention: Mention| {
            if cancel.is_cancelled() {
                None
            } else {
                Some(self.resolve_with_config(mention, config))
            }
        };

        #[cfg(feature = "parallel")]
        let results: Option<Vec<MatchResult>> = {
            use rayon::prelude::*;
            mentions.into_par_iter().map(step).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let results: Option<Vec<MatchResult>> = mentions.into_iter().map(step).collect();

        let results = results.ok_or(ResolveError::Cancelled)?;
        let unresolved = results.iter().filter(|r| !r.is_resolved()).count();
        debug!("resolved batch of {total} mentions ({unresolved} unresolved)");
        Ok(results)
    }

    fn fuzzy_cached(&self, term: &str, config: &MatchConfig) -> Vec<FuzzyCandidate> {
        let key = (term.to_string(), config.fuzzy_limit, config.fuzzy_threshold);
        if let Some(hit) = self.cache.get(&key) {
            return hit.value().clone();
        }
        let found = match_fuzzy(
            term,
            &self.candidates,
            config.fuzzy_limit,
            config.fuzzy_threshold,
        );
        if self.cache.len() < self.cache_capacity {
            self.cache.insert(key, found.clone());
        }
        found
    }
}
