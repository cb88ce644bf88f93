//! Load precomputed terminology assets into an immutable lookup index.
//!
//! Two JSON objects make up a terminology vintage:
//! - `term_to_cuis.json`: normalized term → array of concept identifiers.
//! - `cui_to_icd.json`: concept identifier → array of diagnosis codes.
//!
//! Both files are validated while loading. A missing file, invalid JSON, a top
//! level that is not an object, or a value that is not an array of non-empty
//! strings fails with an [`AssetError`] naming the asset and the reason. After
//! loading, a [`TerminologyIndex`] is never mutated, so it can be shared across
//! threads behind an `Arc` without locking. Nothing here is global: several
//! indices (different vintages, different tenants) can live side by side.
//!
//! # Example
//! ```no_run
//! use icd_terms::{AssetPaths, LoadMode, TerminologyIndex};
//! use icd_types::ConceptId;
//!
//! # fn main() -> anyhow::Result<()> {
//! let paths = AssetPaths::in_dir("/path/to/assets");
//! let index = TerminologyIndex::load_with_mode(&paths, LoadMode::Mmap)?;
//! for cui in index.lookup_term("hypertension") {
//!     println!("{cui}: {:?}", index.lookup_concept(cui));
//! }
//! assert!(index.lookup_concept(&ConceptId::from("C-unknown")).is_empty());
//! # Ok(()) }
//! ```
//!
//! For a runnable demo, see `cargo run -p icd-terms --example stats -- <assets-dir>`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use icd_types::{ConceptId, DiagnosisCode};
use memmap2::Mmap;
use serde_json::error::Category;
use thiserror::Error;
use tracing::{debug, info, warn};

/// File name of the term → concepts asset inside an asset directory.
pub const TERM_TO_CONCEPTS_FILE: &str = "term_to_cuis.json";
/// File name of the concept → codes asset inside an asset directory.
pub const CONCEPT_TO_CODES_FILE: &str = "cui_to_icd.json";

static EMPTY_CONCEPTS: BTreeSet<ConceptId> = BTreeSet::new();
static EMPTY_CODES: BTreeSet<DiagnosisCode> = BTreeSet::new();

/// Strategy for reading asset bytes before parsing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadMode {
    /// Memory-map each asset file.
    Mmap,
    /// Read each file into an owned buffer (portable fallback).
    Owned,
}

enum Buffer {
    Mmap(Mmap),
    Owned(Vec<u8>),
}

impl Buffer {
    fn as_slice(&self) -> &[u8] {
        match self {
            Buffer::Mmap(m) => m.as_ref(),
            Buffer::Owned(v) => v.as_slice(),
        }
    }
}

/// The two required mapping files.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Asset {
    TermToConcepts,
    ConceptToCodes,
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Asset::TermToConcepts => "term_to_concepts",
            Asset::ConceptToCodes => "concept_to_codes",
        })
    }
}

/// Locations of the two mapping files.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssetPaths {
    pub term_to_concepts: PathBuf,
    pub concept_to_codes: PathBuf,
}

impl AssetPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            term_to_concepts: dir.join(TERM_TO_CONCEPTS_FILE),
            concept_to_codes: dir.join(CONCEPT_TO_CODES_FILE),
        }
    }

    fn path(&self, asset: Asset) -> &Path {
        match asset {
            Asset::TermToConcepts => &self.term_to_concepts,
            Asset::ConceptToCodes => &self.concept_to_codes,
        }
    }
}

/// Load-time failure. Fatal: no code can be produced without both assets.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("missing {asset} asset: {path}")]
    Missing { asset: Asset, path: PathBuf },
    #[error("failed to read {asset} asset {path}: {source}")]
    Read {
        asset: Asset,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{asset} asset {path} is not valid JSON: {source}")]
    Parse {
        asset: Asset,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{asset} asset {path} is malformed: {detail}")]
    Malformed {
        asset: Asset,
        path: PathBuf,
        detail: String,
    },
}

impl AssetError {
    /// Which asset failed.
    pub fn asset(&self) -> Asset {
        match self {
            AssetError::Missing { asset, .. }
            | AssetError::Read { asset, .. }
            | AssetError::Parse { asset, .. }
            | AssetError::Malformed { asset, .. } => *asset,
        }
    }
}

/// Read-only term → concepts and concept → codes mappings.
#[derive(Debug, Default)]
pub struct TerminologyIndex {
    terms: HashMap<String, BTreeSet<ConceptId>>,
    concepts: HashMap<ConceptId, BTreeSet<DiagnosisCode>>,
    sorted_terms: Vec<String>,
}

impl TerminologyIndex {
    /// Load both assets, memory-mapping the files.
    pub fn load(paths: &AssetPaths) -> Result<Self, AssetError> {
        Self::load_with_mode(paths, LoadMode::Mmap)
    }

    /// Load both assets, keeping term keys exactly as stored.
    pub fn load_with_mode(paths: &AssetPaths, mode: LoadMode) -> Result<Self, AssetError> {
        Self::load_with_keys(paths, mode, str::to_string)
    }

    /// Load both assets, passing every term key through `canonicalize`.
    ///
    /// Keys that collapse onto the same canonical form are merged; keys that
    /// become empty are dropped, since an empty key must never match. Terms
    /// listing no concepts are dropped as well.
    /// Callers typically pass the same normalizer used for mentions so that
    /// asset keys and lookup keys agree.
    pub fn load_with_keys<F>(
        paths: &AssetPaths,
        mode: LoadMode,
        canonicalize: F,
    ) -> Result<Self, AssetError>
    where
        F: Fn(&str) -> String,
    {
        for asset in [Asset::TermToConcepts, Asset::ConceptToCodes] {
            let path = paths.path(asset);
            if !path.is_file() {
                return Err(AssetError::Missing {
                    asset,
                    path: path.to_path_buf(),
                });
            }
        }

        let term_map = read_mapping(Asset::TermToConcepts, paths.path(Asset::TermToConcepts), mode)?;
        let concept_map =
            read_mapping(Asset::ConceptToCodes, paths.path(Asset::ConceptToCodes), mode)?;
        if let Some(key) = concept_map.keys().find(|k| k.trim().is_empty()) {
            return Err(AssetError::Malformed {
                asset: Asset::ConceptToCodes,
                path: paths.concept_to_codes.clone(),
                detail: format!("empty concept identifier {key:?}"),
            });
        }

        let raw_terms = term_map.len();
        let mut dropped = 0usize;
        let mut terms: HashMap<String, BTreeSet<ConceptId>> = HashMap::with_capacity(raw_terms);
        for (raw, cuis) in term_map {
            let key = canonicalize(&raw);
            if key.is_empty() {
                dropped += 1;
                debug!("dropping term {raw:?}: empty after canonicalization");
                continue;
            }
            terms
                .entry(key)
                .or_default()
                .extend(cuis.into_iter().map(ConceptId::from));
        }
        if dropped > 0 {
            warn!("dropped {dropped} asset terms that canonicalize to an empty key");
        }
        if terms.len() + dropped < raw_terms {
            info!(
                "merged {} asset terms onto shared canonical keys",
                raw_terms - dropped - terms.len()
            );
        }

        let concepts = concept_map
            .into_iter()
            .map(|(cui, codes)| {
                (
                    ConceptId::from(cui),
                    codes.into_iter().map(DiagnosisCode::from).collect(),
                )
            })
            .collect();

        let index = Self::assemble(terms, concepts);
        info!(
            "terminology loaded: {} terms, {} concepts, {} codes",
            index.term_count(),
            index.concept_count(),
            index.code_count()
        );
        let dangling = index.dangling_concepts();
        if dangling > 0 {
            warn!("{dangling} concepts referenced by terms have no diagnosis codes");
        }
        Ok(index)
    }

    /// Build an index directly from in-memory mappings.
    pub fn from_maps<T, C>(term_to_concepts: T, concept_to_codes: C) -> Self
    where
        T: IntoIterator<Item = (String, Vec<ConceptId>)>,
        C: IntoIterator<Item = (ConceptId, Vec<DiagnosisCode>)>,
    {
        let mut terms: HashMap<String, BTreeSet<ConceptId>> = HashMap::new();
        for (term, cuis) in term_to_concepts {
            if term.is_empty() {
                continue;
            }
            terms.entry(term).or_default().extend(cuis);
        }
        let mut concepts: HashMap<ConceptId, BTreeSet<DiagnosisCode>> = HashMap::new();
        for (cui, codes) in concept_to_codes {
            concepts.entry(cui).or_default().extend(codes);
        }
        Self::assemble(terms, concepts)
    }

    fn assemble(
        mut terms: HashMap<String, BTreeSet<ConceptId>>,
        concepts: HashMap<ConceptId, BTreeSet<DiagnosisCode>>,
    ) -> Self {
        // A term without concepts can never produce a code.
        terms.retain(|_, cuis| !cuis.is_empty());
        let mut sorted_terms: Vec<String> = terms.keys().cloned().collect();
        sorted_terms.sort();
        Self {
            terms,
            concepts,
            sorted_terms,
        }
    }

    /// Concepts for an exact term key, or an empty set.
    pub fn lookup_term(&self, term: &str) -> &BTreeSet<ConceptId> {
        if term.is_empty() {
            return &EMPTY_CONCEPTS;
        }
        self.terms.get(term).unwrap_or(&EMPTY_CONCEPTS)
    }

    /// Check whether a term key exists.
    pub fn contains_term(&self, term: &str) -> bool {
        !term.is_empty() && self.terms.contains_key(term)
    }

    /// Codes for a concept, or an empty set when the concept has none.
    pub fn lookup_concept(&self, concept: &ConceptId) -> &BTreeSet<DiagnosisCode> {
        self.concepts.get(concept).unwrap_or(&EMPTY_CODES)
    }

    /// Every term key, sorted.
    pub fn all_terms(&self) -> &[String] {
        &self.sorted_terms
    }

    /// Number of term keys.
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Number of concepts with a code entry.
    pub fn concept_count(&self) -> usize {
        self.concepts.len()
    }

    /// Number of distinct diagnosis codes.
    pub fn code_count(&self) -> usize {
        self.concepts
            .values()
            .flatten()
            .collect::<HashSet<_>>()
            .len()
    }

    /// Concepts referenced from the term map that have no code entry.
    pub fn dangling_concepts(&self) -> usize {
        self.terms
            .values()
            .flatten()
            .filter(|cui| !self.concepts.contains_key(*cui))
            .collect::<HashSet<_>>()
            .len()
    }
}

fn load_file(asset: Asset, path: &Path, mode: LoadMode) -> Result<Buffer, AssetError> {
    let read_err = |source| AssetError::Read {
        asset,
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(read_err)?;
    match mode {
        LoadMode::Mmap => unsafe { Mmap::map(&file) }
            .map(Buffer::Mmap)
            .map_err(read_err),
        LoadMode::Owned => {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).map_err(read_err)?;
            Ok(Buffer::Owned(buf))
        }
    }
}

fn read_mapping(
    asset: Asset,
    path: &Path,
    mode: LoadMode,
) -> Result<HashMap<String, Vec<String>>, AssetError> {
    let buffer = load_file(asset, path, mode)?;
    let map: HashMap<String, Vec<String>> =
        serde_json::from_slice(buffer.as_slice()).map_err(|source| match source.classify() {
            Category::Data => AssetError::Malformed {
                asset,
                path: path.to_path_buf(),
                detail: format!("expected an object of string arrays ({source})"),
            },
            _ => AssetError::Parse {
                asset,
                path: path.to_path_buf(),
                source,
            },
        })?;

    for (key, values) in &map {
        if values.iter().any(|v| v.trim().is_empty()) {
            return Err(AssetError::Malformed {
                asset,
                path: path.to_path_buf(),
                detail: format!("entry {key:?} lists an empty identifier"),
            });
        }
    }
    debug!("parsed {} entries from {}", map.len(), path.display());
    Ok(map)
}
