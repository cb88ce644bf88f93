//! Canonicalize raw disease mentions into dictionary lookup keys.
//!
//! Normalization is a projection: applying it twice gives the same result as
//! applying it once. The steps are:
//! 1. Lower-case the input.
//! 2. Replace every character that is not alphanumeric, whitespace, a hyphen
//!    or a period with a space.
//! 3. Split on whitespace and trim periods, commas and hyphens from both ends
//!    of each token, so `covid-19` and `n18.9` survive but `hypertension.`
//!    loses its trailing period. Tokens left empty are dropped.
//! 4. Drop stop tokens. The built-in tables have none.
//! 5. Replace whole tokens found in the expansion table (clinical
//!    abbreviations such as `htn`, irregular plurals such as `findings`).
//! 6. Join the tokens with single spaces.
//!
//! Tables can be extended from a whitespace-separated file where each line
//! reads `surface replacement words...`; a line holding a single token marks
//! that token as a stop token. `#` starts a comment.
//!
//! # Example
//! ```
//! use icd_normalize::{Normalizer, normalize};
//!
//! assert_eq!(normalize("  Hypertension. "), "hypertension");
//! assert_eq!(normalize("HTN"), "hypertension");
//!
//! let bare = Normalizer::empty();
//! assert_eq!(bare.normalize("HTN"), "htn");
//! ```
//!
//! For a runnable demo, see `cargo run -p icd-normalize --example normalize -- "COPD exacerbation"`.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use thiserror::Error;

/// Whole-token clinical abbreviations expanded during normalization.
pub const CLINICAL_ABBREVIATIONS: &[(&str, &str)] = &[
    ("afib", "atrial fibrillation"),
    ("ca", "cancer"),
    ("cad", "coronary artery disease"),
    ("ckd", "chronic kidney disease"),
    ("copd", "chronic obstructive pulmonary disease"),
    ("dm", "diabetes"),
    ("dvt", "deep vein thrombosis"),
    ("dz", "disease"),
    ("hf", "heart failure"),
    ("htn", "hypertension"),
    ("mi", "myocardial infarction"),
    ("pe", "pulmonary embolism"),
    ("tb", "tuberculosis"),
    ("uti", "urinary tract infection"),
];

/// Plural forms reduced to their singular.
pub const CLINICAL_PLURALS: &[(&str, &str)] = &[
    ("cancers", "cancer"),
    ("diseases", "disease"),
    ("failures", "failure"),
    ("findings", "finding"),
    ("infarctions", "infarction"),
    ("syndromes", "syndrome"),
    ("tumors", "tumor"),
];

// Chained expansions deeper than this are treated as a cycle.
const MAX_EXPANSION_DEPTH: usize = 8;

static CLINICAL: LazyLock<Normalizer> = LazyLock::new(Normalizer::clinical);

#[derive(Debug, Error)]
pub enum NormalizerError {
    #[error("failed to read expansion table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid expansion entry {surface:?}: {detail}")]
    InvalidEntry { surface: String, detail: &'static str },
    #[error("expansion of {0:?} does not terminate")]
    Cycle(String),
}

/// Normalization rules plus a token expansion table and a stop-token set.
#[derive(Clone, Debug)]
pub struct Normalizer {
    expansions: HashMap<String, Vec<String>>,
    stop_tokens: HashSet<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::clinical()
    }
}

impl Normalizer {
    /// Normalizer without any expansions.
    pub fn empty() -> Self {
        Self {
            expansions: HashMap::new(),
            stop_tokens: HashSet::new(),
        }
    }

    /// Normalizer with the built-in clinical abbreviation and plural tables.
    pub fn clinical() -> Self {
        let entries = CLINICAL_ABBREVIATIONS
            .iter()
            .chain(CLINICAL_PLURALS)
            .map(|(surface, replacement)| (surface.to_string(), replacement.to_string()));
        Self::from_entries(entries).expect("built-in expansion tables are acyclic")
    }

    /// Build from `(surface, replacement)` pairs. Later pairs override earlier ones.
    ///
    /// Surfaces must canonicalize to exactly one token and replacements to at
    /// least one. Replacements are expanded to a fixed point here so that
    /// [`Normalizer::normalize`] stays idempotent.
    pub fn from_entries<I>(entries: I) -> Result<Self, NormalizerError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self::from_tables(entries, std::iter::empty())
    }

    /// Build from expansion pairs plus tokens dropped before expansion.
    ///
    /// A stop token never expands, and stop tokens are removed from
    /// replacements, so a replacement made only of stop tokens is rejected.
    pub fn from_tables<I, S>(entries: I, stop_tokens: S) -> Result<Self, NormalizerError>
    where
        I: IntoIterator<Item = (String, String)>,
        S: IntoIterator<Item = String>,
    {
        let mut stops = HashSet::new();
        for surface in stop_tokens {
            stops.insert(single_token(surface)?);
        }

        let mut raw: HashMap<String, Vec<String>> = HashMap::new();
        for (surface, replacement) in entries {
            let key = single_token(surface.clone())?;
            if stops.contains(&key) {
                continue;
            }
            let tokens: Vec<String> = canonical_tokens(&replacement)
                .filter(|t| !stops.contains(t))
                .collect();
            if tokens.is_empty() {
                return Err(NormalizerError::InvalidEntry {
                    surface,
                    detail: "replacement is empty after normalization",
                });
            }
            if tokens.len() == 1 && tokens[0] == key {
                // Identity mapping.
                raw.remove(&key);
                continue;
            }
            raw.insert(key, tokens);
        }

        let mut expansions = HashMap::with_capacity(raw.len());
        for (key, tokens) in &raw {
            expansions.insert(key.clone(), expand_fully(key, tokens, &raw)?);
        }
        Ok(Self {
            expansions,
            stop_tokens: stops,
        })
    }

    /// Clinical tables extended with the entries in `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NormalizerError> {
        let table = load_table(path.as_ref())?;
        let entries = CLINICAL_ABBREVIATIONS
            .iter()
            .chain(CLINICAL_PLURALS)
            .map(|(s, r)| (s.to_string(), r.to_string()))
            .chain(table.entries);
        Self::from_tables(entries, table.stop_tokens)
    }

    /// Number of surface tokens with an expansion.
    pub fn expansion_count(&self) -> usize {
        self.expansions.len()
    }

    pub fn stop_token_count(&self) -> usize {
        self.stop_tokens.len()
    }

    /// Canonical lookup key for `raw`. Empty when nothing meaningful remains.
    pub fn normalize(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        for token in canonical_tokens(raw) {
            if self.stop_tokens.contains(&token) {
                continue;
            }
            match self.expansions.get(&token) {
                Some(replacement) => {
                    for word in replacement {
                        push_token(&mut out, word);
                    }
                }
                None => push_token(&mut out, &token),
            }
        }
        out
    }

    /// True when the normalized mention contains an alphanumeric character.
    pub fn is_valid_mention(&self, raw: &str) -> bool {
        self.normalize(raw).chars().any(char::is_alphanumeric)
    }
}

/// Normalize with the built-in clinical tables.
pub fn normalize(raw: &str) -> String {
    CLINICAL.normalize(raw)
}

/// [`Normalizer::is_valid_mention`] with the built-in clinical tables.
pub fn is_valid_mention(raw: &str) -> bool {
    CLINICAL.is_valid_mention(raw)
}

fn canonical_tokens(raw: &str) -> std::vec::IntoIter<String> {
    let lowered: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '-' || c == '.' {
                c
            } else {
                ' '
            }
        })
        .collect();
    lowered
        .split_whitespace()
        .map(|token| token.trim_matches(|c| c == '.' || c == '-' || c == ','))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into_iter()
}

fn single_token(surface: String) -> Result<String, NormalizerError> {
    let mut tokens = canonical_tokens(&surface);
    match (tokens.next(), tokens.next()) {
        (Some(token), None) => Ok(token),
        (None, _) => Err(NormalizerError::InvalidEntry {
            surface,
            detail: "surface is empty after normalization",
        }),
        (Some(_), Some(_)) => Err(NormalizerError::InvalidEntry {
            surface,
            detail: "surface must be a single token",
        }),
    }
}

fn push_token(out: &mut String, token: &str) {
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str(token);
}

fn expand_fully(
    key: &str,
    tokens: &[String],
    table: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>, NormalizerError> {
    let mut current = tokens.to_vec();
    for _ in 0..MAX_EXPANSION_DEPTH {
        if !current.iter().any(|t| table.contains_key(t)) {
            return Ok(current);
        }
        current = current
            .iter()
            .flat_map(|t| match table.get(t) {
                Some(next) => next.clone(),
                None => vec![t.clone()],
            })
            .collect();
    }
    Err(NormalizerError::Cycle(key.to_string()))
}

#[derive(Default)]
struct Table {
    entries: Vec<(String, String)>,
    stop_tokens: Vec<String>,
}

fn load_table(path: &Path) -> Result<Table, NormalizerError> {
    let io_err = |source| NormalizerError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let reader = BufReader::new(file);
    let mut table = Table::default();
    for line in reader.lines() {
        let line = line.map_err(io_err)?;
        let content = line.split('#').next().unwrap_or_default();
        let mut parts = content.split_whitespace();
        let Some(surface) = parts.next() else {
            continue;
        };
        let replacement = parts.collect::<Vec<_>>().join(" ");
        if replacement.is_empty() {
            table.stop_tokens.push(surface.to_string());
        } else {
            table.entries.push((surface.to_string(), replacement));
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_abbreviations_and_plurals() {
        let cases = [
            ("COPD", "chronic obstructive pulmonary disease"),
            ("copd", "chronic obstructive pulmonary disease"),
            ("cancers", "cancer"),
            ("Findings", "finding"),
            ("HTN", "hypertension"),
            ("Diabetes", "diabetes"),
            ("History of DM", "history of diabetes"),
        ];
        for (raw, expected) in cases {
            assert_eq!(normalize(raw), expected, "input {raw:?}");
        }
    }

    #[test]
    fn keeps_internal_hyphens_and_periods() {
        assert_eq!(normalize("Foo---Bar"), "foo---bar");
        assert_eq!(normalize("COVID-19"), "covid-19");
        assert_eq!(normalize("CKD stage N18.9,"), "chronic kidney disease stage n18.9");
        assert_eq!(normalize("Hypertension."), "hypertension");
        assert_eq!(normalize("-acute-"), "acute");
    }

    #[test]
    fn collapses_whitespace_and_symbols() {
        assert_eq!(normalize("multiple    spaces"), "multiple spaces");
        assert_eq!(normalize("\tType 2\n diabetes  "), "type 2 diabetes");
        assert_eq!(normalize("— HTN —"), "hypertension");
        assert_eq!(normalize("heart (failure)"), "heart failure");
    }

    #[test]
    fn blank_input_normalizes_to_empty() {
        for raw in ["", "   ", "\n\t", "---", "•", "   .  ", ",,,"] {
            assert_eq!(normalize(raw), "", "input {raw:?}");
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            "Hypertension.",
            "  HTN / CKD ",
            "COPD exacerbation,",
            "Foo---Bar",
            "-.-a-.-",
            "İstanbul fever",
            "β-blocker toxicity",
            "CA of the breast",
            "findings: PE, DVT",
            "",
        ];
        for raw in inputs {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn valid_mentions_need_alphanumerics() {
        let cases = [
            ("Cancer", true),
            ("•", false),
            ("---", false),
            ("Chronic kidney disease", true),
            ("    ", false),
            ("• Diabetes", true),
            ("", false),
            ("COVID-19", true),
            ("   .  ", false),
            ("❖", false),
            ("α-thalassemia", true),
            ("— HTN —", true),
        ];
        for (raw, expected) in cases {
            assert_eq!(is_valid_mention(raw), expected, "input {raw:?}");
        }
    }

    #[test]
    fn chained_entries_expand_to_fixed_point() {
        let norm = Normalizer::from_entries([
            ("nstemi".to_string(), "non-st mi".to_string()),
            ("mi".to_string(), "myocardial infarction".to_string()),
        ])
        .unwrap();
        let once = norm.normalize("NSTEMI");
        assert_eq!(once, "non-st myocardial infarction");
        assert_eq!(norm.normalize(&once), once);
    }

    #[test]
    fn rejects_cycles_and_bad_entries() {
        let cycle = Normalizer::from_entries([
            ("aa".to_string(), "bb".to_string()),
            ("bb".to_string(), "aa".to_string()),
        ]);
        assert!(matches!(cycle, Err(NormalizerError::Cycle(_))));

        let multi = Normalizer::from_entries([("two words".to_string(), "x".to_string())]);
        assert!(matches!(multi, Err(NormalizerError::InvalidEntry { .. })));

        let empty = Normalizer::from_entries([("htn".to_string(), "...".to_string())]);
        assert!(matches!(empty, Err(NormalizerError::InvalidEntry { .. })));
    }

    #[test]
    fn invalid_entries_name_the_surface() {
        let err = Normalizer::from_entries([("Two Words".to_string(), "x".to_string())])
            .unwrap_err();
        assert!(err.to_string().contains("Two Words"));

        let err = Normalizer::from_tables(std::iter::empty(), ["   ".to_string()]).unwrap_err();
        assert!(matches!(err, NormalizerError::InvalidEntry { detail, .. } if detail.contains("empty")));
    }

    #[test]
    fn stop_tokens_are_dropped_before_expansion() {
        let norm = Normalizer::from_tables(
            [
                ("ca".to_string(), "cancer of".to_string()),
                ("the".to_string(), "ignored".to_string()),
            ],
            ["of".to_string(), "The".to_string()],
        )
        .unwrap();
        assert_eq!(norm.stop_token_count(), 2);
        assert_eq!(norm.expansion_count(), 1);
        assert_eq!(norm.normalize("CA of the breast"), "cancer breast");
        assert_eq!(norm.normalize("the"), "");
        assert!(!norm.is_valid_mention("of the"));

        for raw in ["CA of the breast", "history OF ca", "the of"] {
            let once = norm.normalize(raw);
            assert_eq!(norm.normalize(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn replacement_of_only_stop_tokens_is_rejected() {
        let err = Normalizer::from_tables(
            [("nos".to_string(), "of".to_string())],
            ["of".to_string()],
        );
        assert!(matches!(err, Err(NormalizerError::InvalidEntry { .. })));
    }

    #[test]
    fn clinical_tables_have_no_stop_tokens() {
        assert_eq!(Normalizer::clinical().stop_token_count(), 0);
        assert_eq!(normalize("History of DM"), "history of diabetes");
    }

    #[test]
    fn identity_entries_are_ignored() {
        let norm = Normalizer::from_entries([("HTN".to_string(), "htn".to_string())]).unwrap();
        assert_eq!(norm.expansion_count(), 0);
        assert_eq!(norm.normalize("HTN"), "htn");
    }
}
