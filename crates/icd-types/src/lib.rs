//! Shared types for the mention → concept → diagnosis code pipeline.
//!
//! Identifiers are opaque newtypes over `String` so a concept can never be
//! passed where a code is expected. Records produced by the pipeline
//! ([`MatchResult`], [`PageClassification`]) are plain data: they serialize
//! with serde and carry no behaviour beyond small accessors.
//!
//! ```rust
//! use icd_types::{ConceptId, DiagnosisCode, MatchKind, Mention};
//!
//! let mention = Mention::new("Hypertension.", 0);
//! assert_eq!(mention.end, 13);
//! let cui = ConceptId::from("C0020538");
//! let code = DiagnosisCode::from("I10");
//! assert_eq!(format!("{cui} -> {code} ({})", MatchKind::Exact), "C0020538 -> I10 (exact)");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Confidence attached to every exact dictionary hit.
pub const EXACT_CONFIDENCE: f64 = 100.0;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Opaque terminology identifier grouping synonymous surface terms (a CUI).
    ConceptId
);

string_id!(
    /// Standardized disease classification code, e.g. an ICD-10-CM code.
    DiagnosisCode
);

/// A span of text an upstream recognizer flagged as a disease or condition.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub text: String,
    /// Zero-based index of the page the span came from.
    #[serde(default)]
    pub page: u32,
    /// Character offset of the first character within the page text.
    #[serde(default)]
    pub start: usize,
    /// Character offset one past the last character.
    #[serde(default)]
    pub end: usize,
}

impl Mention {
    /// Mention covering `text` from offset zero on `page`.
    pub fn new(text: impl Into<String>, page: u32) -> Self {
        let text = text.into();
        let end = text.chars().count();
        Self {
            text,
            page,
            start: 0,
            end,
        }
    }

    pub fn with_offsets(text: impl Into<String>, page: u32, start: usize, end: usize) -> Self {
        Self {
            text: text.into(),
            page,
            start,
            end,
        }
    }
}

/// How a code was reached.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Fuzzy => "fuzzy",
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resolved code with the concept and dictionary term that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CodeMatch {
    pub code: DiagnosisCode,
    pub concept: ConceptId,
    /// Dictionary term the mention matched (equal to the normalized mention for exact hits).
    pub matched: String,
    /// 100 for exact hits, similarity score in `[0, 100)` for fuzzy hits.
    pub confidence: f64,
    pub kind: MatchKind,
}

/// Resolution outcome for a single mention.
///
/// An empty `matches` list is a normal outcome: the mention could not be
/// resolved, but it is kept so coverage can be measured downstream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub mention: Mention,
    pub normalized: String,
    pub matches: Vec<CodeMatch>,
    /// Concepts that matched but have no diagnosis code in the asset.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmapped_concepts: Vec<ConceptId>,
}

impl MatchResult {
    pub fn unresolved(mention: Mention, normalized: String) -> Self {
        Self {
            mention,
            normalized,
            matches: Vec::new(),
            unmapped_concepts: Vec::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.matches.is_empty()
    }

    /// Kind shared by every match, `None` when unresolved.
    pub fn kind(&self) -> Option<MatchKind> {
        self.matches.first().map(|m| m.kind)
    }

    pub fn codes(&self) -> impl Iterator<Item = &DiagnosisCode> + '_ {
        self.matches.iter().map(|m| &m.code)
    }
}

/// Why a page was routed to heavy processing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageReason {
    InvalidGeometry,
    NoText,
    LowTextDensity,
    NoisyText,
    ImageDominated,
    /// A signal sat within the configured margin of its threshold.
    Borderline,
}

impl TriageReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TriageReason::InvalidGeometry => "invalid_geometry",
            TriageReason::NoText => "no_text",
            TriageReason::LowTextDensity => "low_text_density",
            TriageReason::NoisyText => "noisy_text",
            TriageReason::ImageDominated => "image_dominated",
            TriageReason::Borderline => "borderline",
        }
    }
}

impl fmt::Display for TriageReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measurements a triage decision was based on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSignals {
    /// Non-whitespace characters in the directly extracted text.
    pub char_count: usize,
    pub chars_per_sq_inch: f64,
    /// Share of non-whitespace characters that are not alphanumeric.
    pub noise_ratio: f64,
    /// Fraction of the page area covered by raster images, capped at 1.
    pub image_coverage: f64,
}

/// Per-page routing decision consumed by the extraction orchestration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageClassification {
    pub page: u32,
    pub requires_heavy_processing: bool,
    pub reason: Option<TriageReason>,
    pub signals: PageSignals,
}
