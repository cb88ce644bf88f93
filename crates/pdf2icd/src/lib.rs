pub mod config;
pub mod fuzzy;
pub mod handlers;
pub mod mentions;
pub mod poppler;
pub mod resolve;
pub mod triage;
pub mod tsv;

pub use config::{ConfigError, MatchConfig};
pub use fuzzy::{CandidateIndex, FuzzyCandidate, match_fuzzy, similarity};
pub use handlers::{AppState, router};
pub use resolve::{CancelFlag, ExactOutcome, ResolveError, Resolver, match_exact, resolve};
pub use triage::{ImageRegion, PageContent, TriageConfig, classify, classify_document};
