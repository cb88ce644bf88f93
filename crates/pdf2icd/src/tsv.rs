//! Tab-separated output, one row per resolved code.
//!
//! Unresolved mentions still get a row so coverage can be measured from the
//! file alone; its match columns are empty, except `cui`, which lists any
//! concepts that matched but had no code.

use std::io;
use std::path::Path;

use icd_types::MatchResult;
use serde::Serialize;

pub const COLUMNS: [&str; 7] = ["mention", "page", "matched", "score", "kind", "cui", "icd_code"];

#[derive(Serialize)]
struct Row<'a> {
    mention: &'a str,
    page: u32,
    matched: &'a str,
    score: String,
    kind: &'a str,
    cui: String,
    icd_code: &'a str,
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        return format!("{score:.0}");
    }
    let rounded = format!("{score:.2}");
    if score < 100.0 && rounded == "100.00" {
        // Only exact matches may print as 100.
        format!("{:.2}", (score * 100.0).floor() / 100.0)
    } else {
        rounded
    }
}

/// Write a header plus the rows for `results` to `writer`.
pub fn write_results<W: io::Write>(writer: W, results: &[MatchResult]) -> Result<(), csv::Error> {
    let mut out = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer);
    out.write_record(COLUMNS)?;

    for result in results {
        let mention = result.mention.text.as_str();
        let page = result.mention.page;
        if result.matches.is_empty() {
            let unmapped: Vec<&str> = result
                .unmapped_concepts
                .iter()
                .map(|c| c.as_str())
                .collect();
            out.serialize(Row {
                mention,
                page,
                matched: "",
                score: String::new(),
                kind: "",
                cui: unmapped.join(","),
                icd_code: "",
            })?;
            continue;
        }
        for m in &result.matches {
            out.serialize(Row {
                mention,
                page,
                matched: &m.matched,
                score: format_score(m.confidence),
                kind: m.kind.as_str(),
                cui: m.concept.to_string(),
                icd_code: m.code.as_str(),
            })?;
        }
    }
    out.flush()?;
    Ok(())
}

/// [`write_results`] into a new file at `path`.
pub fn write_results_to_path(path: impl AsRef<Path>, results: &[MatchResult]) -> Result<(), csv::Error> {
    let file = std::fs::File::create(path.as_ref())?;
    write_results(io::BufWriter::new(file), results)
}
