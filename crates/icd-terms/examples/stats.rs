use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use icd_terms::{AssetPaths, LoadMode, TerminologyIndex};

fn main() -> Result<()> {
    let assets_dir = env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: cargo run -p icd-terms --example stats -- <path-to-assets-dir>")?;

    let paths = AssetPaths::in_dir(&assets_dir);
    let index = TerminologyIndex::load_with_keys(&paths, LoadMode::Mmap, icd_normalize::normalize)
        .with_context(|| format!("loading terminology from {}", assets_dir.display()))?;

    println!("Assets       : {}", assets_dir.display());
    println!("Terms        : {}", index.term_count());
    println!("Concepts     : {}", index.concept_count());
    println!("Codes        : {}", index.code_count());
    println!("Dangling CUIs: {}", index.dangling_concepts());

    let mut longest = index.all_terms().iter().map(|t| t.chars().count()).collect::<Vec<_>>();
    longest.sort_unstable();
    if let Some(max) = longest.last() {
        println!("Longest term : {max} chars");
        println!("Median term  : {} chars", longest[longest.len() / 2]);
    }

    // Spot-check a couple of common terms to confirm lookup.
    for term in ["hypertension", "chronic kidney disease"] {
        let cuis = index.lookup_term(term);
        let codes: Vec<String> = cuis
            .iter()
            .flat_map(|cui| index.lookup_concept(cui))
            .map(ToString::to_string)
            .collect();
        println!("Term '{term}': {} concepts, codes {:?}", cuis.len(), codes);
    }

    Ok(())
}
