use std::env;

use anyhow::{Context, Result};
use icd_normalize::Normalizer;

fn main() -> Result<()> {
    let mut args = env::args().skip(1).peekable();
    let normalizer = match args.peek().map(String::as_str) {
        Some("--table") => {
            args.next();
            let path = args
                .next()
                .context("usage: normalize [--table <file>] <mention>...")?;
            Normalizer::load(&path).with_context(|| format!("loading table {path}"))?
        }
        _ => Normalizer::clinical(),
    };

    let mentions: Vec<String> = args.collect();
    if mentions.is_empty() {
        for demo in ["Hypertension.", "HTN", "COPD exacerbation", "— CKD —", "•"] {
            print_row(&normalizer, demo);
        }
        return Ok(());
    }
    for mention in &mentions {
        print_row(&normalizer, mention);
    }
    Ok(())
}

fn print_row(normalizer: &Normalizer, mention: &str) {
    let key = normalizer.normalize(mention);
    let valid = normalizer.is_valid_mention(mention);
    println!("{mention:?} -> {key:?} (valid: {valid})");
}
