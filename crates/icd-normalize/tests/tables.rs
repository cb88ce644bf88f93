use std::io::Write;

use icd_normalize::{Normalizer, NormalizerError};
use tempfile::NamedTempFile;

fn table(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write table");
    file
}

#[test]
fn loads_extra_entries_on_top_of_clinical_tables() {
    let file = table("# local additions\nhld hyperlipidemia\nosa obstructive sleep apnea  # common\n\n");
    let norm = Normalizer::load(file.path()).expect("load table");
    assert_eq!(norm.normalize("HLD"), "hyperlipidemia");
    assert_eq!(norm.normalize("OSA"), "obstructive sleep apnea");
    // Built-in entries are still present.
    assert_eq!(norm.normalize("HTN"), "hypertension");
}

#[test]
fn file_entries_override_built_ins() {
    let file = table("ca carcinoma\n");
    let norm = Normalizer::load(file.path()).expect("load table");
    assert_eq!(norm.normalize("CA"), "carcinoma");
}

#[test]
fn single_token_lines_are_stop_tokens() {
    let file = table("# drop filler words\nof\nthe  # article\nnos not otherwise specified\n");
    let norm = Normalizer::load(file.path()).expect("load table");
    assert_eq!(norm.stop_token_count(), 2);
    assert_eq!(norm.normalize("Cancer of the Breast"), "cancer breast");
    // A stop token wins over a built-in expansion.
    let file = table("htn\n");
    let norm = Normalizer::load(file.path()).expect("load table");
    assert_eq!(norm.normalize("HTN crisis"), "crisis");
}

#[test]
fn multi_token_stop_entry_is_rejected() {
    let err = Normalizer::from_tables(std::iter::empty(), ["of the".to_string()]).unwrap_err();
    assert!(matches!(err, NormalizerError::InvalidEntry { .. }));
}

#[test]
fn missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.txt");
    let err = Normalizer::load(&path).unwrap_err();
    assert!(err.to_string().contains("absent.txt"));
}
