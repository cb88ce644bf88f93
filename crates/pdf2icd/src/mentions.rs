//! JSON-lines mention input.
//!
//! Each non-blank line is either a full mention object
//! (`{"text": "HTN", "page": 3, "start": 10, "end": 13}`) or a bare JSON
//! string, which becomes a mention on page 0.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use icd_types::Mention;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MentionsError {
    #[error("failed to read mentions: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: invalid mention: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MentionLine {
    Record(Mention),
    Text(String),
}

pub fn read_mentions<R: BufRead>(reader: R) -> Result<Vec<Mention>, MentionsError> {
    let mut mentions = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: MentionLine = serde_json::from_str(&line).map_err(|source| MentionsError::Parse {
            line: idx + 1,
            source,
        })?;
        let mention = match parsed {
            MentionLine::Record(mention) => mention,
            MentionLine::Text(text) => Mention::new(text, 0),
        };
        if !icd_normalize::is_valid_mention(&mention.text) {
            warn!("line {}: mention {:?} has no alphanumeric text", idx + 1, mention.text);
        }
        mentions.push(mention);
    }
    debug!("read {} mentions", mentions.len());
    Ok(mentions)
}

pub fn read_mentions_from_path(path: impl AsRef<Path>) -> Result<Vec<Mention>, MentionsError> {
    let file = File::open(path.as_ref())?;
    read_mentions(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_objects_and_bare_strings() {
        let input = "{\"text\":\"HTN\",\"page\":3,\"start\":4,\"end\":7}\n\n\"copd\"\n";
        let mentions = read_mentions(input.as_bytes()).unwrap();
        assert_eq!(mentions, vec![Mention::with_offsets("HTN", 3, 4, 7), Mention::new("copd", 0)]);
    }

    #[test]
    fn reports_the_failing_line() {
        let err = read_mentions("\"ok\"\n{\"page\": 1}\n".as_bytes()).unwrap_err();
        assert!(matches!(err, MentionsError::Parse { line: 2, .. }));
    }

    #[test]
    fn punctuation_only_mentions_are_kept() {
        let mentions = read_mentions("\"...\"\n".as_bytes()).unwrap();
        assert_eq!(mentions.len(), 1);
    }
}
