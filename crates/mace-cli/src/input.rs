//! Input loading for one-shot runs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use mace_core::AnnotationObservation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("{path}:{line}: invalid observation: {source}")]
    Parse {
        path: String,
        line: usize,
        source: serde_json::Error,
    },
}

/// Read a JSON-lines file with one `AnnotationObservation` per line.
///
/// Blank lines are skipped.
pub fn load_observations(path: &Path) -> Result<Vec<AnnotationObservation>, InputError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|source| InputError::Io {
        path: display.clone(),
        source,
    })?;
    parse_observations(BufReader::new(file), &display)
}

fn parse_observations(
    reader: impl BufRead,
    path: &str,
) -> Result<Vec<AnnotationObservation>, InputError> {
    let mut observations = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| InputError::Io {
            path: path.to_string(),
            source,
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let observation = serde_json::from_str(trimmed).map_err(|source| InputError::Parse {
            path: path.to_string(),
            line: idx + 1,
            source,
        })?;
        observations.push(observation);
    }
    Ok(observations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn reads_jsonl_skipping_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"item_id":"i1","annotator_id":"u1","schema_name":"s","observed_label_index":0}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"item_id":"i1","annotator_id":"u2","schema_name":"s","observed_label_index":1}}"#
        )
        .unwrap();

        let observations = load_observations(file.path()).unwrap();
        assert_eq!(
            observations,
            vec![
                AnnotationObservation::new("i1", "u1", "s", 0),
                AnnotationObservation::new("i1", "u2", "s", 1),
            ]
        );
    }

    #[test]
    fn reports_line_of_bad_record() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"item_id":"i1","annotator_id":"u1","schema_name":"s","observed_label_index":0}}"#
        )
        .unwrap();
        writeln!(file, r#"{{"item_id":"i2"}}"#).unwrap();

        match load_observations(file.path()).unwrap_err() {
            InputError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("expected parse error, got {}", other),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_observations(Path::new("/nonexistent/observations.jsonl")).unwrap_err();
        assert!(matches!(err, InputError::Io { .. }));
    }
}
