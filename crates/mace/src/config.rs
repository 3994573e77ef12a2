//! Deployment configuration document

use std::path::Path;

use mace_core::{MaceConfig, SchemaConfig};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The configuration block handed over by the host's config loader:
/// `{ "mace": { ... }, "annotation_schemes": [ ... ] }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Engine parameters; every field has a default
    #[serde(default)]
    pub mace: MaceConfig,
    /// Categorical schemes the engine computes consensus for
    #[serde(default)]
    pub annotation_schemes: Vec<SchemaConfig>,
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn partial_document_takes_defaults() {
        let settings = Settings::from_json(
            r#"{
                "mace": { "enabled": true, "trigger_every_n": 3 },
                "annotation_schemes": [
                    { "name": "sentiment", "annotation_type": "radio", "labels": ["pos", "neg"] }
                ]
            }"#,
        )
        .unwrap();

        assert!(settings.mace.enabled);
        assert_eq!(settings.mace.trigger_every_n, 3);
        assert_eq!(settings.mace.num_restarts, MaceConfig::default().num_restarts);
        assert_eq!(settings.annotation_schemes.len(), 1);
        assert_eq!(settings.annotation_schemes[0].labels, vec!["pos", "neg"]);
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(Settings::from_json("{}").unwrap(), Settings::default());
    }

    #[test]
    fn malformed_document_is_serialization_error() {
        let err = Settings::from_json("{ mace: }").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "mace": {{ "seed": 7 }} }}"#).unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.mace.seed, 7);
        assert!(settings.annotation_schemes.is_empty());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Settings::load("/nonexistent/mace.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
