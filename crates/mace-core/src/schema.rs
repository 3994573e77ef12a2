//! Annotation schemes eligible for consensus
//!
//! The collaborator config loader hands over raw scheme blocks
//! ([`SchemaConfig`]). Only categorical types survive validation into a
//! [`CategoricalSchema`]; everything else is rejected before it can reach
//! the matrix builder.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{MaceError, Result};

/// Raw annotation scheme as supplied by the configuration collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub name: String,
    pub annotation_type: String,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Likert scale size, used when `labels` is empty
    #[serde(default)]
    pub size: Option<usize>,
}

impl SchemaConfig {
    pub fn new(name: impl Into<String>, annotation_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotation_type: annotation_type.into(),
            labels: Vec::new(),
            size: None,
        }
    }

    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }
}

/// Categorical annotation types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationType {
    Radio,
    Likert,
    Select,
    Multiselect,
}

impl AnnotationType {
    /// Parse a collaborator type string; `None` for non-categorical types
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "radio" => Some(Self::Radio),
            "likert" => Some(Self::Likert),
            "select" => Some(Self::Select),
            "multiselect" => Some(Self::Multiselect),
            _ => None,
        }
    }

    /// Whether annotators may pick more than one label
    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Multiselect)
    }
}

impl std::fmt::Display for AnnotationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Radio => write!(f, "radio"),
            Self::Likert => write!(f, "likert"),
            Self::Select => write!(f, "select"),
            Self::Multiselect => write!(f, "multiselect"),
        }
    }
}

/// A validated categorical schema
///
/// `Single` covers radio, likert and select questions: one label per
/// annotation. `Multi` covers multiselect questions, which the pipeline
/// decomposes into one binary sub-problem per option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CategoricalSchema {
    Single {
        name: String,
        annotation_type: AnnotationType,
        labels: Vec<String>,
    },
    Multi { name: String, options: Vec<String> },
}

impl CategoricalSchema {
    /// Validate a raw scheme block.
    pub fn from_config(config: &SchemaConfig) -> Result<Self> {
        let name = config.name.as_str();
        if name.trim().is_empty() {
            return Err(MaceError::Config("schema name must not be empty".into()));
        }
        // observations are matched on the exact name
        if name.trim() != name {
            return Err(MaceError::Config(format!(
                "schema name '{}' has leading or trailing whitespace",
                name
            )));
        }

        let annotation_type = AnnotationType::parse(&config.annotation_type).ok_or_else(|| {
            MaceError::UnsupportedSchemaType {
                schema: name.to_string(),
                annotation_type: config.annotation_type.clone(),
            }
        })?;

        let labels = match (annotation_type, config.labels.is_empty(), config.size) {
            (AnnotationType::Likert, true, Some(size)) => {
                (1..=size).map(|i| i.to_string()).collect::<Vec<_>>()
            }
            _ => config.labels.clone(),
        };

        let mut seen = HashSet::new();
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(MaceError::Config(format!(
                    "schema '{}' has duplicate label '{}'",
                    name, label
                )));
            }
        }

        if annotation_type.is_multi() {
            if labels.is_empty() {
                return Err(MaceError::Config(format!(
                    "multiselect schema '{}' has no options",
                    name
                )));
            }
            return Ok(Self::Multi {
                name: name.to_string(),
                options: labels,
            });
        }

        if labels.len() < 2 {
            return Err(MaceError::Config(format!(
                "schema '{}' needs at least two labels, got {}",
                name,
                labels.len()
            )));
        }

        Ok(Self::Single {
            name: name.to_string(),
            annotation_type,
            labels,
        })
    }

    /// Validate a list of scheme blocks, failing on the first rejection.
    pub fn from_configs(configs: &[SchemaConfig]) -> Result<Vec<Self>> {
        let schemas = configs
            .iter()
            .map(Self::from_config)
            .collect::<Result<Vec<_>>>()?;

        let mut names = HashSet::new();
        for schema in &schemas {
            if !names.insert(schema.name()) {
                return Err(MaceError::Config(format!(
                    "schema '{}' is defined more than once",
                    schema.name()
                )));
            }
        }
        Ok(schemas)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Single { name, .. } | Self::Multi { name, .. } => name,
        }
    }

    /// Label vocabulary (options for multiselect)
    pub fn labels(&self) -> &[String] {
        match self {
            Self::Single { labels, .. } => labels,
            Self::Multi { options, .. } => options,
        }
    }

    pub fn num_labels(&self) -> usize {
        self.labels().len()
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Multi { .. })
    }

    /// Label name for an index, if in range
    pub fn label_name(&self, index: usize) -> Option<&str> {
        self.labels().get(index).map(String::as_str)
    }
}
