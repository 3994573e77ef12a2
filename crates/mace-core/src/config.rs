//! Engine configuration
//!
//! One `MaceConfig` block per deployment. Every field has a default so a
//! partial JSON block deserializes cleanly.

use serde::{Deserialize, Serialize};

use crate::error::{MaceError, Result};

/// Configuration for consensus computation and recomputation triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaceConfig {
    /// Master switch for automatic and manual runs (default: false)
    pub enabled: bool,
    /// Annotations received before an automatic re-run (default: 10)
    pub trigger_every_n: u64,
    /// Minimum distinct annotators for an item to enter the matrix (default: 3, at least 2)
    pub min_annotations_per_item: usize,
    /// Minimum eligible items before a schema is computed (default: 5)
    pub min_items: usize,
    /// Independent random restarts per sub-problem (default: 10)
    pub num_restarts: usize,
    /// EM iteration cap per restart (default: 50)
    pub num_iters: usize,
    /// Beta(alpha, alpha) prior on spamming (default: 0.5)
    pub alpha: f64,
    /// Dirichlet(beta, ..., beta) prior on guessing distributions (default: 0.5)
    pub beta: f64,
    /// Base of the restart seed sequence (default: 0)
    pub seed: u64,
    /// Relative objective change treated as convergence (default: 1e-6)
    pub tolerance: f64,
    /// Wall-clock ceiling for one schema run in seconds (default: 300)
    pub max_run_seconds: u64,
}

impl Default for MaceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_every_n: 10,
            min_annotations_per_item: 3,
            min_items: 5,
            num_restarts: 10,
            num_iters: 50,
            alpha: 0.5,
            beta: 0.5,
            seed: 0,
            tolerance: 1e-6,
            max_run_seconds: 300,
        }
    }
}

impl MaceConfig {
    /// Check all invariants, returning the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.min_annotations_per_item < 2 {
            return Err(MaceError::Config(format!(
                "min_annotations_per_item must be at least 2, got {}",
                self.min_annotations_per_item
            )));
        }
        if self.min_items == 0 {
            return Err(MaceError::Config("min_items must be at least 1".into()));
        }
        if self.trigger_every_n == 0 {
            return Err(MaceError::Config("trigger_every_n must be at least 1".into()));
        }
        if self.num_restarts == 0 {
            return Err(MaceError::Config("num_restarts must be at least 1".into()));
        }
        if self.num_iters == 0 {
            return Err(MaceError::Config("num_iters must be at least 1".into()));
        }
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(MaceError::Config(format!(
                "alpha must be a positive number, got {}",
                self.alpha
            )));
        }
        if !(self.beta.is_finite() && self.beta > 0.0) {
            return Err(MaceError::Config(format!(
                "beta must be a positive number, got {}",
                self.beta
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(MaceError::Config(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        if self.max_run_seconds == 0 {
            return Err(MaceError::Config("max_run_seconds must be at least 1".into()));
        }
        Ok(())
    }

    /// Prior hyper-parameters shared by every fit in a computation
    pub fn priors(&self) -> Priors {
        Priors {
            alpha: self.alpha,
            beta: self.beta,
        }
    }

    /// Estimator settings derived from this configuration
    pub fn estimator(&self) -> EstimatorConfig {
        EstimatorConfig {
            priors: self.priors(),
            num_iters: self.num_iters,
            tolerance: self.tolerance,
        }
    }
}

/// Bayesian prior hyper-parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Priors {
    /// Symmetric Beta parameter over each annotator's spamming probability
    pub alpha: f64,
    /// Symmetric Dirichlet parameter over each annotator's guessing distribution
    pub beta: f64,
}

impl Default for Priors {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            beta: 0.5,
        }
    }
}

/// Settings for a single variational EM fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    pub priors: Priors,
    pub num_iters: usize,
    pub tolerance: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        MaceConfig::default().estimator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = MaceConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.trigger_every_n, 10);
        assert_eq!(config.min_annotations_per_item, 3);
        assert_eq!(config.min_items, 5);
        assert_eq!(config.num_restarts, 10);
        assert_eq!(config.num_iters, 50);
        assert_eq!(config.alpha, 0.5);
        assert_eq!(config.beta, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: MaceConfig =
            serde_json::from_str(r#"{"enabled": true, "min_items": 2}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.min_items, 2);
        assert_eq!(config.num_restarts, 10);
    }

    #[test]
    fn rejects_single_annotation_threshold() {
        let config = MaceConfig {
            min_annotations_per_item: 1,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_annotations_per_item"));
    }

    #[test]
    fn rejects_non_positive_priors() {
        let config = MaceConfig {
            alpha: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MaceConfig {
            beta: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_restarts_and_iterations() {
        let config = MaceConfig {
            num_restarts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MaceConfig {
            num_iters: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
