//! Restart selection
//!
//! Runs the estimator `num_restarts` times, each from its own seeded RNG,
//! and keeps the model with the highest objective. Ties keep the earliest
//! restart, so results are reproducible for a fixed seed sequence. With the
//! `parallel` feature restarts run on rayon but are compared in restart
//! order, which keeps the selection identical to the sequential path.

use rand::rngs::StdRng;
use rand::SeedableRng;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::EstimatorConfig;
use crate::error::{MaceError, Result};
use crate::estimator::{Deadline, EmModel, VariationalEm};
use crate::matrix::ObservationMatrix;

/// Winning model plus restart bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub model: EmModel,
    /// Index of the winning restart
    pub restart: usize,
    /// Restarts discarded for numeric divergence
    pub diverged: Vec<MaceError>,
}

/// Runs independent restarts and keeps the best one
#[derive(Debug, Clone, Copy)]
pub struct RestartSelector {
    config: EstimatorConfig,
    num_restarts: usize,
    seed: u64,
}

impl RestartSelector {
    pub fn new(config: EstimatorConfig, num_restarts: usize, seed: u64) -> Self {
        Self {
            config,
            num_restarts,
            seed,
        }
    }

    /// Seed for restart `restart`
    pub fn restart_seed(&self, restart: usize) -> u64 {
        // splitmix64 step keeps neighbouring restarts decorrelated
        let mut z = self
            .seed
            .wrapping_add((restart as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Fit every restart and select the winner.
    ///
    /// A deadline overrun aborts the whole selection. Diverged restarts are
    /// dropped; if none survive the selection fails with `RunFailure`.
    pub fn select(&self, matrix: &ObservationMatrix, deadline: &Deadline) -> Result<Selection> {
        let outcomes = self.run_restarts(matrix, deadline);

        let mut best: Option<(usize, EmModel)> = None;
        let mut diverged = Vec::new();

        for (restart, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(model) => {
                    let better = match &best {
                        None => true,
                        Some((_, current)) => model.objective > current.objective,
                    };
                    if better {
                        best = Some((restart, model));
                    }
                }
                Err(err @ MaceError::DeadlineExceeded { .. }) => return Err(err),
                Err(err) => diverged.push(err),
            }
        }

        match best {
            Some((restart, model)) => Ok(Selection {
                model,
                restart,
                diverged,
            }),
            None => Err(MaceError::RunFailure(format!(
                "all {} restarts diverged for '{}'",
                self.num_restarts,
                matrix.name()
            ))),
        }
    }

    fn fit_one(
        &self,
        matrix: &ObservationMatrix,
        restart: usize,
        deadline: &Deadline,
    ) -> Result<EmModel> {
        let mut rng = StdRng::seed_from_u64(self.restart_seed(restart));
        VariationalEm::new(matrix, self.config).fit(restart, &mut rng, deadline)
    }

    #[cfg(feature = "parallel")]
    fn run_restarts(
        &self,
        matrix: &ObservationMatrix,
        deadline: &Deadline,
    ) -> Vec<Result<EmModel>> {
        (0..self.num_restarts)
            .into_par_iter()
            .map(|restart| self.fit_one(matrix, restart, deadline))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn run_restarts(
        &self,
        matrix: &ObservationMatrix,
        deadline: &Deadline,
    ) -> Vec<Result<EmModel>> {
        let mut outcomes = Vec::with_capacity(self.num_restarts);
        for restart in 0..self.num_restarts {
            let outcome = self.fit_one(matrix, restart, deadline);
            let timed_out = matches!(outcome, Err(MaceError::DeadlineExceeded { .. }));
            outcomes.push(outcome);
            if timed_out {
                break;
            }
        }
        outcomes
    }
}
