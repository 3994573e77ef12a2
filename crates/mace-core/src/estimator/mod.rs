//! Variational EM estimator for the MACE competence model
//!
//! Generative story per annotator `a` and item `j`: with probability
//! `1 - s_a` the annotator knows and reports the true label; with
//! probability `s_a` (spamming) it guesses a label from its own
//! distribution `xi_a`. `s_a` carries a Beta(alpha, alpha) prior, `xi_a` a
//! symmetric Dirichlet(beta) prior, and true labels a uniform prior.
//!
//! The M-step replaces point estimates with variational weights
//! (`exp(digamma(c + prior) - digamma(total))`), and every E-step product
//! is accumulated in log space so long rows of annotations cannot underflow.

mod math;

pub use math::{argmax, entropy};

use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::EstimatorConfig;
use crate::error::{MaceError, Result};
use crate::matrix::ObservationMatrix;
use math::{log_add, log_sum_exp, variational_log_weights};

/// Wall-clock ceiling shared by every restart of a run
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    /// A deadline that never expires
    pub fn none() -> Self {
        Self {
            start: Instant::now(),
            limit: None,
        }
    }

    /// A deadline `limit` from now
    pub fn after(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit: Some(limit),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Fail with `DeadlineExceeded` once the limit has passed.
    pub fn check(&self) -> Result<()> {
        match self.limit {
            Some(limit) if self.start.elapsed() >= limit => Err(MaceError::DeadlineExceeded {
                elapsed_ms: self.start.elapsed().as_millis() as u64,
                limit_ms: limit.as_millis() as u64,
            }),
            _ => Ok(()),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

/// A fitted competence model from one restart
#[derive(Debug, Clone, PartialEq)]
pub struct EmModel {
    /// Per annotator: probability of guessing rather than knowing
    pub spamming: Vec<f64>,
    /// Per annotator: guessing distribution over labels (sums to 1)
    pub guess_distribution: Vec<Vec<f64>>,
    /// Per item: posterior over the true label (sums to 1)
    pub label_posteriors: Vec<Vec<f64>>,
    /// Per annotator: mean posterior probability that one of its
    /// observations was a guess; `None` when it has no observations
    pub expected_spamming: Vec<Option<f64>>,
    /// Log marginal likelihood of the data under the final parameters
    pub objective: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl EmModel {
    /// 1 - mean expected spamming, per annotator
    pub fn competence(&self) -> Vec<Option<f64>> {
        self.expected_spamming
            .iter()
            .map(|s| s.map(|s| (1.0 - s).clamp(0.0, 1.0)))
            .collect()
    }
}

/// Variational parameters, all in log space
#[derive(Debug, Clone)]
struct Params {
    log_know: Vec<f64>,
    log_spam: Vec<f64>,
    log_xi: Vec<Vec<f64>>,
    active: Vec<bool>,
}

/// Expected sufficient statistics gathered by an E-step
#[derive(Debug, Clone)]
struct Counts {
    know: Vec<f64>,
    spam: Vec<f64>,
    xi: Vec<Vec<f64>>,
    observations: Vec<usize>,
}

impl Counts {
    fn zeros(num_annotators: usize, num_labels: usize) -> Self {
        Self {
            know: vec![0.0; num_annotators],
            spam: vec![0.0; num_annotators],
            xi: vec![vec![0.0; num_labels]; num_annotators],
            observations: vec![0; num_annotators],
        }
    }

    fn add(&mut self, annotator: usize, label: usize, p_know: f64) {
        let p_spam = 1.0 - p_know;
        self.know[annotator] += p_know;
        self.spam[annotator] += p_spam;
        self.xi[annotator][label] += p_spam;
        self.observations[annotator] += 1;
    }
}

/// Output of one E-step
struct Expectation {
    posteriors: Vec<Vec<f64>>,
    counts: Counts,
    objective: f64,
}

/// Fits one competence model to one observation matrix
pub struct VariationalEm<'a> {
    matrix: &'a ObservationMatrix,
    config: EstimatorConfig,
}

impl<'a> VariationalEm<'a> {
    pub fn new(matrix: &'a ObservationMatrix, config: EstimatorConfig) -> Self {
        Self { matrix, config }
    }

    /// Run one restart from a random initialization drawn from `rng`.
    ///
    /// `restart` only labels divergence errors.
    pub fn fit<R: Rng>(
        &self,
        restart: usize,
        rng: &mut R,
        deadline: &Deadline,
    ) -> Result<EmModel> {
        let num_labels = self.matrix.num_labels();
        if self.matrix.num_items() == 0 || num_labels == 0 {
            return Err(MaceError::NumericDivergence {
                restart,
                reason: "empty observation matrix".into(),
            });
        }

        let initial = self.random_posteriors(rng);
        let mut params = self.initial_params();
        self.m_step(&mut params, &self.initial_counts(&initial));

        let mut previous = f64::NEG_INFINITY;
        let mut iterations = 0;
        let mut converged = false;

        for iter in 0..self.config.num_iters {
            deadline.check()?;
            iterations = iter + 1;

            let expectation = self.e_step(&params);
            if !expectation.objective.is_finite() {
                return Err(MaceError::NumericDivergence {
                    restart,
                    reason: format!(
                        "objective became {} at iteration {}",
                        expectation.objective, iterations
                    ),
                });
            }

            self.m_step(&mut params, &expectation.counts);
            check_params(&params, restart)?;

            let delta = expectation.objective - previous;
            if previous.is_finite()
                && delta.abs() <= self.config.tolerance * previous.abs().max(1.0)
            {
                converged = true;
                break;
            }
            previous = expectation.objective;
        }

        let last = self.e_step(&params);
        if !last.objective.is_finite() {
            return Err(MaceError::NumericDivergence {
                restart,
                reason: format!("final objective is {}", last.objective),
            });
        }

        Ok(self.finish(&params, last, iterations, converged))
    }

    /// Random true-label responsibilities, one normalized row per item
    fn random_posteriors<R: Rng>(&self, rng: &mut R) -> Vec<Vec<f64>> {
        let num_labels = self.matrix.num_labels();
        (0..self.matrix.num_items())
            .map(|_| {
                let mut row: Vec<f64> =
                    (0..num_labels).map(|_| rng.gen::<f64>() + 1e-3).collect();
                let total: f64 = row.iter().sum();
                row.iter_mut().for_each(|p| *p /= total);
                row
            })
            .collect()
    }

    fn initial_params(&self) -> Params {
        let num_annotators = self.matrix.num_annotators();
        let num_labels = self.matrix.num_labels();
        Params {
            log_know: vec![0.5f64.ln(); num_annotators],
            log_spam: vec![0.5f64.ln(); num_annotators],
            log_xi: vec![vec![-(num_labels as f64).ln(); num_labels]; num_annotators],
            active: vec![false; num_annotators],
        }
    }

    /// Counts implied by random responsibilities: agreement with the
    /// sampled truth is credited to knowing, everything else to guessing.
    fn initial_counts(&self, posteriors: &[Vec<f64>]) -> Counts {
        let mut counts = Counts::zeros(self.matrix.num_annotators(), self.matrix.num_labels());
        for (item, posterior) in posteriors.iter().enumerate() {
            for &(annotator, label) in self.matrix.row(item) {
                counts.add(annotator, label, posterior[label]);
            }
        }
        counts
    }

    fn e_step(&self, params: &Params) -> Expectation {
        let num_labels = self.matrix.num_labels();
        let log_prior = -(num_labels as f64).ln();
        let mut counts = Counts::zeros(self.matrix.num_annotators(), num_labels);
        let mut posteriors = Vec::with_capacity(self.matrix.num_items());
        let mut objective = 0.0;

        for item in 0..self.matrix.num_items() {
            let row = self.matrix.row(item);
            let mut scores = vec![log_prior; num_labels];

            for &(annotator, label) in row {
                if !params.active[annotator] {
                    continue;
                }
                let log_guess = params.log_spam[annotator] + params.log_xi[annotator][label];
                let log_match = log_add(params.log_know[annotator], log_guess);
                for (truth, score) in scores.iter_mut().enumerate() {
                    *score += if truth == label { log_match } else { log_guess };
                }
            }

            let log_marginal = log_sum_exp(&scores);
            objective += log_marginal;
            let posterior: Vec<f64> = scores.iter().map(|s| (s - log_marginal).exp()).collect();

            for &(annotator, label) in row {
                if !params.active[annotator] {
                    continue;
                }
                let log_guess = params.log_spam[annotator] + params.log_xi[annotator][label];
                let log_match = log_add(params.log_know[annotator], log_guess);
                let know_share = (params.log_know[annotator] - log_match).exp();
                counts.add(annotator, label, posterior[label] * know_share);
            }

            posteriors.push(posterior);
        }

        Expectation {
            posteriors,
            counts,
            objective,
        }
    }

    /// Smoothed variational update; annotators without expected
    /// participation keep their previous weights and are marked inactive.
    fn m_step(&self, params: &mut Params, counts: &Counts) {
        let priors = self.config.priors;
        for annotator in 0..self.matrix.num_annotators() {
            let participation = counts.know[annotator] + counts.spam[annotator];
            if participation <= 0.0 || counts.observations[annotator] == 0 {
                params.active[annotator] = false;
                continue;
            }
            params.active[annotator] = true;

            let split = variational_log_weights(
                &[counts.know[annotator], counts.spam[annotator]],
                priors.alpha,
            );
            params.log_know[annotator] = split[0];
            params.log_spam[annotator] = split[1];
            params.log_xi[annotator] = variational_log_weights(&counts.xi[annotator], priors.beta);
        }
    }

    fn finish(
        &self,
        params: &Params,
        last: Expectation,
        iterations: usize,
        converged: bool,
    ) -> EmModel {
        let num_annotators = self.matrix.num_annotators();
        let mut spamming = Vec::with_capacity(num_annotators);
        let mut guess_distribution = Vec::with_capacity(num_annotators);
        let mut expected_spamming = Vec::with_capacity(num_annotators);

        for annotator in 0..num_annotators {
            let log_total = log_add(params.log_know[annotator], params.log_spam[annotator]);
            spamming.push((params.log_spam[annotator] - log_total).exp());

            let log_norm = log_sum_exp(&params.log_xi[annotator]);
            guess_distribution.push(
                params.log_xi[annotator]
                    .iter()
                    .map(|w| (w - log_norm).exp())
                    .collect(),
            );

            let observed = last.counts.observations[annotator];
            expected_spamming.push(
                (observed > 0).then(|| last.counts.spam[annotator] / observed as f64),
            );
        }

        EmModel {
            spamming,
            guess_distribution,
            label_posteriors: last.posteriors,
            expected_spamming,
            objective: last.objective,
            iterations,
            converged,
        }
    }
}

fn check_params(params: &Params, restart: usize) -> Result<()> {
    if !params.active.iter().any(|&a| a) {
        return Err(MaceError::NumericDivergence {
            restart,
            reason: "no annotator has expected participation".into(),
        });
    }
    let finite = params.log_know.iter().all(|v| v.is_finite())
        && params.log_spam.iter().all(|v| v.is_finite())
        && params.log_xi.iter().flatten().all(|v| v.is_finite());
    if !finite {
        return Err(MaceError::NumericDivergence {
            restart,
            reason: "non-finite annotator parameters".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fit(matrix: &ObservationMatrix, seed: u64) -> EmModel {
        let mut rng = StdRng::seed_from_u64(seed);
        VariationalEm::new(matrix, EstimatorConfig::default())
            .fit(0, &mut rng, &Deadline::none())
            .unwrap()
    }

    fn unanimous_matrix() -> ObservationMatrix {
        let labels = [0, 1, 2, 1, 0];
        let entries = labels.iter().enumerate().flat_map(|(item, &label)| {
            ["u1", "u2", "u3"]
                .into_iter()
                .map(move |annotator| (format!("i{}", item), annotator, label))
        });
        ObservationMatrix::from_entries("sentiment", 3, entries)
    }

    #[test]
    fn unanimous_items_get_confident_posteriors() {
        let model = fit(&unanimous_matrix(), 7);
        let expected = [0, 1, 2, 1, 0];
        for (posterior, &label) in model.label_posteriors.iter().zip(expected.iter()) {
            assert_eq!(argmax(posterior), label);
            assert!(entropy(posterior) < 1e-3, "posterior {:?}", posterior);
            let total: f64 = posterior.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
        for competence in model.competence() {
            assert!(competence.unwrap() > 0.95);
        }
    }

    #[test]
    fn guess_distributions_are_normalized() {
        let model = fit(&unanimous_matrix(), 3);
        for xi in &model.guess_distribution {
            assert!((xi.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        for s in &model.spamming {
            assert!((0.0..=1.0).contains(s));
        }
    }

    #[test]
    fn contrarian_annotator_is_a_spammer() {
        let mut entries = Vec::new();
        for item in 0..10 {
            let label = item % 2;
            let id = format!("i{}", item);
            entries.push((id.clone(), "a", label));
            entries.push((id.clone(), "b", label));
            entries.push((id, "c", 1 - label));
        }
        let matrix = ObservationMatrix::from_entries("binary", 2, entries);
        let model = fit(&matrix, 11);
        let competence: Vec<f64> = model.competence().into_iter().map(Option::unwrap).collect();
        assert!(competence[2] < competence[0]);
        assert!(competence[2] < competence[1]);
    }

    #[test]
    fn same_seed_same_model() {
        let matrix = unanimous_matrix();
        assert_eq!(fit(&matrix, 42), fit(&matrix, 42));
    }

    #[test]
    fn expired_deadline_aborts() {
        let matrix = unanimous_matrix();
        let mut rng = StdRng::seed_from_u64(1);
        let err = VariationalEm::new(&matrix, EstimatorConfig::default())
            .fit(0, &mut rng, &Deadline::after(Duration::ZERO))
            .unwrap_err();
        assert!(matches!(err, MaceError::DeadlineExceeded { .. }));
    }

    #[test]
    fn empty_matrix_diverges() {
        let matrix =
            ObservationMatrix::from_entries("empty", 2, Vec::<(String, String, usize)>::new());
        let mut rng = StdRng::seed_from_u64(1);
        let err = VariationalEm::new(&matrix, EstimatorConfig::default())
            .fit(4, &mut rng, &Deadline::none())
            .unwrap_err();
        assert!(matches!(err, MaceError::NumericDivergence { restart: 4, .. }));
    }

    #[test]
    fn long_rows_do_not_underflow() {
        // 400 annotators on each item would underflow a direct product
        let entries = (0..5).flat_map(|item| {
            (0..400).map(move |annotator| {
                (format!("i{}", item), format!("u{}", annotator), item % 2)
            })
        });
        let matrix = ObservationMatrix::from_entries("wide", 2, entries);
        let model = fit(&matrix, 5);
        assert!(model.objective.is_finite());
        assert_eq!(argmax(&model.label_posteriors[1]), 1);
    }
}
