//! Implicit-feedback matrix factorization by alternating least squares.
//!
//! Every observed cell gets confidence `1 + alpha * weight` and target preference 1, every
//! other cell confidence 1 and preference 0. Each half-step solves the regularized normal
//! equations of one side exactly while the other side is held fixed.

use crate::{
    matrix::{InteractionMatrix, RowView},
    recommender::AlsOptions,
};
use ndarray::{Array1, Array2, ArrayView1};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Upper bound of the uniform initial factor values
const INIT_SCALE: f64 = 0.01;
/// Ridge multiplier for a second attempt at a row that would not factor
const RIDGE_BOOST: f64 = 10.0;
/// Smallest ridge used on the second attempt, for when the configured one is zero
const RIDGE_FLOOR: f64 = 1e-6;

/// Trained latent factors. Row r of each matrix belongs to matrix index r
#[derive(Debug, Clone, PartialEq)]
pub struct FactorModel {
    pub user_factors: Array2<f64>,
    pub item_factors: Array2<f64>,
}

impl FactorModel {
    pub fn zeros(users: usize, items: usize, factors: usize) -> FactorModel {
        FactorModel {
            user_factors: Array2::zeros((users, factors)),
            item_factors: Array2::zeros((items, factors)),
        }
    }

    pub fn user(&self, index: usize) -> ArrayView1<'_, f64> {
        self.user_factors.row(index)
    }

    pub fn item(&self, index: usize) -> ArrayView1<'_, f64> {
        self.item_factors.row(index)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainingReport {
    pub iterations: usize,
    /// Row solves that stayed singular after the extra ridge and were zeroed
    pub singular_rows: usize,
    /// Objective value after the last iteration
    pub loss: Option<f64>,
}

enum RowSolution {
    Solved(Array1<f64>),
    /// Nothing observed for the row, its factor stays zero
    Unobserved,
    Singular,
}

pub struct AlsTrainer {
    options: AlsOptions,
}

impl AlsTrainer {
    pub fn new(options: &AlsOptions) -> AlsTrainer {
        AlsTrainer {
            options: options.clone(),
        }
    }

    pub fn train(&self, matrix: &InteractionMatrix) -> (FactorModel, TrainingReport) {
        let k = self.options.factors;

        if matrix.nnz() == 0 {
            info!("No interactions to factorize, returning zero factors");
            return (
                FactorModel::zeros(matrix.rows(), matrix.cols(), k),
                TrainingReport::default(),
            );
        }

        info!(
            "Training ALS on {} users x {} items ({} cells), k = {}, {} iterations",
            matrix.rows(),
            matrix.cols(),
            matrix.nnz(),
            k,
            self.options.iterations
        );

        let transposed = matrix.transpose();
        let mut rng = StdRng::seed_from_u64(self.options.seed);
        let mut user_factors = random_factors(&mut rng, matrix.rows(), k);
        let mut item_factors = random_factors(&mut rng, matrix.cols(), k);
        let mut report = TrainingReport::default();

        for iteration in 0..self.options.iterations {
            let (solved, singular) = self.solve_half(matrix, &item_factors);
            user_factors = solved;
            report.singular_rows += singular;

            let (solved, singular) = self.solve_half(&transposed, &user_factors);
            item_factors = solved;
            report.singular_rows += singular;

            let loss = self.loss(matrix, &user_factors, &item_factors);
            debug!("ALS iteration {}: loss = {:.6}", iteration + 1, loss);
            report.iterations += 1;
            report.loss = Some(loss);
        }

        if report.singular_rows > 0 {
            warn!(
                "{} row solves stayed singular and were set to zero",
                report.singular_rows
            );
        }

        (
            FactorModel {
                user_factors,
                item_factors,
            },
            report,
        )
    }

    /// Solves every row of `observed` against `fixed`. Rows are independent, so they run in
    /// parallel; the collect is the barrier before the other side may use the result.
    fn solve_half(&self, observed: &InteractionMatrix, fixed: &Array2<f64>) -> (Array2<f64>, usize) {
        let gram = fixed.t().dot(fixed);

        let solutions: Vec<RowSolution> = (0..observed.rows())
            .into_par_iter()
            .map(|row| self.solve_row(observed.row(row), fixed, &gram))
            .collect();

        let mut solved = Array2::<f64>::zeros((observed.rows(), fixed.ncols()));
        let mut singular = 0;
        for (row, solution) in solutions.into_iter().enumerate() {
            match solution {
                RowSolution::Solved(factor) => solved.row_mut(row).assign(&factor),
                RowSolution::Unobserved => {}
                RowSolution::Singular => singular += 1,
            }
        }

        (solved, singular)
    }

    /// `(F^T F + sum_obs (c - 1) f f^T + ridge I) x = sum_obs c f`
    fn solve_row(&self, row: RowView<'_>, fixed: &Array2<f64>, gram: &Array2<f64>) -> RowSolution {
        if row.is_empty() {
            return RowSolution::Unobserved;
        }

        let k = fixed.ncols();
        let mut lhs = gram.clone();
        let mut rhs = Array1::<f64>::zeros(k);

        for (col, weight) in row.iter() {
            let factor = fixed.row(col);
            let confidence = 1.0 + self.options.alpha * weight;

            // The Gramian already counts this cell once with confidence 1
            for a in 0..k {
                let scaled = (confidence - 1.0) * factor[a];
                for b in 0..k {
                    lhs[[a, b]] += scaled * factor[b];
                }
            }
            rhs.scaled_add(confidence, &factor);
        }

        let lambda = self.options.regularization;
        for ridge in [lambda, (lambda * RIDGE_BOOST).max(RIDGE_FLOOR)] {
            let mut system = lhs.clone();
            for a in 0..k {
                system[[a, a]] += ridge;
            }
            if let Some(solution) = cholesky_solve(&system, &rhs) {
                return RowSolution::Solved(solution);
            }
        }

        RowSolution::Singular
    }

    /// Full objective: weighted error over every cell plus the ridge penalty
    fn loss(&self, matrix: &InteractionMatrix, users: &Array2<f64>, items: &Array2<f64>) -> f64 {
        let mut observed = 0.0;
        for row in 0..matrix.rows() {
            let user = users.row(row);
            for (col, weight) in matrix.row(row).iter() {
                let prediction = user.dot(&items.row(col));
                let confidence = 1.0 + self.options.alpha * weight;
                // Swap the confidence-1, preference-0 term counted below for the real one
                observed += confidence * (1.0 - prediction).powi(2) - prediction.powi(2);
            }
        }

        // Sum of every squared prediction without forming U V^T
        let every_cell = (&users.t().dot(users) * &items.t().dot(items)).sum();
        let penalty = self.options.regularization
            * (users.iter().map(|v| v * v).sum::<f64>() + items.iter().map(|v| v * v).sum::<f64>());

        observed + every_cell + penalty
    }
}

fn random_factors(rng: &mut StdRng, rows: usize, factors: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, factors), |_| rng.gen::<f64>() * INIT_SCALE)
}

/// Solves `a x = b` for symmetric positive definite `a`. `None` when `a` is not positive
/// definite or the result is not finite.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }

            if i == j {
                let diag = a[[i, i]] - sum;
                if !(diag > 0.0 && diag.is_finite()) {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // L^T x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}
