use log::{debug, warn};
use ndarray::linalg::general_mat_vec_mul;
use ndarray::prelude::*;

use super::diagnostics::{marginal_error, SinkhornLog, Termination};
use super::{check_inputs, check_nonzero, check_positive, kernel, WarmStart, M_EPS};
use crate::{OTError, OTSolver};

/// Solves the entropic regularization optimal transport problem using the Sinkhorn-Knopp algorithm
/// and returns the OT matrix
/// source_weights: Weights on samples from the source distribution
/// target_weights: Weights on samples from the target distribution
/// cost: Distance between samples in the source and target distributions
/// reg: Entropy regularization term > 0
/// max_iter: Max number of iterations (default = 1000)
/// threshold: Error convergence threshold (> 0) (default = 1E-9)
/// eval_freq: Iterations between marginal error evaluations (default = 10)
/// print_freq: Iterations between progress messages (default = 200)
/// warm_start: Initial scaling vectors (default = uniform)
///
/// The scaling vectors are never rescaled, so this solver is only safe for moderate
/// regularization. See [`SinkhornStabilized`](super::stabilized::SinkhornStabilized) for small
/// reg.
pub struct SinkhornKnopp<'a> {
    source_weights: &'a Array1<f64>,
    target_weights: &'a Array1<f64>,
    cost: &'a Array2<f64>,
    reg: f64,
    max_iter: usize,
    threshold: f64,
    eval_freq: usize,
    print_freq: usize,
    warm_start: Option<WarmStart>,
}

impl<'a> SinkhornKnopp<'a> {
    pub fn new(
        source_weights: &'a Array1<f64>,
        target_weights: &'a Array1<f64>,
        cost: &'a Array2<f64>,
        reg: f64,
    ) -> Self {
        Self {
            source_weights,
            target_weights,
            cost,
            reg,
            max_iter: 1000,
            threshold: 1E-9,
            eval_freq: 10,
            print_freq: 200,
            warm_start: None,
        }
    }

    pub fn iterations<'b>(&'b mut self, max_iter: usize) -> &'b mut Self {
        self.max_iter = max_iter;
        self
    }

    pub fn threshold<'b>(&'b mut self, threshold: f64) -> &'b mut Self {
        self.threshold = threshold;
        self
    }

    pub fn reg<'b>(&'b mut self, reg: f64) -> &'b mut Self {
        self.reg = reg;
        self
    }

    pub fn eval_freq<'b>(&'b mut self, eval_freq: usize) -> &'b mut Self {
        self.eval_freq = eval_freq;
        self
    }

    pub fn print_freq<'b>(&'b mut self, print_freq: usize) -> &'b mut Self {
        self.print_freq = print_freq;
        self
    }

    pub fn warm_start<'b>(&'b mut self, warm_start: WarmStart) -> &'b mut Self {
        self.warm_start = Some(warm_start);
        self
    }
}

impl<'a> OTSolver for SinkhornKnopp<'a> {
    type Log = SinkhornLog;

    /// Ensures dimensions of the source and target measures (and of the warm start, if any) are
    /// consistent with the cost matrix dimensions
    fn check_shape(&self) -> Result<(), OTError> {
        super::check_shape(self.source_weights, self.target_weights, self.cost)?;

        if let Some(warm_start) = &self.warm_start {
            warm_start.check_shape(self.cost)?;
        }

        Ok(())
    }

    fn solve_with_log(&mut self) -> Result<(Array2<f64>, SinkhornLog), OTError> {
        self.check_shape()?;
        check_inputs(
            self.source_weights,
            self.target_weights,
            self.cost,
            self.reg,
        )?;
        check_nonzero("Iterations", self.max_iter)?;
        check_positive("Stop threshold", self.threshold)?;
        check_nonzero("Evaluation frequency", self.eval_freq)?;
        check_nonzero("Print frequency", self.print_freq)?;

        Ok(sinkhorn_knopp_with_log(
            self.source_weights,
            self.target_weights,
            self.cost,
            self.reg,
            self.max_iter,
            self.threshold,
            self.eval_freq,
            self.print_freq,
            self.warm_start.clone(),
        ))
    }
}

/// Solves the entropic regularization optimal transport problem and returns the OT matrix
/// a: Source sample weights
/// b: Target sample weights
/// M: Loss matrix
/// reg: Entropy regularization term > 0
/// num_iter_max: Max number of iterations (default = 1000)
/// stop_threshold: Stop threshold on error (> 0) (default = 1E-9)
#[allow(non_snake_case)]
pub fn sinkhorn_knopp(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<Array2<f64>, OTError> {
    let mut solver = SinkhornKnopp::new(a, b, M, reg);

    if let Some(max_iter) = num_iter_max {
        solver.iterations(max_iter);
    }

    if let Some(threshold) = stop_threshold {
        solver.threshold(threshold);
    }

    solver.solve()
}

pub(crate) fn all_finite(x: &Array1<f64>) -> bool {
    x.iter().all(|ele| ele.is_finite())
}

/// Inputs are assumed validated
#[allow(non_snake_case, clippy::too_many_arguments)]
fn sinkhorn_knopp_with_log(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
    max_iter: usize,
    stop: f64,
    eval_freq: usize,
    print_freq: usize,
    warm_start: Option<WarmStart>,
) -> (Array2<f64>, SinkhornLog) {
    let (dim_a, dim_b) = M.dim();
    let mut err = f64::INFINITY;
    let mut err_log = Vec::new();
    let mut n_iter = 0;
    let mut status = Termination::MaxIterReached;

    let (mut u, mut v) = match warm_start {
        Some(warm_start) => warm_start.into_scaling(reg),
        None => (
            Array1::<f64>::from_elem(dim_a, 1. / (dim_a as f64)),
            Array1::<f64>::from_elem(dim_b, 1. / (dim_b as f64)),
        ),
    };

    // K = exp(-M/reg)
    let k = kernel::gibbs_kernel(M, reg);

    let mut ktu = Array1::<f64>::zeros(dim_b);
    let mut kv = Array1::<f64>::zeros(dim_a);
    let mut b_hat = Array1::<f64>::zeros(dim_b);
    let mut u_prev = u.clone();
    let mut v_prev = v.clone();

    for it in 1..=max_iter {
        u_prev.assign(&u);
        v_prev.assign(&v);

        // v = b/(K^T u)
        general_mat_vec_mul(1., &k.t(), &u, 0., &mut ktu);
        azip!((v in &mut v, &b in b, &ktu in &ktu) *v = b / (ktu + M_EPS));

        // u = a/(K v)
        general_mat_vec_mul(1., &k, &v, 0., &mut kv);
        azip!((u in &mut u, &a in a, &kv in &kv) *u = a / (kv + M_EPS));

        if !all_finite(&u) || !all_finite(&v) {
            warn!("numerical errors at iteration {}", it);
            u.assign(&u_prev);
            v.assign(&v_prev);
            status = Termination::Diverged { iteration: it };
            break;
        }

        n_iter = it;

        if it % eval_freq == 0 {
            // b_hat = (u^T K) * v
            general_mat_vec_mul(1., &k.t(), &u, 0., &mut ktu);
            azip!((b_hat in &mut b_hat, &ktu in &ktu, &v in &v) *b_hat = ktu * v);
            err = marginal_error(b, &b_hat);
            err_log.push((it, err));
        }

        if it % print_freq == 0 {
            debug!("iteration {:5}, constraint error {:5e}", it, err);
        }

        if err <= stop {
            status = Termination::Converged;
            break;
        }
    }

    let plan = kernel::scale(&u, &k, &v);

    let log = SinkhornLog {
        err: err_log,
        n_iter,
        status,
        alpha: u.mapv(|x| reg * (x + M_EPS).ln()),
        beta: v.mapv(|x| reg * (x + M_EPS).ln()),
        u,
        v,
    };

    (plan, log)
}
