use ndarray::prelude::*;

use super::WarmStart;

/// How an iteration loop stopped
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Termination {
    /// The error dropped to the stop threshold
    Converged,
    /// A scaling vector became NaN or infinite at `iteration`; the previous iterate was kept
    Diverged { iteration: usize },
    /// The iteration budget ran out before convergence
    MaxIterReached,
}

/// Convergence trace and final dual variables of a plain or stabilized Sinkhorn solve
#[derive(Debug, Clone)]
pub struct SinkhornLog {
    /// (iteration, squared marginal error) sampled every `eval_freq` iterations
    pub err: Vec<(usize, f64)>,
    /// Number of completed iterations
    pub n_iter: usize,
    pub status: Termination,
    pub u: Array1<f64>,
    pub v: Array1<f64>,
    /// Source dual potential, reg * ln(u) plus any absorbed potential
    pub alpha: Array1<f64>,
    /// Target dual potential, reg * ln(v) plus any absorbed potential
    pub beta: Array1<f64>,
}

impl SinkhornLog {
    pub fn last_err(&self) -> Option<f64> {
        self.err.last().map(|&(_, err)| err)
    }

    /// Log-domain potentials for resuming from this solve
    pub fn warm_start(&self) -> WarmStart {
        WarmStart::LogDomain {
            alpha: self.alpha.clone(),
            beta: self.beta.clone(),
        }
    }
}

/// Annealing trace of an epsilon scaling solve
#[derive(Debug, Clone)]
pub struct EpsilonScalingLog {
    /// (outer iteration, duality gap at the target regularization)
    pub err: Vec<(usize, f64)>,
    /// Regularization used by each inner solve
    pub regs: Vec<f64>,
    /// Number of inner solves completed without diverging
    pub n_iter: usize,
    pub status: Termination,
    pub alpha: Array1<f64>,
    pub beta: Array1<f64>,
}

impl EpsilonScalingLog {
    pub fn last_err(&self) -> Option<f64> {
        self.err.last().map(|&(_, err)| err)
    }

    pub fn warm_start(&self) -> WarmStart {
        WarmStart::LogDomain {
            alpha: self.alpha.clone(),
            beta: self.beta.clone(),
        }
    }
}

/// Squared L2 violation of the target marginal, sum((b - b_hat)^2)
pub fn marginal_error(b: &Array1<f64>, b_hat: &Array1<f64>) -> f64 {
    let mut err = 0.;
    azip!((&b in b, &b_hat in b_hat) err += (b - b_hat).powi(2));
    err
}

/// Primal minus dual objective of the entropic problem at regularization `reg`
///
/// primal = <M, P> + reg * sum(P ln P) - reg * sum(P)
/// dual = <alpha, a> + <beta, b> - reg * sum(P)
///
/// Zero entries of P contribute nothing to sum(P ln P).
#[allow(non_snake_case)]
pub fn duality_gap(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    plan: &Array2<f64>,
    alpha: &Array1<f64>,
    beta: &Array1<f64>,
    reg: f64,
) -> f64 {
    let mass = plan.sum();

    let mut transport_cost = 0.;
    let mut neg_entropy = 0.;
    azip!((&p in plan, &m in M) {
        transport_cost += m * p;
        if p > 0. {
            neg_entropy += p * p.ln();
        }
    });

    let primal = transport_cost + reg * neg_entropy - reg * mass;
    let dual = alpha.dot(a) + beta.dot(b) - reg * mass;

    primal - dual
}
