use log::{debug, trace, warn};
use ndarray::linalg::general_mat_vec_mul;
use ndarray::prelude::*;

use super::diagnostics::{marginal_error, SinkhornLog, Termination};
use super::sinkhorn::all_finite;
use super::{check_inputs, check_nonzero, check_positive, kernel, WarmStart, M_EPS};
use crate::{OTError, OTSolver};

/// Solves the entropic regularization optimal transport problem with the log-stabilized Sinkhorn
/// algorithm and returns the OT matrix
///
/// Whenever the L1 norm of a scaling vector exceeds `tau`, the scaling vectors are absorbed into
/// the log-domain potentials (alpha, beta) and the kernel is rebuilt from them. This keeps u and v
/// bounded and allows much smaller regularization than [`SinkhornKnopp`](super::sinkhorn::SinkhornKnopp).
///
/// source_weights: Weights on samples from the source distribution
/// target_weights: Weights on samples from the target distribution
/// cost: Distance between samples in the source and target distributions
/// reg: Entropy regularization term > 0
/// max_iter: Max number of iterations (default = 1000)
/// tau: Absorption threshold on the scaling vectors (default = 1E3)
/// threshold: Error convergence threshold (> 0) (default = 1E-9)
/// eval_freq: Iterations between marginal error evaluations (default = 10)
/// print_freq: Iterations between progress messages (default = 200)
/// warm_start: Initial potentials (default = zero). The scaling vectors always restart uniform.
pub struct SinkhornStabilized<'a> {
    source_weights: &'a Array1<f64>,
    target_weights: &'a Array1<f64>,
    cost: &'a Array2<f64>,
    reg: f64,
    max_iter: usize,
    tau: f64,
    threshold: f64,
    eval_freq: usize,
    print_freq: usize,
    warm_start: Option<WarmStart>,
}

impl<'a> SinkhornStabilized<'a> {
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
            tau: 1E3,
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

    pub fn tau<'b>(&'b mut self, tau: f64) -> &'b mut Self {
        self.tau = tau;
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

impl<'a> OTSolver for SinkhornStabilized<'a> {
    type Log = SinkhornLog;

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
        check_positive("Absorption threshold tau", self.tau)?;
        check_positive("Stop threshold", self.threshold)?;
        check_nonzero("Evaluation frequency", self.eval_freq)?;
        check_nonzero("Print frequency", self.print_freq)?;

        Ok(sinkhorn_stabilized_with_log(
            self.source_weights,
            self.target_weights,
            self.cost,
            self.reg,
            self.max_iter,
            self.tau,
            self.threshold,
            self.eval_freq,
            self.print_freq,
            self.warm_start.clone(),
        ))
    }
}

/// Solves the entropic regularization optimal transport problem with the log-stabilized Sinkhorn
/// algorithm and returns the OT matrix
/// a: Source sample weights
/// b: Target sample weights
/// M: Loss matrix
/// reg: Entropy regularization term > 0
/// num_iter_max: Max number of iterations (default = 1000)
/// stop_threshold: Stop threshold on error (> 0) (default = 1E-9)
#[allow(non_snake_case)]
pub fn sinkhorn_stabilized(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<Array2<f64>, OTError> {
    let mut solver = SinkhornStabilized::new(a, b, M, reg);

    if let Some(max_iter) = num_iter_max {
        solver.iterations(max_iter);
    }

    if let Some(threshold) = stop_threshold {
        solver.threshold(threshold);
    }

    solver.solve()
}

/// Scaling vectors (u, v) on top of log-domain potentials (alpha, beta), with the kernel kept
/// consistent with the potentials
struct StabilizedState {
    alpha: Array1<f64>,
    beta: Array1<f64>,
    u: Array1<f64>,
    v: Array1<f64>,
    k: Array2<f64>,
    /// u and v were reset by an absorption and carry no information about the plan
    absorbed: bool,
    // scratch
    u_prev: Array1<f64>,
    v_prev: Array1<f64>,
    log_u: Array1<f64>,
    log_v: Array1<f64>,
}

impl StabilizedState {
    #[allow(non_snake_case)]
    fn new(alpha: Array1<f64>, beta: Array1<f64>, M: &Array2<f64>, reg: f64) -> Self {
        let (dim_a, dim_b) = M.dim();
        let k = kernel::log_domain_kernel(&alpha, &beta, M, reg);
        let u = Array1::<f64>::from_elem(dim_a, 1. / (dim_a as f64));
        let v = Array1::<f64>::from_elem(dim_b, 1. / (dim_b as f64));

        Self {
            alpha,
            beta,
            u_prev: u.clone(),
            v_prev: v.clone(),
            u,
            v,
            k,
            absorbed: false,
            log_u: Array1::<f64>::zeros(dim_a),
            log_v: Array1::<f64>::zeros(dim_b),
        }
    }

    fn save(&mut self) {
        self.u_prev.assign(&self.u);
        self.v_prev.assign(&self.v);
    }

    fn rollback(&mut self) {
        self.u.assign(&self.u_prev);
        self.v.assign(&self.v_prev);
    }

    /// alpha += reg * ln(u), beta += reg * ln(v), u and v back to uniform, K rebuilt
    #[allow(non_snake_case)]
    fn absorb(&mut self, M: &Array2<f64>, reg: f64) {
        let (dim_a, dim_b) = M.dim();

        azip!((alpha in &mut self.alpha, &u in &self.u) *alpha += reg * (u + M_EPS).ln());
        azip!((beta in &mut self.beta, &v in &self.v) *beta += reg * (v + M_EPS).ln());

        self.u.fill(1. / (dim_a as f64));
        self.v.fill(1. / (dim_b as f64));

        kernel::update_kernel(&mut self.k, &self.alpha, &self.beta, M, reg);
        self.absorbed = true;
    }

    /// Fills log_u, log_v with ln(u), ln(v), or zeros when u and v were just reset
    fn update_log_scaling(&mut self) {
        if self.absorbed {
            self.log_u.fill(0.);
            self.log_v.fill(0.);
            return;
        }

        azip!((log_u in &mut self.log_u, &u in &self.u) *log_u = (u + M_EPS).ln());
        azip!((log_v in &mut self.log_v, &v in &self.v) *log_v = (v + M_EPS).ln());
    }

    /// Overwrites `p` with the plan of the current state, computed from the potentials
    #[allow(non_snake_case)]
    fn plan_into(&mut self, p: &mut Array2<f64>, M: &Array2<f64>, reg: f64) {
        if self.absorbed {
            kernel::update_kernel(p, &self.alpha, &self.beta, M, reg);
            return;
        }

        self.update_log_scaling();
        kernel::update_plan(p, &self.alpha, &self.beta, &self.log_u, &self.log_v, M, reg);
    }

    /// Potentials with the scaling vectors folded in
    fn into_potentials(
        mut self,
        reg: f64,
    ) -> (Array1<f64>, Array1<f64>, Array1<f64>, Array1<f64>) {
        self.update_log_scaling();
        azip!((alpha in &mut self.alpha, &log_u in &self.log_u) *alpha += reg * log_u);
        azip!((beta in &mut self.beta, &log_v in &self.log_v) *beta += reg * log_v);

        (self.alpha, self.beta, self.u, self.v)
    }
}

/// Inputs are assumed validated
#[allow(non_snake_case, clippy::too_many_arguments)]
pub(crate) fn sinkhorn_stabilized_with_log(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
    max_iter: usize,
    tau: f64,
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

    let (alpha, beta) = match warm_start {
        Some(warm_start) => warm_start.into_log_domain(reg),
        None => (Array1::<f64>::zeros(dim_a), Array1::<f64>::zeros(dim_b)),
    };

    let mut state = StabilizedState::new(alpha, beta, M, reg);

    let mut ktu = Array1::<f64>::zeros(dim_b);
    let mut kv = Array1::<f64>::zeros(dim_a);
    let mut plan = Array2::<f64>::zeros((dim_a, dim_b));

    for it in 1..=max_iter {
        state.save();

        // v = b/(K^T u)
        general_mat_vec_mul(1., &state.k.t(), &state.u, 0., &mut ktu);
        azip!((v in &mut state.v, &b in b, &ktu in &ktu) *v = b / (ktu + M_EPS));

        // u = a/(K v)
        general_mat_vec_mul(1., &state.k, &state.v, 0., &mut kv);
        azip!((u in &mut state.u, &a in a, &kv in &kv) *u = a / (kv + M_EPS));

        if !all_finite(&state.u) || !all_finite(&state.v) {
            warn!("numerical errors at iteration {}", it);
            state.rollback();
            status = Termination::Diverged { iteration: it };
            break;
        }

        n_iter = it;
        state.absorbed = false;

        // u, v are non-negative: the sum is the L1 norm
        if state.u.sum() > tau || state.v.sum() > tau {
            trace!("absorbing scaling vectors at iteration {}", it);
            state.absorb(M, reg);
        }

        if it % eval_freq == 0 {
            state.plan_into(&mut plan, M, reg);
            err = marginal_error(b, &plan.sum_axis(Axis(0)));
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

    // recomputed from the potentials, never from the cached kernel
    state.plan_into(&mut plan, M, reg);

    let (alpha, beta, u, v) = state.into_potentials(reg);

    let log = SinkhornLog {
        err: err_log,
        n_iter,
        status,
        u,
        v,
        alpha,
        beta,
    };

    (plan, log)
}
