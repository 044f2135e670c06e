use anyhow::anyhow;
use log::{info, warn};
use ndarray::prelude::*;
use ndarray_stats::QuantileExt;

use super::diagnostics::{duality_gap, EpsilonScalingLog, SinkhornLog, Termination};
use super::stabilized::sinkhorn_stabilized_with_log;
use super::{check_inputs, check_nonzero, check_positive, WarmStart, M_EPS};
use crate::{OTError, OTSolver};

/// Solves the entropic regularization optimal transport problem by epsilon scaling and returns the
/// OT matrix
///
/// The regularization is annealed from `scaling_coef` down to `reg`. Each step runs the
/// log-stabilized solver warm-started from the potentials of the previous step, and the outer loop
/// stops once the duality gap at the target regularization drops to `threshold`.
///
/// ```rust
/// use rust_sinkhorn::prelude::*;
/// use ndarray::prelude::*;
///
/// let a = array![0.5, 0.5];
/// let b = array![0.5, 0.5];
/// let cost = array![[0.0, 1.0], [1.0, 0.0]];
///
/// let (plan, log) = match SinkhornEpsilonScaling::new(&a, &b, &cost, 1E-3).solve_with_log() {
///     Ok(result) => result,
///     Err(error) => panic!("{:?}", error),
/// };
///
/// assert!((plan[[0, 0]] - 0.5).abs() < 1E-3);
/// assert!(log.regs[0] > *log.regs.last().unwrap());
/// ```
///
/// source_weights: Weights on samples from the source distribution
/// target_weights: Weights on samples from the target distribution
/// cost: Distance between samples in the source and target distributions
/// reg: Target entropy regularization term > 0
/// max_iter: Max number of annealing steps (default = 100)
/// max_inner_iter: Max number of iterations of each stabilized solve (default = 100)
/// tau: Absorption threshold of the stabilized solves (default = 1E3)
/// scaling_base: Decay of the distance to the target reg per step, in (0, 1) (default = 0.75)
/// scaling_coef: Initial regularization (default = max(cost) + reg)
/// threshold: Duality gap convergence threshold (> 0) (default = 1E-9)
/// eval_freq: Iterations between marginal error evaluations in the inner solves (default = 10)
/// print_freq: Steps between progress messages (default = 200)
/// warm_start: Initial potentials of the first inner solve (default = zero)
pub struct SinkhornEpsilonScaling<'a> {
    source_weights: &'a Array1<f64>,
    target_weights: &'a Array1<f64>,
    cost: &'a Array2<f64>,
    reg: f64,
    max_iter: usize,
    max_inner_iter: usize,
    tau: f64,
    scaling_base: f64,
    scaling_coef: Option<f64>,
    threshold: f64,
    eval_freq: usize,
    print_freq: usize,
    warm_start: Option<WarmStart>,
}

impl<'a> SinkhornEpsilonScaling<'a> {
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
            max_iter: 100,
            max_inner_iter: 100,
            tau: 1E3,
            scaling_base: 0.75,
            scaling_coef: None,
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

    pub fn inner_iterations<'b>(&'b mut self, max_inner_iter: usize) -> &'b mut Self {
        self.max_inner_iter = max_inner_iter;
        self
    }

    pub fn tau<'b>(&'b mut self, tau: f64) -> &'b mut Self {
        self.tau = tau;
        self
    }

    pub fn scaling_base<'b>(&'b mut self, scaling_base: f64) -> &'b mut Self {
        self.scaling_base = scaling_base;
        self
    }

    pub fn scaling_coef<'b>(&'b mut self, scaling_coef: f64) -> &'b mut Self {
        self.scaling_coef = Some(scaling_coef);
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

impl<'a> OTSolver for SinkhornEpsilonScaling<'a> {
    type Log = EpsilonScalingLog;

    fn check_shape(&self) -> Result<(), OTError> {
        super::check_shape(self.source_weights, self.target_weights, self.cost)?;

        if let Some(warm_start) = &self.warm_start {
            warm_start.check_shape(self.cost)?;
        }

        Ok(())
    }

    fn solve_with_log(&mut self) -> Result<(Array2<f64>, EpsilonScalingLog), OTError> {
        self.check_shape()?;
        check_inputs(
            self.source_weights,
            self.target_weights,
            self.cost,
            self.reg,
        )?;
        check_nonzero("Iterations", self.max_iter)?;
        check_nonzero("Inner iterations", self.max_inner_iter)?;
        check_positive("Absorption threshold tau", self.tau)?;
        check_positive("Stop threshold", self.threshold)?;
        check_nonzero("Evaluation frequency", self.eval_freq)?;
        check_nonzero("Print frequency", self.print_freq)?;

        if !(self.scaling_base > 0. && self.scaling_base < 1.) {
            return Err(OTError::ArgError(
                "Scaling base must lie in (0, 1)".to_string(),
            ));
        }

        let scaling_coef = match self.scaling_coef {
            Some(coef) => coef,
            None => {
                let max_cost = self
                    .cost
                    .max()
                    .map_err(|err| anyhow!("cost matrix has no maximum: {}", err))?;
                max_cost + self.reg
            }
        };
        check_positive("Scaling coefficient", scaling_coef)?;

        let schedule = Schedule {
            reg: self.reg,
            scaling_base: self.scaling_base,
            scaling_coef,
        };

        Ok(sinkhorn_epsilon_scaling_with_log(self, &schedule))
    }
}

/// Solves the entropic regularization optimal transport problem by epsilon scaling and returns the
/// OT matrix
/// a: Source sample weights
/// b: Target sample weights
/// M: Loss matrix
/// reg: Target entropy regularization term > 0
/// num_iter_max: Max number of annealing steps (default = 100)
/// stop_threshold: Stop threshold on the duality gap (> 0) (default = 1E-9)
#[allow(non_snake_case)]
pub fn sinkhorn_epsilon_scaling(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<Array2<f64>, OTError> {
    let mut solver = SinkhornEpsilonScaling::new(a, b, M, reg);

    if let Some(max_iter) = num_iter_max {
        solver.iterations(max_iter);
    }

    if let Some(threshold) = stop_threshold {
        solver.threshold(threshold);
    }

    solver.solve()
}

/// Annealing schedule of the regularization
#[derive(Debug, Clone, Copy)]
struct Schedule {
    reg: f64,
    scaling_base: f64,
    scaling_coef: f64,
}

impl Schedule {
    /// Regularization of step `it` (1-based) given the regularization of the previous step
    fn next(&self, it: usize, prev_reg: f64) -> f64 {
        if it == 1 {
            return self.scaling_coef;
        }

        let delta = (prev_reg - self.reg) * self.scaling_base;
        if delta < M_EPS {
            self.reg
        } else {
            self.reg + delta
        }
    }
}

fn diverged(log: &SinkhornLog) -> bool {
    matches!(log.status, Termination::Diverged { .. })
}

/// Inputs are assumed validated, in particular `solver.max_iter >= 1`
///
/// A diverged inner solve stops the annealing and the last finite step is returned. When the first
/// step diverges its rolled back state is returned as is.
#[allow(non_snake_case)]
fn sinkhorn_epsilon_scaling_with_log(
    solver: &SinkhornEpsilonScaling,
    schedule: &Schedule,
) -> (Array2<f64>, EpsilonScalingLog) {
    let (a, b, M) = (solver.source_weights, solver.target_weights, solver.cost);
    let inner_solve = |reg: f64, warm_start: Option<WarmStart>| {
        sinkhorn_stabilized_with_log(
            a,
            b,
            M,
            reg,
            solver.max_inner_iter,
            solver.tau,
            solver.threshold,
            solver.eval_freq,
            solver.print_freq,
            warm_start,
        )
    };

    let mut err_log = Vec::new();
    let mut regs = Vec::new();
    let mut status = Termination::MaxIterReached;

    let mut it = 1;
    let mut running_reg = schedule.next(it, schedule.scaling_coef);
    let (mut plan, mut inner_log) = inner_solve(running_reg, solver.warm_start.clone());

    loop {
        if diverged(&inner_log) {
            warn!("inner solve diverged at epsilon scaling step {}", it);
            status = Termination::Diverged { iteration: it };
            break;
        }

        regs.push(running_reg);

        let err = duality_gap(a, b, M, &plan, &inner_log.alpha, &inner_log.beta, schedule.reg);
        err_log.push((it, err));

        info!(
            "epsilon scaling step {:4}, reg {:5e}, inner iterations {:5}, duality gap {:5e}",
            it, running_reg, inner_log.n_iter, err
        );

        if err <= solver.threshold {
            status = Termination::Converged;
            break;
        }

        if it == solver.max_iter {
            break;
        }

        it += 1;
        running_reg = schedule.next(it, running_reg);

        let (next_plan, next_log) = inner_solve(running_reg, Some(inner_log.warm_start()));
        if diverged(&next_log) {
            warn!("inner solve diverged at epsilon scaling step {}", it);
            status = Termination::Diverged { iteration: it };
            break;
        }

        plan = next_plan;
        inner_log = next_log;
    }

    let log = EpsilonScalingLog {
        n_iter: err_log.len(),
        err: err_log,
        regs,
        status,
        alpha: inner_log.alpha,
        beta: inner_log.beta,
    };

    (plan, log)
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;

    use super::Schedule;
    use crate::regularized::diagnostics::Termination;
    use crate::regularized::stabilized::SinkhornStabilized;
    use crate::regularized::WarmStart;
    use crate::{OTError, OTSolver};

    #[test]
    fn test_schedule() {
        let schedule = Schedule {
            reg: 0.1,
            scaling_base: 0.5,
            scaling_coef: 1.1,
        };

        assert_eq!(schedule.next(1, 123.0), 1.1);
        assert!((schedule.next(2, 1.1) - 0.6).abs() < 1E-15);
        assert!((schedule.next(3, 0.6) - 0.35).abs() < 1E-15);

        // delta below machine precision snaps to the target
        assert_eq!(schedule.next(4, 0.1 + 1E-17), 0.1);
        assert_eq!(schedule.next(5, 0.1), 0.1);
    }

    #[test]
    fn test_sinkhorn_epsilon_scaling() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let reg = 1.0;
        let m = array![[0.0, 1.0], [1.0, 0.0]];

        let result = match super::sinkhorn_epsilon_scaling(&a, &b, &m, reg, None, None) {
            Ok(result) => result,
            Err(error) => panic!("{:?}", error),
        };

        let truth = array![[0.36552929, 0.13447071], [0.13447071, 0.36552929]];

        assert!(result.relative_eq(&truth, 1E-6, 1E-2));
    }

    #[test]
    fn test_epsilon_scaling_log() {
        let a = array![0.2, 0.3, 0.5];
        let b = array![0.4, 0.4, 0.2];
        let m = array![[0.0, 0.25, 1.0], [0.25, 0.0, 0.25], [1.0, 0.25, 0.0]];
        let reg = 0.05;

        let (plan, log) = super::SinkhornEpsilonScaling::new(&a, &b, &m, reg)
            .solve_with_log()
            .unwrap();

        // default scaling coefficient is max(M) + reg
        assert_eq!(log.regs[0], 1.0 + reg);
        assert!(log.regs.windows(2).all(|w| w[1] <= w[0] && w[1] >= reg));
        assert_eq!(log.regs.len(), log.n_iter);
        assert_eq!(log.err.len(), log.n_iter);

        match log.status {
            Termination::Converged => assert!(log.last_err().unwrap() <= 1E-9),
            _ => assert_eq!(log.n_iter, 100),
        }

        assert!(plan.iter().all(|p| p.is_finite() && *p >= 0.));

        // agrees with a direct stabilized solve at the target regularization
        let direct = SinkhornStabilized::new(&a, &b, &m, reg)
            .iterations(10000)
            .threshold(1E-20)
            .solve()
            .unwrap();

        assert!(plan.abs_diff_eq(&direct, 1E-3));
    }

    #[test]
    fn test_epsilon_scaling_small_reg() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let m = array![[0.0, 1.0], [1.0, 0.0]];

        let (plan, log) = super::SinkhornEpsilonScaling::new(&a, &b, &m, 1E-3)
            .solve_with_log()
            .unwrap();

        assert!(plan.abs_diff_eq(&array![[0.5, 0.0], [0.0, 0.5]], 1E-6));
        assert!(log.alpha.iter().all(|x| x.is_finite()));
        assert!(log.beta.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_epsilon_scaling_single_step() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let m = array![[0.0, 1.0], [1.0, 0.0]];

        // a single step still runs one inner solve and reports its potentials
        let (plan, log) = super::SinkhornEpsilonScaling::new(&a, &b, &m, 0.1)
            .iterations(1)
            .solve_with_log()
            .unwrap();

        assert_eq!(log.n_iter, 1);
        assert_eq!(log.regs, vec![1.1]);
        assert_eq!(log.alpha.len(), 2);
        assert!(plan.sum_axis(Axis(1)).abs_diff_eq(&a, 1E-6));
    }

    #[test]
    fn test_epsilon_scaling_stops_on_divergence() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let m = array![[0.0, 1.0], [1.0, 0.0]];

        // the first step runs at reg 1.1 where exp(1000 / 1.1) overflows the kernel
        let (_, log) = super::SinkhornEpsilonScaling::new(&a, &b, &m, 0.1)
            .iterations(5)
            .warm_start(WarmStart::LogDomain {
                alpha: array![1000.0, 1000.0],
                beta: array![0.0, 0.0],
            })
            .solve_with_log()
            .unwrap();

        assert_eq!(log.status, Termination::Diverged { iteration: 1 });
        assert_eq!(log.n_iter, 0);
        assert!(log.err.is_empty());
        assert!(log.regs.is_empty());

        // the rolled back potentials of the diverged step
        assert!(log.alpha.iter().all(|x| x.is_finite()));
        assert!(log.beta.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_epsilon_scaling_preconditions() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let m = array![[0.0, 1.0], [1.0, 0.0]];

        match super::SinkhornEpsilonScaling::new(&a, &b, &m, 0.1)
            .scaling_base(1.0)
            .solve()
        {
            Err(OTError::ArgError(_)) => (),
            other => panic!("{:?}", other),
        }

        let short = array![1.0];
        match super::sinkhorn_epsilon_scaling(&short, &b, &m, 0.1, None, None) {
            Err(OTError::WeightDimensionError { dim_a, .. }) => assert_eq!(dim_a, 1),
            other => panic!("{:?}", other),
        }

        let nan_cost = array![[0.0, f64::NAN], [1.0, 0.0]];
        match super::sinkhorn_epsilon_scaling(&a, &b, &nan_cost, 0.1, None, None) {
            Err(OTError::Other(_)) => (),
            other => panic!("{:?}", other),
        }
    }
}
