use std::str::FromStr;

use ndarray::prelude::*;

use crate::OTError;

pub mod diagnostics;
pub mod epsilon_scaling;
pub mod kernel;
pub mod sinkhorn;
pub mod stabilized;

/// Offset added to denominators and logarithm arguments to avoid division by zero and ln(0)
pub const M_EPS: f64 = 1e-16;

/// Dual potentials used to resume a solve, in either of their two representations
#[derive(Debug, Clone, PartialEq)]
pub enum WarmStart {
    /// Multiplicative scaling vectors (u, v)
    Scaling { u: Array1<f64>, v: Array1<f64> },
    /// Additive log-domain potentials (alpha, beta)
    LogDomain {
        alpha: Array1<f64>,
        beta: Array1<f64>,
    },
}

impl WarmStart {
    /// alpha = reg * ln(u + eps), beta = reg * ln(v + eps)
    pub fn into_log_domain(self, reg: f64) -> (Array1<f64>, Array1<f64>) {
        match self {
            WarmStart::Scaling { u, v } => (
                u.mapv_into(|x| reg * (x + M_EPS).ln()),
                v.mapv_into(|x| reg * (x + M_EPS).ln()),
            ),
            WarmStart::LogDomain { alpha, beta } => (alpha, beta),
        }
    }

    /// u = exp(alpha / reg), v = exp(beta / reg)
    pub fn into_scaling(self, reg: f64) -> (Array1<f64>, Array1<f64>) {
        match self {
            WarmStart::Scaling { u, v } => (u, v),
            WarmStart::LogDomain { alpha, beta } => (
                alpha.mapv_into(|x| (x / reg).exp()),
                beta.mapv_into(|x| (x / reg).exp()),
            ),
        }
    }

    fn dims(&self) -> (usize, usize) {
        match self {
            WarmStart::Scaling { u, v } => (u.len(), v.len()),
            WarmStart::LogDomain { alpha, beta } => (alpha.len(), beta.len()),
        }
    }

    pub(crate) fn check_shape(&self, cost: &Array2<f64>) -> Result<(), OTError> {
        let (dim_0, dim_1) = self.dims();
        let (m0, m1) = cost.dim();

        if dim_0 != m0 || dim_1 != m1 {
            return Err(OTError::WarmStartDimensionError {
                dim_0,
                dim_1,
                dim_m_0: m0,
                dim_m_1: m1,
            });
        }

        Ok(())
    }
}

/// Ensures the cost matrix is non-empty and the dimensions of the source and target measures are
/// consistent with it
pub(crate) fn check_shape(
    a: &Array1<f64>,
    b: &Array1<f64>,
    cost: &Array2<f64>,
) -> Result<(), OTError> {
    let (m0, m1) = cost.dim();
    let dim_a = a.len();
    let dim_b = b.len();

    if m0 == 0 || m1 == 0 {
        return Err(OTError::EmptyDimensionError {
            dim_m_0: m0,
            dim_m_1: m1,
        });
    }

    if dim_a != m0 || dim_b != m1 {
        return Err(OTError::WeightDimensionError {
            dim_a,
            dim_b,
            dim_m_0: m0,
            dim_m_1: m1,
        });
    }

    Ok(())
}

/// Preconditions shared by every solver: shapes, reg > 0 and non-negative weights
pub(crate) fn check_inputs(
    a: &Array1<f64>,
    b: &Array1<f64>,
    cost: &Array2<f64>,
    reg: f64,
) -> Result<(), OTError> {
    check_shape(a, b, cost)?;

    if !(reg > 0.) {
        return Err(OTError::ArgError("Regularization term <= 0".to_string()));
    }

    for (which, weights) in [("source", a), ("target", b)].iter() {
        // NaN weights are rejected as well
        if let Some((index, &value)) = weights.indexed_iter().find(|(_, w)| !(**w >= 0.)) {
            return Err(OTError::NegativeWeightError {
                which: *which,
                index,
                value,
            });
        }
    }

    Ok(())
}

pub(crate) fn check_positive(name: &str, value: f64) -> Result<(), OTError> {
    if !(value > 0.) {
        return Err(OTError::ArgError(format!("{} must be > 0", name)));
    }
    Ok(())
}

pub(crate) fn check_nonzero(name: &str, value: usize) -> Result<(), OTError> {
    if value == 0 {
        return Err(OTError::ArgError(format!(
            "{} not a valid value. Must be > 0",
            name
        )));
    }
    Ok(())
}

/// Sinkhorn variants selectable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkhornMethod {
    Sinkhorn,
    Stabilized,
    EpsilonScaling,
}

impl FromStr for SinkhornMethod {
    type Err = OTError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sinkhorn" => Ok(SinkhornMethod::Sinkhorn),
            "sinkhorn_stabilized" => Ok(SinkhornMethod::Stabilized),
            "sinkhorn_epsilon_scaling" => Ok(SinkhornMethod::EpsilonScaling),
            _ => Err(OTError::ArgError(format!("Unknown method '{}'", s))),
        }
    }
}

/// Solves the entropic regularization optimal transport problem with the chosen Sinkhorn variant
/// and returns the OT matrix
/// a: Source sample weights
/// b: Target sample weights
/// M: Loss matrix
/// reg: Entropy regularization term > 0
/// method: Solver variant
/// num_iter_max: Max number of iterations (outer iterations for epsilon scaling)
/// stop_threshold: Stop threshold on error (> 0) (default = 1E-9)
#[allow(non_snake_case)]
pub fn sinkhorn(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
    method: SinkhornMethod,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<Array2<f64>, OTError> {
    match method {
        SinkhornMethod::Sinkhorn => {
            sinkhorn::sinkhorn_knopp(a, b, M, reg, num_iter_max, stop_threshold)
        }
        SinkhornMethod::Stabilized => {
            stabilized::sinkhorn_stabilized(a, b, M, reg, num_iter_max, stop_threshold)
        }
        SinkhornMethod::EpsilonScaling => {
            epsilon_scaling::sinkhorn_epsilon_scaling(a, b, M, reg, num_iter_max, stop_threshold)
        }
    }
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;

    use super::{SinkhornMethod, WarmStart};
    use crate::OTError;

    #[test]
    fn test_method_from_str() {
        assert_eq!(
            "Sinkhorn".parse::<SinkhornMethod>().unwrap(),
            SinkhornMethod::Sinkhorn
        );
        assert_eq!(
            "sinkhorn_stabilized".parse::<SinkhornMethod>().unwrap(),
            SinkhornMethod::Stabilized
        );
        assert_eq!(
            "SINKHORN_EPSILON_SCALING".parse::<SinkhornMethod>().unwrap(),
            SinkhornMethod::EpsilonScaling
        );

        match "greenkhorn".parse::<SinkhornMethod>() {
            Err(OTError::ArgError(msg)) => assert!(msg.contains("greenkhorn")),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_warm_start_conversion() {
        let reg = 0.5;
        let u = array![0.25, 2.0];
        let v = array![1.0, 4.0, 0.5];

        let (alpha, beta) = WarmStart::Scaling {
            u: u.clone(),
            v: v.clone(),
        }
        .into_log_domain(reg);

        assert!(alpha.abs_diff_eq(&u.mapv(|x| reg * x.ln()), 1E-12));

        let (u_back, v_back) = WarmStart::LogDomain { alpha, beta }.into_scaling(reg);

        assert!(u_back.relative_eq(&u, 1E-12, 1E-9));
        assert!(v_back.relative_eq(&v, 1E-12, 1E-9));
    }

    #[test]
    fn test_check_inputs() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let m = array![[0.0, 1.0], [1.0, 0.0]];

        assert!(super::check_inputs(&a, &b, &m, 0.1).is_ok());

        match super::check_inputs(&a, &b, &m, 0.0) {
            Err(OTError::ArgError(_)) => (),
            other => panic!("{:?}", other),
        }

        let negative = array![1.5, -0.5];
        match super::check_inputs(&a, &negative, &m, 0.1) {
            Err(OTError::NegativeWeightError { index, .. }) => assert_eq!(index, 1),
            other => panic!("{:?}", other),
        }

        let short = array![1.0];
        match super::check_inputs(&short, &b, &m, 0.1) {
            Err(OTError::WeightDimensionError { dim_a, .. }) => assert_eq!(dim_a, 1),
            other => panic!("{:?}", other),
        }

        let empty = Array2::<f64>::zeros((0, 2));
        let none = Array1::<f64>::zeros(0);
        match super::check_inputs(&none, &b, &empty, 0.1) {
            Err(OTError::EmptyDimensionError { .. }) => (),
            other => panic!("{:?}", other),
        }
    }
}
