//! Gibbs kernel construction shared by the Sinkhorn solvers
//!
//! The kernel is always rebuilt from scratch when the potentials change: potentials enter through
//! an exponential, so a small change in alpha or beta is a large multiplicative change in K.

use ndarray::prelude::*;

/// Returns K = exp(-M/reg)
#[allow(non_snake_case)]
pub fn gibbs_kernel(M: &Array2<f64>, reg: f64) -> Array2<f64> {
    M.mapv(|m| (-m / reg).exp())
}

/// Returns K_ij = exp((alpha_i + beta_j - M_ij) / reg)
#[allow(non_snake_case)]
pub fn log_domain_kernel(
    alpha: &Array1<f64>,
    beta: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
) -> Array2<f64> {
    let mut k = Array2::<f64>::zeros(M.raw_dim());
    update_kernel(&mut k, alpha, beta, M, reg);
    k
}

/// Overwrites `k` with exp((alpha_i + beta_j - M_ij) / reg)
#[allow(non_snake_case)]
pub fn update_kernel(
    k: &mut Array2<f64>,
    alpha: &Array1<f64>,
    beta: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
) {
    azip!((index (i, j), k in k, &m in M) *k = ((alpha[i] + beta[j] - m) / reg).exp());
}

/// Overwrites `p` with the transport plan represented by (alpha, beta) and the log scaling
/// vectors log_u = ln(u), log_v = ln(v)
///
/// P_ij = exp((alpha_i + beta_j - M_ij) / reg + log_u_i + log_v_j)
#[allow(non_snake_case)]
pub fn update_plan(
    p: &mut Array2<f64>,
    alpha: &Array1<f64>,
    beta: &Array1<f64>,
    log_u: &Array1<f64>,
    log_v: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
) {
    azip!((index (i, j), p in p, &m in M) {
        *p = ((alpha[i] + beta[j] - m) / reg + log_u[i] + log_v[j]).exp()
    });
}

/// Returns diag(u) K diag(v)
pub fn scale(u: &Array1<f64>, k: &Array2<f64>, v: &Array1<f64>) -> Array2<f64> {
    k * &u.view().insert_axis(Axis(1)) * &v.view().insert_axis(Axis(0))
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;

    #[test]
    fn test_log_domain_kernel_zero_potentials() {
        let m = array![[0.0, 1.0, 2.0], [1.0, 0.0, 3.0]];
        let reg = 0.5;

        let k = super::log_domain_kernel(&Array1::zeros(2), &Array1::zeros(3), &m, reg);

        assert!(k.relative_eq(&super::gibbs_kernel(&m, reg), 1E-15, 1E-12));
        assert_eq!(k[[0, 0]], 1.0);
    }

    #[test]
    fn test_update_kernel_with_potentials() {
        let m = array![[0.0, 1.0], [1.0, 0.0]];
        let alpha = array![0.1, -0.2];
        let beta = array![0.3, 0.0];
        let reg = 0.1;

        let mut k = Array2::<f64>::zeros((2, 2));
        super::update_kernel(&mut k, &alpha, &beta, &m, reg);

        let truth = array![
            [(4.0f64).exp(), (-9.0f64).exp()],
            [(-9.0f64).exp(), (-2.0f64).exp()]
        ];

        assert!(k.relative_eq(&truth, 1E-15, 1E-12));
    }

    #[test]
    fn test_update_plan_matches_scaled_kernel() {
        let m = array![[0.0, 1.0], [1.0, 0.0], [2.0, 0.5]];
        let alpha = array![0.05, -0.1, 0.2];
        let beta = array![-0.3, 0.1];
        let u = array![0.5, 2.0, 1.5];
        let v = array![3.0, 0.25];
        let reg = 0.2;

        let log_u = u.mapv(f64::ln);
        let log_v = v.mapv(f64::ln);

        let mut p = Array2::<f64>::zeros((3, 2));
        super::update_plan(&mut p, &alpha, &beta, &log_u, &log_v, &m, reg);

        let k = super::log_domain_kernel(&alpha, &beta, &m, reg);
        let truth = super::scale(&u, &k, &v);

        assert!(p.relative_eq(&truth, 1E-15, 1E-9));

        // unit scaling vectors leave the kernel
        super::update_plan(&mut p, &alpha, &beta, &Array1::zeros(3), &Array1::zeros(2), &m, reg);
        assert!(p.relative_eq(&k, 1E-15, 1E-12));
    }
}
