use ndarray::prelude::*;

use crate::OTError;

/// Returns a 1D histogram for a gaussian distribution, normalized to unit mass
/// n: number of bins in histogram
/// mean: mean value of distribution
/// std: standard deviation of distribution
#[allow(non_snake_case)]
pub fn get_1D_gauss_histogram(n: usize, mean: f64, std: f64) -> Result<Array1<f64>, OTError> {
    if n == 0 {
        return Err(OTError::ArgError("n is not greater than zero".to_string()));
    }

    if !(std > 0.) {
        return Err(OTError::ArgError(
            "standard deviation is not greater than zero".to_string(),
        ));
    }

    let x = Array1::<f64>::range(0.0, n as f64, 1.0);
    let denom = 2.0 * std.powi(2);
    let mut result = x.mapv_into(|x| (-(x - mean).powi(2) / denom).exp());

    let summed_val = result.sum();
    if !(summed_val > 0.) {
        return Err(OTError::ArgError(format!(
            "histogram with mean {} has no mass on {} bins",
            mean, n
        )));
    }

    result /= summed_val;

    Ok(result)
}

/// Returns the uniform histogram on n bins
pub fn uniform(n: usize) -> Array1<f64> {
    Array1::<f64>::from_elem(n, 1. / (n as f64))
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;
    use ndarray_stats::QuantileExt;

    #[test]
    #[allow(non_snake_case)]
    fn test_get_1D_gauss_hist() {
        let n = 50;
        let mean = 20.0;
        let std = 5.0;

        let result = match super::get_1D_gauss_histogram(n, mean, std) {
            Ok(val) => val,
            Err(err) => panic!("{:?}", err),
        };

        assert_eq!(result.len(), n);
        assert!((result.sum() - 1.0).abs() < 1E-12);
        assert_eq!(result.argmax().unwrap(), 20);
        assert!((result[19] - result[21]).abs() < 1E-15);
    }

    #[test]
    #[allow(non_snake_case)]
    fn test_get_1D_gauss_hist_invalid() {
        assert!(super::get_1D_gauss_histogram(0, 0.0, 1.0).is_err());
        assert!(super::get_1D_gauss_histogram(10, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_uniform() {
        assert_eq!(super::uniform(4), array![0.25, 0.25, 0.25, 0.25]);
    }
}
