mod error;
pub mod prelude;
pub mod regularized;
pub mod utils;

pub use error::OTError;

pub trait OTSolver {
    /// Diagnostics returned alongside the transport plan
    type Log;

    fn check_shape(&self) -> Result<(), OTError>;
    fn solve_with_log(&mut self) -> Result<(ndarray::Array2<f64>, Self::Log), OTError>;

    fn solve(&mut self) -> Result<ndarray::Array2<f64>, OTError> {
        self.solve_with_log().map(|(plan, _)| plan)
    }
}
