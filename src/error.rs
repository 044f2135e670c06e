use thiserror::Error;

#[derive(Error, Debug)]
pub enum OTError {
    #[error(
        "Loss matrix must have at least one row and one column, \
            got ({dim_m_0:?}, {dim_m_1:?})"
    )]
    EmptyDimensionError { dim_m_0: usize, dim_m_1: usize },

    #[error(
        "Sample weight dimensions, source distribution \
            {dim_a:?} and target distribution {dim_b:?}, do \
            not match loss matrix dimensions, ({dim_m_0:?}, {dim_m_1:?})"
    )]
    WeightDimensionError {
        dim_a: usize,
        dim_b: usize,
        dim_m_0: usize,
        dim_m_1: usize,
    },

    #[error("Negative sample weight {value:?} in {which} distribution at index {index:?}")]
    NegativeWeightError {
        which: &'static str,
        index: usize,
        value: f64,
    },

    #[error(
        "Warm start dimensions ({dim_0:?}, {dim_1:?}) do not match \
            loss matrix dimensions ({dim_m_0:?}, {dim_m_1:?})"
    )]
    WarmStartDimensionError {
        dim_0: usize,
        dim_1: usize,
        dim_m_0: usize,
        dim_m_1: usize,
    },

    #[error("Invalid argument: '{0}'")]
    ArgError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
