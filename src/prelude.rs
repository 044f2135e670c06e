//! rust-sinkhorn prelude
//!
//! This module contains the most used types, traits, and functions
//!
//! ```
//! use rust_sinkhorn::prelude::*;
//!
//! ```

pub use crate::OTSolver;

pub use crate::error::OTError;

pub use crate::regularized::{
    diagnostics::{EpsilonScalingLog, SinkhornLog, Termination},
    epsilon_scaling::SinkhornEpsilonScaling,
    sinkhorn::SinkhornKnopp,
    stabilized::SinkhornStabilized,
    SinkhornMethod, WarmStart,
};
