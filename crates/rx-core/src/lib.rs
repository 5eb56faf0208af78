//! # rx-core
//!
//! Shared vocabulary for the misID background estimator: the error taxonomy, the tagging
//! region / charge / hadron enumerations, the sample registry and the injected logger.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
pub use logging::Logger;
pub use types::{
    ChargeHypothesis, Hadron, InputSelection, Region, SampleCategory, SampleId, SignalMode,
};
