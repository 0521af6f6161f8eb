//! Shared primitives for the hyperjoin query optimizer.
//!
//! This crate contains the pieces every other optimizer crate needs: the
//! 64-bit node-set representation with its iteration helpers, the readable
//! number formatting used by the optimizer trace, and the common error type.

pub mod bitset;
pub mod error;
pub mod fmt;

pub use bitset::NodeMap;
pub use error::{OptimizerError, UnsupportedFeature};

pub type OptResult<T> = Result<T, OptimizerError>;
