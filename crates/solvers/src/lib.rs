//! Derivative-free solvers built on the `tregion-core` traits.
//!
//! # Modules
//!
//! - [`optimization`]: minimize or maximize a scalar objective using only
//!   sampled values

pub mod optimization;
