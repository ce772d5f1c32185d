//! # pagekv Configuration Module
//!
//! This module centralizes the on-disk layout constants for pagekv. Constants
//! that depend on each other are co-located and their relationships are
//! enforced through compile-time assertions.
//!
//! - [`constants`]: All layout and sizing values with dependency documentation

pub mod constants;
pub use constants::*;
