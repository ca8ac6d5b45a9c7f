//! Density clustering with automatic hyperparameter selection, multi-block
//! dimensionality reduction, and embedding-based text similarity search.
//!
//! The analysis code lives under [`agr`]; [`config`] resolves and loads the
//! user's defaults.

pub mod agr;
pub mod config;
