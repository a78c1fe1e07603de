//! Shared primitives and traits for the sylva phylogenetic MCMC workspace.
//!
//! `sylva-core` provides the foundation the other sylva crates build on:
//!
//! - **Error types** — [`SylvaError`] and [`Result`] for structured error handling
//! - **Traits** — [`Annotated`] and [`Sampleable`], the contract consumed by sample writers

pub mod error;
pub mod traits;

pub use error::{Result, SylvaError};
pub use traits::*;
