//! Proposal selection and state management for phylogenetic MCMC.
//!
//! - **State parameters** — [`DoubleParameter`] and [`DoubleArrayParameter`]
//!   with single-slot cache/restore, owned by a [`ParameterStore`]
//! - **Proposers** — the [`Proposer`] trait, [`ScaleProposer`] and
//!   [`SlideProposer`], registered in a [`ProposerPool`]
//! - **Selection** — [`MultiProposerSelector`] picks a weighted, randomly
//!   sized set of proposers acting on disjoint parameters
//! - **Steps** — [`ProposalStep`] resolves one iteration's caches on
//!   accept or reject
//!
//! The Metropolis-Hastings acceptance test, likelihoods and priors live
//! with the caller.

pub mod param;
pub mod proposer;
pub mod proposers;
pub mod selector;
pub mod step;
pub mod transform;
pub mod weights;

pub use param::{Cache, DoubleArrayParameter, DoubleParameter, ParamId, ParameterStore, StateParameter};
pub use proposer::{Candidate, Proposal, Proposer, ProposerId, ProposerPool, ProposerStats};
pub use proposers::{ScaleProposer, SlideProposer};
pub use selector::{
    MultiProposerSelector, ProposerSelector, Selection, SelectorConfig, MAX_NO_OF_ATTEMPTS,
};
pub use step::ProposalStep;
pub use transform::ScaleTransformation;
pub use weights::AccumulatedWeights;
