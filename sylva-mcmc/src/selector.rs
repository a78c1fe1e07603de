//! Selection of one or more proposers acting on disjoint state parameters.
//!
//! The caller may specify how often more than one proposer should fire,
//! e.g. `[0.60, 0.30, 0.10]` for one proposer 60% of the time, two 30% of
//! the time and three 10% of the time. The realized frequencies can fall
//! short of that when disjoint proposers are hard to find: selection gives
//! up after [`MAX_NO_OF_ATTEMPTS`] tries.
//!
//! # Draw order
//!
//! [`MultiProposerSelector::select_disjointly`] consumes exactly one uniform
//! draw for the target count, then exactly one per selection attempt.
//! Seeded chains depend on this order.

use std::collections::{BTreeSet, HashSet};

use rand::Rng;
use sylva_core::{Result, SylvaError};
use tracing::{debug, trace};

use crate::param::ParamId;
use crate::proposer::{Candidate, Proposer, ProposerId};
use crate::weights::AccumulatedWeights;

/// The maximum number of attempts at adding a proposer in one selection.
pub const MAX_NO_OF_ATTEMPTS: usize = 20;

/// The proposers chosen for one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    proposers: BTreeSet<ProposerId>,
    target: usize,
    attempts: usize,
}

impl Selection {
    /// Selected proposers in id order.
    pub fn proposers(&self) -> &BTreeSet<ProposerId> {
        &self.proposers
    }

    pub fn len(&self) -> usize {
        self.proposers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposers.is_empty()
    }

    /// The number of proposers the selector aimed for.
    pub fn target(&self) -> usize {
        self.target
    }

    /// Number of attempts (and draws after the count draw) used.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Whether fewer proposers than targeted were found.
    pub fn is_degraded(&self) -> bool {
        self.proposers.len() < self.target
    }

    pub fn iter(&self) -> impl Iterator<Item = ProposerId> + '_ {
        self.proposers.iter().copied()
    }
}

/// Chooses the proposers to fire in one iteration.
pub trait ProposerSelector {
    /// Select a non-empty set of candidates whose parameter sets are
    /// pairwise disjoint.
    ///
    /// # Errors
    ///
    /// Returns an error if `candidates` is empty or a weight is negative or
    /// not finite.
    fn select_disjointly<R: Rng + ?Sized>(
        &self,
        candidates: &[Candidate<'_>],
        rng: &mut R,
    ) -> Result<Selection>;
}

/// Selects a weighted, randomly sized set of disjoint proposers.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiProposerSelector {
    /// Accumulated number-of-proposers weights; index 0 is one proposer.
    acc_no_weights: AccumulatedWeights,
}

impl Default for MultiProposerSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiProposerSelector {
    /// A selector that always fires exactly one proposer.
    pub fn new() -> Self {
        Self {
            acc_no_weights: AccumulatedWeights::single(),
        }
    }

    /// A selector where element `i` of `no_weights` is the relative weight
    /// of firing `i + 1` proposers.
    ///
    /// # Errors
    ///
    /// Returns an error if `no_weights` is empty, has a negative or
    /// non-finite entry, or sums to zero.
    pub fn with_count_weights(no_weights: &[f64]) -> Result<Self> {
        let acc_no_weights = AccumulatedWeights::from_weights(no_weights)
            .map_err(|e| in_context(e, "invalid weights in multi proposer selector"))?;
        debug!(counts = ?acc_no_weights.as_slice(), "built multi proposer selector");
        Ok(Self { acc_no_weights })
    }

    /// The normalized accumulated count weights.
    pub fn count_weights(&self) -> &[f64] {
        self.acc_no_weights.as_slice()
    }

    /// The largest number of proposers a single selection may aim for.
    pub fn max_count(&self) -> usize {
        self.acc_no_weights.len()
    }
}

impl ProposerSelector for MultiProposerSelector {
    fn select_disjointly<R: Rng + ?Sized>(
        &self,
        candidates: &[Candidate<'_>],
        rng: &mut R,
    ) -> Result<Selection> {
        if candidates.is_empty() {
            return Err(SylvaError::InvalidInput(
                "cannot select proposer from empty list".into(),
            ));
        }
        // Weights may change between iterations, so the table is rebuilt.
        // Tuning can drive every weight to zero; the pick is then uniform.
        let weights: Vec<f64> = candidates.iter().map(|c| c.proposer.weight()).collect();
        let acc_weights = AccumulatedWeights::from_weights_or_uniform(&weights)
            .map_err(|e| in_context(e, "invalid proposer weights"))?;

        let target = self.acc_no_weights.sample_index(rng.gen::<f64>()) + 1;

        let mut proposers = BTreeSet::new();
        let mut claimed: HashSet<ParamId> = HashSet::new();
        let mut attempts = 0;
        while attempts < MAX_NO_OF_ATTEMPTS && proposers.len() < target {
            let c = &candidates[acc_weights.sample_index(rng.gen::<f64>())];
            let params = c.proposer.parameters();
            if params.iter().all(|p| !claimed.contains(p)) {
                claimed.extend(params.iter().copied());
                proposers.insert(c.id);
            }
            attempts += 1;
        }
        debug_assert!(!proposers.is_empty());

        trace!(wanted = target, selected = proposers.len(), attempts, "selected proposers");
        Ok(Selection {
            proposers,
            target,
            attempts,
        })
    }
}

fn in_context(e: SylvaError, context: &str) -> SylvaError {
    match e {
        SylvaError::InvalidInput(msg) => SylvaError::InvalidInput(format!("{context}: {msg}")),
        other => other,
    }
}

/// Selector configuration.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SelectorConfig {
    /// Relative weights of firing 1, 2, ... proposers per iteration.
    /// `None` fires exactly one.
    pub count_weights: Option<Vec<f64>>,
}

impl SelectorConfig {
    pub fn build(&self) -> Result<MultiProposerSelector> {
        match &self.count_weights {
            Some(w) => MultiProposerSelector::with_count_weights(w),
            None => Ok(MultiProposerSelector::new()),
        }
    }
}
