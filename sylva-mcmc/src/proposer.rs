//! The proposer abstraction and the pool proposers are registered in.
//!
//! A proposer perturbs a fixed set of state parameters. It caches every
//! parameter it touches before mutating it, so the sampler can undo the
//! change on rejection.

use std::fmt;

use rand::RngCore;
use sylva_core::{Annotated, Result, SylvaError};
use tracing::debug;

use crate::param::{ParamId, ParameterStore};

/// Report of one perturbation.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    /// Parameters that were cached and changed.
    pub perturbed: Vec<ParamId>,
    /// Natural log of the Hastings ratio `q(x|x') / q(x'|x)`.
    pub log_hastings_ratio: f64,
}

/// A kind of perturbation (scale a branch length, slide a rate, ...).
///
/// [`parameters`](Proposer::parameters) must not change over the proposer's
/// lifetime; the selector relies on it to keep concurrently fired proposers
/// disjoint.
pub trait Proposer: Annotated + fmt::Debug {
    /// The state parameters this proposer may perturb.
    fn parameters(&self) -> &[ParamId];

    /// Current relative selection weight. Never negative.
    fn weight(&self) -> f64;

    /// Replace the selection weight, e.g. from an external tuning schedule.
    ///
    /// # Errors
    ///
    /// Returns an error if `weight` is negative or non-finite.
    fn set_weight(&mut self, weight: f64) -> Result<()>;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// Cache and perturb the parameters.
    fn perturb(&mut self, params: &mut ParameterStore, rng: &mut dyn RngCore) -> Result<Proposal>;
}

/// Check a proposer weight.
pub fn validate_weight(weight: f64) -> Result<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(SylvaError::InvalidInput(format!(
            "proposer weight must be finite and non-negative, got {weight}"
        )));
    }
    Ok(())
}

/// Check a proposer's parameter list: non-empty and free of duplicates.
pub fn validate_parameters(name: &str, ids: &[ParamId]) -> Result<()> {
    if ids.is_empty() {
        return Err(SylvaError::InvalidInput(format!(
            "proposer '{name}' must perturb at least one parameter"
        )));
    }
    for (i, id) in ids.iter().enumerate() {
        if ids[..i].contains(id) {
            return Err(SylvaError::InvalidInput(format!(
                "proposer '{name}' lists {id} more than once"
            )));
        }
    }
    Ok(())
}

/// Cache every listed parameter. On failure, caches taken by this call are
/// dropped again before the error is returned.
pub fn cache_all(params: &mut ParameterStore, ids: &[ParamId]) -> Result<()> {
    for (i, &id) in ids.iter().enumerate() {
        let cached = params.get_mut(id).and_then(|p| p.cache());
        if let Err(e) = cached {
            params.clear(&ids[..i])?;
            return Err(e);
        }
    }
    Ok(())
}

/// Identifier of a proposer registered in a [`ProposerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProposerId(pub usize);

impl fmt::Display for ProposerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proposer#{}", self.0)
    }
}

/// An enabled proposer offered to a selector.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub id: ProposerId,
    pub proposer: &'a dyn Proposer,
}

/// Acceptance counts for one proposer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProposerStats {
    pub accepted: u64,
    pub rejected: u64,
}

impl ProposerStats {
    pub fn total(&self) -> u64 {
        self.accepted + self.rejected
    }

    /// Fraction of accepted proposals, 0.0 before the first one.
    pub fn acceptance_rate(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.accepted as f64 / total as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug)]
struct Entry {
    proposer: Box<dyn Proposer>,
    stats: ProposerStats,
}

/// Owns every proposer of a chain, addressed by [`ProposerId`].
#[derive(Debug, Default)]
pub struct ProposerPool {
    entries: Vec<Entry>,
}

impl ProposerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a proposer and return its id.
    pub fn add<P: Proposer + 'static>(&mut self, proposer: P) -> ProposerId {
        let id = ProposerId(self.entries.len());
        debug!(
            %id,
            name = proposer.name(),
            n_params = proposer.parameters().len(),
            weight = proposer.weight(),
            "registered proposer"
        );
        self.entries.push(Entry {
            proposer: Box::new(proposer),
            stats: ProposerStats::default(),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: ProposerId) -> Result<&dyn Proposer> {
        self.entry(id).map(|e| e.proposer.as_ref())
    }

    pub fn get_mut(&mut self, id: ProposerId) -> Result<&mut dyn Proposer> {
        match self.entries.get_mut(id.0) {
            Some(e) => Ok(e.proposer.as_mut()),
            None => Err(unknown(id)),
        }
    }

    /// Enabled proposers in registration order.
    pub fn candidates(&self) -> Vec<Candidate<'_>> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.proposer.is_enabled())
            .map(|(i, e)| Candidate {
                id: ProposerId(i),
                proposer: e.proposer.as_ref(),
            })
            .collect()
    }

    pub fn stats(&self, id: ProposerId) -> Result<ProposerStats> {
        self.entry(id).map(|e| e.stats)
    }

    /// Count one accepted or rejected proposal for `id`.
    pub fn record(&mut self, id: ProposerId, accepted: bool) -> Result<()> {
        let entry = self.entries.get_mut(id.0).ok_or_else(|| unknown(id))?;
        if accepted {
            entry.stats.accepted += 1;
        } else {
            entry.stats.rejected += 1;
        }
        Ok(())
    }

    fn entry(&self, id: ProposerId) -> Result<&Entry> {
        self.entries.get(id.0).ok_or_else(|| unknown(id))
    }
}

fn unknown(id: ProposerId) -> SylvaError {
    SylvaError::InvalidInput(format!("unknown {id}"))
}
