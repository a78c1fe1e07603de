//! One iteration's proposal: select, perturb, then accept or reject.
//!
//! The acceptance decision itself belongs to the enclosing sampler. A
//! [`ProposalStep`] only tracks which parameters were touched so the
//! caches can be resolved exactly once.

use rand::RngCore;
use sylva_core::Result;
use tracing::{trace, warn};

use crate::param::{ParamId, ParameterStore};
use crate::proposer::{Proposal, Proposer, ProposerId, ProposerPool};
use crate::selector::{ProposerSelector, Selection};

/// A perturbed but not yet resolved iteration.
#[derive(Debug, Clone)]
#[must_use = "a proposal step must be accepted or rejected"]
pub struct ProposalStep {
    selection: Selection,
    proposals: Vec<(ProposerId, Proposal)>,
    touched: Vec<ParamId>,
}

impl ProposalStep {
    /// Select disjoint proposers from the enabled ones in `pool` and let
    /// each perturb its parameters, in id order.
    ///
    /// If a perturbation fails, parameters touched so far are restored
    /// before the error is returned.
    pub fn propose<S, R>(
        selector: &S,
        pool: &mut ProposerPool,
        params: &mut ParameterStore,
        rng: &mut R,
    ) -> Result<Self>
    where
        S: ProposerSelector,
        R: RngCore,
    {
        let selection = selector.select_disjointly(&pool.candidates(), rng)?;

        let mut proposals = Vec::with_capacity(selection.len());
        let mut touched = Vec::new();
        for id in selection.iter() {
            let outcome = match pool.get_mut(id) {
                Ok(p) => p.perturb(params, &mut *rng),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(proposal) => {
                    touched.extend_from_slice(&proposal.perturbed);
                    proposals.push((id, proposal));
                }
                Err(e) => {
                    if params.restore(&touched).is_err() {
                        warn!(proposer = %id, "incomplete rollback after failed perturbation");
                    }
                    return Err(e);
                }
            }
        }
        trace!(
            proposers = proposals.len(),
            params = touched.len(),
            degraded = selection.is_degraded(),
            "proposed step"
        );
        Ok(Self {
            selection,
            proposals,
            touched,
        })
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Per-proposer reports, in id order.
    pub fn proposals(&self) -> &[(ProposerId, Proposal)] {
        &self.proposals
    }

    /// Every parameter cached by this step.
    pub fn touched(&self) -> &[ParamId] {
        &self.touched
    }

    /// Sum of the proposers' log Hastings ratios.
    pub fn log_hastings_ratio(&self) -> f64 {
        self.proposals.iter().map(|(_, p)| p.log_hastings_ratio).sum()
    }

    /// Keep the new state: clear every touched cache.
    pub fn accept(self, pool: &mut ProposerPool, params: &mut ParameterStore) -> Result<()> {
        params.clear(&self.touched)?;
        self.record(pool, true)?;
        trace!(params = self.touched.len(), "accepted step");
        Ok(())
    }

    /// Undo the step: restore every touched parameter from its cache.
    ///
    /// Every parameter with a cache is restored and the rejection is
    /// recorded even if some parameter had none; the first such error is
    /// returned afterwards.
    pub fn reject(self, pool: &mut ProposerPool, params: &mut ParameterStore) -> Result<()> {
        let restored = params.restore(&self.touched);
        self.record(pool, false)?;
        restored?;
        trace!(params = self.touched.len(), "rejected step");
        Ok(())
    }

    fn record(&self, pool: &mut ProposerPool, accepted: bool) -> Result<()> {
        for (id, _) in &self.proposals {
            pool.record(*id, accepted)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{DoubleArrayParameter, DoubleParameter, StateParameter};
    use crate::proposers::{ScaleProposer, SlideProposer};
    use crate::selector::MultiProposerSelector;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use sylva_core::Sampleable;

    struct Model {
        params: ParameterStore,
        pool: ProposerPool,
        ids: Vec<ParamId>,
    }

    fn model() -> Model {
        let mut params = ParameterStore::new();
        let b1 = params.add(DoubleParameter::new("branch1", 0.1));
        let b2 = params.add(DoubleParameter::new("branch2", 0.2));
        let kappa = params.add(DoubleParameter::new("kappa", 2.0));
        let rates = params.add(DoubleArrayParameter::new("rates", vec![1.0, 1.0, 1.0]).unwrap());

        let mut pool = ProposerPool::new();
        pool.add(ScaleProposer::new("scale_b1", vec![b1], 1.0, 1.0).unwrap());
        pool.add(ScaleProposer::new("scale_b2", vec![b2], 1.0, 1.0).unwrap());
        pool.add(ScaleProposer::new("scale_both", vec![b1, b2], 0.5, 1.0).unwrap());
        pool.add(SlideProposer::new("slide_kappa", vec![kappa], 0.3, 1.0).unwrap());
        pool.add(ScaleProposer::new("scale_rates", vec![rates], 0.8, 2.0).unwrap());
        Model {
            params,
            pool,
            ids: vec![b1, b2, kappa, rates],
        }
    }

    fn snapshot(m: &Model) -> Vec<String> {
        m.ids
            .iter()
            .map(|&id| {
                let p = m.params.get(id).unwrap();
                format!("{:?}", (0..p.n_sub_params()).map(|i| p.value(i).to_bits()).collect::<Vec<_>>())
            })
            .collect()
    }

    #[test]
    fn reject_restores_every_touched_parameter() {
        let mut m = model();
        let selector = MultiProposerSelector::with_count_weights(&[0.4, 0.4, 0.2]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        for _ in 0..500 {
            let before = snapshot(&m);
            let step = ProposalStep::propose(&selector, &mut m.pool, &mut m.params, &mut rng).unwrap();
            assert!(!step.touched().is_empty());
            assert_eq!(m.params.pending().len(), step.touched().len());
            step.reject(&mut m.pool, &mut m.params).unwrap();
            assert_eq!(snapshot(&m), before);
            assert!(m.params.pending().is_empty());
        }
    }

    #[test]
    fn accept_keeps_state_and_clears_caches() {
        let mut m = model();
        let selector = MultiProposerSelector::with_count_weights(&[0.5, 0.5]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(12);

        let step = ProposalStep::propose(&selector, &mut m.pool, &mut m.params, &mut rng).unwrap();
        let after = snapshot(&m);
        let fired: Vec<ProposerId> = step.proposals().iter().map(|(id, _)| *id).collect();
        step.accept(&mut m.pool, &mut m.params).unwrap();

        assert_eq!(snapshot(&m), after);
        assert!(m.params.pending().is_empty());
        for id in fired {
            assert_eq!(m.pool.stats(id).unwrap().accepted, 1);
        }
    }

    #[test]
    fn touched_parameters_are_disjoint() {
        let mut m = model();
        let selector = MultiProposerSelector::with_count_weights(&[0.0, 0.0, 0.0, 1.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(13);

        for _ in 0..200 {
            let step = ProposalStep::propose(&selector, &mut m.pool, &mut m.params, &mut rng).unwrap();
            let mut touched = step.touched().to_vec();
            touched.sort();
            touched.dedup();
            assert_eq!(touched.len(), step.touched().len());
            step.reject(&mut m.pool, &mut m.params).unwrap();
        }
    }

    #[test]
    fn log_hastings_ratio_sums_proposals() {
        let mut m = model();
        let selector = MultiProposerSelector::with_count_weights(&[0.0, 1.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(14);

        let step = ProposalStep::propose(&selector, &mut m.pool, &mut m.params, &mut rng).unwrap();
        let sum: f64 = step.proposals().iter().map(|(_, p)| p.log_hastings_ratio).sum();
        assert_eq!(step.log_hastings_ratio(), sum);
        step.reject(&mut m.pool, &mut m.params).unwrap();
    }

    #[test]
    fn disabled_pool_is_invalid_input() {
        let mut m = model();
        for i in 0..m.pool.len() {
            m.pool.get_mut(ProposerId(i)).unwrap().set_enabled(false);
        }
        let selector = MultiProposerSelector::new();
        let mut rng = ChaCha8Rng::seed_from_u64(15);
        assert!(ProposalStep::propose(&selector, &mut m.pool, &mut m.params, &mut rng).is_err());
    }

    #[test]
    fn reject_with_missing_cache_restores_the_rest() {
        let mut m = model();
        for i in [0, 1, 3, 4] {
            m.pool.get_mut(ProposerId(i)).unwrap().set_enabled(false);
        }
        let (b1, b2) = (m.ids[0], m.ids[1]);
        let before = snapshot(&m);
        let selector = MultiProposerSelector::new();
        let mut rng = ChaCha8Rng::seed_from_u64(17);

        let step = ProposalStep::propose(&selector, &mut m.pool, &mut m.params, &mut rng).unwrap();
        assert_eq!(step.touched(), &[b1, b2]);
        let b1_new = m.params.get(b1).unwrap().value(0);
        m.params.get_mut(b1).unwrap().clear_cache();

        let err = step.reject(&mut m.pool, &mut m.params).unwrap_err();
        assert!(err.is_protocol());
        assert_eq!(m.params.get(b1).unwrap().value(0), b1_new);
        assert_eq!(snapshot(&m)[1..], before[1..]);
        assert!(m.params.pending().is_empty());
        assert_eq!(m.pool.stats(ProposerId(2)).unwrap().rejected, 1);
    }

    #[test]
    fn failed_perturbation_rolls_back_earlier_proposers() {
        let mut m = model();
        // A stale cache on the rates makes the second proposer fail after
        // the first one has already perturbed kappa.
        let rates = m.ids[3];
        m.params.get_mut(rates).unwrap().cache().unwrap();
        for i in [0, 1, 2] {
            m.pool.get_mut(ProposerId(i)).unwrap().set_enabled(false);
        }
        let selector = MultiProposerSelector::with_count_weights(&[0.0, 1.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(16);
        let before = snapshot(&m);

        let mut failures = 0;
        for _ in 0..20 {
            match ProposalStep::propose(&selector, &mut m.pool, &mut m.params, &mut rng) {
                Ok(step) => step.reject(&mut m.pool, &mut m.params).unwrap(),
                Err(e) => {
                    assert!(e.is_protocol());
                    failures += 1;
                }
            }
            assert_eq!(snapshot(&m), before);
            assert_eq!(m.params.pending(), vec![rates]);
        }
        assert!(failures > 0);
    }
}
