//! Concrete perturbations.
//!
//! Both proposers perturb every sub-value of every parameter they own and
//! consume exactly one uniform draw per sub-value, in parameter order.

use rand::{Rng, RngCore};
use sylva_core::{Annotated, Result, Sampleable, SylvaError};

use crate::param::{ParamId, ParameterStore, StateParameter};
use crate::proposer::{cache_all, validate_parameters, validate_weight, Proposal, Proposer};

/// Multiplicative proposer: `x' = x * exp(lambda * (u - 1/2))`.
///
/// Suited to strictly positive quantities such as branch lengths and rates.
/// The Hastings ratio of each sub-value move is the multiplier itself.
#[derive(Debug, Clone)]
pub struct ScaleProposer {
    name: String,
    params: Vec<ParamId>,
    lambda: f64,
    weight: f64,
    enabled: bool,
}

impl ScaleProposer {
    /// # Errors
    ///
    /// Returns an error if `params` is empty or has duplicates, if `lambda`
    /// is not finite and positive, or if `weight` is invalid.
    pub fn new(
        name: impl Into<String>,
        params: Vec<ParamId>,
        lambda: f64,
        weight: f64,
    ) -> Result<Self> {
        let name = name.into();
        validate_parameters(&name, &params)?;
        validate_weight(weight)?;
        if !lambda.is_finite() || lambda <= 0.0 {
            return Err(SylvaError::InvalidInput(format!(
                "scale tuning for '{name}' must be finite and positive, got {lambda}"
            )));
        }
        Ok(Self {
            name,
            params,
            lambda,
            weight,
            enabled: true,
        })
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }
}

impl Annotated for ScaleProposer {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Proposer for ScaleProposer {
    fn parameters(&self) -> &[ParamId] {
        &self.params
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn set_weight(&mut self, weight: f64) -> Result<()> {
        validate_weight(weight)?;
        self.weight = weight;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn perturb(&mut self, params: &mut ParameterStore, rng: &mut dyn RngCore) -> Result<Proposal> {
        cache_all(params, &self.params)?;
        let mut log_hastings_ratio = 0.0;
        for &id in &self.params {
            let p = params.get_mut(id)?;
            for i in 0..p.n_sub_params() {
                let log_m = self.lambda * (rng.gen::<f64>() - 0.5);
                let x = p.value(i) * log_m.exp();
                p.set_value(i, x);
                log_hastings_ratio += log_m;
            }
        }
        Ok(Proposal {
            perturbed: self.params.clone(),
            log_hastings_ratio,
        })
    }
}

/// Additive proposer: `x' = x + window * (u - 1/2)`, optionally reflected
/// back into `[low, high]`. The move is symmetric, so the log Hastings
/// ratio is zero.
#[derive(Debug, Clone)]
pub struct SlideProposer {
    name: String,
    params: Vec<ParamId>,
    window: f64,
    bounds: Option<(f64, f64)>,
    weight: f64,
    enabled: bool,
}

impl SlideProposer {
    /// # Errors
    ///
    /// Returns an error if `params` is empty or has duplicates, if `window`
    /// is not finite and positive, or if `weight` is invalid.
    pub fn new(
        name: impl Into<String>,
        params: Vec<ParamId>,
        window: f64,
        weight: f64,
    ) -> Result<Self> {
        let name = name.into();
        validate_parameters(&name, &params)?;
        validate_weight(weight)?;
        if !window.is_finite() || window <= 0.0 {
            return Err(SylvaError::InvalidInput(format!(
                "slide window for '{name}' must be finite and positive, got {window}"
            )));
        }
        Ok(Self {
            name,
            params,
            window,
            bounds: None,
            weight,
            enabled: true,
        })
    }

    /// Reflect proposed values into `[low, high]`.
    ///
    /// # Errors
    ///
    /// Returns an error unless both bounds are finite and `low < high`.
    pub fn with_bounds(mut self, low: f64, high: f64) -> Result<Self> {
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(SylvaError::InvalidInput(format!(
                "invalid slide bounds [{low}, {high}] for '{}'",
                self.name
            )));
        }
        self.bounds = Some((low, high));
        Ok(self)
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    pub fn bounds(&self) -> Option<(f64, f64)> {
        self.bounds
    }

    /// Slide every sub-value of every owned parameter. Caches must be held.
    fn slide(&self, params: &mut ParameterStore, rng: &mut dyn RngCore) -> Result<()> {
        for &id in &self.params {
            let p = params.get_mut(id)?;
            for i in 0..p.n_sub_params() {
                let mut x = p.value(i) + self.window * (rng.gen::<f64>() - 0.5);
                if let Some((low, high)) = self.bounds {
                    x = reflect(x, low, high)?;
                }
                p.set_value(i, x);
            }
        }
        Ok(())
    }
}

/// Fold `x` back into `[low, high]` as if bouncing off both walls.
fn reflect(x: f64, low: f64, high: f64) -> Result<f64> {
    if (low..=high).contains(&x) {
        return Ok(x);
    }
    if !x.is_finite() {
        return Err(SylvaError::InvalidInput(format!(
            "cannot reflect {x} into [{low}, {high}]"
        )));
    }
    let w = high - low;
    let r = (x - low).rem_euclid(2.0 * w);
    let folded = low + if r <= w { r } else { 2.0 * w - r };
    Ok(folded.clamp(low, high))
}

impl Annotated for SlideProposer {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Proposer for SlideProposer {
    fn parameters(&self) -> &[ParamId] {
        &self.params
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn set_weight(&mut self, weight: f64) -> Result<()> {
        validate_weight(weight)?;
        self.weight = weight;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn perturb(&mut self, params: &mut ParameterStore, rng: &mut dyn RngCore) -> Result<Proposal> {
        cache_all(params, &self.params)?;
        if let Err(e) = self.slide(params, rng) {
            params.restore(&self.params)?;
            return Err(e);
        }
        Ok(Proposal {
            perturbed: self.params.clone(),
            log_hastings_ratio: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{DoubleArrayParameter, DoubleParameter};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn scale_caches_and_restores() {
        let mut store = ParameterStore::new();
        let id = store.add(DoubleParameter::new("branch", 0.3));
        let mut prop = ScaleProposer::new("scale_branch", vec![id], 1.0, 1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let proposal = prop.perturb(&mut store, &mut rng).unwrap();
        assert_eq!(proposal.perturbed, vec![id]);
        let new = store.get(id).unwrap().value(0);
        assert!(new > 0.0);
        assert!((proposal.log_hastings_ratio - (new / 0.3).ln()).abs() < 1e-12);
        assert!(proposal.log_hastings_ratio.abs() <= 0.5);

        store.restore(&proposal.perturbed).unwrap();
        assert_eq!(store.get(id).unwrap().value(0), 0.3);
    }

    #[test]
    fn scale_perturbs_every_sub_value() {
        let mut store = ParameterStore::new();
        let id = store.add(DoubleArrayParameter::new("rates", vec![1.0; 6]).unwrap());
        let mut prop = ScaleProposer::new("scale_rates", vec![id], 2.0, 1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        prop.perturb(&mut store, &mut rng).unwrap();
        let p = store.get(id).unwrap();
        for i in 0..6 {
            assert_ne!(p.value(i), 1.0);
        }
    }

    #[test]
    fn perturbing_twice_without_resolution_fails() {
        let mut store = ParameterStore::new();
        let id = store.add(DoubleParameter::new("x", 1.0));
        let mut prop = SlideProposer::new("slide_x", vec![id], 0.1, 1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        prop.perturb(&mut store, &mut rng).unwrap();
        let err = prop.perturb(&mut store, &mut rng).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn slide_stays_within_window() {
        let mut store = ParameterStore::new();
        let id = store.add(DoubleParameter::new("x", 5.0));
        let mut prop = SlideProposer::new("slide_x", vec![id], 0.4, 1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        for _ in 0..100 {
            let proposal = prop.perturb(&mut store, &mut rng).unwrap();
            assert_eq!(proposal.log_hastings_ratio, 0.0);
            let x = store.get(id).unwrap().value(0);
            assert!((x - 5.0).abs() <= 0.2 + 1e-12);
            store.restore(&proposal.perturbed).unwrap();
        }
    }

    #[test]
    fn slide_reflects_into_bounds() {
        assert!((reflect(-0.1, 0.0, 1.0).unwrap() - 0.1).abs() < 1e-12);
        assert_eq!(reflect(1.25, 0.0, 1.0).unwrap(), 0.75);
        assert_eq!(reflect(0.5, 0.0, 1.0).unwrap(), 0.5);
        assert_eq!(reflect(2.0, 0.0, 1.0).unwrap(), 0.0);
        assert!((reflect(-3.25, -1.0, 1.0).unwrap() - 0.75).abs() < 1e-12);

        let mut store = ParameterStore::new();
        let id = store.add(DoubleParameter::new("p", 0.01));
        let mut prop = SlideProposer::new("slide_p", vec![id], 3.0, 1.0)
            .unwrap()
            .with_bounds(0.0, 1.0)
            .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..200 {
            let proposal = prop.perturb(&mut store, &mut rng).unwrap();
            let x = store.get(id).unwrap().value(0);
            assert!((0.0..=1.0).contains(&x));
            store.clear(&proposal.perturbed).unwrap();
        }
    }

    #[test]
    fn huge_window_reflects_in_constant_time() {
        let x = reflect(1e9 + 0.25, 0.0, 1.0).unwrap();
        assert!((x - 0.25).abs() < 1e-6);
        assert!(reflect(f64::INFINITY, 0.0, 1.0).is_err());
        assert!(reflect(f64::NEG_INFINITY, 0.0, 1.0).is_err());
        assert!(reflect(f64::NAN, 0.0, 1.0).is_err());

        let mut store = ParameterStore::new();
        let id = store.add(DoubleParameter::new("p", 0.5));
        let mut prop = SlideProposer::new("slide_p", vec![id], 1e12, 1.0)
            .unwrap()
            .with_bounds(0.0, 1.0)
            .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..1000 {
            let proposal = prop.perturb(&mut store, &mut rng).unwrap();
            let x = store.get(id).unwrap().value(0);
            assert!((0.0..=1.0).contains(&x));
            store.restore(&proposal.perturbed).unwrap();
        }
    }

    #[test]
    fn non_finite_slide_is_rolled_back() {
        let mut store = ParameterStore::new();
        let ok = store.add(DoubleParameter::new("ok", 0.5));
        let bad = store.add(DoubleParameter::new("bad", f64::INFINITY));
        let mut prop = SlideProposer::new("slide_both", vec![ok, bad], 0.1, 1.0)
            .unwrap()
            .with_bounds(0.0, 1.0)
            .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(6);

        let err = prop.perturb(&mut store, &mut rng).unwrap_err();
        assert!(matches!(err, SylvaError::InvalidInput(_)));
        assert_eq!(store.get(ok).unwrap().value(0), 0.5);
        assert!(store.pending().is_empty());
    }

    #[test]
    fn constructor_validation() {
        assert!(ScaleProposer::new("s", vec![ParamId(0)], 0.0, 1.0).is_err());
        assert!(ScaleProposer::new("s", vec![ParamId(0)], 1.0, -1.0).is_err());
        assert!(SlideProposer::new("s", vec![], 1.0, 1.0).is_err());
        assert!(SlideProposer::new("s", vec![ParamId(0)], 1.0, 1.0)
            .unwrap()
            .with_bounds(1.0, 1.0)
            .is_err());
    }

    #[test]
    fn weight_and_enabled_are_mutable() {
        let mut prop = ScaleProposer::new("s", vec![ParamId(0)], 1.0, 1.0).unwrap();
        prop.set_weight(3.5).unwrap();
        assert_eq!(prop.weight(), 3.5);
        assert!(prop.set_weight(-0.1).is_err());
        assert_eq!(prop.weight(), 3.5);
        prop.set_enabled(false);
        assert!(!prop.is_enabled());
    }
}
