//! State parameters with single-slot cache/restore semantics.
//!
//! A state parameter is the smallest unit of model state a proposer can
//! perturb. Before a perturbation the proposer caches the parameter; the
//! sampler then either clears the cache (accept) or restores from it
//! (reject). The cache holds at most one snapshot at a time.

use std::fmt;

use sylva_core::{Annotated, Result, Sampleable, SylvaError};
use tracing::warn;

use crate::transform::ScaleTransformation;

/// Single-slot snapshot of a parameter's value(s).
#[derive(Debug, Clone, PartialEq)]
pub enum Cache<T> {
    /// No perturbation is pending.
    Absent,
    /// Complete snapshot taken before the pending perturbation.
    Present(T),
}

impl<T> Default for Cache<T> {
    fn default() -> Self {
        Cache::Absent
    }
}

impl<T> Cache<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Cache::Present(_))
    }

    /// Store a snapshot. Fails if one is already held.
    pub fn store(&mut self, owner: &str, snapshot: T) -> Result<()> {
        if self.is_present() {
            return Err(SylvaError::Protocol(format!(
                "parameter '{owner}' is already cached"
            )));
        }
        *self = Cache::Present(snapshot);
        Ok(())
    }

    /// Remove and return the snapshot. Fails if none is held.
    pub fn take(&mut self, owner: &str) -> Result<T> {
        match std::mem::take(self) {
            Cache::Present(snapshot) => Ok(snapshot),
            Cache::Absent => Err(SylvaError::Protocol(format!(
                "cannot restore parameter '{owner}' without a cache"
            ))),
        }
    }

    pub fn clear(&mut self) {
        *self = Cache::Absent;
    }
}

/// A named, mutable unit of model state with cache/restore semantics.
///
/// `value` and `set_value` are the hot path used by proposers: the index
/// must be below [`Sampleable::n_sub_params`], which the caller guarantees.
/// Scalars ignore the index; vectors index directly into their storage.
/// Use [`try_value`](StateParameter::try_value) and
/// [`try_set_value`](StateParameter::try_set_value) off the hot path.
pub trait StateParameter: Sampleable + fmt::Debug {
    /// Snapshot the current value(s).
    ///
    /// # Errors
    ///
    /// Returns [`SylvaError::Protocol`] if a snapshot is already held.
    fn cache(&mut self) -> Result<()>;

    /// Discard the snapshot without restoring. No-op when none is held.
    fn clear_cache(&mut self);

    /// Overwrite the current value(s) with the snapshot and discard it.
    ///
    /// # Errors
    ///
    /// Returns [`SylvaError::Protocol`] if no snapshot is held.
    fn restore_cache(&mut self) -> Result<()>;

    fn has_cache(&self) -> bool;

    /// Internal (possibly scaled) value at `idx`.
    fn value(&self, idx: usize) -> f64;

    /// Set the internal (possibly scaled) value at `idx`.
    fn set_value(&mut self, idx: usize, value: f64);

    /// Bounds-checked [`value`](StateParameter::value).
    fn try_value(&self, idx: usize) -> Result<f64> {
        check_index(self.name(), idx, self.n_sub_params())?;
        Ok(self.value(idx))
    }

    /// Bounds-checked [`set_value`](StateParameter::set_value).
    fn try_set_value(&mut self, idx: usize, value: f64) -> Result<()> {
        check_index(self.name(), idx, self.n_sub_params())?;
        self.set_value(idx, value);
        Ok(())
    }
}

fn check_index(name: &str, idx: usize, len: usize) -> Result<()> {
    if idx >= len {
        return Err(SylvaError::InvalidInput(format!(
            "index {idx} out of range for parameter '{name}' with {len} sub-parameter(s)"
        )));
    }
    Ok(())
}

fn unscaled(scale: Option<&ScaleTransformation>, v: f64) -> f64 {
    scale.map_or(v, |s| s.unscaled(v))
}

/// Holds a single floating point state parameter.
#[derive(Debug, Clone)]
pub struct DoubleParameter {
    name: String,
    value: f64,
    cache: Cache<f64>,
    scale: Option<ScaleTransformation>,
}

impl DoubleParameter {
    pub fn new(name: impl Into<String>, init: f64) -> Self {
        Self {
            name: name.into(),
            value: init,
            cache: Cache::Absent,
            scale: None,
        }
    }

    /// Create a parameter held internally in scaled form. `init` is given
    /// in scaled form; samples are reported unscaled.
    pub fn with_scale(name: impl Into<String>, scale: ScaleTransformation, init: f64) -> Self {
        Self {
            scale: Some(scale),
            ..Self::new(name, init)
        }
    }

    pub fn get(&self) -> f64 {
        self.value
    }

    pub fn set(&mut self, value: f64) {
        self.value = value;
    }

    pub fn scale(&self) -> Option<&ScaleTransformation> {
        self.scale.as_ref()
    }

    /// Current value in model units.
    pub fn unscaled(&self) -> f64 {
        unscaled(self.scale.as_ref(), self.value)
    }
}

impl Annotated for DoubleParameter {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Sampleable for DoubleParameter {
    fn sample_value(&self) -> String {
        format!("{}", self.unscaled())
    }

    fn n_sub_params(&self) -> usize {
        1
    }
}

impl StateParameter for DoubleParameter {
    fn cache(&mut self) -> Result<()> {
        self.cache.store(&self.name, self.value)
    }

    fn clear_cache(&mut self) {
        self.cache.clear();
    }

    fn restore_cache(&mut self) -> Result<()> {
        self.value = self.cache.take(&self.name)?;
        Ok(())
    }

    fn has_cache(&self) -> bool {
        self.cache.is_present()
    }

    #[inline]
    fn value(&self, idx: usize) -> f64 {
        debug_assert_eq!(idx, 0, "scalar parameter '{}' has one sub-parameter", self.name);
        self.value
    }

    #[inline]
    fn set_value(&mut self, idx: usize, value: f64) {
        debug_assert_eq!(idx, 0, "scalar parameter '{}' has one sub-parameter", self.name);
        self.value = value;
    }
}

/// Holds a fixed-length vector of floating point state parameters, e.g.
/// the exchangeability rates of a substitution model.
#[derive(Debug, Clone)]
pub struct DoubleArrayParameter {
    name: String,
    values: Vec<f64>,
    cache: Cache<Vec<f64>>,
    scale: Option<ScaleTransformation>,
}

impl DoubleArrayParameter {
    /// # Errors
    ///
    /// Returns an error if `init` is empty.
    pub fn new(name: impl Into<String>, init: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if init.is_empty() {
            return Err(SylvaError::InvalidInput(format!(
                "vector parameter '{name}' needs at least one sub-parameter"
            )));
        }
        Ok(Self {
            name,
            values: init,
            cache: Cache::Absent,
            scale: None,
        })
    }

    pub fn with_scale(
        name: impl Into<String>,
        scale: ScaleTransformation,
        init: Vec<f64>,
    ) -> Result<Self> {
        let mut p = Self::new(name, init)?;
        p.scale = Some(scale);
        Ok(p)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Annotated for DoubleArrayParameter {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Sampleable for DoubleArrayParameter {
    fn sample_value(&self) -> String {
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|&v| format!("{}", unscaled(self.scale.as_ref(), v)))
            .collect();
        format!("[{}]", parts.join(", "))
    }

    fn n_sub_params(&self) -> usize {
        self.values.len()
    }
}

impl StateParameter for DoubleArrayParameter {
    fn cache(&mut self) -> Result<()> {
        self.cache.store(&self.name, self.values.clone())
    }

    fn clear_cache(&mut self) {
        self.cache.clear();
    }

    fn restore_cache(&mut self) -> Result<()> {
        self.values = self.cache.take(&self.name)?;
        Ok(())
    }

    fn has_cache(&self) -> bool {
        self.cache.is_present()
    }

    #[inline]
    fn value(&self, idx: usize) -> f64 {
        self.values[idx]
    }

    #[inline]
    fn set_value(&mut self, idx: usize, value: f64) {
        self.values[idx] = value;
    }
}

/// Identifier of a parameter registered in a [`ParameterStore`].
///
/// Ids are the unit of identity for overlap detection between proposers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParamId(pub usize);

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "param#{}", self.0)
    }
}

/// Owns every state parameter of a model, addressed by [`ParamId`].
#[derive(Debug, Default)]
pub struct ParameterStore {
    params: Vec<Box<dyn StateParameter>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter and return its id.
    pub fn add<P: StateParameter + 'static>(&mut self, param: P) -> ParamId {
        self.params.push(Box::new(param));
        ParamId(self.params.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, id: ParamId) -> Result<&dyn StateParameter> {
        self.params
            .get(id.0)
            .map(|p| p.as_ref())
            .ok_or_else(|| unknown(id))
    }

    pub fn get_mut(&mut self, id: ParamId) -> Result<&mut dyn StateParameter> {
        match self.params.get_mut(id.0) {
            Some(p) => Ok(p.as_mut()),
            None => Err(unknown(id)),
        }
    }

    pub fn contains(&self, id: ParamId) -> bool {
        id.0 < self.params.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &dyn StateParameter)> {
        self.params
            .iter()
            .enumerate()
            .map(|(i, p)| (ParamId(i), p.as_ref()))
    }

    /// Ids of all parameters currently holding a cache.
    pub fn pending(&self) -> Vec<ParamId> {
        self.iter()
            .filter(|(_, p)| p.has_cache())
            .map(|(id, _)| id)
            .collect()
    }

    /// Restore every listed parameter from its cache.
    ///
    /// A failure does not stop the pass: the remaining parameters are still
    /// restored, and the first error is returned at the end.
    pub fn restore(&mut self, ids: &[ParamId]) -> Result<()> {
        let mut first = None;
        for &id in ids {
            if let Err(e) = self.get_mut(id).and_then(|p| p.restore_cache()) {
                warn!(param = %id, error = %e, "could not restore parameter");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Discard the cache of every listed parameter.
    pub fn clear(&mut self, ids: &[ParamId]) -> Result<()> {
        for &id in ids {
            self.get_mut(id)?.clear_cache();
        }
        Ok(())
    }
}

fn unknown(id: ParamId) -> SylvaError {
    SylvaError::InvalidInput(format!("unknown state parameter {id}"))
}
