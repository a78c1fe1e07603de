//! Internal rescaling of parameter values.
//!
//! Some state parameters are held in a rescaled form for numerical
//! stability (e.g. branch lengths relative to tree height). Samples are
//! always reported in unscaled units.

use sylva_core::{Result, SylvaError};

/// A linear rescaling `scaled = unscaled / factor`.
///
/// The factor is strictly positive and finite, so the mapping is monotonic
/// and invertible.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScaleTransformation {
    factor: f64,
}

impl ScaleTransformation {
    /// Create a transformation with the given scale factor.
    ///
    /// # Errors
    ///
    /// Returns an error unless `factor` is finite and `> 0`.
    pub fn new(factor: f64) -> Result<Self> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(SylvaError::InvalidInput(format!(
                "scale factor must be finite and positive, got {factor}"
            )));
        }
        Ok(Self { factor })
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Map an internal (scaled) value back to model units.
    #[inline]
    pub fn unscaled(&self, scaled: f64) -> f64 {
        scaled * self.factor
    }

    /// Map a model-unit value to its internal (scaled) form.
    #[inline]
    pub fn scaled(&self, unscaled: f64) -> f64 {
        unscaled / self.factor
    }
}
