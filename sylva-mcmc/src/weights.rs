//! Normalized accumulated weight tables for inverse-CDF sampling.

use sylva_core::{Result, SylvaError};

/// A non-decreasing cumulative distribution over `len()` discrete outcomes.
///
/// Built from non-negative relative weights. The last entry is forced to
/// exactly `1.0`, so a uniform draw in `[0, 1]` always maps to an outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatedWeights {
    acc: Vec<f64>,
}

impl AccumulatedWeights {
    /// Accumulate and normalize `weights`.
    ///
    /// # Errors
    ///
    /// Returns an error if `weights` is empty, contains a negative or
    /// non-finite entry, or sums to zero.
    pub fn from_weights(weights: &[f64]) -> Result<Self> {
        let (acc, tot) = accumulate(weights)?;
        if tot <= 0.0 {
            return Err(SylvaError::InvalidInput(
                "weight table must have a positive total".into(),
            ));
        }
        Ok(Self::normalized(acc, tot))
    }

    /// Like [`from_weights`](Self::from_weights), but a table whose
    /// weights are all zero becomes uniform instead of an error.
    ///
    /// # Errors
    ///
    /// Returns an error if `weights` is empty or contains a negative or
    /// non-finite entry.
    pub fn from_weights_or_uniform(weights: &[f64]) -> Result<Self> {
        let (acc, tot) = accumulate(weights)?;
        if tot <= 0.0 {
            return Ok(Self::uniform(weights.len()));
        }
        Ok(Self::normalized(acc, tot))
    }

    /// Equal probability for each of `n` outcomes.
    fn uniform(n: usize) -> Self {
        let n_f = n as f64;
        let mut acc: Vec<f64> = (1..=n).map(|i| i as f64 / n_f).collect();
        if let Some(last) = acc.last_mut() {
            *last = 1.0;
        }
        Self { acc }
    }

    fn normalized(mut acc: Vec<f64>, tot: f64) -> Self {
        for a in acc.iter_mut() {
            *a /= tot;
        }
        // Round-off guard.
        let last = acc.len() - 1;
        acc[last] = 1.0;
        Self { acc }
    }

    /// A table with a single outcome of probability one.
    pub fn single() -> Self {
        Self { acc: vec![1.0] }
    }

    pub fn len(&self) -> usize {
        self.acc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acc.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.acc
    }

    /// Map a uniform draw `u` to the first outcome whose accumulated weight
    /// is `>= u`. Zero-weight outcomes are never returned.
    #[inline]
    pub fn sample_index(&self, u: f64) -> usize {
        let last = self.acc.len() - 1;
        let mut i = self.acc.partition_point(|&a| a < u).min(last);
        // Only reachable for u == 0.0 with leading zero-weight outcomes.
        while i < last && self.bucket_is_empty(i) {
            i += 1;
        }
        i
    }

    fn bucket_is_empty(&self, i: usize) -> bool {
        let lo = if i == 0 { 0.0 } else { self.acc[i - 1] };
        self.acc[i] <= lo
    }
}

/// Running sums of `weights` and their total.
fn accumulate(weights: &[f64]) -> Result<(Vec<f64>, f64)> {
    if weights.is_empty() {
        return Err(SylvaError::InvalidInput(
            "weight table must not be empty".into(),
        ));
    }
    let mut acc = Vec::with_capacity(weights.len());
    let mut tot = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        if !w.is_finite() || w < 0.0 {
            return Err(SylvaError::InvalidInput(format!(
                "weight {i} must be finite and non-negative, got {w}"
            )));
        }
        tot += w;
        acc.push(tot);
    }
    Ok((acc, tot))
}
