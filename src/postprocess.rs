//!
//! Turns complex spectra into real features.
//!
//! The order is fixed: magnitude, then power, then log.
//! Sample normalization is a waveform step (see `Waveform::normalize`),
//! it is flagged here because it changes the scale of everything after it.
//!
use ndarray::Array2;

use crate::error::{Result, SpectralError};
use crate::utils::{floored_ln, CFloat, Float};

#[derive(Debug, Clone, PartialEq)]
pub struct PostConfig {
    pub apply_abs: bool,
    pub apply_pow: bool,
    /// natural log of max(x, EPSILON)
    pub apply_log: bool,
    /// rescale integer samples into [-1, 1] before framing
    pub normalize: bool,
    /// true: (time, frequency), false: (frequency, time)
    pub transpose: bool,
}

impl Default for PostConfig {
    fn default() -> Self {
        Self {
            apply_abs: true,
            apply_pow: false,
            apply_log: false,
            normalize: false,
            transpose: true,
        }
    }
}

impl PostConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.apply_abs {
            return Err(SpectralError::InvalidConfig(
                "apply_abs must be set, complex spectra can't be archived".into(),
            ));
        }
        Ok(())
    }

    /// abs -> pow -> log on a single coefficient
    pub fn apply(&self, z: CFloat) -> Float {
        let mut x = z.norm();
        if self.apply_pow {
            x = x * x;
        }
        if self.apply_log {
            x = floored_ln(x);
        }
        x
    }
}

/// Map spectra of shape (n_frames, n_bins) to real features, laid out
/// according to `config.transpose`. The result is always in standard
/// (row-major) layout.
pub fn post_process(spectra: &Array2<CFloat>, config: &PostConfig) -> Array2<Float> {
    let feats = spectra.mapv(|z| config.apply(z));
    if config.transpose {
        feats
    } else {
        feats.reversed_axes().as_standard_layout().into_owned()
    }
}
