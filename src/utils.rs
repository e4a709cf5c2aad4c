//!
//! Shared numeric types and small helpers,
//! mostly frame arithmetic and safe logs.
//!
use num_traits::{AsPrimitive, Num};
use rustfft::num_complex::Complex;

pub type Float = f32; // sample/feature type used for internal processing
pub type CFloat = Complex<Float>;

/// Floor applied before taking a log, so silent bins stay finite
pub const EPSILON: Float = Float::EPSILON;

/// Number of frames produced from `n` samples
///
/// non-centered: max(0, 1 + floor((n - frame_length) / frame_shift))
/// centered:     1 + floor(n / frame_shift)
pub fn num_frames(n: usize, frame_length: usize, frame_shift: usize, center: bool) -> usize {
    if center {
        1 + n / frame_shift
    } else if n < frame_length {
        0
    } else {
        1 + (n - frame_length) / frame_shift
    }
}

/// Natural log with values below EPSILON clamped first
pub fn floored_ln(x: Float) -> Float {
    x.max(EPSILON).ln()
}

/// Number of non-negative frequency bins for a DFT of length n
pub fn num_bins(n: usize) -> usize {
    n / 2 + 1
}

/// Signal energy
pub fn energy<T:Num+Copy>(vals: &[T]) -> T {
    vals.iter()
        .fold(T::zero(), |acc, &x| acc + x*x)
}

/// Root-mean-square average of a vector
pub fn rms<T,R>(vals: &[T]) -> R
where T:Num+Copy+AsPrimitive<R>, R:'static+num_traits::Float {
    if vals.is_empty() {
        return R::zero();
    }
    let e: R = energy(vals).as_();
    (e / R::from(vals.len()).unwrap_or_else(R::one)).sqrt()
}
