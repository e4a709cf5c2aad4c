// std lib imports
use std::sync::Arc;
// external crates
use itertools::Itertools;
use rustfft::{num_complex::Complex, Fft, FftPlanner, Length};
// local crates
use crate::utils::{num_bins, CFloat, Float};

/* Discrete fourier transform planner
 *
 * Keeps the last plan around, since every frame of a run
 * shares the same length.
 */
pub struct DFT {
    planner: FftPlanner<Float>,
    plan: Option<Arc<dyn Fft<Float>>>,
}

impl DFT {
    pub fn new() -> Self {
        Self { planner: FftPlanner::new(), plan: None }
    }

    // forward plan of length n (cached)
    pub fn plan(&mut self, n: usize) -> Arc<dyn Fft<Float>> {
        match &self.plan {
            Some(fft) if fft.len() == n => Arc::clone(fft),
            _ => {
                let fft = self.planner.plan_fft_forward(n);
                self.plan = Some(Arc::clone(&fft));
                fft
            }
        }
    }
}

impl Default for DFT {
    fn default() -> Self {
        Self::new()
    }
}

/* HalfSpectrum: windowed DFT of a single real frame, keeping only the
 * n/2 + 1 non-negative frequency bins.
 *
 * Owns its work buffers, so one instance is needed per thread.
 */
pub struct HalfSpectrum {
    fft: Arc<dyn Fft<Float>>,
    buf: Vec<CFloat>,
    scratch: Vec<CFloat>,
}

impl HalfSpectrum {
    pub fn new(fft: Arc<dyn Fft<Float>>) -> Self {
        let n = fft.len();
        let scratch = vec![CFloat::default(); fft.get_inplace_scratch_len()];
        Self { fft, buf: vec![CFloat::default(); n], scratch }
    }

    // DFT length
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn nbins(&self) -> usize {
        num_bins(self.len())
    }

    /// frame, window: len() samples; out: nbins() coefficients
    pub fn process(&mut self, frame: &[Float], window: &[Float], out: &mut [CFloat]) {
        for (z, (&x, &w)) in self.buf.iter_mut().zip_eq(frame.iter().zip_eq(window)) {
            *z = Complex::new(x * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buf, &mut self.scratch);
        out.copy_from_slice(&self.buf[..out.len()]);
    }
}
