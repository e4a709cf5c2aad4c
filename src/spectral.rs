use std::sync::Arc;

use ndarray::Array2;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use rustfft::Fft;

use crate::buffers::{FrameConfig, Frames};
use crate::error::{Result, SpectralError};
use crate::fft::{HalfSpectrum, DFT};
use crate::utils::{num_bins, CFloat, Float};

/* StftBuilder: short-time fourier transform of one utterance.
 *
 * Frames the samples, windows each frame and keeps the
 * non-negative half of its spectrum. The planner and window are
 * reused across utterances.
 */
pub struct StftBuilder {
    config: FrameConfig,
    window: Vec<Float>,
    fft: DFT,
}

impl StftBuilder {
    pub fn new(config: FrameConfig) -> Result<Self> {
        config.validate()?;
        let window = config.window.coefficients(config.frame_length);
        Ok(Self { config, window, fft: DFT::new() })
    }

    pub fn nbins(&self) -> usize {
        num_bins(self.config.frame_length)
    }

    /// Complex spectra with shape (n_frames, n_bins), frames in time order.
    /// Fewer samples than one frame gives a (0, n_bins) array.
    pub fn build(&mut self, samples: &[Float]) -> Result<Array2<CFloat>> {
        let frames = Frames::new(samples, &self.config);
        let ntimes = frames.len();
        let nbins = self.nbins();
        let fft = self.fft.plan(self.config.frame_length);
        let mut data = vec![CFloat::default(); ntimes * nbins];

        #[cfg(feature = "rayon")]
        self.fill_parallel(&frames, fft, &mut data);
        #[cfg(not(feature = "rayon"))]
        self.fill_sequential(frames, fft, &mut data);

        Array2::from_shape_vec((ntimes, nbins), data)
            .map_err(|e| SpectralError::InvalidConfig(format!("bad stft shape: {e}")))
    }

    #[cfg(feature = "rayon")]
    fn fill_parallel(&self, frames: &Frames<'_>, fft: Arc<dyn Fft<Float>>, data: &mut [CFloat]) {
        let nbins = self.nbins();
        data.par_chunks_mut(nbins)
            .enumerate()
            .for_each_init(
                || (HalfSpectrum::new(fft.clone()), vec![0.0; frames.frame_length()]),
                |(spectrum, frame), (t, row)| {
                    frames.fill(t, frame);
                    spectrum.process(frame, &self.window, row);
                },
            );
    }

    #[cfg(any(test, not(feature = "rayon")))]
    fn fill_sequential(&self, frames: Frames<'_>, fft: Arc<dyn Fft<Float>>, data: &mut [CFloat]) {
        let mut spectrum = HalfSpectrum::new(fft);
        for (frame, row) in frames.zip(data.chunks_mut(self.nbins())) {
            spectrum.process(&frame, &self.window, row);
        }
    }
}
