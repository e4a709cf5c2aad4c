use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SpectralError};
use crate::utils::{num_frames, Float};
use crate::window::WindowKind;

pub type SampleRate = u32;

/// How the source PCM was encoded, which decides the normalization scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Int { bits: u16 },
    Float,
}

/* Waveform: one mono recording, owned by the pipeline while a single
 * utterance is processed, then dropped.
 *
 * Integer PCM is stored at its integer scale (an i16 sample of 1000
 * becomes 1000.0) until normalize() is called.
 */
#[derive(Clone, Debug)]
pub struct Waveform {
    data: Vec<Float>,
    fs: SampleRate,
    format: SampleFormat,
}

impl Waveform {
    pub fn new(data: Vec<Float>, fs: SampleRate, format: SampleFormat) -> Self {
        Self { data, fs, format }
    }

    // sample rate (hz)
    pub fn fs(&self) -> SampleRate {
        self.fs
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    // reference to internal samples
    pub fn data(&self) -> &[Float] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Rescale integer PCM into [-1, 1] by dividing by 2^(bits-1).
    /// Float PCM is already in range and is left alone.
    pub fn normalize(&mut self) {
        if let SampleFormat::Int { bits } = self.format {
            let scale = 1.0 / (1u64 << (bits.max(1) - 1)) as Float;
            for x in self.data.iter_mut() {
                *x *= scale;
            }
            self.format = SampleFormat::Float;
        }
    }

    /// Iterate over overlapping frames of this waveform
    pub fn frames<'a>(&'a self, config: &FrameConfig) -> Frames<'a> {
        Frames::new(&self.data, config)
    }
}

/// Padding used at the boundaries when frames are centered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PadMode {
    /// mirror around the edge sample without repeating it
    #[default]
    Reflect,
    /// zeros
    Constant,
}

impl FromStr for PadMode {
    type Err = SpectralError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reflect" => Ok(PadMode::Reflect),
            "constant" | "zero" | "zeros" => Ok(PadMode::Constant),
            other => Err(SpectralError::InvalidConfig(format!("unknown pad mode '{other}'"))),
        }
    }
}

impl fmt::Display for PadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PadMode::Reflect => f.write_str("reflect"),
            PadMode::Constant => f.write_str("constant"),
        }
    }
}

/// Framing policy, fixed for a whole run
#[derive(Debug, Clone, PartialEq)]
pub struct FrameConfig {
    pub frame_length: usize,
    pub frame_shift: usize,
    pub window: WindowKind,
    pub center: bool,
    pub pad_mode: PadMode,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frame_length: 1024,
            frame_shift: 256,
            window: WindowKind::Hann,
            center: false,
            pad_mode: PadMode::Reflect,
        }
    }
}

impl FrameConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frame_length == 0 {
            return Err(SpectralError::InvalidConfig("frame_length must be > 0".into()));
        }
        if self.frame_shift == 0 {
            return Err(SpectralError::InvalidConfig("frame_shift must be > 0".into()));
        }
        if self.frame_shift > self.frame_length {
            tracing::warn!(
                frame_length = self.frame_length,
                frame_shift = self.frame_shift,
                "frame shift exceeds frame length, some samples will be skipped"
            );
        }
        Ok(())
    }

    pub fn num_frames(&self, nsamp: usize) -> usize {
        num_frames(nsamp, self.frame_length, self.frame_shift, self.center)
    }
}

/*
 * Frames: lazily slices a sample buffer into overlapping frames.
 *
 * Not centered: frame i covers [i*shift, i*shift + len), trailing
 * samples that don't fill a whole frame are dropped.
 * Centered: frame i is centered on sample i*shift, with len/2 samples
 * of padding on either side.
 */
pub struct Frames<'a> {
    samples: &'a [Float],
    frame_length: usize,
    frame_shift: usize,
    offset: usize, // padding to the left of sample 0
    pad_mode: PadMode,
    pos: usize,
    count: usize,
}

impl<'a> Frames<'a> {
    pub fn new(samples: &'a [Float], config: &FrameConfig) -> Self {
        let offset = if config.center { config.frame_length / 2 } else { 0 };
        Self {
            samples,
            frame_length: config.frame_length,
            frame_shift: config.frame_shift,
            offset,
            pad_mode: config.pad_mode,
            pos: 0,
            count: config.num_frames(samples.len()),
        }
    }

    // sample at a (possibly out of range) position
    fn sample_at(&self, idx: isize) -> Float {
        let n = self.samples.len();
        if idx >= 0 && (idx as usize) < n {
            return self.samples[idx as usize];
        }
        match self.pad_mode {
            PadMode::Constant => 0.0,
            PadMode::Reflect => match n {
                0 => 0.0,
                1 => self.samples[0],
                _ => self.samples[reflect_index(idx, n)],
            },
        }
    }

    /// Copy frame number `i` into `out` (len = frame_length)
    pub fn fill(&self, i: usize, out: &mut [Float]) {
        let start = (i * self.frame_shift) as isize - self.offset as isize;
        if start >= 0 && start as usize + self.frame_length <= self.samples.len() {
            let start = start as usize;
            out.copy_from_slice(&self.samples[start..start + self.frame_length]);
        } else {
            for (j, x) in out.iter_mut().enumerate() {
                *x = self.sample_at(start + j as isize);
            }
        }
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }
}

// fold an index into [0, n) by mirroring around the end samples
fn reflect_index(idx: isize, n: usize) -> usize {
    let period = 2 * (n as isize - 1);
    let q = idx.rem_euclid(period);
    if q >= n as isize {
        (period - q) as usize
    } else {
        q as usize
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Vec<Float>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.count {
            return None;
        }
        let mut frame = vec![0.0; self.frame_length];
        self.fill(self.pos, &mut frame);
        self.pos += 1;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.count - self.pos;
        (left, Some(left))
    }
}

impl<'a> ExactSizeIterator for Frames<'a> {}
