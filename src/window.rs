use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

use crate::error::SpectralError;
use crate::utils::Float;

/* WindowKind: taper applied to each frame before the DFT
 *
 * All windows are periodic (DFT-even): a symmetric window of
 * length n+1 with the last point dropped.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowKind {
    #[default]
    Hann,
    Hamming,
    Blackman,
    Bartlett,
    Rectangular,
}

impl WindowKind {
    /// Window coefficients of length n
    pub fn coefficients(&self, n: usize) -> Vec<Float> {
        if n <= 1 {
            return vec![1.0; n];
        }
        let m = n as f64;
        (0..n)
            .map(|k| {
                let x = k as f64 / m;
                let w = match self {
                    WindowKind::Hann => 0.5 - 0.5 * (TAU * x).cos(),
                    WindowKind::Hamming => 0.54 - 0.46 * (TAU * x).cos(),
                    WindowKind::Blackman => {
                        0.42 - 0.5 * (TAU * x).cos() + 0.08 * (2.0 * TAU * x).cos()
                    }
                    WindowKind::Bartlett => 1.0 - (2.0 * x - 1.0).abs(),
                    WindowKind::Rectangular => 1.0,
                };
                w as Float
            })
            .collect()
    }

    pub fn name(&self) -> &'static str {
        match self {
            WindowKind::Hann => "hann",
            WindowKind::Hamming => "hamming",
            WindowKind::Blackman => "blackman",
            WindowKind::Bartlett => "bartlett",
            WindowKind::Rectangular => "rect",
        }
    }
}

impl FromStr for WindowKind {
    type Err = SpectralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hann" | "hanning" => Ok(WindowKind::Hann),
            "hamming" => Ok(WindowKind::Hamming),
            "blackman" => Ok(WindowKind::Blackman),
            "bartlett" | "triangle" => Ok(WindowKind::Bartlett),
            "rect" | "rectangular" | "boxcar" | "none" => Ok(WindowKind::Rectangular),
            other => Err(SpectralError::InvalidConfig(format!(
                "unknown window function '{other}'"
            ))),
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
