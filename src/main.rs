use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use spectral_ark::{
    compute_spectrogram, ErrorPolicy, FrameConfig, PadMode, PostConfig, SpectrogramConfig,
    UtteranceCatalog, WavLoader, WindowKind,
};

/// Extract spectrogram features and write them as a binary matrix archive
#[derive(Parser)]
#[command(name = "compute-spectrogram")]
#[command(version)]
struct Cli {
    /// Catalog of "<key> <wav path or command |>" lines
    wav_scp: PathBuf,

    /// Archive to write features into
    dup_ark: PathBuf,

    /// If given, also write an index of "<key> <archive>:<offset>" lines
    #[arg(long)]
    scp: Option<PathBuf>,

    /// Frame length in number of samples
    #[arg(long, default_value_t = 1024)]
    frame_length: usize,

    /// Frame shift in number of samples
    #[arg(long, default_value_t = 256)]
    frame_shift: usize,

    /// Center frames on multiples of the shift (pads both ends)
    #[arg(long)]
    center: bool,

    /// Padding used with --center: reflect or constant
    #[arg(long, default_value_t = PadMode::Reflect)]
    pad_mode: PadMode,

    /// Use the log spectrogram instead of the linear one
    #[arg(long)]
    apply_log: bool,

    /// Extract the power spectrogram
    #[arg(long)]
    apply_pow: bool,

    /// Normalize integer samples into [-1, 1] before framing
    #[arg(long = "normalize-samples")]
    normalize: bool,

    /// Window function: hann, hamming, blackman, bartlett or rect
    #[arg(long, default_value_t = WindowKind::Hann)]
    window: WindowKind,

    /// Write frequency x time matrices instead of time x frequency
    #[arg(long)]
    no_transpose: bool,

    /// Stop at the first utterance whose audio can't be loaded
    #[arg(long)]
    abort_on_error: bool,
}

impl Cli {
    fn config(&self) -> SpectrogramConfig {
        SpectrogramConfig {
            frame: FrameConfig {
                frame_length: self.frame_length,
                frame_shift: self.frame_shift,
                window: self.window,
                center: self.center,
                pad_mode: self.pad_mode,
            },
            post: PostConfig {
                apply_abs: true,
                apply_pow: self.apply_pow,
                apply_log: self.apply_log,
                normalize: self.normalize,
                transpose: !self.no_transpose,
            },
            on_error: if self.abort_on_error { ErrorPolicy::Abort } else { ErrorPolicy::Skip },
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    let catalog = UtteranceCatalog::open(&cli.wav_scp)
        .with_context(|| format!("failed to read catalog {}", cli.wav_scp.display()))?;
    compute_spectrogram(catalog, WavLoader, &config, &cli.dup_ark, cli.scp.as_deref())
        .with_context(|| format!("failed to write {}", cli.dup_ark.display()))?;
    Ok(())
}
