pub mod archive;
pub mod buffers;
pub mod catalog;
pub mod error;
pub mod fft;
pub mod fileio;
pub mod index;
pub mod pipeline;
pub mod postprocess;
pub mod spectral;
pub mod utils;
pub mod window;

pub use archive::{read_archive, ArchiveReader, ArchiveWriter, SequentialReader};
pub use buffers::{FrameConfig, PadMode, SampleFormat, Waveform};
pub use catalog::{CatalogEntry, UtteranceCatalog};
pub use error::{Result, SpectralError};
pub use fileio::{load_waveform, WavLoader, WaveformSource};
pub use index::{IndexEntry, IndexTable};
pub use pipeline::{compute_spectrogram, ErrorPolicy, PipelineSummary, SpectrogramConfig, SpectrogramPipeline};
pub use postprocess::PostConfig;
pub use utils::Float;
pub use window::WindowKind;
