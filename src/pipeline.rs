use std::fmt;
use std::path::Path;

use ndarray::Array2;
use tracing::{debug, info, warn, Level};

use crate::archive::ArchiveWriter;
use crate::buffers::{FrameConfig, Waveform};
use crate::catalog::{UtteranceCatalog, Utterances};
use crate::error::{Result, SpectralError};
use crate::fileio::WaveformSource;
use crate::postprocess::{post_process, PostConfig};
use crate::spectral::StftBuilder;
use crate::utils::{rms, Float};

/// What to do when an utterance's audio can't be loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// log it, count it, move on to the next utterance
    #[default]
    Skip,
    /// stop the run with the error
    Abort,
}

/// Everything that shapes the features of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrogramConfig {
    pub frame: FrameConfig,
    pub post: PostConfig,
    pub on_error: ErrorPolicy,
}

impl SpectrogramConfig {
    pub fn validate(&self) -> Result<()> {
        self.frame.validate()?;
        self.post.validate()
    }
}

/* SpectrogramPipeline: catalog -> frames -> spectra -> features.
 *
 * Pull-based: each next() loads, transforms and drops exactly one
 * utterance. Audio load failures are handled per `ErrorPolicy`;
 * every other error is passed through.
 */
pub struct SpectrogramPipeline<L> {
    utterances: Utterances<L>,
    stft: StftBuilder,
    post: PostConfig,
    on_error: ErrorPolicy,
    skipped: usize,
}

impl<L: WaveformSource> SpectrogramPipeline<L> {
    pub fn new(catalog: UtteranceCatalog, loader: L, config: &SpectrogramConfig) -> Result<Self> {
        config.validate()?;
        let duplicates = catalog.duplicate_keys();
        if !duplicates.is_empty() {
            warn!(keys = ?duplicates, "catalog has duplicate keys");
        }
        Ok(Self {
            utterances: catalog.utterances(loader),
            stft: StftBuilder::new(config.frame.clone())?,
            post: config.post.clone(),
            on_error: config.on_error,
            skipped: 0,
        })
    }

    /// Utterances dropped so far under `ErrorPolicy::Skip`
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Features of one waveform
    pub fn extract(&mut self, mut wav: Waveform) -> Result<Array2<Float>> {
        if self.post.normalize {
            wav.normalize();
        }
        let spectra = self.stft.build(wav.data())?;
        Ok(post_process(&spectra, &self.post))
    }
}

impl<L: WaveformSource> Iterator for SpectrogramPipeline<L> {
    type Item = Result<(String, Array2<Float>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.utterances.next()? {
                Ok((key, wav)) => {
                    let nsamp = wav.len();
                    let level = tracing::enabled!(Level::DEBUG).then(|| rms::<_, Float>(wav.data()));
                    let item = self.extract(wav).map(|feats| {
                        debug!(key, samples = nsamp, rms = ?level, shape = ?feats.dim(), "extracted");
                        if feats.is_empty() {
                            debug!(key, "utterance shorter than one frame");
                        }
                        (key, feats)
                    });
                    return Some(item);
                }
                Err(SpectralError::AudioLoadFailure { key, source_spec, source })
                    if self.on_error == ErrorPolicy::Skip =>
                {
                    warn!(key = %key, source = %source_spec, error = %source, "skipping utterance");
                    self.skipped += 1;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Counts reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub processed: usize,
    pub skipped: usize,
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Process {} utterances", self.processed)?;
        if self.skipped > 0 {
            write!(f, " ({} skipped)", self.skipped)?;
        }
        Ok(())
    }
}

/// Extract features for every catalog entry and write them to `ark_path`
/// (plus an index at `index_path`, if given).
///
/// Config errors surface before any file is created. The archive is
/// closed on every exit path and the summary is logged even when the
/// run stops early or never starts.
pub fn compute_spectrogram<L: WaveformSource>(
    catalog: UtteranceCatalog,
    loader: L,
    config: &SpectrogramConfig,
    ark_path: &Path,
    index_path: Option<&Path>,
) -> Result<PipelineSummary> {
    let (summary, outcome) = run(catalog, loader, config, ark_path, index_path);
    info!("{summary}");
    outcome.map(|()| summary)
}

// the summary is meaningful even when the run fails
fn run<L: WaveformSource>(
    catalog: UtteranceCatalog,
    loader: L,
    config: &SpectrogramConfig,
    ark_path: &Path,
    index_path: Option<&Path>,
) -> (PipelineSummary, Result<()>) {
    let mut pipeline = match SpectrogramPipeline::new(catalog, loader, config) {
        Ok(p) => p,
        Err(e) => return (PipelineSummary::default(), Err(e)),
    };
    let mut writer = match ArchiveWriter::open(ark_path, index_path) {
        Ok(w) => w,
        Err(e) => return (PipelineSummary::default(), Err(e)),
    };

    let drained = drain(&mut pipeline, &mut writer);
    let closed = writer.close();

    let processed = match &drained {
        Ok(n) | Err((n, _)) => *n,
    };
    let summary = PipelineSummary { processed, skipped: pipeline.skipped() };
    let outcome = drained.map_err(|(_, e)| e).and(closed.map(|_| ()));
    (summary, outcome)
}

// write until the pipeline ends or fails, counting written records
fn drain<L: WaveformSource>(
    pipeline: &mut SpectrogramPipeline<L>,
    writer: &mut ArchiveWriter,
) -> std::result::Result<usize, (usize, SpectralError)> {
    let mut processed = 0;
    for item in pipeline {
        let written = item.and_then(|(key, feats)| writer.write(&key, &feats.view()));
        if let Err(e) = written {
            return Err((processed, e));
        }
        processed += 1;
    }
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::read_archive;
    use crate::buffers::SampleFormat;
    use crate::utils::EPSILON;

    // "<n>" -> n samples of a constant, "<n>i16" -> integer scale, anything else fails
    fn fake_loader(source: &str) -> Result<Waveform> {
        if let Some(n) = source.strip_suffix("i16").and_then(|s| s.parse().ok()) {
            return Ok(Waveform::new(vec![16384.0; n], 16000, SampleFormat::Int { bits: 16 }));
        }
        match source.parse::<usize>() {
            Ok(n) => Ok(Waveform::new(vec![0.5; n], 16000, SampleFormat::Float)),
            Err(_) => Err(SpectralError::InvalidConfig(format!("can't open {source}"))),
        }
    }

    fn small_config() -> SpectrogramConfig {
        SpectrogramConfig {
            frame: FrameConfig { frame_length: 16, frame_shift: 4, ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn test_lazy_shapes() {
        let cat: UtteranceCatalog = "a 32\nb 8\n".parse().unwrap();
        let mut pipeline = SpectrogramPipeline::new(cat, fake_loader, &small_config()).unwrap();
        let (key, feats) = pipeline.next().unwrap().unwrap();
        assert_eq!((key.as_str(), feats.dim()), ("a", (5, 9)));
        let (key, feats) = pipeline.next().unwrap().unwrap();
        assert_eq!((key.as_str(), feats.dim()), ("b", (0, 9)));
        assert!(pipeline.next().is_none());
    }

    #[test]
    fn test_frequency_major_layout() {
        let mut config = small_config();
        config.post.transpose = false;
        let cat: UtteranceCatalog = "a 32\n".parse().unwrap();
        let (_, feats) = SpectrogramPipeline::new(cat, fake_loader, &config)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(feats.dim(), (9, 5));
    }

    #[test]
    fn test_skip_policy() {
        let cat: UtteranceCatalog = "a 32\nbad nope\nc 16\n".parse().unwrap();
        let mut pipeline = SpectrogramPipeline::new(cat, fake_loader, &small_config()).unwrap();
        let keys: Vec<_> = pipeline.by_ref().map(|r| r.unwrap().0).collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(pipeline.skipped(), 1);
    }

    #[test]
    fn test_abort_policy() {
        let config = SpectrogramConfig { on_error: ErrorPolicy::Abort, ..small_config() };
        let cat: UtteranceCatalog = "a 32\nbad nope\nc 16\n".parse().unwrap();
        let mut pipeline = SpectrogramPipeline::new(cat, fake_loader, &config).unwrap();
        assert!(pipeline.next().unwrap().is_ok());
        assert!(matches!(pipeline.next(), Some(Err(SpectralError::AudioLoadFailure { .. }))));
        assert_eq!(pipeline.skipped(), 0);
    }

    #[test]
    fn test_normalize_changes_scale() {
        let cat = || "a 32i16\n".parse::<UtteranceCatalog>().unwrap();
        let raw = SpectrogramPipeline::new(cat(), fake_loader, &small_config())
            .unwrap().next().unwrap().unwrap().1;
        let mut config = small_config();
        config.post.normalize = true;
        let norm = SpectrogramPipeline::new(cat(), fake_loader, &config)
            .unwrap().next().unwrap().unwrap().1;
        // dc bin of a constant frame scales with the samples
        approx::assert_relative_eq!(raw[[0, 0]], norm[[0, 0]] * 32768.0, max_relative = 1e-5);
    }

    #[test]
    fn test_log_of_silence_is_floored() {
        let mut config = small_config();
        config.post.apply_log = true;
        config.post.apply_pow = true;
        let mut pipeline = SpectrogramPipeline::new(
            "z 32\n".parse().unwrap(),
            |_: &str| -> Result<Waveform> { Ok(Waveform::new(vec![0.0; 32], 16000, SampleFormat::Float)) },
            &config,
        ).unwrap();
        let (_, feats) = pipeline.next().unwrap().unwrap();
        assert!(feats.iter().all(|&x| x == EPSILON.ln()));
    }

    #[test]
    fn test_config_errors_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let ark = dir.path().join("never.ark");
        let mut config = small_config();
        config.frame.frame_shift = 0;
        let cat: UtteranceCatalog = "a 32\n".parse().unwrap();
        let err = compute_spectrogram(cat, fake_loader, &config, &ark, None).unwrap_err();
        assert!(matches!(err, SpectralError::InvalidConfig(_)));
        assert!(!ark.exists());
    }

    #[test]
    fn test_compute_spectrogram_summary() {
        let dir = tempfile::tempdir().unwrap();
        let ark = dir.path().join("feats.ark");
        let cat: UtteranceCatalog = "a 32\nbad nope\nc 8\n".parse().unwrap();
        let summary = compute_spectrogram(cat, fake_loader, &small_config(), &ark, None).unwrap();
        assert_eq!(summary, PipelineSummary { processed: 2, skipped: 1 });
        assert_eq!(summary.to_string(), "Process 2 utterances (1 skipped)");
        assert_eq!(read_archive(&ark).unwrap().count(), 2);
    }

    #[test]
    fn test_summary_when_archive_cannot_open() {
        let dir = tempfile::tempdir().unwrap();
        let ark = dir.path().join("no_such_dir").join("feats.ark");
        let cat: UtteranceCatalog = "a 32\n".parse().unwrap();
        let (summary, outcome) = run(cat, fake_loader, &small_config(), &ark, None);
        assert_eq!(summary, PipelineSummary::default());
        assert_eq!(summary.to_string(), "Process 0 utterances");
        assert!(matches!(outcome, Err(SpectralError::Io(_))));
    }

    #[test]
    fn test_summary_after_abort() {
        let dir = tempfile::tempdir().unwrap();
        let ark = dir.path().join("feats.ark");
        let config = SpectrogramConfig { on_error: ErrorPolicy::Abort, ..small_config() };
        let cat: UtteranceCatalog = "a 32\nb 16\nbad nope\nc 8\n".parse().unwrap();
        let (summary, outcome) = run(cat, fake_loader, &config, &ark, None);
        assert_eq!(summary, PipelineSummary { processed: 2, skipped: 0 });
        assert!(outcome.is_err());
    }

    #[test]
    fn test_abort_keeps_load_error_as_source() {
        let cat: UtteranceCatalog = "bad nope\n".parse().unwrap();
        let config = SpectrogramConfig { on_error: ErrorPolicy::Abort, ..small_config() };
        let mut pipeline = SpectrogramPipeline::new(cat, fake_loader, &config).unwrap();
        let err = pipeline.next().unwrap().unwrap_err();
        let cause = std::error::Error::source(&err).map(|e| e.to_string());
        assert_eq!(cause.as_deref(), Some("invalid configuration: can't open nope"));
    }

    #[test]
    fn test_abort_keeps_written_records() {
        let dir = tempfile::tempdir().unwrap();
        let ark = dir.path().join("feats.ark");
        let config = SpectrogramConfig { on_error: ErrorPolicy::Abort, ..small_config() };
        let cat: UtteranceCatalog = "a 32\nbad nope\nc 8\n".parse().unwrap();
        let err = compute_spectrogram(cat, fake_loader, &config, &ark, None).unwrap_err();
        assert!(matches!(err, SpectralError::AudioLoadFailure { .. }));
        let records: Vec<_> = read_archive(&ark).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "a");
    }
}
