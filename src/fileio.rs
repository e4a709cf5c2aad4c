use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;
use std::process::{Command, Stdio};

use hound::{Sample, WavReader};
use num_traits::AsPrimitive;

use crate::buffers::{SampleFormat, Waveform};
use crate::error::Result;
use crate::utils::Float;

/* WavReaderAdapter:
 * WavReader wrapper that converts the first channel to floats
 * at the sample's native scale
 */
pub struct WavReaderAdapter<R> {
    pub reader: WavReader<R>,
}

impl WavReaderAdapter<BufReader<File>> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = WavReader::open(path)?;
        Ok(Self { reader })
    }
}

impl<R: Read> WavReaderAdapter<R> {
    pub fn new(inner: R) -> Result<Self> {
        let reader = WavReader::new(inner)?;
        Ok(Self { reader })
    }

    // samples of channel 0, other channels are skipped
    fn first_channel<S>(&mut self) -> Result<Vec<Float>>
    where S: Sample + AsPrimitive<Float> {
        let nch = self.reader.spec().channels.max(1) as usize;
        let samples = self.reader.samples::<S>()
            .step_by(nch)
            .map(|s| s.map(|v| v.as_()))
            .collect::<std::result::Result<Vec<Float>, hound::Error>>()?;
        Ok(samples)
    }

    pub fn into_waveform(mut self) -> Result<Waveform> {
        let spec = self.reader.spec();
        let (data, format) = match spec.sample_format {
            hound::SampleFormat::Float => (self.first_channel::<f32>()?, SampleFormat::Float),
            hound::SampleFormat::Int => (
                self.first_channel::<i32>()?,
                SampleFormat::Int { bits: spec.bits_per_sample },
            ),
        };
        if spec.channels > 1 {
            tracing::debug!(channels = spec.channels, "keeping first channel only");
        }
        Ok(Waveform::new(data, spec.sample_rate, format))
    }
}

/// Command part of a pipe source (`cmd args |`), None for plain paths
pub fn pipe_command(source: &str) -> Option<&str> {
    source.trim_end().strip_suffix('|').map(str::trim)
}

/// Load a waveform from a WAV file path or from the stdout of `cmd |`
pub fn load_waveform(source: &str) -> Result<Waveform> {
    match pipe_command(source) {
        Some(cmd) => {
            let bytes = run_pipe(cmd)?;
            WavReaderAdapter::new(Cursor::new(bytes))?.into_waveform()
        }
        None => WavReaderAdapter::from_path(source)?.into_waveform(),
    }
}

// run `sh -c cmd` and collect its stdout
fn run_pipe(cmd: &str) -> Result<Vec<u8>> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()?;
    if !output.status.success() {
        return Err(std::io::Error::other(format!(
            "command '{cmd}' exited with {}", output.status
        )).into());
    }
    Ok(output.stdout)
}

/// Anything that turns a catalog source into a waveform
pub trait WaveformSource {
    fn load(&self, source: &str) -> Result<Waveform>;
}

/// WAV files and `cmd |` pipes, decoded with hound
#[derive(Debug, Clone, Copy, Default)]
pub struct WavLoader;

impl WaveformSource for WavLoader {
    fn load(&self, source: &str) -> Result<Waveform> {
        load_waveform(source)
    }
}

impl<F> WaveformSource for F
where F: Fn(&str) -> Result<Waveform> {
    fn load(&self, source: &str) -> Result<Waveform> {
        self(source)
    }
}
