use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use itertools::Itertools;

use crate::buffers::Waveform;
use crate::error::{Result, SpectralError};
use crate::fileio::WaveformSource;

/// One `key source` line of a catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub key: String,
    /// file path, or `cmd |` whose stdout is WAV bytes
    pub source: String,
    /// 1-based line number in the catalog file
    pub line: usize,
}

impl CatalogEntry {
    /// Parse one line; Ok(None) for blank lines
    pub fn parse_line(line: &str, lineno: usize) -> Result<Option<Self>> {
        let line = line.trim_end();
        if line.is_empty() {
            return Ok(None);
        }
        let malformed = |reason: &str| SpectralError::MalformedCatalogEntry {
            line: lineno,
            reason: reason.to_string(),
        };
        let (key, source) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| malformed("expected '<key> <source>'"))?;
        if key.is_empty() {
            return Err(malformed("empty key"));
        }
        Ok(Some(Self {
            key: key.to_string(),
            source: source.trim().to_string(),
            line: lineno,
        }))
    }
}

/* UtteranceCatalog: ordered key -> audio source mapping ("scp").
 *
 * Every line is checked up front, so a bad catalog fails before any
 * audio is touched. Audio itself is only loaded while iterating.
 * Duplicate keys are kept as-is.
 */
#[derive(Debug, Clone, Default)]
pub struct UtteranceCatalog {
    entries: Vec<CatalogEntry>,
}

impl UtteranceCatalog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut entries = Vec::new();
        for (i, raw) in reader.split(b'\n').enumerate() {
            let line = String::from_utf8(raw?).map_err(|_| SpectralError::MalformedCatalogEntry {
                line: i + 1,
                reason: "not valid UTF-8".to_string(),
            })?;
            if let Some(entry) = CatalogEntry::parse_line(&line, i + 1)? {
                entries.push(entry);
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys that appear more than once, in order of their first repeat
    pub fn duplicate_keys(&self) -> Vec<&str> {
        self.entries.iter()
            .map(|e| e.key.as_str())
            .duplicates()
            .collect()
    }

    /// Single pass over (key, waveform) in catalog order
    pub fn utterances<L: WaveformSource>(self, loader: L) -> Utterances<L> {
        Utterances {
            entries: self.entries.into_iter(),
            loader,
        }
    }
}

impl FromStr for UtteranceCatalog {
    type Err = SpectralError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_reader(s.as_bytes())
    }
}

/// Lazy (key, waveform) sequence; each waveform is loaded on `next()`
pub struct Utterances<L> {
    entries: std::vec::IntoIter<CatalogEntry>,
    loader: L,
}

impl<L: WaveformSource> Iterator for Utterances<L> {
    type Item = Result<(String, Waveform)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.next()?;
        let item = match self.loader.load(&entry.source) {
            Ok(wav) => Ok((entry.key, wav)),
            Err(e) => Err(SpectralError::AudioLoadFailure {
                key: entry.key,
                source_spec: entry.source,
                source: Box::new(e),
            }),
        };
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}
