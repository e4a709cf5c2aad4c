use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{Result, SpectralError};

/// Where one record lives: `<key> <archive_path>:<byte_offset>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: String,
    pub path: PathBuf,
    /// start of the record's key field
    pub offset: u64,
}

impl IndexEntry {
    pub fn new(key: impl Into<String>, path: impl Into<PathBuf>, offset: u64) -> Self {
        Self { key: key.into(), path: path.into(), offset }
    }

    /// Parse one index line; Ok(None) for blank lines
    pub fn parse_line(line: &str, lineno: usize) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let malformed = |reason: String| SpectralError::MalformedIndexEntry { line: lineno, reason };
        let (key, location) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| malformed("expected '<key> <path>:<offset>'".into()))?;
        // paths may contain ':', the offset never does
        let (path, offset) = location
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| malformed(format!("missing ':<offset>' in '{location}'")))?;
        let offset = offset
            .parse::<u64>()
            .map_err(|e| malformed(format!("bad offset '{offset}': {e}")))?;
        if path.is_empty() {
            return Err(malformed("empty archive path".into()));
        }
        Ok(Some(Self::new(key, path, offset)))
    }
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.key, self.path.display(), self.offset)
    }
}

/* IndexTable: an index file loaded into memory.
 *
 * Keeps every line in file order; lookups by key return the
 * last entry written for that key.
 */
#[derive(Debug, Clone, Default)]
pub struct IndexTable {
    entries: Vec<IndexEntry>,
    by_key: HashMap<String, usize>,
}

impl IndexTable {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut table = Self::default();
        for (i, line) in reader.lines().enumerate() {
            if let Some(entry) = IndexEntry::parse_line(&line?, i + 1)? {
                table.push(entry);
            }
        }
        Ok(table)
    }

    pub fn push(&mut self, entry: IndexEntry) {
        self.by_key.insert(entry.key.clone(), self.entries.len());
        self.entries.push(entry);
    }

    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.by_key.get(key).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// number of lines, duplicates included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// number of distinct keys
    pub fn num_keys(&self) -> usize {
        self.by_key.len()
    }
}
