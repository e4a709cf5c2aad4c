//!
//! Binary matrix archives, one record per utterance:
//!
//! ```text
//! <key> ' ' '\0' 'B' "FM " '\4' <i32 rows> '\4' <i32 cols> <rows*cols f32>
//! ```
//!
//! All integers and floats are little-endian, the payload is row-major.
//! An optional index file gets one `<key> <archive_path>:<offset>` line
//! per record, where offset is the position of the record's key.
//!
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use ndarray::{Array2, ArrayView2};
use tracing::{debug, info, warn};

use crate::error::{Result, SpectralError};
use crate::index::IndexEntry;
use crate::utils::Float;

pub const BINARY_MARKER: &[u8; 2] = b"\0B";
pub const FLOAT_MATRIX: &[u8; 3] = b"FM ";
pub const DOUBLE_MATRIX: &[u8; 3] = b"DM ";
const INT32_SIZE: u8 = 4;
// longest key accepted when reading, guards against garbage offsets
const MAX_KEY_LEN: usize = 4096;

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(SpectralError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn dim_to_i32(n: usize) -> io::Result<i32> {
    i32::try_from(n).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("matrix dimension {n} overflows i32"))
    })
}

/// Write `\0B` + float matrix header + payload, returns bytes written
pub fn write_matrix<W: Write>(w: &mut W, mat: &ArrayView2<Float>) -> io::Result<u64> {
    let (rows, cols) = mat.dim();
    w.write_all(BINARY_MARKER)?;
    w.write_all(FLOAT_MATRIX)?;
    w.write_all(&[INT32_SIZE])?;
    w.write_all(&dim_to_i32(rows)?.to_le_bytes())?;
    w.write_all(&[INT32_SIZE])?;
    w.write_all(&dim_to_i32(cols)?.to_le_bytes())?;
    // iter() walks in logical row-major order whatever the memory layout
    for x in mat.iter() {
        w.write_all(&x.to_le_bytes())?;
    }
    let header = BINARY_MARKER.len() + FLOAT_MATRIX.len() + 2 * (1 + 4);
    Ok((header + rows * cols * 4) as u64)
}

/// Write a whole record (`key ' '` + matrix), returns bytes written
pub fn write_record<W: Write>(w: &mut W, key: &str, mat: &ArrayView2<Float>) -> Result<u64> {
    check_key(key)?;
    w.write_all(key.as_bytes())?;
    w.write_all(b" ")?;
    let n = write_matrix(w, mat)?;
    Ok(key.len() as u64 + 1 + n)
}

/* ArchiveWriter: owns an archive file and an optional index file.
 *
 * Both files are created (or truncated) and exclusively locked on
 * open(). Every record is flushed as soon as it is written, so the
 * archive stays readable up to the last successful write. close()
 * flushes and releases both files; if the writer is dropped without
 * close(), Drop does a best-effort flush.
 */
pub struct ArchiveWriter {
    ark: Option<BufWriter<File>>,
    index: Option<BufWriter<File>>,
    ark_path: PathBuf,
    offset: u64,
    count: usize,
}

impl ArchiveWriter {
    pub fn open<P: AsRef<Path>>(ark_path: P, index_path: Option<P>) -> Result<Self> {
        let ark_path = std::path::absolute(ark_path.as_ref())?;
        let ark = create_locked(&ark_path)?;
        let index = match index_path {
            Some(p) => Some(create_locked(p.as_ref())?),
            None => None,
        };
        info!(archive = %ark_path.display(), with_index = index.is_some(), "opened archive");
        Ok(Self {
            ark: Some(ark),
            index,
            ark_path,
            offset: 0,
            count: 0,
        })
    }

    /// Append one record, returns where it was written.
    ///
    /// A repeated key is written again (and indexed again) without
    /// complaint; readers going through an index table see the last one.
    pub fn write(&mut self, key: &str, mat: &ArrayView2<Float>) -> Result<IndexEntry> {
        let ark = self.ark.as_mut().ok_or_else(closed_error)?;
        let offset = self.offset;
        let nbytes = write_record(ark, key, mat)?;
        ark.flush()?;
        self.offset += nbytes;

        let entry = IndexEntry::new(key, self.ark_path.clone(), offset);
        if let Some(index) = self.index.as_mut() {
            writeln!(index, "{entry}")?;
            index.flush()?;
        }
        self.count += 1;
        debug!(key, offset, rows = mat.nrows(), cols = mat.ncols(), "wrote record");
        Ok(entry)
    }

    /// Flush and release both files, returns the number of records
    pub fn close(mut self) -> Result<usize> {
        self.finish()?;
        Ok(self.count)
    }

    fn finish(&mut self) -> io::Result<()> {
        if let Some(mut ark) = self.ark.take() {
            ark.flush()?;
            ark.get_ref().sync_all()?;
        }
        if let Some(mut index) = self.index.take() {
            index.flush()?;
        }
        Ok(())
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if self.ark.is_some() {
            if let Err(e) = self.finish() {
                warn!(archive = %self.ark_path.display(), error = %e, "failed to flush archive on drop");
            }
        }
    }
}

fn closed_error() -> SpectralError {
    io::Error::other("archive writer already closed").into()
}

// lock before truncating, so a file held by another writer is left intact
fn create_locked(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new().write(true).create(true).truncate(false).open(path)?;
    file.try_lock_exclusive().map_err(|e| {
        io::Error::new(e.kind(), format!("{} is locked by another writer: {e}", path.display()))
    })?;
    file.set_len(0)?;
    Ok(BufWriter::new(file))
}

/* Tracked: a BufRead that counts consumed bytes,
 * so decode errors can point at an absolute offset.
 */
struct Tracked<R> {
    inner: R,
    pos: u64,
}

impl<R: Read> Read for Tracked<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for Tracked<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.pos += amt as u64;
        self.inner.consume(amt);
    }
}

impl<R: BufRead> Tracked<R> {
    fn new(inner: R, pos: u64) -> Self {
        Self { inner, pos }
    }

    // io errors while decoding: EOF means a truncated record
    fn fail(&self, e: io::Error, what: &str) -> SpectralError {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SpectralError::corrupt(self.pos, format!("unexpected end of archive in {what}"))
        } else {
            e.into()
        }
    }

    fn at_eof(&mut self) -> Result<bool> {
        Ok(self.fill_buf()?.is_empty())
    }

    fn starts_with(&mut self, prefix: &[u8]) -> Result<bool> {
        Ok(self.fill_buf()?.starts_with(prefix))
    }

    fn read_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf).map_err(|e| self.fail(e, what))?;
        Ok(buf)
    }

    fn read_key(&mut self) -> Result<String> {
        let start = self.pos;
        let mut buf = Vec::new();
        let res = (&mut *self).take(MAX_KEY_LEN as u64 + 1).read_until(b' ', &mut buf);
        res.map_err(|e| self.fail(e, "key"))?;
        if buf.pop() != Some(b' ') {
            return Err(SpectralError::corrupt(start, "key is not space-terminated"));
        }
        if buf.is_empty() {
            return Err(SpectralError::corrupt(start, "empty key"));
        }
        String::from_utf8(buf).map_err(|_| SpectralError::corrupt(start, "key is not valid UTF-8"))
    }

    fn read_dim(&mut self, what: &str) -> Result<usize> {
        let start = self.pos;
        let [size] = self.read_array::<1>(what)?;
        if size != INT32_SIZE {
            return Err(SpectralError::corrupt(start, format!("{what} has size byte {size}, expected 4")));
        }
        let n = i32::from_le_bytes(self.read_array::<4>(what)?);
        usize::try_from(n).map_err(|_| SpectralError::corrupt(start, format!("negative {what} {n}")))
    }

    // reads `\0B` + header + payload
    fn read_matrix(&mut self) -> Result<Array2<Float>> {
        let start = self.pos;
        if self.read_array::<2>("binary marker")? != *BINARY_MARKER {
            return Err(SpectralError::corrupt(start, "missing binary marker '\\0B'"));
        }
        let tag_pos = self.pos;
        let tag = self.read_array::<3>("type tag")?;
        let width = match &tag {
            t if t == FLOAT_MATRIX => 4,
            t if t == DOUBLE_MATRIX => 8,
            t => {
                return Err(SpectralError::corrupt(
                    tag_pos,
                    format!("unsupported type tag {:?}", String::from_utf8_lossy(t)),
                ))
            }
        };
        let rows = self.read_dim("row count")?;
        let cols = self.read_dim("column count")?;
        let nbytes = rows
            .checked_mul(cols)
            .and_then(|n| n.checked_mul(width))
            .ok_or_else(|| SpectralError::corrupt(tag_pos, format!("matrix {rows}x{cols} too large")))?;

        // read_to_end grows with the data, a bogus header can't force a huge allocation
        let mut payload = Vec::new();
        (&mut *self).take(nbytes as u64).read_to_end(&mut payload)?;
        if payload.len() != nbytes {
            return Err(SpectralError::corrupt(self.pos, "unexpected end of archive in payload"));
        }
        let data: Vec<Float> = if width == 4 {
            payload.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        } else {
            payload.chunks_exact(8)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as Float)
                .collect()
        };
        Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| SpectralError::corrupt(start, e.to_string()))
    }

    fn read_record(&mut self) -> Result<(String, Array2<Float>)> {
        let key = self.read_key()?;
        let mat = self.read_matrix()?;
        Ok((key, mat))
    }
}

/* ArchiveReader: random access to records through index entries.
 *
 * Keeps the most recently used archive open, so reading entries of
 * one archive in order doesn't reopen the file every time.
 */
#[derive(Default)]
pub struct ArchiveReader {
    file: Option<(PathBuf, BufReader<File>)>,
}

impl ArchiveReader {
    pub fn new() -> Self {
        Self::default()
    }

    fn reader_for(&mut self, path: &Path) -> Result<&mut BufReader<File>> {
        let reuse = matches!(&self.file, Some((p, _)) if p == path);
        if !reuse {
            let file = File::open(path)?;
            self.file = Some((path.to_path_buf(), BufReader::new(file)));
        }
        match self.file.as_mut() {
            Some((_, reader)) => Ok(reader),
            None => Err(io::Error::other("archive not open").into()),
        }
    }

    /// Seek to `entry.offset` and decode exactly one record.
    ///
    /// The offset may point at the key (as written by `ArchiveWriter`) or
    /// straight at the `\0B` marker, in which case the key comes from the
    /// entry itself.
    pub fn read_at(&mut self, entry: &IndexEntry) -> Result<(String, Array2<Float>)> {
        let reader = self.reader_for(&entry.path)?;
        reader.seek(SeekFrom::Start(entry.offset))?;
        let mut tracked = Tracked::new(reader, entry.offset);

        if tracked.starts_with(BINARY_MARKER)? {
            let mat = tracked.read_matrix()?;
            return Ok((entry.key.clone(), mat));
        }
        let (key, mat) = tracked.read_record()?;
        if key != entry.key {
            return Err(SpectralError::corrupt(
                entry.offset,
                format!("expected key '{}', found '{key}'", entry.key),
            ));
        }
        Ok((key, mat))
    }
}

/// Open an archive and walk its records in order, without an index
pub fn read_archive<P: AsRef<Path>>(path: P) -> Result<SequentialReader<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(SequentialReader::new(BufReader::new(file)))
}

/// Iterates (key, matrix, offset) over every record of an archive stream
pub struct SequentialReader<R> {
    inner: Tracked<R>,
    failed: bool,
}

impl<R: BufRead> SequentialReader<R> {
    pub fn new(reader: R) -> Self {
        Self { inner: Tracked::new(reader, 0), failed: false }
    }
}

impl<R: BufRead> Iterator for SequentialReader<R> {
    type Item = Result<(String, Array2<Float>, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let offset = self.inner.pos;
        let item = match self.inner.at_eof() {
            Ok(true) => return None,
            Ok(false) => self.inner.read_record().map(|(k, m)| (k, m, offset)),
            Err(e) => Err(e),
        };
        // after a decode error the stream position is meaningless
        self.failed = item.is_err();
        Some(item)
    }
}
