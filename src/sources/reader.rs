//! Offset-resumable line reader for append-only log files.
//!
//! The cursor only ever advances past *complete* lines: a trailing line
//! without its terminator is left for the next parse, so a record observed
//! mid-write is never half-consumed. The offset a caller saves after a scan
//! is therefore always a valid resume point.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::error::ReadError;

/// Buffered read chunk size.
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Cursor over the complete lines of a file, starting at a byte offset.
pub struct LineCursor {
    path: PathBuf,
    reader: BufReader<File>,
    /// Offset just past the last complete line yielded.
    offset: u64,
    /// Raw bytes of the current line, reused between lines.
    buf: Vec<u8>,
    /// Decoded text of the current line, reused between lines.
    line: String,
    max_line_bytes: usize,
}

impl LineCursor {
    /// Open `path` and position the cursor at `offset`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or when `offset` lies beyond the
    /// current end of the file, which means the file shrank since the offset
    /// was saved and any resumed parse would be garbage.
    pub fn open_at(path: &Path, offset: u64, max_line_bytes: usize) -> Result<Self, ReadError> {
        let file = File::open(path).map_err(|e| ReadError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        let len = file
            .metadata()
            .map_err(|e| ReadError::Open {
                path: path.to_path_buf(),
                source: e,
            })?
            .len();
        if offset > len {
            return Err(ReadError::OffsetBeyondEof {
                path: path.to_path_buf(),
                offset,
                len,
            });
        }

        let mut reader = BufReader::with_capacity(READ_CHUNK_BYTES, file);
        if offset > 0 {
            reader
                .seek(SeekFrom::Start(offset))
                .map_err(|e| ReadError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            offset,
            buf: Vec::new(),
            line: String::new(),
            max_line_bytes,
        })
    }

    /// Offset just past the last complete line yielded so far.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Next complete line without its terminator, or `None` at end of input.
    ///
    /// Lines longer than the configured cap are consumed and skipped. Bytes
    /// that are not valid UTF-8 are replaced rather than failing the scan.
    ///
    /// # Errors
    ///
    /// Returns an error only for underlying I/O failures.
    pub fn next_line(&mut self) -> Result<Option<&str>, ReadError> {
        loop {
            self.buf.clear();
            let limit = self.max_line_bytes as u64 + 1;
            let n = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .map_err(|e| self.io_error(e))?;

            if n == 0 {
                return Ok(None);
            }

            if self.buf.last() != Some(&b'\n') {
                if n as u64 >= limit {
                    // Oversized line: skip to its end if it is complete,
                    // otherwise leave it for the next parse.
                    let Some(skipped) = self.skip_to_newline()? else {
                        return Ok(None);
                    };
                    self.offset += n as u64 + skipped;
                    tracing::warn!(
                        path = %self.path.display(),
                        bytes = n as u64 + skipped,
                        "Skipping oversized log line"
                    );
                    continue;
                }
                // Incomplete trailing line, likely mid-write. Do not
                // advance the offset; the next parse retries it.
                return Ok(None);
            }

            self.offset += n as u64;

            let bytes = &self.buf[..self.buf.len() - 1];
            let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
            self.line.clear();
            self.line.push_str(&String::from_utf8_lossy(bytes));
            return Ok(Some(&self.line));
        }
    }

    /// Consume bytes up to and including the next newline.
    ///
    /// Returns the number of bytes consumed, or `None` when end of input was
    /// reached first (the oversized line is still being written).
    fn skip_to_newline(&mut self) -> Result<Option<u64>, ReadError> {
        let mut skipped = 0u64;
        loop {
            let available = match self.reader.fill_buf() {
                Ok(available) => available,
                Err(e) => return Err(ReadError::Io {
                    path: self.path.clone(),
                    source: e,
                }),
            };
            if available.is_empty() {
                return Ok(None);
            }
            if let Some(pos) = available.iter().position(|&b| b == b'\n') {
                self.reader.consume(pos + 1);
                skipped += pos as u64 + 1;
                return Ok(Some(skipped));
            }
            let len = available.len();
            self.reader.consume(len);
            skipped += len as u64;
        }
    }

    fn io_error(&self, source: std::io::Error) -> ReadError {
        ReadError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
