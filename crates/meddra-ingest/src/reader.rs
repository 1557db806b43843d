//! Chunked reader for headerless delimited files
//!
//! MedDRA files carry one record per line, fields separated by `$`, with a
//! terminating `$` after the last field:
//!
//! ```text
//! 10000001$Ache in abdomen$10000081$$$$$$$Y$$
//! ```
//!
//! The reader yields batches of raw rows positionally aligned to a mapping's
//! column list. Malformed lines are skipped and counted:
//!
//! - more fields than columns (after dropping the empty field produced by
//!   the terminating separator) -> skipped
//! - fewer fields than columns -> padded with missing values
//! - blank lines -> ignored
//! - lines that do not decode in the selected encoding -> skipped
//!
//! Other I/O failures end the file with an error.

use encoding_rs::{DecoderResult, Encoding};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::ProcessingConfig;
use crate::error::{IngestError, Result};

/// Read size used while checking a candidate encoding against a file
pub const DECODE_CHUNK_BYTES: usize = 64 * 1024;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Rows of one chunk; `None` marks a field missing from a short line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRowBatch {
    /// 1-based
    pub batch_number: usize,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawRowBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Line accounting for one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub lines_read: u64,
    pub rows_emitted: u64,
    pub blank_lines: u64,
    pub too_many_fields: u64,
    pub undecodable: u64,
}

impl ReaderStats {
    /// Malformed lines dropped (blank lines are not counted)
    pub fn skipped_lines(&self) -> u64 {
        self.too_many_fields + self.undecodable
    }
}

/// How to split and decode a file
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub separator: char,
    pub encoding: String,
    pub fallback_encodings: Vec<String>,
    pub batch_size: usize,
}

impl ReaderOptions {
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self {
            separator: config.separator,
            encoding: config.encoding.clone(),
            fallback_encodings: config.fallback_encodings.clone(),
            batch_size: config.batch_size,
        }
    }
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self::from_config(&ProcessingConfig::default())
    }
}

/// Resolve an encoding label, accepting only ASCII-compatible encodings
pub fn resolve_encoding(label: &str) -> std::result::Result<&'static Encoding, String> {
    let encoding = Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| format!("unknown encoding '{}'", label))?;

    if !encoding.is_ascii_compatible() {
        return Err(format!("encoding '{}' is not ASCII-compatible", label));
    }

    Ok(encoding)
}

/// Streams a file as [`RawRowBatch`]es
///
/// The file handle is owned by the reader and closed when it is dropped.
pub struct ChunkedReader {
    path: PathBuf,
    reader: BufReader<File>,
    encoding: &'static Encoding,
    separator: char,
    column_count: usize,
    batch_size: usize,
    line: Vec<u8>,
    batches_emitted: usize,
    stats: ReaderStats,
    done: bool,
}

impl std::fmt::Debug for ChunkedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedReader")
            .field("path", &self.path)
            .field("encoding", &self.encoding.name())
            .field("column_count", &self.column_count)
            .field("batch_size", &self.batch_size)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ChunkedReader {
    /// Open `path` and select its encoding
    pub fn open(path: &Path, column_count: usize, options: &ReaderOptions) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(IngestError::Config("batch_size must be positive".to_string()));
        }

        let mut file = File::open(path).map_err(|e| IngestError::file_access(path, e))?;
        let read_error = |source| IngestError::Read {
            path: path.to_path_buf(),
            line: 0,
            source,
        };

        let mut head = Vec::with_capacity(UTF8_BOM.len());
        (&mut file)
            .take(UTF8_BOM.len() as u64)
            .read_to_end(&mut head)
            .map_err(read_error)?;
        let bom_len = if head == UTF8_BOM { UTF8_BOM.len() } else { 0 };

        let encoding = select_encoding(path, &mut file, bom_len as u64, options)?;

        file.seek(SeekFrom::Start(bom_len as u64))
            .map_err(read_error)?;

        debug!(
            path = %path.display(),
            encoding = encoding.name(),
            bom = bom_len > 0,
            "Opened file for reading"
        );

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            encoding,
            separator: options.separator,
            column_count,
            batch_size: options.batch_size,
            line: Vec::new(),
            batches_emitted: 0,
            stats: ReaderStats::default(),
            done: false,
        })
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Read the next batch; `Ok(None)` once the file is exhausted
    pub fn next_batch(&mut self) -> Result<Option<RawRowBatch>> {
        if self.done {
            return Ok(None);
        }

        let mut rows = Vec::with_capacity(self.batch_size);
        while rows.len() < self.batch_size {
            match self.next_row()? {
                Some(row) => rows.push(row),
                None => {
                    self.done = true;
                    break;
                },
            }
        }

        if rows.is_empty() {
            return Ok(None);
        }

        self.batches_emitted += 1;
        self.stats.rows_emitted += rows.len() as u64;

        Ok(Some(RawRowBatch {
            batch_number: self.batches_emitted,
            rows,
        }))
    }

    /// Next well-formed row, skipping blank and malformed lines
    fn next_row(&mut self) -> Result<Option<Vec<Option<String>>>> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.line)
                .map_err(|e| IngestError::Read {
                    path: self.path.clone(),
                    line: self.stats.lines_read + 1,
                    source: e,
                })?;
            if read == 0 {
                return Ok(None);
            }
            self.stats.lines_read += 1;
            let line_number = self.stats.lines_read;

            let mut bytes = self.line.as_slice();
            while let Some((&last, rest)) = bytes.split_last() {
                if last == b'\n' || last == b'\r' {
                    bytes = rest;
                } else {
                    break;
                }
            }

            if bytes.iter().all(u8::is_ascii_whitespace) {
                self.stats.blank_lines += 1;
                continue;
            }

            let Some(text) = self
                .encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
            else {
                self.stats.undecodable += 1;
                debug!(
                    path = %self.path.display(),
                    line = line_number,
                    encoding = self.encoding.name(),
                    "Skipping undecodable line"
                );
                continue;
            };

            match split_fields(&text, self.separator, self.column_count) {
                Some(row) => return Ok(Some(row)),
                None => {
                    self.stats.too_many_fields += 1;
                    debug!(
                        path = %self.path.display(),
                        line = line_number,
                        expected = self.column_count,
                        "Skipping line with too many fields"
                    );
                },
            }
        }
    }
}

impl Iterator for ChunkedReader {
    type Item = Result<RawRowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            },
        }
    }
}

/// Split a decoded line into exactly `column_count` fields
///
/// Returns `None` when the line has too many fields.
fn split_fields(text: &str, separator: char, column_count: usize) -> Option<Vec<Option<String>>> {
    let mut fields: Vec<&str> = text.split(separator).collect();

    // The terminating separator leaves one empty trailing field
    if fields.len() > column_count && fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }

    if fields.len() > column_count {
        return None;
    }

    let mut row: Vec<Option<String>> = fields.into_iter().map(|f| Some(f.to_string())).collect();
    row.resize(column_count, None);
    Some(row)
}

/// Pick the first candidate encoding that decodes the whole file
///
/// Every byte after `start` is checked, so a stray legacy byte deep in an
/// otherwise ASCII file still moves the selection to a fallback.
fn select_encoding(
    path: &Path,
    file: &mut File,
    start: u64,
    options: &ReaderOptions,
) -> Result<&'static Encoding> {
    let candidates = std::iter::once(&options.encoding).chain(&options.fallback_encodings);

    let mut attempted = Vec::new();
    for (index, label) in candidates.enumerate() {
        attempted.push(label.clone());

        let encoding = match resolve_encoding(label) {
            Ok(encoding) => encoding,
            Err(reason) => {
                warn!(path = %path.display(), %reason, "Ignoring unusable encoding");
                continue;
            },
        };

        let clean = decodes_cleanly(encoding, file, start).map_err(|source| IngestError::Read {
            path: path.to_path_buf(),
            line: 0,
            source,
        })?;

        if clean {
            if index > 0 {
                warn!(
                    path = %path.display(),
                    configured = %options.encoding,
                    selected = encoding.name(),
                    "Configured encoding failed, using fallback"
                );
            }
            return Ok(encoding);
        }

        debug!(path = %path.display(), encoding = encoding.name(), "Encoding check failed");
    }

    Err(IngestError::Decoding {
        path: path.to_path_buf(),
        attempted,
    })
}

/// Stream the file from `start` through a decoder, stopping at the first malformed sequence
fn decodes_cleanly(encoding: &'static Encoding, file: &mut File, start: u64) -> std::io::Result<bool> {
    file.seek(SeekFrom::Start(start))?;
    let mut reader = BufReader::with_capacity(DECODE_CHUNK_BYTES, file);
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let mut decoded = String::new();

    loop {
        let (result, read, last) = {
            let chunk = reader.fill_buf()?;
            let last = chunk.is_empty();

            decoded.clear();
            match decoder.max_utf8_buffer_length_without_replacement(chunk.len()) {
                Some(capacity) => decoded.reserve(capacity),
                None => return Ok(false),
            }

            let (result, read) = decoder.decode_to_string_without_replacement(chunk, &mut decoded, last);
            (result, read, last)
        };
        reader.consume(read);

        match result {
            DecoderResult::Malformed(_, _) => return Ok(false),
            DecoderResult::InputEmpty if last => return Ok(true),
            DecoderResult::InputEmpty | DecoderResult::OutputFull => {},
        }
    }
}
