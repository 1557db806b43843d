//! File discovery and inspection

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};

/// A file about to be loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub file_type: String,
    pub size_bytes: u64,
    /// Raw line count, blank and malformed lines included
    pub line_count: u64,
}

impl FileDescriptor {
    /// Validate `path` and gather its size and line count
    pub fn inspect(path: &Path) -> Result<Self> {
        validate_file_path(path)?;

        let metadata = std::fs::metadata(path).map_err(|e| IngestError::file_access(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file_type: file_type_from_path(path),
            size_bytes: metadata.len(),
            line_count: count_lines(path)?,
        })
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// File type identifier: file stem plus lowercased extension (`LLT.ASC` -> `LLT.asc`)
pub fn file_type_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    match path.extension() {
        Some(ext) => format!("{}.{}", stem, ext.to_string_lossy().to_lowercase()),
        None => stem,
    }
}

/// Check that `path` exists, is a regular file and can be opened for reading
pub fn validate_file_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(IngestError::file_access(path, "file not found"));
    }

    if !path.is_file() {
        return Err(IngestError::file_access(path, "path is not a file"));
    }

    File::open(path)
        .map(|_| ())
        .map_err(|e| IngestError::file_access(path, format!("file not readable: {}", e)))
}

/// Check that `path` exists and is a readable directory
pub fn validate_directory_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(IngestError::file_access(path, "directory not found"));
    }

    if !path.is_dir() {
        return Err(IngestError::file_access(path, "path is not a directory"));
    }

    std::fs::read_dir(path)
        .map(|_| ())
        .map_err(|e| IngestError::file_access(path, format!("directory not readable: {}", e)))
}

/// Count newline-terminated lines; a final unterminated line counts too
pub fn count_lines(path: &Path) -> Result<u64> {
    let file = File::open(path).map_err(|e| IngestError::file_access(path, e))?;
    let mut reader = BufReader::with_capacity(64 * 1024, file);

    let mut lines = 0u64;
    let mut last_byte = None;
    loop {
        let buffer = reader.fill_buf().map_err(|e| IngestError::Read {
            path: path.to_path_buf(),
            line: lines,
            source: e,
        })?;
        if buffer.is_empty() {
            break;
        }

        lines += buffer.iter().filter(|&&b| b == b'\n').count() as u64;
        last_byte = buffer.last().copied();

        let consumed = buffer.len();
        reader.consume(consumed);
    }

    if matches!(last_byte, Some(b) if b != b'\n') {
        lines += 1;
    }

    Ok(lines)
}

/// Regular files in `dir` whose name ends with `suffix`, sorted by path
///
/// The suffix match is case-sensitive.
pub fn find_files(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    validate_directory_path(dir)?;

    let entries = std::fs::read_dir(dir).map_err(|e| IngestError::file_access(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| IngestError::file_access(dir, e))?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(suffix));

        if matches {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
