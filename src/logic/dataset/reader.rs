//! Bounded Table Reader
//!
//! Reads a delimited file in fixed-size chunks under an optional byte
//! budget, sniffs the delimiter from the header line, and parses rows with
//! the `csv` crate. Cells stay as trimmed strings; typing happens in `frame`.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Serialize;

use crate::logic::config::LoadLimits;
use crate::logic::error::{PipelineError, PipelineResult};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// What the reader consumed
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReadStats {
    pub bytes_read: u64,
    pub chunks_read: usize,
    pub truncated_by_bytes: bool,
    pub truncated_by_rows: bool,
    pub rows_read: usize,
    pub delimiter: char,
    pub duplicate_headers: Vec<String>,
}

/// Header + raw string rows
#[derive(Debug, Clone)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub stats: ReadStats,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

// ============================================================================
// DELIMITER
// ============================================================================

/// Majority of ';' vs ',' on the first line; ties go to ','
pub fn detect_delimiter(first_line: &str) -> u8 {
    let commas = first_line.matches(',').count();
    let semicolons = first_line.matches(';').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

// ============================================================================
// BOUNDED READ
// ============================================================================

/// Read whole chunks until EOF or until the next chunk would exceed the budget.
/// At least one chunk is always kept. Returns (bytes, truncated).
pub fn read_bounded(
    path: &Path,
    chunk_size: usize,
    max_bytes: Option<u64>,
) -> PipelineResult<(Vec<u8>, usize, bool)> {
    let unreadable = |source: std::io::Error| PipelineError::Unreadable {
        path: path.display().to_string(),
        source,
    };

    let mut file = File::open(path).map_err(unreadable)?;
    let mut data: Vec<u8> = Vec::new();
    let mut chunks = 0usize;
    let mut truncated = false;

    loop {
        let mut chunk = Vec::with_capacity(chunk_size);
        let n = (&mut file)
            .take(chunk_size as u64)
            .read_to_end(&mut chunk)
            .map_err(unreadable)?;
        if n == 0 {
            break;
        }

        if let Some(budget) = max_bytes {
            if chunks > 0 && (data.len() + n) as u64 > budget {
                truncated = true;
                break;
            }
        }

        data.extend_from_slice(&chunk);
        chunks += 1;
        log::debug!("Read chunk {} ({} bytes, {} total)", chunks, n, data.len());
    }

    if truncated {
        // Last line may be cut mid-record
        if let Some(pos) = data.iter().rposition(|b| *b == b'\n') {
            data.truncate(pos + 1);
        }
        log::warn!(
            "Byte budget reached: kept {} bytes in {} chunk(s) from {}",
            data.len(),
            chunks,
            path.display()
        );
    }

    Ok((data, chunks, truncated))
}

// ============================================================================
// PARSING
// ============================================================================

/// Parse CSV bytes with a sniffed delimiter, keeping at most `max_rows` rows
pub fn parse_table(bytes: &[u8], max_rows: Option<usize>) -> PipelineResult<RawTable> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let first_line_end = bytes.iter().position(|b| *b == b'\n').unwrap_or(bytes.len());
    let first_line = String::from_utf8_lossy(&bytes[..first_line_end]);
    let delimiter = detect_delimiter(&first_line);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let raw_headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    if raw_headers.iter().all(|h| h.is_empty()) {
        return Err(PipelineError::Malformed("missing header row".into()));
    }

    // First occurrence of a name wins
    let mut keep: Vec<usize> = Vec::new();
    let mut headers: Vec<String> = Vec::new();
    let mut duplicate_headers: Vec<String> = Vec::new();
    for (idx, name) in raw_headers.iter().enumerate() {
        if name.is_empty() {
            continue;
        }
        if headers.contains(name) {
            duplicate_headers.push(name.clone());
            continue;
        }
        keep.push(idx);
        headers.push(name.clone());
    }
    if !duplicate_headers.is_empty() {
        log::warn!("Duplicate column names ignored: {:?}", duplicate_headers);
    }

    let mut rows = Vec::new();
    let mut truncated_by_rows = false;
    for record in reader.records() {
        if let Some(limit) = max_rows {
            if rows.len() >= limit {
                truncated_by_rows = true;
                break;
            }
        }
        let record = record?;
        let row: Vec<String> = keep
            .iter()
            .map(|&i| record.get(i).unwrap_or("").to_string())
            .collect();
        rows.push(row);
    }

    let stats = ReadStats {
        bytes_read: bytes.len() as u64,
        rows_read: rows.len(),
        truncated_by_rows,
        delimiter: delimiter as char,
        duplicate_headers,
        ..Default::default()
    };

    Ok(RawTable { headers, rows, stats })
}

/// Bounded read + parse
pub fn read_table(path: &Path, limits: LoadLimits, chunk_size: usize) -> PipelineResult<RawTable> {
    let (bytes, chunks, truncated) = read_bounded(path, chunk_size, limits.max_bytes)?;
    if bytes.is_empty() {
        return Err(PipelineError::EmptyFrame);
    }

    let mut table = parse_table(&bytes, limits.max_rows)?;
    table.stats.chunks_read = chunks;
    table.stats.truncated_by_bytes = truncated;

    log::info!(
        "Loaded {} rows x {} columns from {} (delimiter '{}')",
        table.rows.len(),
        table.headers.len(),
        path.display(),
        table.stats.delimiter
    );
    Ok(table)
}
