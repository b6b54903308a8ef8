//! Text bundle format: one `=== <logical path> ===` line per entry, the raw file
//! bytes, then a blank separator.
//!
//! Content is written byte for byte. A file whose content itself contains a
//! delimiter line at the start of a line cannot be split back unambiguously.

use crate::error::{AppError, Result};
use crate::progress::{Phase, ProgressReporter, ProgressSnapshot};
use crate::resolver::ResolvedBundle;
use log;
use std::io::Write;

const DELIMITER_OPEN: &str = "=== ";
const DELIMITER_CLOSE: &str = " ===";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStats {
    pub entries: usize,
    /// File content bytes, excluding delimiters.
    pub bytes: u64,
}

pub fn delimiter_line(logical_path: &str) -> String {
    format!("{DELIMITER_OPEN}{logical_path}{DELIMITER_CLOSE}\n")
}

/// Writes `bundle` to `out` in bundle order.
pub fn aggregate<W: Write>(
    bundle: &ResolvedBundle,
    out: &mut W,
    progress: Option<&ProgressReporter>,
) -> Result<AggregateStats> {
    let mut stats = AggregateStats::default();
    for entry in bundle.iter() {
        out.write_all(delimiter_line(&entry.logical_path).as_bytes())?;
        out.write_all(&entry.content)?;
        out.write_all(b"\n")?;
        stats.entries += 1;
        stats.bytes += entry.content.len() as u64;
        log::trace!("Aggregated {} ({} bytes)", entry.logical_path, entry.content.len());
        if let Some(reporter) = progress {
            reporter.emit(ProgressSnapshot {
                phase: Phase::Bundle,
                processed: stats.entries,
                current_path: entry.logical_path.clone(),
            });
        }
    }
    out.flush()?;
    log::debug!(
        "Aggregated {} entries, {} content bytes.",
        stats.entries,
        stats.bytes
    );
    Ok(stats)
}

pub fn render_bundle(bundle: &ResolvedBundle) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    aggregate(bundle, &mut buf, None)?;
    Ok(buf)
}

/// Splits a bundle back into `(logical path, content)` pairs.
pub fn split_bundle(data: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut entries = Vec::new();
    if data.is_empty() {
        return Ok(entries);
    }
    let (mut path, mut rest) = parse_header(data)
        .ok_or_else(|| AppError::InvalidArgument("Bundle does not start with a delimiter line".into()))?;

    loop {
        match find_next_header(rest) {
            Some((content_end, next_path, next_rest)) => {
                entries.push((path, rest[..content_end].to_vec()));
                path = next_path;
                rest = next_rest;
            }
            None => {
                let content = rest.strip_suffix(b"\n").ok_or_else(|| {
                    AppError::InvalidArgument(format!(
                        "Bundle entry '{}' is missing its trailing separator",
                        path
                    ))
                })?;
                entries.push((path, content.to_vec()));
                return Ok(entries);
            }
        }
    }
}

/// Parses a delimiter line at the start of `data`, returning the path and the bytes after it.
fn parse_header(data: &[u8]) -> Option<(String, &[u8])> {
    let line_end = data.iter().position(|&b| b == b'\n')?;
    let line = std::str::from_utf8(&data[..line_end]).ok()?;
    let path = line
        .strip_prefix(DELIMITER_OPEN)?
        .strip_suffix(DELIMITER_CLOSE)?;
    if path.is_empty() {
        return None;
    }
    Some((path.to_string(), &data[line_end + 1..]))
}

/// Finds the separator `\n` followed by a delimiter line. Returns where the
/// current content ends, the next path, and the bytes after that delimiter.
fn find_next_header(data: &[u8]) -> Option<(usize, String, &[u8])> {
    let mut from = 0;
    while let Some(offset) = data[from..].iter().position(|&b| b == b'\n') {
        let sep = from + offset;
        if let Some((path, rest)) = parse_header(&data[sep + 1..]) {
            return Some((sep, path, rest));
        }
        from = sep + 1;
    }
    None
}
