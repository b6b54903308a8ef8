use crate::cancel::CancellationToken;
use crate::classify::{Classification, FileClassifier};
use crate::error::{AppError, Result};
use crate::manifest::{FlattenManifest, RunStatus};
use crate::patterns::IgnoreRuleSet;
use crate::progress::{Phase, ProgressReporter, ProgressSnapshot, ProgressThrottle};
use crate::sink::OutputSink;
use crate::walker::{FileEntry, WalkEvent, WalkOptions, walk};
use log;
use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, Event};
use std::fmt::Display;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FlattenOptions {
    pub walk: WalkOptions,
    pub classifier: FileClassifier,
    pub progress_every: usize,
    pub progress_interval: Duration,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            walk: WalkOptions::default(),
            classifier: FileClassifier::default(),
            progress_every: 100,
            progress_interval: Duration::from_millis(250),
        }
    }
}

/// Streams a directory tree into a single `<codebase>` XML document.
pub struct Flattener<'a> {
    options: FlattenOptions,
    progress: Option<&'a ProgressReporter>,
    cancel: Option<CancellationToken>,
}

impl<'a> Flattener<'a> {
    pub fn new(options: FlattenOptions) -> Self {
        Self {
            options,
            progress: None,
            cancel: None,
        }
    }

    pub fn with_progress(mut self, reporter: &'a ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Writes the document for `root` to `out`.
    ///
    /// Per-file problems become `<error>` elements and manifest entries. A
    /// cancelled run returns a manifest with status `Incomplete` and leaves
    /// `out` without a closing manifest; the caller is expected to discard it.
    pub fn flatten<W: Write>(
        &self,
        root: &Path,
        ruleset: &IgnoreRuleSet,
        out: &mut W,
    ) -> Result<FlattenManifest> {
        self.flatten_with_skip(root, ruleset, out, &[])
    }

    fn flatten_with_skip<W: Write>(
        &self,
        root: &Path,
        ruleset: &IgnoreRuleSet,
        out: &mut W,
        extra_skip: &[std::path::PathBuf],
    ) -> Result<FlattenManifest> {
        let mut walk_options = self.options.walk.clone();
        walk_options.skip.extend_from_slice(extra_skip);
        let walker = walk(root, ruleset, walk_options, self.options.classifier.clone())?;

        log::info!("Flattening {}", root.display());
        let mut manifest = FlattenManifest::default();
        let mut throttle =
            ProgressThrottle::new(self.options.progress_every, self.options.progress_interval);
        let mut processed = 0usize;
        let mut xml = Writer::new(&mut *out);

        xml_err(xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None))))?;
        newline(&mut xml)?;
        xml_err(xml.write_event(Event::Start(BytesStart::new("codebase"))))?;
        newline(&mut xml)?;

        for event in walker {
            if self.is_cancelled() {
                log::warn!("Flatten cancelled after {} entries.", processed);
                manifest.finalize(RunStatus::Incomplete);
                return Ok(manifest);
            }
            let event = event?;
            processed += 1;
            let current_path = event.path().to_string();
            match event {
                WalkEvent::File(entry) => write_file(&mut xml, entry, &mut manifest)?,
                WalkEvent::Excluded { path, is_dir } => {
                    log::trace!("Excluded: {}", path);
                    manifest.record_excluded(is_dir);
                }
                WalkEvent::Failed {
                    path,
                    is_dir,
                    error,
                } => {
                    let message = entry_error_message(&error);
                    log::warn!("Skipping {}: {}", path, message);
                    let mut elem = BytesStart::new("error");
                    elem.push_attribute(("path", sanitize_xml(&path).as_str()));
                    elem.push_attribute(("message", sanitize_xml(&message).as_str()));
                    xml_err(xml.write_event(Event::Empty(elem)))?;
                    newline(&mut xml)?;
                    manifest.record_error(path, message, !is_dir);
                }
            }
            if let Some(reporter) = self.progress {
                if throttle.tick() {
                    reporter.emit(ProgressSnapshot {
                        phase: Phase::Flatten,
                        processed,
                        current_path,
                    });
                }
            }
        }

        if self.is_cancelled() {
            manifest.finalize(RunStatus::Incomplete);
            return Ok(manifest);
        }

        manifest.finalize(RunStatus::Complete);
        write_manifest(&mut xml, &manifest)?;
        xml_err(xml.write_event(Event::End(BytesEnd::new("codebase"))))?;
        newline(&mut xml)?;
        out.flush()?;
        log::info!(
            "Flatten complete: {} included, {} excluded by rule, {} binary, {} error(s).",
            manifest.included,
            manifest.excluded_by_rule,
            manifest.excluded_binary,
            manifest.errors.len()
        );
        Ok(manifest)
    }

    /// Flattens into `output` through an [`OutputSink`]. The output and its
    /// temporary sibling are kept out of the walk. Nothing is written to
    /// `output` unless the run completes.
    pub fn flatten_to_file(
        &self,
        root: &Path,
        ruleset: &IgnoreRuleSet,
        output: &Path,
    ) -> Result<FlattenManifest> {
        let mut sink = OutputSink::create(output)?;
        let guarded = sink.guarded_paths();
        match self.flatten_with_skip(root, ruleset, &mut sink, &guarded) {
            Ok(manifest) if manifest.is_complete() => {
                sink.commit()?;
                Ok(manifest)
            }
            Ok(_) => {
                sink.discard();
                Err(AppError::Cancelled)
            }
            Err(e) => {
                sink.discard();
                Err(e)
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

fn write_file<W: Write>(
    xml: &mut Writer<W>,
    entry: FileEntry,
    manifest: &mut FlattenManifest,
) -> Result<()> {
    let size = entry.size_bytes.to_string();
    let path = sanitize_xml(&entry.path);
    match (entry.classification, entry.content) {
        (Classification::Text, Some(content)) => {
            let mut start = BytesStart::new("file");
            start.push_attribute(("path", path.as_str()));
            start.push_attribute(("size", size.as_str()));
            xml_err(xml.write_event(Event::Start(start)))?;
            xml_err(xml.write_event(Event::Start(BytesStart::new("content"))))?;
            let text = sanitize_xml(&String::from_utf8_lossy(&content));
            for section in cdata_sections(&text) {
                xml_err(xml.write_event(Event::CData(BytesCData::new(section))))?;
            }
            xml_err(xml.write_event(Event::End(BytesEnd::new("content"))))?;
            xml_err(xml.write_event(Event::End(BytesEnd::new("file"))))?;
            manifest.record_included(entry.size_bytes);
        }
        _ => {
            let mut elem = BytesStart::new("binary");
            elem.push_attribute(("path", path.as_str()));
            elem.push_attribute(("size", size.as_str()));
            elem.push_attribute(("skipped", "true"));
            xml_err(xml.write_event(Event::Empty(elem)))?;
            log::trace!("Binary skipped: {}", entry.path);
            manifest.record_binary();
        }
    }
    newline(xml)
}

fn write_manifest<W: Write>(xml: &mut Writer<W>, manifest: &FlattenManifest) -> Result<()> {
    let counts = [
        ("totalFiles", manifest.total_seen.to_string()),
        ("included", manifest.included.to_string()),
        ("excludedByRule", manifest.excluded_by_rule.to_string()),
        ("excludedBinary", manifest.excluded_binary.to_string()),
        ("errors", manifest.errors.len().to_string()),
        ("status", manifest.status.as_str().to_string()),
    ];
    let mut elem = BytesStart::new("manifest");
    for (name, value) in &counts {
        elem.push_attribute((*name, value.as_str()));
    }
    xml_err(xml.write_event(Event::Empty(elem)))?;
    newline(xml)
}

fn newline<W: Write>(xml: &mut Writer<W>) -> Result<()> {
    xml.get_mut().write_all(b"\n")?;
    Ok(())
}

fn xml_err<T, E: Display>(result: std::result::Result<T, E>) -> Result<T> {
    result.map_err(|e| AppError::XmlWrite(e.to_string()))
}

/// Message recorded for a per-file failure, without absolute paths.
fn entry_error_message(error: &AppError) -> String {
    match error {
        AppError::FileRead { source, .. } => source.to_string(),
        AppError::ReadTimeout { timeout, .. } => format!("read timed out after {:?}", timeout),
        AppError::WorkerPool(_) => "reader stopped without a result".to_string(),
        other => other.to_string(),
    }
}

/// Replaces characters that XML 1.0 does not allow with U+FFFD.
fn sanitize_xml(text: &str) -> String {
    text.chars()
        .map(|c| if is_xml_char(c) { c } else { '\u{FFFD}' })
        .collect()
}

fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// Splits text so no section contains `]]>`; the terminator is divided between
/// two adjacent sections.
fn cdata_sections(text: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut rest = text;
    while let Some(idx) = rest.find("]]>") {
        sections.push(&rest[..idx + 2]);
        rest = &rest[idx + 2..];
    }
    sections.push(rest);
    sections
}
