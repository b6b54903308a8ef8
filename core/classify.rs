use crate::builtin::get_binary_extensions;
use crate::config::DEFAULT_SAMPLE_BYTES;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Text,
    Binary,
}

/// Classification plus whether the sample needed the UTF-8 tolerance to pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub classification: Classification,
    pub ambiguous: bool,
}

impl Verdict {
    fn text() -> Self {
        Self {
            classification: Classification::Text,
            ambiguous: false,
        }
    }
    fn binary() -> Self {
        Self {
            classification: Classification::Binary,
            ambiguous: false,
        }
    }
}

/// Invalid UTF-8 sequences tolerated per 100 bytes of sample.
const TOLERATED_PERCENT: usize = 1;
const MAX_TOLERATED_SEQUENCES: usize = 8;

#[derive(Debug, Clone)]
pub struct FileClassifier {
    sample_bytes: usize,
    extra_binary_extensions: HashSet<String>,
}

impl Default for FileClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_BYTES, &[])
    }
}

impl FileClassifier {
    pub fn new(sample_bytes: usize, extra_binary_extensions: &[String]) -> Self {
        Self {
            sample_bytes: sample_bytes.max(1),
            extra_binary_extensions: extra_binary_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Number of leading bytes the caller should read before calling [`inspect`](Self::inspect).
    pub fn sample_bytes(&self) -> usize {
        self.sample_bytes
    }

    /// Extension fast path: true when the file can be called binary without reading it.
    pub fn is_known_binary_extension(&self, extension: Option<&str>) -> bool {
        let Some(ext) = extension else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        get_binary_extensions().contains(&ext) || self.extra_binary_extensions.contains(&ext)
    }

    pub fn classify(&self, sample: &[u8], extension: Option<&str>) -> Classification {
        self.inspect(sample, extension).classification
    }

    pub fn inspect(&self, sample: &[u8], extension: Option<&str>) -> Verdict {
        if self.is_known_binary_extension(extension) {
            return Verdict::binary();
        }
        let sample = &sample[..sample.len().min(self.sample_bytes)];
        if sample.contains(&0) {
            return Verdict::binary();
        }
        let invalid = count_invalid_sequences(sample);
        if invalid == 0 {
            return Verdict::text();
        }
        let tolerance = (sample.len() * TOLERATED_PERCENT / 100).min(MAX_TOLERATED_SEQUENCES);
        if invalid <= tolerance {
            Verdict {
                classification: Classification::Text,
                ambiguous: true,
            }
        } else {
            Verdict::binary()
        }
    }
}

/// Counts invalid UTF-8 sequences. A multi-byte sequence cut off by the end of the
/// sample is not counted, since the sample is usually a prefix of the file.
fn count_invalid_sequences(mut bytes: &[u8]) -> usize {
    let mut invalid = 0;
    loop {
        match std::str::from_utf8(bytes) {
            Ok(_) => return invalid,
            Err(e) => match e.error_len() {
                None => return invalid,
                Some(len) => {
                    invalid += 1;
                    bytes = &bytes[e.valid_up_to() + len..];
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_utf8_is_text() {
        let c = FileClassifier::default();
        assert_eq!(c.classify(b"fn main() {}\n", Some("rs")), Classification::Text);
        assert_eq!(c.classify("héllo wörld".as_bytes(), None), Classification::Text);
        assert_eq!(c.classify(b"", None), Classification::Text);
    }

    #[test]
    fn nul_byte_means_binary() {
        let c = FileClassifier::default();
        assert_eq!(c.classify(b"abc\0def", Some("txt")), Classification::Binary);
    }

    #[test]
    fn nul_beyond_sample_window_is_not_seen() {
        let c = FileClassifier::new(4, &[]);
        assert_eq!(c.classify(b"abcd\0", None), Classification::Text);
    }

    #[test]
    fn extension_fast_path_skips_sampling() {
        let c = FileClassifier::default();
        assert_eq!(c.classify(b"plain text really", Some("PNG")), Classification::Binary);
        let custom = FileClassifier::new(8000, &[".dat".to_string()]);
        assert_eq!(custom.classify(b"text", Some("dat")), Classification::Binary);
        assert!(!c.is_known_binary_extension(None));
    }

    #[test]
    fn truncated_multibyte_sequence_at_end_is_tolerated() {
        let c = FileClassifier::default();
        let mut sample = "ok ".repeat(10).into_bytes();
        sample.extend_from_slice(&"€".as_bytes()[..2]);
        let verdict = c.inspect(&sample, None);
        assert_eq!(verdict.classification, Classification::Text);
        assert!(!verdict.ambiguous);
    }

    #[test]
    fn few_invalid_bytes_are_ambiguous_text() {
        let c = FileClassifier::default();
        let mut sample = "a".repeat(500).into_bytes();
        sample.push(0xFF);
        sample.extend_from_slice(b"tail");
        let verdict = c.inspect(&sample, None);
        assert_eq!(verdict.classification, Classification::Text);
        assert!(verdict.ambiguous);
    }

    #[test]
    fn many_invalid_bytes_mean_binary() {
        let c = FileClassifier::default();
        let sample: Vec<u8> = (0..200u8).map(|i| 0x80 | (i % 0x3F)).collect();
        assert_eq!(c.classify(&sample, None), Classification::Binary);
    }
}
