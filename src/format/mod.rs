//! Flat-file record formats.
//!
//! A [`RecordFormat`] knows how to delimit one record in a flat file and how
//! to pull the identifier and field tokens out of it. Formats are looked up
//! by name through [`registry`], which is how a database configuration
//! selects its access method.

pub mod embl;
pub mod fasta;

use crate::error::{FlatdexError, Result};
use std::io::{self, BufRead};

pub use embl::EmblFormat;
pub use fasta::FastaFormat;

/// Names accepted by [`registry`]
pub const FORMAT_NAMES: &[&str] = &["embl", "swissprot", "fasta"];

/// Flat-file reader collaborator used by both the builder and the loader
pub trait RecordFormat: Send + Sync {
    fn name(&self) -> &'static str;

    /// Append the record starting at the reader's position to `buf`.
    /// Returns the number of bytes consumed, 0 at end of file.
    fn read_record(&self, reader: &mut dyn BufRead, buf: &mut Vec<u8>) -> io::Result<usize>;

    /// Identifier of a record, None if the bytes hold no record
    fn identifier(&self, record: &[u8]) -> Option<String>;

    /// Append the raw tokens of `field` found in the record
    fn extract_field(&self, record: &[u8], field: &str, out: &mut Vec<String>);
}

/// Look up a record format by name
pub fn registry(name: &str) -> Result<Box<dyn RecordFormat>> {
    match name.to_ascii_lowercase().as_str() {
        "embl" | "swissprot" | "sw" => Ok(Box::new(EmblFormat)),
        "fasta" => Ok(Box::new(FastaFormat)),
        other => Err(FlatdexError::configuration(format!(
            "unknown record format '{}' (known: {})",
            other,
            FORMAT_NAMES.join(", ")
        ))),
    }
}

/// Iterate the lines of a record without their line terminators
pub(crate) fn record_lines(record: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut start = 0;
    let mut ends = memchr::memchr_iter(b'\n', record);
    std::iter::from_fn(move || {
        if start >= record.len() {
            return None;
        }
        let end = ends.next().unwrap_or(record.len());
        let line = &record[start..end];
        start = end + 1;
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        assert_eq!(registry("embl").unwrap().name(), "embl");
        assert_eq!(registry("SwissProt").unwrap().name(), "embl");
        assert_eq!(registry("fasta").unwrap().name(), "fasta");
        let err = registry("genbank").err().unwrap();
        assert!(matches!(err, FlatdexError::Configuration(_)));
    }

    #[test]
    fn test_record_lines() {
        let lines: Vec<_> = record_lines(b"ID   A\r\nDE   b\n//\n").collect();
        assert_eq!(lines, vec![&b"ID   A"[..], b"DE   b", b"//"]);

        let lines: Vec<_> = record_lines(b"no newline").collect();
        assert_eq!(lines, vec![&b"no newline"[..]]);
    }
}
