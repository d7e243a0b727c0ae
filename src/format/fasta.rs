//! FASTA records: a `>` header line followed by sequence lines.

use super::RecordFormat;
use crate::utils::{first_word, split_words};
use std::io::{self, BufRead};

pub struct FastaFormat;

/// Header line text after `>`
fn header(record: &[u8]) -> Option<String> {
    let start = memchr::memchr(b'>', record)?;
    let end = memchr::memchr(b'\n', &record[start..])
        .map(|i| start + i)
        .unwrap_or(record.len());
    let text = String::from_utf8_lossy(&record[start + 1..end]);
    Some(text.trim_end_matches('\r').to_string())
}

impl RecordFormat for FastaFormat {
    fn name(&self) -> &'static str {
        "fasta"
    }

    fn read_record(&self, reader: &mut dyn BufRead, buf: &mut Vec<u8>) -> io::Result<usize> {
        let mut consumed = 0;
        let mut seen_header = false;
        loop {
            let next = reader.fill_buf()?;
            if next.is_empty() {
                break;
            }
            if next[0] == b'>' {
                if seen_header {
                    break;
                }
                seen_header = true;
            }
            let n = reader.read_until(b'\n', buf)?;
            consumed += n;
        }
        Ok(consumed)
    }

    fn identifier(&self, record: &[u8]) -> Option<String> {
        header(record).and_then(|h| first_word(&h).map(str::to_string))
    }

    fn extract_field(&self, record: &[u8], field: &str, out: &mut Vec<String>) {
        let Some(header) = header(record) else {
            return;
        };
        let mut parts = header.splitn(2, char::is_whitespace);
        let id = parts.next().unwrap_or_default();
        let description = parts.next().unwrap_or_default();

        match field {
            "id" => {
                if !id.is_empty() {
                    out.push(id.to_string());
                }
            }
            // db|accession|name identifiers carry the accession second
            "acc" => {
                if let Some(acc) = id.split('|').nth(1).filter(|a| !a.is_empty()) {
                    out.push(acc.to_string());
                }
            }
            "des" => out.extend(split_words(description).into_iter().map(str::to_string)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DATA: &[u8] = b">sp|P02768|ALBU_HUMAN Serum albumin OS=Homo sapiens\nMKWVTFISLL\nLLLFSSAYS\n>second\nACGT\n";

    #[test]
    fn test_read_records() {
        let mut reader = Cursor::new(DATA);
        let mut buf = Vec::new();

        let n = FastaFormat.read_record(&mut reader, &mut buf).unwrap();
        assert_eq!(&DATA[..n], &buf[..]);
        assert!(buf.ends_with(b"LLLFSSAYS\n"));

        buf.clear();
        let n = FastaFormat.read_record(&mut reader, &mut buf).unwrap();
        assert_eq!(n, 13);
        assert_eq!(FastaFormat.identifier(&buf).as_deref(), Some("second"));

        buf.clear();
        assert_eq!(FastaFormat.read_record(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_fields() {
        assert_eq!(
            FastaFormat.identifier(DATA).as_deref(),
            Some("sp|P02768|ALBU_HUMAN")
        );

        let mut out = Vec::new();
        FastaFormat.extract_field(DATA, "acc", &mut out);
        assert_eq!(out, vec!["P02768"]);

        out.clear();
        FastaFormat.extract_field(DATA, "des", &mut out);
        assert_eq!(out, vec!["Serum", "albumin", "OS", "Homo", "sapiens"]);
    }

    #[test]
    fn test_plain_identifier_has_no_accession() {
        let mut out = Vec::new();
        FastaFormat.extract_field(b">seq1 something\nAC\n", "acc", &mut out);
        assert!(out.is_empty());
    }
}
