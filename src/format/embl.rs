//! EMBL / Swiss-Prot style line-coded records.
//!
//! Every line starts with a two-letter code; a record ends with a `//` line.

use super::{RecordFormat, record_lines};
use crate::utils::{first_word, split_list, split_words};
use std::io::{self, BufRead};

pub struct EmblFormat;

/// How the tokens of a line code are split
enum Splitter {
    FirstWord,
    List,
    Words,
}

/// Map a field name to its line code and splitter
fn field_code(field: &str) -> Option<([u8; 2], Splitter)> {
    match field {
        "id" => Some((*b"ID", Splitter::FirstWord)),
        "acc" => Some((*b"AC", Splitter::List)),
        "sv" => Some((*b"SV", Splitter::List)),
        "des" => Some((*b"DE", Splitter::Words)),
        "key" => Some((*b"KW", Splitter::List)),
        "org" | "organism" => Some((*b"OS", Splitter::Words)),
        "tax" => Some((*b"OC", Splitter::List)),
        other if other.len() == 2 && other.is_ascii() => {
            let code = other.to_ascii_uppercase();
            let bytes = code.as_bytes();
            Some(([bytes[0], bytes[1]], Splitter::Words))
        }
        _ => None,
    }
}

/// Text after the line code, if the line carries `code`
fn line_text<'a>(line: &'a [u8], code: &[u8; 2]) -> Option<&'a [u8]> {
    if line.len() < 2 || &line[..2] != code {
        return None;
    }
    match line.get(2) {
        None => Some(&line[2..]),
        Some(b) if b.is_ascii_whitespace() => Some(&line[2..]),
        Some(_) => None,
    }
}

fn is_terminator(line: &[u8]) -> bool {
    line.trim_ascii_end() == b"//"
}

impl RecordFormat for EmblFormat {
    fn name(&self) -> &'static str {
        "embl"
    }

    fn read_record(&self, reader: &mut dyn BufRead, buf: &mut Vec<u8>) -> io::Result<usize> {
        let mut consumed = 0;
        loop {
            let start = buf.len();
            let n = reader.read_until(b'\n', buf)?;
            if n == 0 {
                break;
            }
            consumed += n;
            if is_terminator(&buf[start..]) {
                break;
            }
        }
        Ok(consumed)
    }

    fn identifier(&self, record: &[u8]) -> Option<String> {
        record_lines(record)
            .find_map(|line| line_text(line, b"ID"))
            .and_then(|text| first_word(&String::from_utf8_lossy(text)).map(str::to_string))
    }

    fn extract_field(&self, record: &[u8], field: &str, out: &mut Vec<String>) {
        let Some((code, splitter)) = field_code(field) else {
            return;
        };

        for line in record_lines(record) {
            let Some(text) = line_text(line, &code) else {
                continue;
            };
            let text = String::from_utf8_lossy(text);
            match splitter {
                Splitter::FirstWord => {
                    if let Some(word) = first_word(&text) {
                        out.push(word.to_string());
                    }
                    // Only the first ID line names the entry
                    return;
                }
                Splitter::List => out.extend(split_list(&text, ';').into_iter().map(str::to_string)),
                Splitter::Words => out.extend(split_words(&text).into_iter().map(str::to_string)),
            }
        }
    }
}
