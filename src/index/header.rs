//! Fixed-layout header written at the start of every index file.
//!
//! Layout (64 bytes, little-endian):
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | magic `FDX\0`                           |
//! | 4      | 2    | version marker                          |
//! | 6      | 2    | file kind                               |
//! | 8      | 8    | total file size                         |
//! | 16     | 4    | record count                            |
//! | 20     | 4    | record length (0 = variable)            |
//! | 24     | 20   | database name, NUL padded               |
//! | 44     | 10   | release tag, NUL padded                 |
//! | 54     | 4    | build date: years since 1900, month, day, 0 |
//! | 58     | 6    | reserved                                |

use crate::error::{FlatdexError, Result};
use crate::index::types::INDEX_VERSION;
use crate::utils::{trim_padding, u16_at, u32_at, u64_at};
use chrono::Datelike;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const HEADER_SIZE: usize = 64;

const MAGIC: [u8; 4] = *b"FDX\0";
const DB_NAME_LEN: usize = 20;
const RELEASE_LEN: usize = 10;

/// Kind of index file a header belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum IndexKind {
    Entry = 1,
    Division = 2,
    Target = 3,
    Hit = 4,
}

impl IndexKind {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(IndexKind::Entry),
            2 => Some(IndexKind::Division),
            3 => Some(IndexKind::Target),
            4 => Some(IndexKind::Hit),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            IndexKind::Entry => "ent",
            IndexKind::Division => "div",
            IndexKind::Target => "trg",
            IndexKind::Hit => "hit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub kind: IndexKind,
    pub file_size: u64,
    pub record_count: u32,
    pub record_length: u32,
    pub db_name: String,
    pub release: String,
    pub build_date: [u8; 4],
}

impl Header {
    /// Header for a file of fixed-length records; the file size follows
    /// from the count and length
    pub fn fixed(
        kind: IndexKind,
        db_name: &str,
        release: &str,
        record_count: u32,
        record_length: u32,
    ) -> Self {
        Self {
            version: INDEX_VERSION,
            kind,
            file_size: HEADER_SIZE as u64 + record_count as u64 * record_length as u64,
            record_count,
            record_length,
            db_name: db_name.to_string(),
            release: release.to_string(),
            build_date: today(),
        }
    }

    /// Header for a file of variable-length records with a known body size
    pub fn variable(
        kind: IndexKind,
        db_name: &str,
        release: &str,
        record_count: u32,
        body_size: u64,
    ) -> Self {
        Self {
            version: INDEX_VERSION,
            kind,
            file_size: HEADER_SIZE as u64 + body_size,
            record_count,
            record_length: 0,
            db_name: db_name.to_string(),
            release: release.to_string(),
            build_date: today(),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&(self.kind as u16).to_le_bytes());
        buf[8..16].copy_from_slice(&self.file_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.record_count.to_le_bytes());
        buf[20..24].copy_from_slice(&self.record_length.to_le_bytes());
        copy_text(&mut buf[24..24 + DB_NAME_LEN], &self.db_name);
        copy_text(&mut buf[44..44 + RELEASE_LEN], &self.release);
        buf[54..58].copy_from_slice(&self.build_date);
        buf
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.encode())
    }

    /// Decode a header; `path` is only used for error reporting
    pub fn decode(buf: &[u8], path: &Path) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(FlatdexError::corrupt_header(path, "file shorter than header"));
        }
        if buf[0..4] != MAGIC {
            return Err(FlatdexError::corrupt_header(path, "bad magic"));
        }
        let kind_raw = u16_at(buf, 6);
        let kind = IndexKind::from_u16(kind_raw).ok_or_else(|| {
            FlatdexError::corrupt_header(path, format!("unknown file kind {}", kind_raw))
        })?;
        let mut build_date = [0u8; 4];
        build_date.copy_from_slice(&buf[54..58]);

        Ok(Self {
            version: u16_at(buf, 4),
            kind,
            file_size: u64_at(buf, 8),
            record_count: u32_at(buf, 16),
            record_length: u32_at(buf, 20),
            db_name: String::from_utf8_lossy(trim_padding(&buf[24..24 + DB_NAME_LEN])).to_string(),
            release: String::from_utf8_lossy(trim_padding(&buf[44..44 + RELEASE_LEN])).to_string(),
            build_date,
        })
    }

    /// Check version, kind and sizes against the file actually on disk
    pub fn validate(&self, expected: IndexKind, actual_size: u64, path: &Path) -> Result<()> {
        if self.version != INDEX_VERSION {
            return Err(FlatdexError::corrupt_header(
                path,
                format!("version {} (expected {})", self.version, INDEX_VERSION),
            ));
        }
        if self.kind != expected {
            return Err(FlatdexError::corrupt_header(
                path,
                format!("file kind {:?} (expected {:?})", self.kind, expected),
            ));
        }
        if self.file_size != actual_size {
            return Err(FlatdexError::corrupt_header(
                path,
                format!("recorded size {} but file is {} bytes", self.file_size, actual_size),
            ));
        }
        if self.record_length > 0 {
            let expected_size =
                HEADER_SIZE as u64 + self.record_count as u64 * self.record_length as u64;
            if expected_size != self.file_size {
                return Err(FlatdexError::corrupt_header(
                    path,
                    format!(
                        "{} records of {} bytes do not fill {} bytes",
                        self.record_count, self.record_length, self.file_size
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Build date as YYYY-MM-DD
    pub fn build_date_string(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}",
            1900 + self.build_date[0] as u32,
            self.build_date[1],
            self.build_date[2]
        )
    }
}

/// Path of an index file: `<dir>/<stem>.<kind extension>`
pub fn index_file(dir: &Path, stem: &str, kind: IndexKind) -> PathBuf {
    dir.join(format!("{}.{}", stem, kind.extension()))
}

/// Today's date in the 4-byte header encoding
pub fn today() -> [u8; 4] {
    let now = chrono::Local::now().date_naive();
    let years = (now.year() - 1900).clamp(0, 255) as u8;
    [years, now.month() as u8, now.day() as u8, 0]
}

/// Copy text into a fixed column, truncating on a char boundary
fn copy_text(dest: &mut [u8], text: &str) {
    let mut end = text.len().min(dest.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    dest[..end].copy_from_slice(&text.as_bytes()[..end]);
}
