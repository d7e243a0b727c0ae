//! Division table: division number → flat file(s).
//!
//! Stored as `divisions.div`: a header followed by variable-length records
//! `[number u16][excluded u8][primary: u16 len + bytes][secondary: u16 len + bytes]`,
//! with a zero-length secondary meaning "none".

use crate::error::{FlatdexError, Result};
use crate::index::header::{HEADER_SIZE, Header, IndexKind};
use crate::index::types::{Division, DivisionId};
use crate::utils::{read_short_bytes, read_u16_le, write_short_bytes, write_u16_le};
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const DIVISION_FILE: &str = "divisions.div";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DivisionTable {
    divisions: Vec<Division>,
}

impl DivisionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a division; numbers are assigned sequentially from 1
    pub fn push(&mut self, primary: PathBuf, secondary: Option<PathBuf>, excluded: bool) -> Result<DivisionId> {
        let number = DivisionId::try_from(self.divisions.len() + 1)
            .map_err(|_| FlatdexError::build("too many divisions"))?;
        self.divisions.push(Division {
            number,
            primary,
            secondary,
            excluded,
        });
        Ok(number)
    }

    pub fn get(&self, number: DivisionId) -> Option<&Division> {
        if number == 0 {
            return None;
        }
        self.divisions.get(number as usize - 1)
    }

    pub fn divisions(&self) -> &[Division] {
        &self.divisions
    }

    pub fn len(&self) -> usize {
        self.divisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.divisions.is_empty()
    }

    /// Write the table with its header
    pub fn write(&self, path: &Path, db_name: &str, release: &str) -> Result<()> {
        let mut body = Vec::new();
        for division in &self.divisions {
            write_u16_le(&mut body, division.number)?;
            body.push(division.excluded as u8);
            write_short_bytes(&mut body, path_bytes(&division.primary).as_bytes())?;
            let secondary = division
                .secondary
                .as_ref()
                .map(|p| path_bytes(p))
                .unwrap_or_default();
            write_short_bytes(&mut body, secondary.as_bytes())?;
        }

        let header = Header::variable(
            IndexKind::Division,
            db_name,
            release,
            self.divisions.len() as u32,
            body.len() as u64,
        );

        let mut file = BufWriter::new(File::create(path)?);
        header.write_to(&mut file)?;
        file.write_all(&body)?;
        file.flush()?;
        Ok(())
    }

    /// Read and validate a table from an open file; `path` is only used
    /// for errors. A record count that disagrees with the header is an
    /// invariant violation.
    pub fn read_from(file: &mut File, path: &Path) -> Result<Self> {
        let mut data = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut data)?;
        let header = Header::decode(&data, path)?;
        header.validate(IndexKind::Division, data.len() as u64, path)?;

        let mut cursor = Cursor::new(&data[HEADER_SIZE..]);

        let mut divisions = Vec::with_capacity(header.record_count as usize);
        while (cursor.position() as usize) < data.len() - HEADER_SIZE {
            let number = read_u16_le(&mut cursor)?;
            let mut flag = [0u8; 1];
            cursor.read_exact(&mut flag)?;
            let primary = PathBuf::from(String::from_utf8_lossy(&read_short_bytes(&mut cursor)?).as_ref());
            let secondary = read_short_bytes(&mut cursor)?;
            let secondary = if secondary.is_empty() {
                None
            } else {
                Some(PathBuf::from(String::from_utf8_lossy(&secondary).as_ref()))
            };

            if number as usize != divisions.len() + 1 {
                return Err(FlatdexError::invariant(format!(
                    "division table {} is out of sequence at number {}",
                    path.display(),
                    number
                )));
            }

            divisions.push(Division {
                number,
                primary,
                secondary,
                excluded: flag[0] != 0,
            });
        }

        if divisions.len() != header.record_count as usize {
            return Err(FlatdexError::invariant(format!(
                "division table {} lists {} divisions but header records {}",
                path.display(),
                divisions.len(),
                header.record_count
            )));
        }

        Ok(Self { divisions })
    }
}

fn path_bytes(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn read(path: &Path) -> Result<DivisionTable> {
        DivisionTable::read_from(&mut File::open(path).unwrap(), path)
    }

    fn sample() -> DivisionTable {
        let mut table = DivisionTable::new();
        table.push(PathBuf::from("hum1.dat"), None, false).unwrap();
        table
            .push(PathBuf::from("hum2.dat"), Some(PathBuf::from("hum2.seq")), false)
            .unwrap();
        table.push(PathBuf::from("est1.dat"), None, true).unwrap();
        table
    }

    #[test]
    fn test_numbers_start_at_one() {
        let table = sample();
        assert!(table.get(0).is_none());
        assert_eq!(table.get(1).unwrap().primary, PathBuf::from("hum1.dat"));
        assert!(table.get(3).unwrap().excluded);
        assert!(table.get(4).is_none());
    }

    #[test]
    fn test_write_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DIVISION_FILE);
        let table = sample();
        table.write(&path, "hum", "1").unwrap();

        let read = read(&path).unwrap();
        assert_eq!(read, table);
        assert_eq!(read.get(2).unwrap().secondary, Some(PathBuf::from("hum2.seq")));
    }

    #[cfg(unix)]
    #[test]
    fn test_read_from_open_handle_survives_unlink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DIVISION_FILE);
        sample().write(&path, "hum", "1").unwrap();

        let mut file = File::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(DivisionTable::read_from(&mut file, &path).unwrap(), sample());
        // Reading twice rewinds the handle
        assert_eq!(DivisionTable::read_from(&mut file, &path).unwrap().len(), 3);
    }

    #[test]
    fn test_count_mismatch_is_invariant_violation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DIVISION_FILE);
        sample().write(&path, "hum", "1").unwrap();

        // Patch the header record count to 2 while three records remain
        let mut data = std::fs::read(&path).unwrap();
        data[16..20].copy_from_slice(&2u32.to_le_bytes());
        std::fs::write(&path, data).unwrap();

        let err = read(&path).unwrap_err();
        assert!(matches!(err, FlatdexError::Invariant(_)));
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DIVISION_FILE);
        sample().write(&path, "hum", "1").unwrap();

        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 3]).unwrap();

        let err = read(&path).unwrap_err();
        assert!(matches!(err, FlatdexError::CorruptHeader { .. }));
    }
}
