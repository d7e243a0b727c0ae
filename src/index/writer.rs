//! Index writer: lays the collected entries and field tokens out as
//! fixed-length record files.
//!
//! Files written into the index directory:
//!
//! - `entries.ent`: `[id, NUL padded to id_len][division u16][primary u64][secondary u64]`,
//!   sorted by identifier, ties in insertion order. A record's position is
//!   its entry ordinal.
//! - `<field>.trg`: `[token, NUL padded to key_len][hit count u32][first hit u64]`,
//!   sorted by token.
//! - `<field>.hit`: `[entry ordinal u32]`, grouped by target, ascending
//!   ordinal within a target.
//! - `divisions.div` and `meta.json`.

use crate::error::{FlatdexError, Result};
use crate::index::collect::{CollectedField, CollectedIndex};
use crate::index::division::{DIVISION_FILE, DivisionTable};
use crate::index::header::{HEADER_SIZE, Header, IndexKind, index_file};
use crate::index::types::{EntryOrdinal, IndexMeta};
use crate::utils::{META_FILE, write_padded, write_u16_le, write_u32_le, write_u64_le};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const ENTRY_STEM: &str = "entries";

/// Bytes after the identifier column of an entry record
pub const ENTRY_TAIL_LEN: usize = 2 + 8 + 8;

/// Bytes after the token column of a target record
pub const TARGET_TAIL_LEN: usize = 4 + 8;

pub const HIT_RECORD_LEN: usize = 4;

/// Per-field output sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSummary {
    pub targets: u32,
    pub hits: u32,
}

/// Writes one index set into a (staging) directory
pub struct IndexWriter {
    index_path: PathBuf,
    db_name: String,
    release: String,
}

impl IndexWriter {
    pub fn new(index_path: &Path, db_name: &str, release: &str) -> Self {
        Self {
            index_path: index_path.to_path_buf(),
            db_name: db_name.to_string(),
            release: release.to_string(),
        }
    }

    /// Write the ID index and every field index
    pub fn write(&self, collected: CollectedIndex) -> Result<Vec<(String, FieldSummary)>> {
        self.write_entries(&collected)?;

        let mut summaries = Vec::with_capacity(collected.fields.len());
        for field in collected.fields {
            let name = field.config.name.clone();
            let summary = self.write_field(field, &collected.ordinal_of_seq)?;
            tracing::debug!(
                field = %name,
                targets = summary.targets,
                hits = summary.hits,
                "wrote field index"
            );
            summaries.push((name, summary));
        }
        Ok(summaries)
    }

    /// Write the ID index
    fn write_entries(&self, collected: &CollectedIndex) -> Result<()> {
        let id_len = collected.id_len.max(1);
        let count = u32::try_from(collected.entries.len())
            .map_err(|_| FlatdexError::build("too many entries for one index"))?;
        let header = Header::fixed(
            IndexKind::Entry,
            &self.db_name,
            &self.release,
            count,
            (id_len + ENTRY_TAIL_LEN) as u32,
        );

        let path = index_file(&self.index_path, ENTRY_STEM, IndexKind::Entry);
        let mut file = BufWriter::new(File::create(&path)?);
        header.write_to(&mut file)?;

        for entry in &collected.entries {
            write_padded(&mut file, entry.id.as_bytes(), id_len)?;
            write_u16_le(&mut file, entry.division)?;
            write_u64_le(&mut file, entry.primary_offset)?;
            write_u64_le(&mut file, entry.secondary_offset)?;
        }

        file.flush()?;
        Ok(())
    }

    /// Write the target and hit files of one field from its sorted token stream
    fn write_field(
        &self,
        field: CollectedField,
        ordinal_of_seq: &[EntryOrdinal],
    ) -> Result<FieldSummary> {
        let key_len = field.key_len.max(1);
        let name = field.config.name;

        let mut trg = BufWriter::new(File::create(index_file(
            &self.index_path,
            &name,
            IndexKind::Target,
        ))?);
        let mut hit = BufWriter::new(File::create(index_file(
            &self.index_path,
            &name,
            IndexKind::Hit,
        ))?);

        // Headers are filled in once the counts are known
        trg.write_all(&[0u8; HEADER_SIZE])?;
        hit.write_all(&[0u8; HEADER_SIZE])?;

        let mut current: Option<String> = None;
        let mut count: u32 = 0;
        let mut start: u64 = 0;
        let mut hits: u64 = 0;
        let mut targets: u32 = 0;

        for key in field.tokens {
            let key = key?;
            if current.as_deref() != Some(key.token.as_str()) {
                if let Some(token) = current.take() {
                    write_target(&mut trg, &token, key_len, count, start)?;
                    targets += 1;
                }
                current = Some(key.token);
                count = 0;
                start = hits;
            }

            let ordinal = ordinal_of_seq.get(key.seq as usize).copied().ok_or_else(|| {
                FlatdexError::invariant(format!(
                    "token of field '{}' points at unknown entry {}",
                    name, key.entry
                ))
            })?;
            write_u32_le(&mut hit, ordinal)?;
            count += 1;
            hits += 1;
        }
        if let Some(token) = current.take() {
            write_target(&mut trg, &token, key_len, count, start)?;
            targets += 1;
        }

        let hits = u32::try_from(hits)
            .map_err(|_| FlatdexError::build(format!("too many hits for field '{}'", name)))?;

        finish_fixed(
            trg,
            Header::fixed(
                IndexKind::Target,
                &self.db_name,
                &self.release,
                targets,
                (key_len + TARGET_TAIL_LEN) as u32,
            ),
        )?;
        finish_fixed(
            hit,
            Header::fixed(
                IndexKind::Hit,
                &self.db_name,
                &self.release,
                hits,
                HIT_RECORD_LEN as u32,
            ),
        )?;

        Ok(FieldSummary { targets, hits })
    }

    pub fn write_divisions(&self, table: &DivisionTable) -> Result<()> {
        table.write(
            &self.index_path.join(DIVISION_FILE),
            &self.db_name,
            &self.release,
        )
    }

    /// Write the manifest. Written last: its presence marks a complete set.
    pub fn write_meta(&self, meta: &IndexMeta) -> Result<()> {
        let file = File::create(self.index_path.join(META_FILE))?;
        serde_json::to_writer_pretty(file, meta)?;
        Ok(())
    }
}

fn write_target<W: Write>(
    writer: &mut W,
    token: &str,
    key_len: usize,
    count: u32,
    start: u64,
) -> Result<()> {
    write_padded(writer, token.as_bytes(), key_len)?;
    write_u32_le(writer, count)?;
    write_u64_le(writer, start)?;
    Ok(())
}

/// Flush a record file and write its real header over the placeholder
fn finish_fixed(writer: BufWriter<File>, header: Header) -> Result<()> {
    let mut file = writer.into_inner().map_err(|e| e.into_error())?;
    file.seek(SeekFrom::Start(0))?;
    header.write_to(&mut file)?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::collect::FieldCollector;
    use crate::index::collect::ParsedRecord;
    use crate::index::sort::SortStrategy;
    use crate::index::types::FieldConfig;
    use crate::utils::{trim_padding, u32_at, u64_at};
    use std::fs;
    use tempfile::tempdir;

    fn record(id: &str, offset: u64, org: &[&str]) -> ParsedRecord {
        ParsedRecord {
            id: id.to_string(),
            primary_offset: offset,
            secondary_offset: 0,
            tokens: vec![org.iter().map(|s| s.to_string()).collect()],
        }
    }

    #[test]
    fn test_write_layout() {
        let dir = tempdir().unwrap();
        let fields = vec![FieldConfig::new("org")];
        let mut collector = FieldCollector::new(&fields, SortStrategy::InMemory, dir.path(), 1024);
        collector.add_record(1, record("B", 0, &["HOMO", "SAPIENS"])).unwrap();
        collector.add_record(1, record("A", 100, &["HOMO"])).unwrap();
        collector.add_record(2, record("AB", 0, &["MUS"])).unwrap();

        let writer = IndexWriter::new(dir.path(), "test", "1");
        let summaries = writer.write(collector.finish().unwrap()).unwrap();
        assert_eq!(summaries[0].1, FieldSummary { targets: 3, hits: 4 });

        // Entries sorted by id: A, AB, B
        let ent = fs::read(dir.path().join("entries.ent")).unwrap();
        let header = Header::decode(&ent, Path::new("entries.ent")).unwrap();
        assert_eq!(header.record_count, 3);
        assert_eq!(header.record_length as usize, 2 + ENTRY_TAIL_LEN);
        assert_eq!(header.file_size, ent.len() as u64);
        let rec = |i: usize| &ent[HEADER_SIZE + i * 20..HEADER_SIZE + (i + 1) * 20];
        assert_eq!(trim_padding(&rec(0)[..2]), b"A");
        assert_eq!(u64_at(rec(0), 4), 100);
        assert_eq!(trim_padding(&rec(1)[..2]), b"AB");
        assert_eq!(trim_padding(&rec(2)[..2]), b"B");

        // HOMO → ordinals of A (0) and B (2)
        let trg = fs::read(dir.path().join("org.trg")).unwrap();
        let header = Header::decode(&trg, Path::new("org.trg")).unwrap();
        assert_eq!(header.kind, IndexKind::Target);
        assert_eq!(header.file_size, trg.len() as u64);
        let first = &trg[HEADER_SIZE..HEADER_SIZE + header.record_length as usize];
        assert_eq!(trim_padding(&first[..7]), b"HOMO");
        assert_eq!(u32_at(first, 7), 2);
        assert_eq!(u64_at(first, 11), 0);

        let hit = fs::read(dir.path().join("org.hit")).unwrap();
        assert_eq!(hit.len(), HEADER_SIZE + 16);
        assert_eq!(u32_at(&hit, HEADER_SIZE), 0);
        assert_eq!(u32_at(&hit, HEADER_SIZE + 4), 2);
    }
}
