//! Memory-mapped readers for the ID index and the per-field indices.

use crate::error::{FlatdexError, Result};
use crate::index::header::{HEADER_SIZE, Header, IndexKind, index_file};
use crate::index::types::{Entry, EntryOrdinal};
use crate::index::writer::{ENTRY_STEM, ENTRY_TAIL_LEN, HIT_RECORD_LEN, TARGET_TAIL_LEN};
use crate::utils::{Pattern, trim_padding, u16_at, u32_at, u64_at};
use memmap2::Mmap;
use roaring::RoaringBitmap;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// A validated index file of fixed-length records
struct RecordFile {
    mmap: Mmap,
    header: Header,
    path: PathBuf,
}

impl RecordFile {
    fn open(path: &Path, kind: IndexKind) -> Result<Self> {
        let file = File::open(path)?;
        Self::map(&file, path, kind)
    }

    /// Map an already open file and validate its header
    fn map(file: &File, path: &Path, kind: IndexKind) -> Result<Self> {
        // Index files are never modified in place; a rebuild writes a new generation
        let mmap = unsafe { Mmap::map(file)? };
        let header = Header::decode(&mmap, path)?;
        header.validate(kind, mmap.len() as u64, path)?;
        if header.record_length == 0 {
            return Err(FlatdexError::corrupt_header(path, "variable-length records"));
        }
        Ok(Self {
            mmap,
            header,
            path: path.to_path_buf(),
        })
    }

    fn len(&self) -> u32 {
        self.header.record_count
    }

    fn record(&self, index: u32) -> &[u8] {
        let len = self.header.record_length as usize;
        let start = HEADER_SIZE + index as usize * len;
        &self.mmap[start..start + len]
    }
}

/// Target record of a field index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub count: u32,
    pub first_hit: u64,
}

/// The ID index: identifier → (division, offsets), sorted by identifier
pub struct EntryIndex {
    file: RecordFile,
    id_len: usize,
}

impl EntryIndex {
    pub fn open(index_dir: &Path) -> Result<Self> {
        let path = index_file(index_dir, ENTRY_STEM, IndexKind::Entry);
        if !path.exists() {
            return Err(FlatdexError::configuration(format!(
                "ID index {} is missing",
                path.display()
            )));
        }
        let file = RecordFile::open(&path, IndexKind::Entry)?;
        let record_length = file.header.record_length as usize;
        if record_length <= ENTRY_TAIL_LEN {
            return Err(FlatdexError::corrupt_header(&path, "entry records too short"));
        }
        Ok(Self {
            file,
            id_len: record_length - ENTRY_TAIL_LEN,
        })
    }

    pub fn len(&self) -> u32 {
        self.file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn header(&self) -> &Header {
        &self.file.header
    }

    /// Identifier bytes stored at an ordinal
    fn id_bytes(&self, ordinal: EntryOrdinal) -> &[u8] {
        trim_padding(&self.file.record(ordinal)[..self.id_len])
    }

    pub fn id_at(&self, ordinal: EntryOrdinal) -> Option<String> {
        if ordinal >= self.len() {
            return None;
        }
        Some(String::from_utf8_lossy(self.id_bytes(ordinal)).to_string())
    }

    pub fn entry(&self, ordinal: EntryOrdinal) -> Option<Entry> {
        if ordinal >= self.len() {
            return None;
        }
        let rec = self.file.record(ordinal);
        let tail = self.id_len;
        Some(Entry {
            id: String::from_utf8_lossy(trim_padding(&rec[..tail])).to_string(),
            division: u16_at(rec, tail),
            primary_offset: u64_at(rec, tail + 2),
            secondary_offset: u64_at(rec, tail + 10),
        })
    }

    /// First ordinal whose identifier is >= `key`
    pub fn lower_bound(&self, key: &[u8]) -> EntryOrdinal {
        partition_point(self.len(), |i| self.id_bytes(i) < key)
    }

    /// Ordinals holding exactly `id`
    pub fn equal_range(&self, id: &str) -> Range<EntryOrdinal> {
        let start = self.lower_bound(id.as_bytes());
        let end = start + partition_point(self.len() - start, |i| {
            self.id_bytes(start + i) == id.as_bytes()
        });
        start..end
    }

    /// Ordinals whose identifier starts with `prefix`
    pub fn prefix_range(&self, prefix: &str) -> Range<EntryOrdinal> {
        let start = self.lower_bound(prefix.as_bytes());
        let end = start + partition_point(self.len() - start, |i| {
            self.id_bytes(start + i).starts_with(prefix.as_bytes())
        });
        start..end
    }

    /// Ordinals whose identifier equals `text` ignoring ASCII case
    pub fn find_ignore_case(&self, text: &str) -> RoaringBitmap {
        let range = case_range(self.len(), text, |i| self.id_bytes(i));
        range
            .filter(|&i| self.id_bytes(i).eq_ignore_ascii_case(text.as_bytes()))
            .collect()
    }

    /// Ordinals whose identifier matches the pattern
    pub fn find(&self, pattern: &Pattern) -> RoaringBitmap {
        if let Some(exact) = pattern.exact() {
            let range = self.equal_range(exact);
            let mut bitmap = RoaringBitmap::new();
            bitmap.insert_range(range);
            return bitmap;
        }
        self.prefix_range(pattern.prefix())
            .filter(|&i| pattern.is_match(&String::from_utf8_lossy(self.id_bytes(i))))
            .collect()
    }
}

/// Open handles of a field's `.trg`/`.hit` pair. Holding them keeps the
/// files of one generation reachable after a rebuild retires it.
pub struct FieldFiles {
    targets: File,
    trg_path: PathBuf,
    hits: File,
    hit_path: PathBuf,
}

impl FieldFiles {
    /// A missing pair is a `NotFound` for this field only
    pub fn open(index_dir: &Path, field: &str) -> Result<Self> {
        let trg_path = index_file(index_dir, field, IndexKind::Target);
        let hit_path = index_file(index_dir, field, IndexKind::Hit);
        let open = |path: &Path| {
            File::open(path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => FlatdexError::not_found(format!(
                    "field '{}' has no index in {}",
                    field,
                    index_dir.display()
                )),
                _ => FlatdexError::Io(e),
            })
        };
        Ok(Self {
            targets: open(&trg_path)?,
            hits: open(&hit_path)?,
            trg_path,
            hit_path,
        })
    }
}

/// Keyword index of one field: sorted targets plus their hit lists
pub struct FieldIndex {
    name: String,
    targets: RecordFile,
    hits: RecordFile,
    key_len: usize,
    entry_count: u32,
}

impl FieldIndex {
    /// Map a pair opened earlier with [`FieldFiles::open`]
    pub fn map(files: &FieldFiles, field: &str, entry_count: u32) -> Result<Self> {
        let targets = RecordFile::map(&files.targets, &files.trg_path, IndexKind::Target)?;
        let hits = RecordFile::map(&files.hits, &files.hit_path, IndexKind::Hit)?;
        let record_length = targets.header.record_length as usize;
        if record_length <= TARGET_TAIL_LEN {
            return Err(FlatdexError::corrupt_header(&files.trg_path, "target records too short"));
        }
        if hits.header.record_length as usize != HIT_RECORD_LEN {
            return Err(FlatdexError::corrupt_header(&files.hit_path, "unexpected hit record length"));
        }

        Ok(Self {
            name: field.to_string(),
            targets,
            hits,
            key_len: record_length - TARGET_TAIL_LEN,
            entry_count,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_count(&self) -> u32 {
        self.targets.len()
    }

    pub fn hit_count(&self) -> u32 {
        self.hits.len()
    }

    fn token_bytes(&self, index: u32) -> &[u8] {
        trim_padding(&self.targets.record(index)[..self.key_len])
    }

    pub fn token_at(&self, index: u32) -> Option<String> {
        if index >= self.target_count() {
            return None;
        }
        Some(String::from_utf8_lossy(self.token_bytes(index)).to_string())
    }

    fn target_at(&self, index: u32) -> Target {
        let rec = self.targets.record(index);
        Target {
            count: u32_at(rec, self.key_len),
            first_hit: u64_at(rec, self.key_len + 4),
        }
    }

    /// Direct target lookup for an exact token
    pub fn lookup(&self, token: &str) -> Option<Target> {
        let i = partition_point(self.target_count(), |i| self.token_bytes(i) < token.as_bytes());
        if i < self.target_count() && self.token_bytes(i) == token.as_bytes() {
            Some(self.target_at(i))
        } else {
            None
        }
    }

    /// Entry ordinals listed by a target
    pub fn hits(&self, target: Target) -> Result<Vec<EntryOrdinal>> {
        let end = target.first_hit + target.count as u64;
        if end > self.hit_count() as u64 {
            return Err(FlatdexError::invariant(format!(
                "target of field '{}' points past the end of {}",
                self.name,
                self.hits.path.display()
            )));
        }
        let mut ordinals = Vec::with_capacity(target.count as usize);
        for i in target.first_hit..end {
            let ordinal = u32_at(self.hits.record(i as u32), 0);
            if ordinal >= self.entry_count {
                return Err(FlatdexError::invariant(format!(
                    "field '{}' lists entry {} but the ID index holds {}",
                    self.name, ordinal, self.entry_count
                )));
            }
            ordinals.push(ordinal);
        }
        Ok(ordinals)
    }

    /// Union of the hit lists of every token matching the pattern
    pub fn find(&self, pattern: &Pattern) -> Result<RoaringBitmap> {
        let mut bitmap = RoaringBitmap::new();
        if let Some(exact) = pattern.exact() {
            if let Some(target) = self.lookup(exact) {
                bitmap.extend(self.hits(target)?);
            }
            return Ok(bitmap);
        }

        let prefix = pattern.prefix().as_bytes();
        let start = partition_point(self.target_count(), |i| self.token_bytes(i) < prefix);
        for i in start..self.target_count() {
            let token = self.token_bytes(i);
            if !token.starts_with(prefix) {
                break;
            }
            if pattern.is_match(&String::from_utf8_lossy(token)) {
                bitmap.extend(self.hits(self.target_at(i))?);
            }
        }
        Ok(bitmap)
    }

    /// Union of the hit lists of every token equal to `text` ignoring
    /// ASCII case
    pub fn find_ignore_case(&self, text: &str) -> Result<RoaringBitmap> {
        let mut bitmap = RoaringBitmap::new();
        for i in case_range(self.target_count(), text, |i| self.token_bytes(i)) {
            if self.token_bytes(i).eq_ignore_ascii_case(text.as_bytes()) {
                bitmap.extend(self.hits(self.target_at(i))?);
            }
        }
        Ok(bitmap)
    }

    /// Tokens with their hit counts, in index order
    pub fn tokens(&self) -> impl Iterator<Item = (String, u32)> + '_ {
        (0..self.target_count()).map(|i| {
            (
                String::from_utf8_lossy(self.token_bytes(i)).to_string(),
                self.target_at(i).count,
            )
        })
    }
}

/// Range of sorted keys that can equal `text` ignoring ASCII case. Every
/// case variant of a key sorts between its all-upper and all-lower forms.
fn case_range<'a>(len: u32, text: &str, key: impl Fn(u32) -> &'a [u8]) -> Range<u32> {
    let upper = text.to_ascii_uppercase();
    let lower = text.to_ascii_lowercase();
    let start = partition_point(len, |i| key(i) < upper.as_bytes());
    let end = partition_point(len, |i| key(i) <= lower.as_bytes());
    start..end.max(start)
}

/// Binary search over `0..len` for the first index where `pred` is false
fn partition_point(len: u32, pred: impl Fn(u32) -> bool) -> u32 {
    let (mut lo, mut hi) = (0u32, len);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::collect::{FieldCollector, ParsedRecord};
    use crate::index::sort::SortStrategy;
    use crate::index::types::FieldConfig;
    use crate::index::writer::IndexWriter;
    use tempfile::{TempDir, tempdir};

    fn build(records: &[(&str, u16, u64, &[&str])]) -> TempDir {
        let dir = tempdir().unwrap();
        let fields = vec![FieldConfig::new("org")];
        let mut collector = FieldCollector::new(&fields, SortStrategy::InMemory, dir.path(), 1024);
        for (id, division, offset, org) in records {
            collector
                .add_record(
                    *division,
                    ParsedRecord {
                        id: id.to_string(),
                        primary_offset: *offset,
                        secondary_offset: 0,
                        tokens: vec![org.iter().map(|s| s.to_string()).collect()],
                    },
                )
                .unwrap();
        }
        IndexWriter::new(dir.path(), "t", "1")
            .write(collector.finish().unwrap())
            .unwrap();
        dir
    }

    fn open_field(dir: &Path, field: &str) -> FieldIndex {
        let files = FieldFiles::open(dir, field).unwrap();
        FieldIndex::map(&files, field, 4).unwrap()
    }

    fn sample() -> TempDir {
        build(&[
            ("P12345", 1, 0, &["HOMO", "SAPIENS"]),
            ("P12346", 1, 120, &["MUS"]),
            ("Q99999", 2, 0, &["HOMO"]),
            ("P12345", 2, 300, &["HOMOLOG"]),
        ])
    }

    #[test]
    fn test_entry_lookup() {
        let dir = sample();
        let index = EntryIndex::open(dir.path()).unwrap();
        assert_eq!(index.len(), 4);

        let range = index.equal_range("P12345");
        assert_eq!(range, 0..2);
        assert_eq!(index.entry(0).unwrap().division, 1);
        assert_eq!(index.entry(1).unwrap().primary_offset, 300);
        assert_eq!(index.equal_range("P1234"), 0..0);
        assert_eq!(index.prefix_range("P1234"), 0..3);
        assert!(index.entry(4).is_none());
    }

    #[test]
    fn test_entry_wildcard() {
        let dir = sample();
        let index = EntryIndex::open(dir.path()).unwrap();
        let found = index.find(&Pattern::new("P1234?", false).unwrap());
        assert_eq!(found.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        let found = index.find(&Pattern::new("*9", false).unwrap());
        assert_eq!(found.iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_field_lookup() {
        let dir = sample();
        let field = open_field(dir.path(), "org");
        assert_eq!(field.target_count(), 4);

        let target = field.lookup("HOMO").unwrap();
        assert_eq!(target.count, 2);
        assert_eq!(field.hits(target).unwrap(), vec![0, 3]);
        assert!(field.lookup("HOM").is_none());

        let found = field.find(&Pattern::new("HOMO*", false).unwrap()).unwrap();
        assert_eq!(found.iter().collect::<Vec<_>>(), vec![0, 1, 3]);

        let tokens: Vec<_> = field.tokens().map(|(t, _)| t).collect();
        assert_eq!(tokens, vec!["HOMO", "HOMOLOG", "MUS", "SAPIENS"]);
    }

    #[test]
    fn test_find_ignore_case_is_literal() {
        let dir = build(&[
            ("Ab*1", 1, 0, &["Homo"]),
            ("AB*1", 1, 100, &["HOMO"]),
            ("ABX1", 1, 200, &["homolog"]),
            ("ab*12", 2, 0, &["Mus"]),
        ]);
        let index = EntryIndex::open(dir.path()).unwrap();
        let found: Vec<_> = index
            .find_ignore_case("ab*1")
            .iter()
            .map(|i| index.id_at(i).unwrap())
            .collect();
        assert_eq!(found, vec!["AB*1", "Ab*1"]);
        assert!(index.find_ignore_case("ab?1").is_empty());

        let field = open_field(dir.path(), "org");
        // "HOMO" and "Homo" belong to AB*1 and Ab*1; "homolog" does not match
        let found = field.find_ignore_case("homo").unwrap();
        assert_eq!(found.iter().collect::<Vec<_>>(), vec![0, 2]);
        assert!(field.find_ignore_case("homo*").unwrap().is_empty());
    }

    #[test]
    fn test_missing_field_is_not_found() {
        let dir = sample();
        let err = FieldFiles::open(dir.path(), "des").err().unwrap();
        assert!(err.is_field_local());
    }

    #[test]
    fn test_truncated_index_is_corrupt() {
        let dir = sample();
        let path = dir.path().join("entries.ent");
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 1]).unwrap();
        assert!(matches!(
            EntryIndex::open(dir.path()),
            Err(FlatdexError::CorruptHeader { .. })
        ));
    }
}
