//! Record loader: seeks division files to posting offsets and reads one
//! record at a time, plus the sequential division scan used by All queries.

use crate::error::{FlatdexError, Result};
use crate::format::RecordFormat;
use crate::index::division::DivisionTable;
use crate::index::types::{Division, DivisionId, Posting};
use crate::query::types::{LinkOp, Record};
use crate::utils::{MAX_ID_LENGTH, Pattern, normalize_token};
use std::fs::File;
use std::io::{self, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// File handles of the division currently open
struct OpenDivision {
    number: DivisionId,
    primary: BufReader<File>,
    primary_path: PathBuf,
    secondary: Option<BufReader<File>>,
}

fn open_file(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| {
        FlatdexError::Io(io::Error::new(
            e.kind(),
            format!("cannot open {}: {}", path.display(), e),
        ))
    })?;
    Ok(BufReader::new(file))
}

/// Open a division's files unless they are already the open ones
fn ensure_open<'a>(
    slot: &'a mut Option<OpenDivision>,
    data_dir: &Path,
    division: &Division,
) -> Result<&'a mut OpenDivision> {
    let reopen = slot.as_ref().map(|d| d.number != division.number).unwrap_or(true);
    if reopen {
        let primary_path = data_dir.join(&division.primary);
        let primary = open_file(&primary_path)?;
        let secondary = match division.secondary {
            Some(ref p) => Some(open_file(&data_dir.join(p))?),
            None => None,
        };
        tracing::debug!(division = division.number, file = %primary_path.display(), "opened division");
        *slot = Some(OpenDivision {
            number: division.number,
            primary,
            primary_path,
            secondary,
        });
    }
    slot.as_mut()
        .ok_or_else(|| FlatdexError::invariant("division handle missing after open"))
}

/// One term of a [`ScanPredicate`]
#[derive(Debug, Clone)]
struct ScanTerm {
    field: String,
    link: LinkOp,
    pattern: Pattern,
    /// For `ElseIfEmpty` terms: None until decided, then whether the
    /// terms before it matched any record
    earlier_matched: Option<bool>,
}

/// Record-level filter for scans over fields that have no index.
///
/// `And` and `Or` are evaluated per record. An `ElseIfEmpty` term depends
/// on the whole result set before it, so it is decided by a preliminary
/// scan (see [`ScanPredicate::undecided`]) before records are returned.
#[derive(Debug, Clone, Default)]
pub struct ScanPredicate {
    terms: Vec<ScanTerm>,
}

impl ScanPredicate {
    pub fn new(terms: Vec<(String, LinkOp, Pattern)>) -> Self {
        let terms = terms
            .into_iter()
            .enumerate()
            .map(|(i, (field, link, pattern))| ScanTerm {
                field,
                link: if i == 0 { LinkOp::Or } else { link },
                pattern,
                earlier_matched: None,
            })
            .collect();
        Self { terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Position of the first `ElseIfEmpty` term not decided yet
    pub fn undecided(&self) -> Option<usize> {
        self.terms
            .iter()
            .position(|t| t.link == LinkOp::ElseIfEmpty && t.earlier_matched.is_none())
    }

    /// The terms before `len`, with their decisions
    pub fn prefix(&self, len: usize) -> ScanPredicate {
        Self {
            terms: self.terms[..len.min(self.terms.len())].to_vec(),
        }
    }

    /// Record whether the terms before an `ElseIfEmpty` term matched anything
    pub fn decide(&mut self, position: usize, earlier_matched: bool) {
        if let Some(term) = self.terms.get_mut(position) {
            term.earlier_matched = Some(earlier_matched);
        }
    }

    /// Evaluate the terms left to right with their link operators
    pub fn matches(&self, format: &dyn RecordFormat, record: &[u8]) -> bool {
        if self.terms.is_empty() {
            return true;
        }
        let mut tokens = Vec::new();
        let mut acc = false;
        for term in &self.terms {
            if term.link == LinkOp::ElseIfEmpty && term.earlier_matched != Some(false) {
                continue;
            }
            tokens.clear();
            format.extract_field(record, &term.field, &mut tokens);
            let hit = tokens.iter().any(|t| term.pattern.is_match(t));
            acc = match term.link {
                LinkOp::And => acc && hit,
                LinkOp::Or => acc || hit,
                // Nothing matched before this term
                LinkOp::ElseIfEmpty => hit,
            };
        }
        acc
    }
}

/// Reads records of one session
pub struct Loader {
    format: Box<dyn RecordFormat>,
    secondary_format: Box<dyn RecordFormat>,
    data_dir: PathBuf,
    id_case_sensitive: bool,
    open: Option<OpenDivision>,
    scan_index: usize,
    scan_started: bool,
}

impl Loader {
    pub fn new(
        format: Box<dyn RecordFormat>,
        secondary_format: Box<dyn RecordFormat>,
        data_dir: &Path,
        id_case_sensitive: bool,
    ) -> Self {
        Self {
            format,
            secondary_format,
            data_dir: data_dir.to_path_buf(),
            id_case_sensitive,
            open: None,
            scan_index: 0,
            scan_started: false,
        }
    }

    /// Read the record a posting points at
    pub fn load(&mut self, posting: &Posting, table: &DivisionTable) -> Result<Record> {
        let division = table.get(posting.division).ok_or_else(|| {
            FlatdexError::invariant(format!(
                "entry '{}' names unknown division {}",
                posting.id, posting.division
            ))
        })?;
        let open = ensure_open(&mut self.open, &self.data_dir, division)?;

        open.primary.seek(SeekFrom::Start(posting.primary_offset))?;
        let mut primary = Vec::new();
        let n = self.format.read_record(&mut open.primary, &mut primary)?;
        if n == 0 {
            return Err(FlatdexError::invariant(format!(
                "entry '{}' points past the end of {}",
                posting.id,
                open.primary_path.display()
            )));
        }

        let secondary = match open.secondary.as_mut() {
            Some(reader) => {
                reader.seek(SeekFrom::Start(posting.secondary_offset))?;
                let mut buf = Vec::new();
                self.secondary_format.read_record(reader, &mut buf)?;
                Some(buf)
            }
            None => None,
        };

        Ok(Record {
            id: posting.id.clone(),
            division: posting.division,
            primary,
            secondary,
        })
    }

    /// Next record of a sequential scan over every division not marked
    /// in `excluded` (indexed by division number - 1)
    pub fn scan_next(
        &mut self,
        table: &DivisionTable,
        excluded: &[bool],
        predicate: &ScanPredicate,
    ) -> Result<Option<(Posting, Record)>> {
        let mut primary = Vec::new();
        loop {
            let Some(division) = table.divisions().get(self.scan_index) else {
                return Ok(None);
            };
            if excluded.get(self.scan_index).copied().unwrap_or(false) {
                self.scan_index += 1;
                self.scan_started = false;
                continue;
            }

            let open = ensure_open(&mut self.open, &self.data_dir, division)?;
            if !self.scan_started {
                open.primary.seek(SeekFrom::Start(0))?;
                if let Some(reader) = open.secondary.as_mut() {
                    reader.seek(SeekFrom::Start(0))?;
                }
                self.scan_started = true;
            }

            let primary_offset = open.primary.stream_position()?;
            primary.clear();
            if self.format.read_record(&mut open.primary, &mut primary)? == 0 {
                self.scan_index += 1;
                self.scan_started = false;
                continue;
            }

            let mut secondary_offset = 0;
            let secondary = match open.secondary.as_mut() {
                Some(reader) => {
                    secondary_offset = reader.stream_position()?;
                    let mut buf = Vec::new();
                    self.secondary_format.read_record(reader, &mut buf)?;
                    Some(buf)
                }
                None => None,
            };

            // Same records the builder indexes
            let Some(id) = self.format.identifier(&primary) else {
                continue;
            };
            let id = normalize_token(&id, self.id_case_sensitive);
            if id.len() > MAX_ID_LENGTH || !predicate.matches(self.format.as_ref(), &primary) {
                continue;
            }

            let posting = Posting {
                id: id.clone(),
                ordinal: None,
                division: division.number,
                primary_offset,
                secondary_offset,
                duplicates: 0,
                continuation: None,
            };
            let record = Record {
                id,
                division: division.number,
                primary: std::mem::take(&mut primary),
                secondary,
            };
            return Ok(Some((posting, record)));
        }
    }

    /// Rewind the sequential scan to the first division
    pub fn rewind(&mut self) {
        self.scan_index = 0;
        self.scan_started = false;
    }

    /// Close the open division files
    pub fn close(&mut self) {
        self.open = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::EmblFormat;
    use std::fs;
    use tempfile::tempdir;

    const A: &str = "ID   A1\nOS   Homo sapiens.\n//\nID   A2\nOS   Mus musculus.\n//\n";
    const B: &str = "ID   B1\nOS   Homo sapiens.\n//\n";

    fn setup() -> (tempfile::TempDir, DivisionTable) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.dat"), A).unwrap();
        fs::write(dir.path().join("b.dat"), B).unwrap();
        let mut table = DivisionTable::new();
        table.push(PathBuf::from("a.dat"), None, false).unwrap();
        table.push(PathBuf::from("b.dat"), None, false).unwrap();
        (dir, table)
    }

    fn loader(dir: &Path) -> Loader {
        Loader::new(Box::new(EmblFormat), Box::new(EmblFormat), dir, false)
    }

    #[test]
    fn test_load_seeks_to_offset() {
        let (dir, table) = setup();
        let mut loader = loader(dir.path());
        let offset = A.find("ID   A2").unwrap() as u64;
        let posting = Posting {
            id: "A2".into(),
            ordinal: Some(1),
            division: 1,
            primary_offset: offset,
            secondary_offset: 0,
            duplicates: 0,
            continuation: None,
        };

        let record = loader.load(&posting, &table).unwrap();
        assert_eq!(record.primary, A[offset as usize..].as_bytes());
        // Repeated loads give the same bytes
        assert_eq!(loader.load(&posting, &table).unwrap(), record);
        assert_eq!(loader.open.as_ref().map(|d| d.number), Some(1));

        let bad = Posting { division: 9, ..posting };
        assert!(matches!(loader.load(&bad, &table), Err(FlatdexError::Invariant(_))));
    }

    #[test]
    fn test_scan_skips_excluded() {
        let (dir, table) = setup();
        let mut loader = loader(dir.path());
        let predicate = ScanPredicate::default();

        let mut ids = Vec::new();
        while let Some((posting, _)) = loader.scan_next(&table, &[false, false], &predicate).unwrap() {
            ids.push(posting.id);
        }
        assert_eq!(ids, vec!["A1", "A2", "B1"]);

        loader.rewind();
        let mut ids = Vec::new();
        while let Some((posting, _)) = loader.scan_next(&table, &[true, false], &predicate).unwrap() {
            ids.push(posting.id);
        }
        assert_eq!(ids, vec!["B1"]);
    }

    fn scan_ids(loader: &mut Loader, table: &DivisionTable, predicate: &ScanPredicate) -> Vec<String> {
        loader.rewind();
        let mut ids = Vec::new();
        while let Some((posting, _)) = loader.scan_next(table, &[false, false], predicate).unwrap() {
            ids.push(posting.id);
        }
        ids
    }

    fn term(field: &str, link: LinkOp, pattern: &str) -> (String, LinkOp, Pattern) {
        (field.to_string(), link, Pattern::new(pattern, true).unwrap())
    }

    #[test]
    fn test_scan_predicate_and() {
        let (dir, table) = setup();
        let mut loader = loader(dir.path());
        let predicate = ScanPredicate::new(vec![
            term("org", LinkOp::Or, "homo"),
            term("id", LinkOp::And, "a*"),
        ]);
        assert_eq!(predicate.undecided(), None);
        assert_eq!(scan_ids(&mut loader, &table, &predicate), vec!["A1"]);
    }

    #[test]
    fn test_scan_predicate_else_if_empty() {
        let (dir, table) = setup();
        let mut loader = loader(dir.path());

        // Earlier terms matched: the ELSE term is skipped
        let mut predicate = ScanPredicate::new(vec![
            term("org", LinkOp::Or, "homo"),
            term("org", LinkOp::ElseIfEmpty, "mus"),
        ]);
        assert_eq!(predicate.undecided(), Some(1));
        let earlier = scan_ids(&mut loader, &table, &predicate.prefix(1));
        predicate.decide(1, !earlier.is_empty());
        assert_eq!(predicate.undecided(), None);
        assert_eq!(scan_ids(&mut loader, &table, &predicate), vec!["A1", "B1"]);

        // Nothing matched: the ELSE term takes over
        let mut predicate = ScanPredicate::new(vec![
            term("org", LinkOp::Or, "rattus"),
            term("org", LinkOp::ElseIfEmpty, "mus"),
        ]);
        let earlier = scan_ids(&mut loader, &table, &predicate.prefix(1));
        assert!(earlier.is_empty());
        predicate.decide(1, false);
        assert_eq!(scan_ids(&mut loader, &table, &predicate), vec!["A2"]);
    }

    #[test]
    fn test_scan_predicate() {
        let (dir, table) = setup();
        let mut loader = loader(dir.path());
        let predicate = ScanPredicate::new(vec![(
            "org".to_string(),
            LinkOp::Or,
            Pattern::new("homo*", true).unwrap(),
        )]);

        let mut ids = Vec::new();
        while let Some((posting, _)) = loader.scan_next(&table, &[false, false], &predicate).unwrap() {
            ids.push(posting.id);
        }
        assert_eq!(ids, vec!["A1", "B1"]);
    }
}
