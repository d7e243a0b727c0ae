//! Field collection: turns the records of one division into entries and
//! per-field token streams.
//!
//! Divisions are parsed in parallel (see [`parse_division`]); the parsed
//! records are then fed to a [`FieldCollector`] in division order so entry
//! sequence numbers stay deterministic.

use crate::error::{FlatdexError, Result};
use crate::format::RecordFormat;
use crate::index::sort::{SortKey, SortStrategy, SortedTokens, TokenSorter};
use crate::index::types::{Division, DivisionId, Entry, EntryOrdinal, FieldConfig};
use crate::utils::{MAX_ID_LENGTH, MAX_TOKEN_LENGTH, normalize_token};
use ahash::AHashSet;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, Seek};
use std::path::Path;

/// One source record after identifier and field extraction
#[derive(Debug, Clone)]
pub struct ParsedRecord {
    pub id: String,
    pub primary_offset: u64,
    pub secondary_offset: u64,
    /// Normalized, de-duplicated tokens, one list per secondary field
    pub tokens: Vec<Vec<String>>,
}

/// All records of one division
#[derive(Debug)]
pub struct ParsedDivision {
    pub number: DivisionId,
    pub records: Vec<ParsedRecord>,
    pub skipped: usize,
}

/// What the parser needs to know about the database layout
pub struct ParseSpec<'a> {
    pub data_dir: &'a Path,
    pub format: &'a dyn RecordFormat,
    pub secondary_format: &'a dyn RecordFormat,
    pub id_field: &'a FieldConfig,
    pub fields: &'a [FieldConfig],
}

fn open_source(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| {
        FlatdexError::build(format!("cannot read source file {}: {}", path.display(), e))
    })?;
    Ok(BufReader::new(file))
}

fn read_error(path: &Path, e: std::io::Error) -> FlatdexError {
    FlatdexError::build(format!("read failed in {}: {}", path.display(), e))
}

/// Read every record of a division. Records without an identifier, or
/// with one longer than [`MAX_ID_LENGTH`], are skipped with a warning.
pub fn parse_division(division: &Division, spec: &ParseSpec<'_>) -> Result<ParsedDivision> {
    let primary_path = spec.data_dir.join(&division.primary);
    let mut primary = open_source(&primary_path)?;

    let secondary_path = division.secondary.as_ref().map(|p| spec.data_dir.join(p));
    let mut secondary = match secondary_path {
        Some(ref path) => Some(open_source(path)?),
        None => None,
    };

    let mut records = Vec::new();
    let mut skipped = 0;
    let mut buf = Vec::new();
    let mut sec_buf = Vec::new();
    let mut raw = Vec::new();
    let mut seen = AHashSet::new();

    loop {
        let primary_offset = primary
            .stream_position()
            .map_err(|e| read_error(&primary_path, e))?;
        buf.clear();
        let n = spec
            .format
            .read_record(&mut primary, &mut buf)
            .map_err(|e| read_error(&primary_path, e))?;
        if n == 0 {
            break;
        }

        // Secondary files hold one record per primary record, in order
        let mut secondary_offset = 0;
        if let (Some(reader), Some(path)) = (secondary.as_mut(), secondary_path.as_ref()) {
            secondary_offset = reader.stream_position().map_err(|e| read_error(path, e))?;
            sec_buf.clear();
            spec.secondary_format
                .read_record(reader, &mut sec_buf)
                .map_err(|e| read_error(path, e))?;
        }

        let Some(id) = spec.format.identifier(&buf) else {
            if buf.iter().any(|b| !b.is_ascii_whitespace()) {
                tracing::warn!(
                    file = %primary_path.display(),
                    offset = primary_offset,
                    "record without identifier skipped"
                );
                skipped += 1;
            }
            continue;
        };
        let id = normalize_token(&id, spec.id_field.case_sensitive);
        if id.len() > MAX_ID_LENGTH {
            tracing::warn!(
                file = %primary_path.display(),
                offset = primary_offset,
                length = id.len(),
                "record with oversized identifier skipped"
            );
            skipped += 1;
            continue;
        }

        let mut tokens = Vec::with_capacity(spec.fields.len());
        for field in spec.fields {
            raw.clear();
            seen.clear();
            spec.format.extract_field(&buf, &field.name, &mut raw);
            let mut field_tokens = Vec::new();
            for token in raw.drain(..) {
                let token = normalize_token(&token, field.case_sensitive);
                if token.is_empty() || token.len() > MAX_TOKEN_LENGTH {
                    continue;
                }
                if seen.insert(token.clone()) {
                    field_tokens.push(token);
                }
            }
            tokens.push(field_tokens);
        }

        records.push(ParsedRecord {
            id,
            primary_offset,
            secondary_offset,
            tokens,
        });
    }

    tracing::debug!(
        division = division.number,
        file = %division.primary.display(),
        records = records.len(),
        "parsed division"
    );

    Ok(ParsedDivision {
        number: division.number,
        records,
        skipped,
    })
}

/// Parse a batch of divisions in parallel, preserving their order
pub fn parse_divisions(divisions: &[Division], spec: &ParseSpec<'_>) -> Result<Vec<ParsedDivision>> {
    divisions
        .par_iter()
        .map(|division| parse_division(division, spec))
        .collect()
}

struct FieldState {
    config: FieldConfig,
    sorter: TokenSorter,
    key_len: usize,
    tokens: u64,
}

/// Accumulates entries and field tokens across all divisions
pub struct FieldCollector {
    entries: Vec<Entry>,
    fields: Vec<FieldState>,
    id_len: usize,
    skipped: usize,
}

impl FieldCollector {
    pub fn new(
        fields: &[FieldConfig],
        strategy: SortStrategy,
        spill_dir: &Path,
        memory_budget: u64,
    ) -> Self {
        // The budget is shared between the fields' spill buffers
        let per_field = memory_budget / fields.len().max(1) as u64;
        let fields = fields
            .iter()
            .map(|config| FieldState {
                config: config.clone(),
                sorter: TokenSorter::new(strategy, &config.name, spill_dir, per_field),
                key_len: 0,
                tokens: 0,
            })
            .collect();
        Self {
            entries: Vec::new(),
            fields,
            id_len: 0,
            skipped: 0,
        }
    }

    /// Register every record of a parsed division
    pub fn add_division(&mut self, parsed: ParsedDivision) -> Result<()> {
        self.skipped += parsed.skipped;
        for record in parsed.records {
            self.add_record(parsed.number, record)?;
        }
        Ok(())
    }

    /// Register one record: one entry plus its field tokens
    pub fn add_record(&mut self, division: DivisionId, record: ParsedRecord) -> Result<()> {
        let seq = u32::try_from(self.entries.len())
            .map_err(|_| FlatdexError::build("too many entries for one index"))?;

        for (state, tokens) in self.fields.iter_mut().zip(record.tokens) {
            for token in tokens {
                state.key_len = state.key_len.max(token.len());
                state.tokens += 1;
                state.sorter.push(SortKey {
                    token,
                    entry: record.id.clone(),
                    seq,
                })?;
            }
        }

        self.id_len = self.id_len.max(record.id.len());
        self.entries.push(Entry {
            id: record.id,
            division,
            primary_offset: record.primary_offset,
            secondary_offset: record.secondary_offset,
        });
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Records skipped for lack of a usable identifier
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Order entries by (identifier, insertion order) and release the
    /// per-field token streams
    pub fn finish(self) -> Result<CollectedIndex> {
        let mut order: Vec<u32> = (0..self.entries.len() as u32).collect();
        let entries = &self.entries;
        order.par_sort_by(|&a, &b| {
            entries[a as usize]
                .id
                .cmp(&entries[b as usize].id)
                .then(a.cmp(&b))
        });

        let mut ordinal_of_seq = vec![0 as EntryOrdinal; order.len()];
        for (ordinal, &seq) in order.iter().enumerate() {
            ordinal_of_seq[seq as usize] = ordinal as EntryOrdinal;
        }

        let mut slots: Vec<Option<Entry>> = self.entries.into_iter().map(Some).collect();
        let sorted = order
            .iter()
            .filter_map(|&seq| slots[seq as usize].take())
            .collect();

        let fields = self
            .fields
            .into_iter()
            .map(|state| {
                Ok(CollectedField {
                    config: state.config,
                    key_len: state.key_len,
                    token_count: state.tokens,
                    tokens: state.sorter.finish()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CollectedIndex {
            entries: sorted,
            ordinal_of_seq,
            id_len: self.id_len,
            fields,
        })
    }
}

/// Sorted token stream of one field
pub struct CollectedField {
    pub config: FieldConfig,
    /// Longest token, the key column width
    pub key_len: usize,
    pub token_count: u64,
    pub tokens: SortedTokens,
}

/// Everything the writer needs
pub struct CollectedIndex {
    /// Entries in ID index order
    pub entries: Vec<Entry>,
    /// Insertion sequence → ID index ordinal
    pub ordinal_of_seq: Vec<EntryOrdinal>,
    pub id_len: usize,
    pub fields: Vec<CollectedField>,
}
