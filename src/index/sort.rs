//! Token sorting for index construction.
//!
//! Tokens are ordered by (token text, entry identifier, insertion sequence).
//! Small builds keep them in an ordered in-memory set. Builds whose
//! estimated volume exceeds the memory budget spill sorted runs to
//! anonymous temp files and merge them with a k-way heap merge when the
//! index is written. Both paths yield the same sequence.

use crate::error::{FlatdexError, Result};
use crate::index::types::SortMode;
use crate::utils::{read_short_bytes, read_u32_le, write_short_bytes, write_u32_le};
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Fixed per-token overhead used when sizing spill runs
const TOKEN_OVERHEAD: usize = 48;

/// Smallest spill run, regardless of budget
const MIN_RUN_BYTES: usize = 4 * 1024;

/// Which sort path a build takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortStrategy {
    InMemory,
    External,
}

impl SortStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortStrategy::InMemory => "memory",
            SortStrategy::External => "external",
        }
    }
}

/// Choose the sort path from the estimated token volume (bytes)
pub fn select_strategy(estimated_volume: u64, memory_budget: u64) -> SortStrategy {
    if estimated_volume <= memory_budget {
        SortStrategy::InMemory
    } else {
        SortStrategy::External
    }
}

/// Apply a configured override on top of [`select_strategy`]
pub fn resolve_strategy(mode: SortMode, estimated_volume: u64, memory_budget: u64) -> SortStrategy {
    match mode {
        SortMode::Auto => select_strategy(estimated_volume, memory_budget),
        SortMode::Memory => SortStrategy::InMemory,
        SortMode::External => SortStrategy::External,
    }
}

/// One token occurrence. Field order gives the sort order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    pub token: String,
    pub entry: String,
    pub seq: u32,
}

impl SortKey {
    fn approx_size(&self) -> usize {
        self.token.len() + self.entry.len() + TOKEN_OVERHEAD
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_short_bytes(writer, self.token.as_bytes())?;
        write_short_bytes(writer, self.entry.as_bytes())?;
        write_u32_le(writer, self.seq)
    }

    /// Read the next key of a run, None at a clean end of run
    fn read_from<R: io::BufRead>(reader: &mut R) -> io::Result<Option<Self>> {
        if reader.fill_buf()?.is_empty() {
            return Ok(None);
        }
        let token = String::from_utf8_lossy(&read_short_bytes(reader)?).to_string();
        let entry = String::from_utf8_lossy(&read_short_bytes(reader)?).to_string();
        let seq = read_u32_le(reader)?;
        Ok(Some(Self { token, entry, seq }))
    }
}

/// Accumulates the tokens of one field
pub enum TokenSorter {
    InMemory(BTreeSet<SortKey>),
    External(ExternalSorter),
}

impl TokenSorter {
    pub fn new(strategy: SortStrategy, field: &str, spill_dir: &Path, memory_budget: u64) -> Self {
        match strategy {
            SortStrategy::InMemory => TokenSorter::InMemory(BTreeSet::new()),
            SortStrategy::External => {
                TokenSorter::External(ExternalSorter::new(field, spill_dir, memory_budget))
            }
        }
    }

    pub fn push(&mut self, key: SortKey) -> Result<()> {
        match self {
            TokenSorter::InMemory(set) => {
                set.insert(key);
                Ok(())
            }
            TokenSorter::External(sorter) => sorter.push(key),
        }
    }

    /// Finish accumulation and return the sorted token stream
    pub fn finish(self) -> Result<SortedTokens> {
        match self {
            TokenSorter::InMemory(set) => Ok(SortedTokens::Memory(set.into_iter())),
            TokenSorter::External(sorter) => Ok(SortedTokens::Merge(sorter.finish()?)),
        }
    }
}

/// Spills sorted runs of tokens to temp files
pub struct ExternalSorter {
    field: String,
    spill_dir: PathBuf,
    buffer: Vec<SortKey>,
    buffer_bytes: usize,
    run_bytes: usize,
    runs: Vec<File>,
}

impl ExternalSorter {
    pub fn new(field: &str, spill_dir: &Path, memory_budget: u64) -> Self {
        Self {
            field: field.to_string(),
            spill_dir: spill_dir.to_path_buf(),
            buffer: Vec::new(),
            buffer_bytes: 0,
            run_bytes: (memory_budget as usize).max(MIN_RUN_BYTES),
            runs: Vec::new(),
        }
    }

    pub fn push(&mut self, key: SortKey) -> Result<()> {
        self.buffer_bytes += key.approx_size();
        self.buffer.push(key);
        if self.buffer_bytes >= self.run_bytes {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.buffer.par_sort();

        let file = tempfile::tempfile_in(&self.spill_dir).map_err(|e| self.spill_error(e))?;
        let mut writer = BufWriter::new(file);
        for key in self.buffer.drain(..) {
            key.write_to(&mut writer).map_err(|e| spill_error(&self.field, e))?;
        }
        let mut file = writer
            .into_inner()
            .map_err(|e| spill_error(&self.field, e.into_error()))?;
        file.seek(SeekFrom::Start(0))?;

        tracing::debug!(field = %self.field, run = self.runs.len(), "spilled token run");
        self.runs.push(file);
        self.buffer_bytes = 0;
        Ok(())
    }

    fn spill_error(&self, e: io::Error) -> FlatdexError {
        spill_error(&self.field, e)
    }

    fn finish(mut self) -> Result<KWayMerge> {
        self.spill()?;
        KWayMerge::new(self.runs)
    }
}

fn spill_error(field: &str, e: io::Error) -> FlatdexError {
    if e.kind() == io::ErrorKind::StorageFull {
        FlatdexError::build(format!(
            "exhausted temp-file space while sorting field '{}'",
            field
        ))
    } else {
        FlatdexError::build(format!(
            "temp-file write failed while sorting field '{}': {}",
            field, e
        ))
    }
}

/// Heap merge over sorted runs
pub struct KWayMerge {
    readers: Vec<BufReader<File>>,
    heap: BinaryHeap<Reverse<(SortKey, usize)>>,
}

impl KWayMerge {
    fn new(runs: Vec<File>) -> Result<Self> {
        let mut readers: Vec<_> = runs.into_iter().map(BufReader::new).collect();
        let mut heap = BinaryHeap::with_capacity(readers.len());
        for (idx, reader) in readers.iter_mut().enumerate() {
            if let Some(key) = SortKey::read_from(reader)? {
                heap.push(Reverse((key, idx)));
            }
        }
        Ok(Self { readers, heap })
    }

    fn next_key(&mut self) -> Result<Option<SortKey>> {
        let Some(Reverse((key, idx))) = self.heap.pop() else {
            return Ok(None);
        };
        if let Some(next) = SortKey::read_from(&mut self.readers[idx])? {
            self.heap.push(Reverse((next, idx)));
        }
        Ok(Some(key))
    }
}

/// Sorted token stream produced by either path
pub enum SortedTokens {
    Memory(std::collections::btree_set::IntoIter<SortKey>),
    Merge(KWayMerge),
}

impl Iterator for SortedTokens {
    type Item = Result<SortKey>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            SortedTokens::Memory(iter) => iter.next().map(Ok),
            SortedTokens::Merge(merge) => merge.next_key().transpose(),
        }
    }
}
