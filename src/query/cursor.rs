//! Query sessions: the result cursor over resolved postings.
//!
//! A [`Session`] owns its pending posting list, its resolver state and its
//! open division files; only the alias cache is shared. Dropping or
//! closing a session releases its cache reference.

use crate::error::{FlatdexError, Result};
use crate::format::registry;
use crate::index::division::DivisionTable;
use crate::index::types::{DivisionId, Posting};
use crate::query::cache::{CacheHandle, CacheManager};
use crate::query::loader::{Loader, ScanPredicate};
use crate::query::resolver::{Resolver, field_pattern, has_indexed_field};
use crate::query::types::{Query, QueryType, Record};
use crate::utils::FileFilter;
use std::collections::VecDeque;

/// How a session produces postings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Resolve field queries against the indices
    Indexed,
    /// Walk the divisions in order
    Scan,
}

pub struct Session {
    manager: CacheManager,
    alias: String,
    query: Query,
    cache: Option<CacheHandle>,
    resolver: Resolver,
    pending: VecDeque<Posting>,
    loader: Loader,
    filter: FileFilter,
    predicate: ScanPredicate,
    /// Division table copy; stays usable after the cache is released
    table: Option<DivisionTable>,
    /// Per division (number - 1): hidden from this session
    excluded: Vec<bool>,
    mode: Mode,
    scanned: Option<Record>,
    exhausted: bool,
}

impl Session {
    /// Open a session; configuration errors and corrupt headers are fatal here
    pub fn open(manager: &CacheManager, alias: &str, query: Query) -> Result<Self> {
        let cache = manager.acquire(alias)?;
        let meta = cache.meta();

        let format = registry(&meta.format)?;
        let secondary_format = registry(meta.secondary_format.as_deref().unwrap_or(&meta.format))?;
        let loader = Loader::new(format, secondary_format, &meta.data_dir, meta.id_field.case_sensitive);
        let filter = FileFilter::new(&query.include, &query.exclude)?;

        let mut predicate = ScanPredicate::default();
        let mode = if query.is_scan() {
            Mode::Scan
        } else if query.kind == QueryType::Query && !has_indexed_field(&query, meta) {
            tracing::warn!(alias, "no queried field is indexed; scanning divisions");
            let mut terms = Vec::with_capacity(query.fields.len());
            for fq in &query.fields {
                terms.push((fq.field.clone(), fq.link, field_pattern(&fq.pattern, true, false)?));
            }
            predicate = ScanPredicate::new(terms);
            Mode::Scan
        } else {
            Mode::Indexed
        };

        tracing::debug!(alias, mode = ?mode, fields = query.fields.len(), "opened session");

        Ok(Self {
            manager: manager.clone(),
            alias: alias.to_string(),
            resolver: Resolver::new(&query),
            query,
            cache: Some(cache),
            pending: VecDeque::new(),
            loader,
            filter,
            predicate,
            table: None,
            excluded: Vec::new(),
            mode,
            scanned: None,
            exhausted: false,
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Whether the resolver has finished and only popping remains
    pub fn is_resolved(&self) -> bool {
        self.resolver.is_done()
    }

    /// Whether the session still holds its cache reference
    pub fn holds_cache(&self) -> bool {
        self.cache.is_some()
    }

    /// Load the division table and this session's exclusion flags
    fn ensure_table(&mut self) -> Result<()> {
        if self.table.is_some() {
            return Ok(());
        }
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| FlatdexError::configuration("session is closed"))?;
        let table = cache.divisions()?.clone();
        self.excluded = table
            .divisions()
            .iter()
            .map(|d| d.excluded || !self.filter.is_selected(&d.primary))
            .collect();
        self.table = Some(table);
        Ok(())
    }

    fn is_excluded(&self, division: DivisionId) -> Result<bool> {
        if division == 0 || division as usize > self.excluded.len() {
            return Err(FlatdexError::invariant(format!(
                "posting names unknown division {}",
                division
            )));
        }
        Ok(self.excluded[division as usize - 1])
    }

    /// Next kept posting, resolving further passes as needed
    pub fn next(&mut self) -> Result<Option<Posting>> {
        self.step(true)
    }

    /// Continue popping without resolving again. Once the list is empty
    /// the session releases its cache and division files; further calls
    /// keep reporting no more results.
    pub fn reuse(&mut self) -> Result<Option<Posting>> {
        self.step(false)
    }

    fn step(&mut self, resolve: bool) -> Result<Option<Posting>> {
        if self.exhausted {
            return Ok(None);
        }
        let result = match self.mode {
            Mode::Indexed => self.next_indexed(resolve),
            Mode::Scan => self.next_scanned(),
        };
        match result {
            Ok(Some(posting)) => Ok(Some(posting)),
            Ok(None) => {
                self.release();
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(alias = %self.alias, error = %e, "session terminated");
                self.release();
                Err(e)
            }
        }
    }

    fn next_indexed(&mut self, resolve: bool) -> Result<Option<Posting>> {
        self.ensure_table()?;
        loop {
            if let Some(posting) = self.pop()? {
                return Ok(Some(posting));
            }
            if !(resolve && self.resolver.has_pass()) {
                return Ok(None);
            }
            let cache = self
                .cache
                .as_ref()
                .ok_or_else(|| FlatdexError::configuration("session is closed"))?;
            let ordinals = self.resolver.resolve(cache)?;
            self.pending.extend(cache.compact(&ordinals)?);
        }
    }

    /// Pop pending postings until one is kept, expanding hybrid leaves
    fn pop(&mut self) -> Result<Option<Posting>> {
        while let Some(mut posting) = self.pending.pop_front() {
            if posting.is_hybrid_leaf() {
                let cache = self
                    .cache
                    .as_ref()
                    .ok_or_else(|| FlatdexError::configuration("session is closed"))?;
                let siblings = cache.expand(&posting)?;
                for sibling in siblings.into_iter().rev() {
                    self.pending.push_front(sibling);
                }
                posting.duplicates = 0;
                posting.continuation = None;
            }
            if self.is_excluded(posting.division)? {
                continue;
            }
            return Ok(Some(posting));
        }
        Ok(None)
    }

    fn next_scanned(&mut self) -> Result<Option<Posting>> {
        self.ensure_table()?;
        let Some(table) = self.table.as_ref() else {
            return Ok(None);
        };
        // Decide ELSE terms: one early-exit scan per term
        while let Some(position) = self.predicate.undecided() {
            let earlier = self.predicate.prefix(position);
            let matched = self.loader.scan_next(table, &self.excluded, &earlier)?.is_some();
            self.loader.rewind();
            self.predicate.decide(position, matched);
            tracing::debug!(alias = %self.alias, position, matched, "decided ELSE term for scan");
        }
        match self.loader.scan_next(table, &self.excluded, &self.predicate)? {
            Some((posting, record)) => {
                self.scanned = Some(record);
                Ok(Some(posting))
            }
            None => Ok(None),
        }
    }

    /// Read the record of a posting returned by this session. An I/O
    /// failure terminates the session.
    pub fn load(&mut self, posting: &Posting) -> Result<Record> {
        if let Some(record) = self.scanned.as_ref() {
            if posting.ordinal.is_none() && record.id == posting.id && record.division == posting.division {
                return Ok(record.clone());
            }
        }
        self.ensure_table()?;
        let Some(table) = self.table.as_ref() else {
            return Err(FlatdexError::configuration("session is closed"));
        };
        match self.loader.load(posting, table) {
            Ok(record) => Ok(record),
            Err(e) => {
                tracing::warn!(alias = %self.alias, error = %e, "record load failed");
                self.release();
                Err(e)
            }
        }
    }

    /// Next kept posting together with its record
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        match self.next()? {
            Some(posting) => self.load(&posting).map(Some),
            None => Ok(None),
        }
    }

    /// Drop the cache reference and close division files
    fn release(&mut self) {
        self.exhausted = true;
        self.pending.clear();
        self.scanned = None;
        self.loader.close();
        self.cache = None;
    }

    /// End the session early
    pub fn close(&mut self) {
        self.release();
    }

    /// Run the query again from the start. A session that still holds
    /// its cache replays against the same index generation; one that was
    /// released opens the current one.
    pub fn restart(&mut self) -> Result<()> {
        if self.cache.is_none() {
            *self = Session::open(&self.manager, &self.alias, self.query.clone())?;
            return Ok(());
        }
        self.resolver.reset();
        self.pending.clear();
        self.scanned = None;
        self.loader.rewind();
        self.exhausted = false;
        Ok(())
    }
}
