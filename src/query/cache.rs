//! Per-alias, reference-counted index handles shared by query sessions.
//!
//! The first session against an alias resolves the alias to its current
//! generation directory and opens every file of that generation: the
//! manifest and ID index are read at once, the division table and field
//! index handles stay open and are read or mapped on first use. Field
//! indices are mapped lazily and kept in a bounded LRU. A rebuild never
//! touches an open cache; sessions opened after it get a new one. The
//! cache is dropped from the registry when its last [`CacheHandle`] goes
//! away.

use crate::error::{FlatdexError, Result};
use crate::index::division::{DIVISION_FILE, DivisionTable};
use crate::index::reader::{EntryIndex, FieldFiles, FieldIndex};
use crate::index::types::{EntryOrdinal, INDEX_VERSION, IndexMeta, Posting};
use crate::utils::{META_FILE, Pattern, resolve_index_dir};
use lru::LruCache;
use roaring::RoaringBitmap;
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Read-only index state of one alias
pub struct AliasCache {
    alias: String,
    index_dir: PathBuf,
    meta: IndexMeta,
    entries: EntryIndex,
    division_file: Mutex<File>,
    divisions: OnceLock<DivisionTable>,
    /// Handles of every field whose files were present at open
    field_files: HashMap<String, FieldFiles>,
    fields: Mutex<LruCache<String, Arc<FieldIndex>>>,
}

impl AliasCache {
    fn open(index_root: &Path, alias: &str, max_open_fields: usize) -> Result<Self> {
        if !index_root.is_dir() {
            return Err(FlatdexError::configuration(format!(
                "index directory {} does not exist",
                index_root.display()
            )));
        }
        let index_dir = resolve_index_dir(index_root, alias)?;
        match Self::open_generation(alias, &index_dir, max_open_fields) {
            Ok(cache) => Ok(cache),
            Err(e) => {
                // A concurrent rebuild may have retired the generation just resolved
                let current = resolve_index_dir(index_root, alias)?;
                if current == index_dir {
                    return Err(e);
                }
                tracing::debug!(alias, "index generation changed while opening; retrying");
                Self::open_generation(alias, &current, max_open_fields)
            }
        }
    }

    fn open_generation(alias: &str, index_dir: &Path, max_open_fields: usize) -> Result<Self> {
        let meta_path = index_dir.join(META_FILE);
        if !meta_path.is_file() {
            return Err(FlatdexError::configuration(format!(
                "no index for alias '{}' in {}",
                alias,
                index_dir.display()
            )));
        }

        let meta: IndexMeta = serde_json::from_str(&fs::read_to_string(&meta_path)?)?;
        if meta.version != INDEX_VERSION {
            return Err(FlatdexError::configuration(format!(
                "index '{}' has version {} (expected {}); rebuild it",
                alias, meta.version, INDEX_VERSION
            )));
        }

        let entries = EntryIndex::open(index_dir)?;
        if entries.len() != meta.entry_count {
            return Err(FlatdexError::invariant(format!(
                "ID index of '{}' holds {} entries but the manifest records {}",
                alias,
                entries.len(),
                meta.entry_count
            )));
        }

        let division_file = File::open(index_dir.join(DIVISION_FILE))?;

        let mut field_files = HashMap::with_capacity(meta.fields.len());
        for field in &meta.fields {
            match FieldFiles::open(index_dir, &field.name) {
                Ok(files) => {
                    field_files.insert(field.name.clone(), files);
                }
                Err(e) if e.is_field_local() => {
                    tracing::warn!(alias, field = %field.name, "field index is missing; field disabled");
                }
                Err(e) => return Err(e),
            }
        }

        let capacity = NonZeroUsize::new(max_open_fields.max(1)).unwrap_or(NonZeroUsize::MIN);
        tracing::debug!(alias, entries = entries.len(), dir = %index_dir.display(), "opened alias cache");

        Ok(Self {
            alias: alias.to_string(),
            index_dir: index_dir.to_path_buf(),
            meta,
            entries,
            division_file: Mutex::new(division_file),
            divisions: OnceLock::new(),
            field_files,
            fields: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Generation directory this cache was opened from
    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn entries(&self) -> &EntryIndex {
        &self.entries
    }

    /// The division table, loaded on first use
    pub fn divisions(&self) -> Result<&DivisionTable> {
        if let Some(table) = self.divisions.get() {
            return Ok(table);
        }
        let table = {
            let mut file = self.division_file.lock().unwrap_or_else(|e| e.into_inner());
            DivisionTable::read_from(&mut file, &self.index_dir.join(DIVISION_FILE))?
        };
        if table.len() != self.meta.division_count as usize {
            return Err(FlatdexError::invariant(format!(
                "division table of '{}' lists {} divisions but the manifest records {}",
                self.alias,
                table.len(),
                self.meta.division_count
            )));
        }
        Ok(self.divisions.get_or_init(|| table))
    }

    fn lock_fields(&self) -> MutexGuard<'_, LruCache<String, Arc<FieldIndex>>> {
        self.fields.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Keyword index of a field; `NotFound` if the field is not indexed
    pub fn field(&self, name: &str) -> Result<Arc<FieldIndex>> {
        if let Some(field) = self.lock_fields().get(name) {
            return Ok(Arc::clone(field));
        }
        let files = self.field_files.get(name).ok_or_else(|| {
            FlatdexError::not_found(format!("field '{}' is not indexed for '{}'", name, self.alias))
        })?;

        let field = Arc::new(FieldIndex::map(files, name, self.entries.len())?);
        self.lock_fields().put(name.to_string(), Arc::clone(&field));
        Ok(field)
    }

    /// Posting for one ID index ordinal
    pub fn posting(&self, ordinal: EntryOrdinal) -> Result<Posting> {
        let entry = self.entries.entry(ordinal).ok_or_else(|| {
            FlatdexError::invariant(format!(
                "entry ordinal {} outside the ID index of '{}'",
                ordinal, self.alias
            ))
        })?;
        Ok(Posting::from_entry(entry, Some(ordinal)))
    }

    /// Exact identifier lookup
    pub fn lookup_id(&self, id: &str) -> Result<Vec<Posting>> {
        self.entries
            .equal_range(id)
            .map(|ordinal| self.posting(ordinal))
            .collect()
    }

    /// Ordinals whose identifier matches
    pub fn find_ids(&self, pattern: &Pattern) -> RoaringBitmap {
        self.entries.find(pattern)
    }

    /// Ordinals listed under every token of `field` that matches
    pub fn find_tokens(&self, field: &str, pattern: &Pattern) -> Result<RoaringBitmap> {
        self.field(field)?.find(pattern)
    }

    /// Ordinals whose identifier equals `text` ignoring case
    pub fn find_ids_ignore_case(&self, text: &str) -> RoaringBitmap {
        self.entries.find_ignore_case(text)
    }

    /// Ordinals listed under the tokens of `field` equal to `text` ignoring case
    pub fn find_tokens_ignore_case(&self, field: &str, text: &str) -> Result<RoaringBitmap> {
        self.field(field)?.find_ignore_case(text)
    }

    /// Turn a set of ordinals into postings in ascending order. Runs of
    /// consecutive ordinals sharing one identifier become a single hybrid
    /// leaf whose siblings are expanded later by [`AliasCache::expand`].
    pub fn compact(&self, ordinals: &RoaringBitmap) -> Result<VecDeque<Posting>> {
        let mut pending = VecDeque::new();
        let mut iter = ordinals.iter().peekable();
        while let Some(ordinal) = iter.next() {
            let mut posting = self.posting(ordinal)?;
            let mut last = ordinal;
            while let Some(&next) = iter.peek() {
                if next != last + 1 || self.entries.id_at(next).as_deref() != Some(posting.id.as_str()) {
                    break;
                }
                posting.duplicates += 1;
                last = next;
                iter.next();
            }
            if posting.duplicates > 0 {
                posting.continuation = Some(ordinal + 1);
            }
            pending.push_back(posting);
        }
        Ok(pending)
    }

    /// Sibling postings of a hybrid leaf, in ordinal order
    pub fn expand(&self, posting: &Posting) -> Result<Vec<Posting>> {
        let Some(start) = posting.continuation else {
            return Ok(Vec::new());
        };
        let mut siblings = Vec::with_capacity(posting.duplicates as usize);
        for ordinal in start..start + posting.duplicates {
            let sibling = self.posting(ordinal)?;
            if sibling.id != posting.id {
                return Err(FlatdexError::invariant(format!(
                    "duplicate chain of '{}' breaks at ordinal {}",
                    posting.id, ordinal
                )));
            }
            siblings.push(sibling);
        }
        Ok(siblings)
    }
}

struct CacheSlot {
    cache: Arc<AliasCache>,
    sessions: usize,
}

type Registry = Arc<Mutex<HashMap<String, CacheSlot>>>;

/// Registry of open alias caches
#[derive(Clone)]
pub struct CacheManager {
    index_root: PathBuf,
    max_open_fields: usize,
    registry: Registry,
}

impl CacheManager {
    pub fn new(index_root: &Path, max_open_fields: usize) -> Self {
        Self {
            index_root: index_root.to_path_buf(),
            max_open_fields,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn index_root(&self) -> &Path {
        &self.index_root
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheSlot>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take a reference to the cache of an alias, opening it if needed.
    ///
    /// An open cache is shared only while the alias still resolves to the
    /// generation it was opened from. After a rebuild the next session
    /// opens a fresh cache; sessions holding the old one keep reading the
    /// old generation until they close.
    pub fn acquire(&self, alias: &str) -> Result<CacheHandle> {
        let mut registry = self.lock();
        if let Some(slot) = registry.get_mut(alias) {
            if resolve_index_dir(&self.index_root, alias)? == slot.cache.index_dir() {
                slot.sessions += 1;
                return Ok(CacheHandle {
                    alias: alias.to_string(),
                    cache: Arc::clone(&slot.cache),
                    registry: Arc::clone(&self.registry),
                });
            }
            tracing::debug!(alias, "index was rebuilt; opening the new generation");
        }

        let cache = Arc::new(AliasCache::open(&self.index_root, alias, self.max_open_fields)?);
        registry.insert(
            alias.to_string(),
            CacheSlot {
                cache: Arc::clone(&cache),
                sessions: 1,
            },
        );
        Ok(CacheHandle {
            alias: alias.to_string(),
            cache,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Sessions currently holding the cache of an alias
    pub fn sessions(&self, alias: &str) -> usize {
        self.lock().get(alias).map(|slot| slot.sessions).unwrap_or(0)
    }

    pub fn is_open(&self, alias: &str) -> bool {
        self.lock().contains_key(alias)
    }
}

/// A session's reference to a shared alias cache; released on drop
pub struct CacheHandle {
    alias: String,
    cache: Arc<AliasCache>,
    registry: Registry,
}

impl Deref for CacheHandle {
    type Target = AliasCache;

    fn deref(&self) -> &AliasCache {
        &self.cache
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let last = match registry.get_mut(&self.alias) {
            // A cache superseded by a rebuild is no longer registered
            Some(slot) if Arc::ptr_eq(&slot.cache, &self.cache) => {
                slot.sessions = slot.sessions.saturating_sub(1);
                slot.sessions == 0
            }
            _ => false,
        };
        if last {
            registry.remove(&self.alias);
            tracing::debug!(alias = %self.alias, "released alias cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build::build_index;
    use crate::index::types::BuildConfig;
    use tempfile::{TempDir, tempdir};

    fn build() -> (TempDir, TempDir) {
        let data = tempdir().unwrap();
        let root = tempdir().unwrap();
        fs::write(
            data.path().join("a.dat"),
            "ID   DUP\nOS   Homo.\n//\nID   DUP\nOS   Homo.\n//\nID   ONE\nOS   Mus.\n//\n",
        )
        .unwrap();
        let config = BuildConfig::new("sw", data.path()).with_field("org");
        build_index(&config, root.path(), true).unwrap();
        (data, root)
    }

    #[test]
    fn test_shared_and_released() {
        let (_data, root) = build();
        let manager = CacheManager::new(root.path(), 4);

        let a = manager.acquire("sw").unwrap();
        let b = manager.acquire("sw").unwrap();
        assert!(Arc::ptr_eq(&a.cache, &b.cache));
        assert_eq!(manager.sessions("sw"), 2);

        drop(a);
        assert_eq!(manager.sessions("sw"), 1);
        drop(b);
        assert!(!manager.is_open("sw"));
    }

    #[test]
    fn test_missing_alias_and_root() {
        let (_data, root) = build();
        let manager = CacheManager::new(root.path(), 4);
        assert!(matches!(
            manager.acquire("nope"),
            Err(FlatdexError::Configuration(_))
        ));

        let manager = CacheManager::new(&root.path().join("missing"), 4);
        assert!(matches!(manager.acquire("sw"), Err(FlatdexError::Configuration(_))));
    }

    #[test]
    fn test_unindexed_field_is_not_found() {
        let (_data, root) = build();
        let manager = CacheManager::new(root.path(), 4);
        let cache = manager.acquire("sw").unwrap();
        assert!(cache.field("des").err().unwrap().is_field_local());
        assert!(cache.field("org").is_ok());
        assert_eq!(cache.lock_fields().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_open_cache_keeps_its_generation() {
        let (data, root) = build();
        let manager = CacheManager::new(root.path(), 4);
        let old = manager.acquire("sw").unwrap();

        fs::write(data.path().join("a.dat"), "ID   NEW\nOS   Rattus.\n//\n").unwrap();
        let config = BuildConfig::new("sw", data.path()).with_field("org");
        build_index(&config, root.path(), true).unwrap();

        // The old handle still answers from the generation it opened,
        // including the parts it had not read yet
        assert_eq!(old.entries().len(), 3);
        assert_eq!(old.divisions().unwrap().len(), 1);
        let homo = old.find_tokens("org", &Pattern::literal("HOMO")).unwrap();
        assert_eq!(homo.len(), 2);

        // A new session gets the rebuilt set
        let new = manager.acquire("sw").unwrap();
        assert!(!Arc::ptr_eq(&old.cache, &new.cache));
        assert_eq!(new.entries().len(), 1);
        assert_eq!(manager.sessions("sw"), 1);

        drop(old);
        assert_eq!(manager.sessions("sw"), 1);
        drop(new);
        assert!(!manager.is_open("sw"));
    }

    #[test]
    fn test_compact_and_expand() {
        let (_data, root) = build();
        let manager = CacheManager::new(root.path(), 4);
        let cache = manager.acquire("sw").unwrap();

        let all: RoaringBitmap = (0..3).collect();
        let pending = cache.compact(&all).unwrap();
        assert_eq!(pending.len(), 2);
        let leaf = &pending[0];
        assert_eq!(leaf.id, "DUP");
        assert_eq!(leaf.duplicates, 1);
        assert_eq!(leaf.continuation, Some(1));

        let siblings = cache.expand(leaf).unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].ordinal, Some(1));
        assert_ne!(siblings[0].primary_offset, leaf.primary_offset);

        assert_eq!(cache.lookup_id("DUP").unwrap().len(), 2);
        assert_eq!(cache.divisions().unwrap().len(), 1);
    }
}
