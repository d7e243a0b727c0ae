use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Division (shard) number; numbering starts at 1
pub type DivisionId = u16;

/// Position of an entry in the sorted ID index
pub type EntryOrdinal = u32;

/// Version of the on-disk layout written into every header and manifest
pub const INDEX_VERSION: u16 = 1;

/// Shard of the database: one physical flat file plus an optional
/// secondary (reference/sequence) file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Division {
    pub number: DivisionId,
    /// File name relative to the database data directory
    pub primary: PathBuf,
    pub secondary: Option<PathBuf>,
    pub excluded: bool,
}

/// One indexed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Normalized identifier
    pub id: String,
    pub division: DivisionId,
    pub primary_offset: u64,
    pub secondary_offset: u64,
}

/// Resolved pointer from an index key to one physical record.
///
/// A posting with a non-zero `duplicates` count is a hybrid leaf: it stands
/// for itself plus `duplicates` siblings sharing the same identifier, stored
/// at consecutive ordinals starting at `continuation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub id: String,
    /// ID index ordinal; None for postings produced by a sequential scan
    pub ordinal: Option<EntryOrdinal>,
    pub division: DivisionId,
    pub primary_offset: u64,
    pub secondary_offset: u64,
    pub duplicates: u32,
    pub continuation: Option<EntryOrdinal>,
}

impl Posting {
    /// Posting for a single entry
    pub fn from_entry(entry: Entry, ordinal: Option<EntryOrdinal>) -> Self {
        Self {
            id: entry.id,
            ordinal,
            division: entry.division,
            primary_offset: entry.primary_offset,
            secondary_offset: entry.secondary_offset,
            duplicates: 0,
            continuation: None,
        }
    }

    pub fn is_hybrid_leaf(&self) -> bool {
        self.duplicates > 0
    }
}

/// Per-field index configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    /// Store tokens as written instead of folding them to upper case
    #[serde(default)]
    pub case_sensitive: bool,
}

impl FieldConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            case_sensitive: false,
        }
    }
}

/// Whether a field is answered by the ID index or by a keyword index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Primary,
    Secondary,
}

/// Sort path override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Choose from the estimated token volume and the memory budget
    #[default]
    Auto,
    Memory,
    External,
}

/// Configuration of one database build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    pub alias: String,
    /// Directory containing the flat files
    pub data_dir: PathBuf,
    /// File name globs selecting division files
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    /// File name globs for divisions recorded as excluded
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Record format name for primary files
    #[serde(default = "default_format")]
    pub format: String,
    /// Extension of secondary files paired with each primary file
    #[serde(default)]
    pub secondary_extension: Option<String>,
    /// Record format name for secondary files
    #[serde(default)]
    pub secondary_format: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: FieldConfig,
    /// Secondary (keyword) fields
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default = "default_release")]
    pub release: String,
    /// Memory budget in bytes for the in-memory sort path
    #[serde(default = "default_memory_budget")]
    pub memory_budget: u64,
    #[serde(default)]
    pub sort: SortMode,
}

fn default_include() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_format() -> String {
    "embl".to_string()
}

fn default_id_field() -> FieldConfig {
    FieldConfig::new("id")
}

fn default_release() -> String {
    "0.0".to_string()
}

fn default_memory_budget() -> u64 {
    256 * 1024 * 1024
}

impl BuildConfig {
    pub fn new(alias: &str, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            alias: alias.to_string(),
            data_dir: data_dir.into(),
            include: default_include(),
            exclude: Vec::new(),
            format: default_format(),
            secondary_extension: None,
            secondary_format: None,
            id_field: default_id_field(),
            fields: Vec::new(),
            release: default_release(),
            memory_budget: default_memory_budget(),
            sort: SortMode::Auto,
        }
    }

    /// Add a case-insensitive secondary field
    pub fn with_field(mut self, name: &str) -> Self {
        self.fields.push(FieldConfig::new(name));
        self
    }
}

/// Index manifest stored in meta.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub version: u16,
    pub alias: String,
    pub release: String,
    pub data_dir: PathBuf,
    pub format: String,
    #[serde(default)]
    pub secondary_format: Option<String>,
    pub id_field: FieldConfig,
    pub fields: Vec<FieldConfig>,
    pub entry_count: u32,
    pub division_count: u32,
    /// Sort path used by the build ("memory" or "external")
    pub sort_strategy: String,
    pub created_at: u64,
}

impl IndexMeta {
    /// Look up how a field is answered
    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        if self.id_field.name == name {
            Some(FieldKind::Primary)
        } else if self.fields.iter().any(|f| f.name == name) {
            Some(FieldKind::Secondary)
        } else {
            None
        }
    }

    pub fn field_config(&self, name: &str) -> Option<&FieldConfig> {
        if self.id_field.name == name {
            Some(&self.id_field)
        } else {
            self.fields.iter().find(|f| f.name == name)
        }
    }
}

/// Summary returned by a successful build
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub alias: String,
    pub index_dir: PathBuf,
    pub division_count: usize,
    pub entry_count: usize,
    pub sort_strategy: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_config_defaults_from_json() {
        let json = r#"{"alias": "sw", "data_dir": "/data/sw", "fields": [{"name": "org"}]}"#;
        let config: BuildConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.include, vec!["*"]);
        assert_eq!(config.format, "embl");
        assert_eq!(config.id_field.name, "id");
        assert!(!config.fields[0].case_sensitive);
        assert_eq!(config.sort, SortMode::Auto);
    }

    #[test]
    fn test_sort_mode_serde() {
        let mode: SortMode = serde_json::from_str("\"external\"").unwrap();
        assert_eq!(mode, SortMode::External);
    }

    #[test]
    fn test_field_kind() {
        let meta = IndexMeta {
            version: INDEX_VERSION,
            alias: "sw".into(),
            release: "1".into(),
            data_dir: PathBuf::from("/data"),
            format: "embl".into(),
            secondary_format: None,
            id_field: FieldConfig::new("id"),
            fields: vec![FieldConfig::new("org")],
            entry_count: 0,
            division_count: 0,
            sort_strategy: "memory".into(),
            created_at: 0,
        };
        assert_eq!(meta.field_kind("id"), Some(FieldKind::Primary));
        assert_eq!(meta.field_kind("org"), Some(FieldKind::Secondary));
        assert_eq!(meta.field_kind("des"), None);
    }

    #[test]
    fn test_hybrid_leaf() {
        let entry = Entry {
            id: "A".into(),
            division: 1,
            primary_offset: 0,
            secondary_offset: 0,
        };
        let mut posting = Posting::from_entry(entry, Some(3));
        assert!(!posting.is_hybrid_leaf());
        posting.duplicates = 2;
        assert!(posting.is_hybrid_leaf());
    }
}
