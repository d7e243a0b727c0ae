//! Synthetic EMBL-style databanks for integration tests.

#![allow(dead_code)]

use flatdex::index::{BuildConfig, BuildReport, FieldConfig, build_index};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Organism lines cycled through by [`scenario`]
pub const ORGANISMS: [&str; 3] = [
    "Homo sapiens (Human)",
    "Mus musculus (Mouse)",
    "Homoeosoma electella",
];

/// One record as written to disk
#[derive(Debug, Clone)]
pub struct FixtureRecord {
    pub id: String,
    pub file: String,
    pub organism: String,
    pub gene: String,
    pub text: String,
}

impl FixtureRecord {
    pub fn bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    /// Whether any organism word starts with `prefix`, ignoring case
    pub fn organism_starts_with(&self, prefix: &str) -> bool {
        let prefix = prefix.to_uppercase();
        self.organism
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| w.to_uppercase().starts_with(&prefix))
    }
}

/// A databank on disk plus an index root to build into
pub struct Fixture {
    pub data: TempDir,
    pub root: TempDir,
    pub records: Vec<FixtureRecord>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            data: tempfile::tempdir().unwrap(),
            root: tempfile::tempdir().unwrap(),
            records: Vec::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.data.path()
    }

    pub fn index_root(&self) -> &Path {
        self.root.path()
    }

    /// Write a division file holding `records`
    pub fn add_division(&mut self, file: &str, records: Vec<FixtureRecord>) {
        let mut text = String::new();
        for mut record in records {
            record.file = file.to_string();
            text.push_str(&record.text);
            self.records.push(record);
        }
        fs::write(self.data.path().join(file), text).unwrap();
    }

    /// Default build configuration: `organism`, `key` and case-sensitive `gn`
    pub fn config(&self, alias: &str) -> BuildConfig {
        let mut config = BuildConfig::new(alias, self.data.path())
            .with_field("organism")
            .with_field("key");
        config.fields.push(FieldConfig {
            name: "gn".to_string(),
            case_sensitive: true,
        });
        config.release = "2024_01".to_string();
        config
    }

    pub fn build(&self, config: &BuildConfig) -> BuildReport {
        build_index(config, self.root.path(), true).unwrap()
    }

    /// Records of a file in file order
    pub fn records_in(&self, file: &str) -> Vec<&FixtureRecord> {
        self.records.iter().filter(|r| r.file == file).collect()
    }
}

/// Render one record
pub fn record(id: &str, organism: &str, keywords: &[&str], gene: &str) -> FixtureRecord {
    let mut text = String::new();
    text.push_str(&format!("ID   {}   Reviewed;   120 AA.\n", id));
    text.push_str(&format!("AC   A{};\n", id.replace('_', "")));
    text.push_str(&format!("DE   Synthetic protein {}.\n", id));
    text.push_str(&format!("GN   {};\n", gene));
    text.push_str(&format!("OS   {}.\n", organism));
    if !keywords.is_empty() {
        text.push_str(&format!("KW   {}.\n", keywords.join("; ")));
    }
    text.push_str("SQ   SEQUENCE   120 AA;\n");
    text.push_str("     MKWVTFISLL FLFSSAYSRG VFRRDTHKSE IAHRFKDLGE\n");
    text.push_str("//\n");
    FixtureRecord {
        id: id.to_string(),
        file: String::new(),
        organism: organism.to_string(),
        gene: gene.to_string(),
        text,
    }
}

/// Three division files of ten entries each. Organisms cycle through
/// [`ORGANISMS`]; even entries carry the `Signal` keyword; genes alternate
/// between `BRCA{n}` and `brca{n}`.
pub fn scenario() -> Fixture {
    let mut fixture = Fixture::new();
    for div in 1..=3 {
        let records = (0..10)
            .map(|i| {
                let id = format!("E{}_{:02}", div, i);
                let keywords: &[&str] = if i % 2 == 0 {
                    &["Signal", "Secreted"]
                } else {
                    &["Cytoplasm"]
                };
                let gene = if i % 2 == 0 {
                    format!("BRCA{}", div)
                } else {
                    format!("brca{}", div)
                };
                record(&id, ORGANISMS[i % 3], keywords, &gene)
            })
            .collect();
        fixture.add_division(&format!("div{}.dat", div), records);
    }
    fixture
}
