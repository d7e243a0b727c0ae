use crate::query::cache::CacheManager;
use crate::utils::list_aliases;
use anyhow::{Context, Result};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};

/// Number of most frequent tokens reported per field
const TOP_TOKENS: usize = 10;

/// Summary of one keyword index
#[derive(Debug, Clone)]
pub struct FieldStats {
    pub name: String,
    pub case_sensitive: bool,
    pub targets: u32,
    pub hits: u32,
    /// Most frequent tokens, highest count first
    pub top_tokens: Vec<(String, u32)>,
}

/// Summary of one alias's index set
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub alias: String,
    pub index_dir: PathBuf,
    pub db_name: String,
    pub release: String,
    pub build_date: String,
    pub format: String,
    pub data_dir: PathBuf,
    pub id_field: String,
    pub entry_count: u32,
    pub division_count: usize,
    pub excluded_divisions: usize,
    pub sort_strategy: String,
    pub created_at: u64,
    pub fields: Vec<FieldStats>,
    pub size: u64,
}

/// Gather statistics for an alias
pub fn collect_stats(index_root: &Path, alias: &str) -> Result<IndexStats> {
    let manager = CacheManager::new(index_root, 1);
    let cache = manager
        .acquire(alias)
        .with_context(|| format!("Failed to open index for '{}'", alias))?;
    let meta = cache.meta();
    let header = cache.entries().header();
    let divisions = cache.divisions()?;

    let mut fields = Vec::with_capacity(meta.fields.len());
    for config in &meta.fields {
        let index = cache
            .field(&config.name)
            .with_context(|| format!("Failed to open field index '{}'", config.name))?;
        fields.push(FieldStats {
            name: config.name.clone(),
            case_sensitive: config.case_sensitive,
            targets: index.target_count(),
            hits: index.hit_count(),
            top_tokens: top_tokens(index.tokens(), TOP_TOKENS),
        });
    }

    let index_dir = cache.index_dir().to_path_buf();
    Ok(IndexStats {
        alias: alias.to_string(),
        size: dir_size(&index_dir).unwrap_or(0),
        index_dir,
        db_name: header.db_name.clone(),
        release: header.release.clone(),
        build_date: header.build_date_string(),
        format: meta.format.clone(),
        data_dir: meta.data_dir.clone(),
        id_field: meta.id_field.name.clone(),
        entry_count: meta.entry_count,
        division_count: divisions.len(),
        excluded_divisions: divisions.divisions().iter().filter(|d| d.excluded).count(),
        sort_strategy: meta.sort_strategy.clone(),
        created_at: meta.created_at,
        fields,
    })
}

/// Display index statistics
pub fn show_stats(index_root: &Path, alias: &str) -> Result<()> {
    let stats = collect_stats(index_root, alias)?;

    println!("Index Statistics");
    println!("================");
    println!();
    println!("Alias:            {}", stats.alias);
    println!("Database:         {}", stats.db_name);
    println!("Release:          {}", stats.release);
    println!("Index location:   {}", stats.index_dir.display());
    println!("Data directory:   {}", stats.data_dir.display());
    println!("Record format:    {}", stats.format);
    println!("Entry count:      {}", stats.entry_count);
    println!(
        "Divisions:        {} ({} excluded)",
        stats.division_count, stats.excluded_divisions
    );
    println!("Sort strategy:    {}", stats.sort_strategy);

    println!();
    println!("Fields:");
    println!("  {:15} primary", stats.id_field);
    for field in &stats.fields {
        let case = if field.case_sensitive { ", case-sensitive" } else { "" };
        println!(
            "  {:15} {} tokens, {} hits{}",
            field.name, field.targets, field.hits, case
        );
        for (token, count) in &field.top_tokens {
            println!("      {:24} {}", token, count);
        }
    }

    println!();
    println!("Index size:       {}", format_size(stats.size));
    println!("Build date:       {}", stats.build_date);
    println!("Created:          {}", format_timestamp(stats.created_at));

    Ok(())
}

/// List all indexed aliases
pub fn list_indexes(index_root: &Path) -> Result<()> {
    let aliases = list_aliases(index_root)
        .with_context(|| format!("Failed to read index directory {}", index_root.display()))?;

    if aliases.is_empty() {
        println!("No indexed databases found in {}.", index_root.display());
        return Ok(());
    }

    println!("Indexed Databases");
    println!("=================");
    println!();

    for location in aliases {
        println!("  {}", location.alias);
        println!("    Index: {}", location.index_dir.display());
        println!();
    }

    Ok(())
}

/// The `n` tokens with the highest counts; ties go to the smaller token
fn top_tokens(tokens: impl Iterator<Item = (String, u32)>, n: usize) -> Vec<(String, u32)> {
    if n == 0 {
        return Vec::new();
    }
    // Min-heap of the best n seen so far
    let mut heap = BinaryHeap::with_capacity(n + 1);
    for (token, count) in tokens {
        heap.push(Reverse((count, Reverse(token))));
        if heap.len() > n {
            heap.pop();
        }
    }
    let mut top: Vec<_> = heap
        .into_iter()
        .map(|Reverse((count, Reverse(token)))| (token, count))
        .collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top
}

/// Calculate directory size recursively
fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut size = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                size += entry.metadata()?.len();
            } else if path.is_dir() {
                size += dir_size(&path)?;
            }
        }
    }
    Ok(size)
}

/// Format byte size to human readable
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

fn format_timestamp(ts: u64) -> String {
    match chrono::DateTime::from_timestamp(ts as i64, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => ts.to_string(),
    }
}
