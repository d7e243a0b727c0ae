use crate::error::{FlatdexError, Result};
use crate::format::registry;
use crate::index::collect::{FieldCollector, ParseSpec, parse_divisions};
use crate::index::division::DivisionTable;
use crate::index::sort::resolve_strategy;
use crate::index::types::{BuildConfig, BuildReport, INDEX_VERSION, IndexMeta};
use crate::index::writer::IndexWriter;
use crate::utils::progress::{division_bar, phase_spinner};
use crate::utils::{FileFilter, generation_prefix, get_index_dir, prune_generations, validate_alias};
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source file chosen for indexing
#[derive(Debug, Clone)]
struct SourceFile {
    /// File name relative to the data directory
    name: PathBuf,
    secondary: Option<PathBuf>,
    excluded: bool,
    size: u64,
}

/// Build (or rebuild) the index set of one database.
///
/// Output goes to a fresh generation directory under `index_root`. Once it
/// is complete, `<index_root>/<alias>` is switched over to it in a single
/// rename and older generations are pruned. On any error the new
/// generation is removed and the previous index set is left untouched.
pub fn build_index(config: &BuildConfig, index_root: &Path, silent: bool) -> Result<BuildReport> {
    validate_config(config)?;

    let format = registry(&config.format)?;
    let secondary_format = registry(config.secondary_format.as_deref().unwrap_or(&config.format))?;

    if !config.data_dir.is_dir() {
        return Err(FlatdexError::configuration(format!(
            "data directory {} does not exist",
            config.data_dir.display()
        )));
    }

    fs::create_dir_all(index_root)?;
    let staging = tempfile::Builder::new()
        .prefix(&generation_prefix(&config.alias))
        .tempdir_in(index_root)?;

    tracing::info!(alias = %config.alias, data_dir = %config.data_dir.display(), "building index");

    // Phase 1: discover division files
    let spinner = phase_spinner("Discovering division files...", silent);
    let sources = discover_sources(config)?;
    if let Some(spinner) = spinner {
        spinner.finish_with_message(format!("Found {} division files", sources.len()));
    }

    let mut table = DivisionTable::new();
    for source in &sources {
        table.push(source.name.clone(), source.secondary.clone(), source.excluded)?;
    }

    let estimated: u64 = sources.iter().map(|s| s.size).sum();
    let strategy = resolve_strategy(config.sort, estimated, config.memory_budget);
    tracing::info!(
        divisions = table.len(),
        estimated_bytes = estimated,
        strategy = strategy.as_str(),
        "selected sort strategy"
    );

    // Phase 2: parse divisions in parallel batches, collect in order
    let spec = ParseSpec {
        data_dir: &config.data_dir,
        format: format.as_ref(),
        secondary_format: secondary_format.as_ref(),
        id_field: &config.id_field,
        fields: &config.fields,
    };
    let mut collector = FieldCollector::new(
        &config.fields,
        strategy,
        staging.path(),
        config.memory_budget,
    );

    let progress_bar = division_bar(table.len() as u64, silent);
    let batch = rayon::current_num_threads().max(1);
    for chunk in table.divisions().chunks(batch) {
        let parsed = match parse_divisions(chunk, &spec) {
            Ok(parsed) => parsed,
            Err(e) => {
                if let Some(ref pb) = progress_bar {
                    pb.abandon();
                }
                return Err(e);
            }
        };
        for division in parsed {
            collector.add_division(division)?;
            if let Some(ref pb) = progress_bar {
                pb.inc(1);
            }
        }
    }
    if let Some(pb) = progress_bar {
        pb.finish_with_message(format!("Collected {} entries", collector.entry_count()));
    }
    if collector.skipped() > 0 {
        tracing::warn!(skipped = collector.skipped(), "records without a usable identifier were skipped");
    }

    // Phase 3: sort and write
    let spinner = phase_spinner("Writing index...", silent);
    let entry_count = collector.entry_count();
    let writer = IndexWriter::new(staging.path(), &config.alias, &config.release);
    writer.write(collector.finish()?)?;
    writer.write_divisions(&table)?;

    let created_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let meta = IndexMeta {
        version: INDEX_VERSION,
        alias: config.alias.clone(),
        release: config.release.clone(),
        data_dir: config.data_dir.clone(),
        format: config.format.clone(),
        secondary_format: config.secondary_format.clone(),
        id_field: config.id_field.clone(),
        fields: config.fields.clone(),
        entry_count: entry_count as u32,
        division_count: table.len() as u32,
        sort_strategy: strategy.as_str().to_string(),
        created_at,
    };
    writer.write_meta(&meta)?;

    // Phase 4: publish the finished generation
    let index_dir = get_index_dir(index_root, &config.alias);
    let generation = swap_in(staging, &index_dir, index_root, &config.alias)?;
    match prune_generations(index_root, &config.alias, Some(&generation)) {
        Ok(0) => {}
        Ok(n) => tracing::debug!(alias = %config.alias, removed = n, "pruned old generations"),
        Err(e) => tracing::warn!(alias = %config.alias, error = %e, "could not prune old generations"),
    }

    if let Some(spinner) = spinner {
        spinner.finish_with_message("Index complete");
    }
    tracing::info!(
        alias = %config.alias,
        entries = entry_count,
        divisions = table.len(),
        index_dir = %index_dir.display(),
        "index build complete"
    );

    Ok(BuildReport {
        alias: config.alias.clone(),
        index_dir,
        division_count: table.len(),
        entry_count,
        sort_strategy: strategy.as_str().to_string(),
    })
}

fn validate_config(config: &BuildConfig) -> Result<()> {
    validate_alias(&config.alias)?;

    let mut seen = HashSet::new();
    for field in &config.fields {
        if field.name == config.id_field.name {
            return Err(FlatdexError::configuration(format!(
                "field '{}' is already the identifier field",
                field.name
            )));
        }
        if field.name.is_empty()
            || !field
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(FlatdexError::configuration(format!(
                "invalid field name '{}'",
                field.name
            )));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(FlatdexError::configuration(format!(
                "field '{}' listed twice",
                field.name
            )));
        }
    }
    Ok(())
}

/// List the division files of a database, sorted by name.
///
/// Files matching the include globs become divisions; those also matching
/// an exclude glob are recorded as excluded. Files carrying the secondary
/// extension are paired with the primary file of the same stem.
fn discover_sources(config: &BuildConfig) -> Result<Vec<SourceFile>> {
    let filter = FileFilter::new(&config.include, &config.exclude)?;
    let secondary_ext = config
        .secondary_extension
        .as_deref()
        .map(|e| e.trim_start_matches('.'));

    let walker = WalkBuilder::new(&config.data_dir)
        .max_depth(Some(1))
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut sources = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| FlatdexError::build(format!("cannot list data directory: {}", e)))?;
        if entry.depth() == 0 || entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().map(PathBuf::from) else {
            continue;
        };
        if let Some(ext) = secondary_ext {
            if path.extension().and_then(|e| e.to_str()) == Some(ext) {
                continue;
            }
        }
        if !filter.is_included(path) {
            continue;
        }

        let secondary = match secondary_ext {
            Some(ext) => {
                let pair = name.with_extension(ext);
                if config.data_dir.join(&pair).is_file() {
                    Some(pair)
                } else {
                    tracing::warn!(file = %name.display(), "no secondary file for division");
                    None
                }
            }
            None => None,
        };

        // Broken links surface as unreadable sources during collection
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        sources.push(SourceFile {
            excluded: filter.is_excluded(path),
            name,
            secondary,
            size,
        });
    }
    Ok(sources)
}

/// Make the staging directory the live index set and return the
/// directory that now holds it
fn swap_in(
    staging: tempfile::TempDir,
    index_dir: &Path,
    index_root: &Path,
    alias: &str,
) -> Result<PathBuf> {
    let generation = staging.keep();
    match publish(&generation, index_dir, index_root, alias) {
        Ok(live) => Ok(live),
        Err(e) => {
            let _ = fs::remove_dir_all(&generation);
            Err(e)
        }
    }
}

/// Point the alias symlink at `generation`. The new link is created under
/// a temporary name and renamed over the old one, so readers always see
/// either the previous set or the new one.
#[cfg(unix)]
fn publish(generation: &Path, index_dir: &Path, index_root: &Path, alias: &str) -> Result<PathBuf> {
    let target = generation
        .file_name()
        .ok_or_else(|| FlatdexError::build("generation directory has no name"))?;
    let link = index_root.join(format!(".{}.link-{}", alias, std::process::id()));
    if fs::symlink_metadata(&link).is_ok() {
        fs::remove_file(&link)?;
    }
    std::os::unix::fs::symlink(target, &link)?;

    // A plain directory cannot be replaced by renaming a link over it
    if fs::symlink_metadata(index_dir).map(|m| m.is_dir()).unwrap_or(false) {
        let retired = index_root.join(format!("{}legacy-{}", generation_prefix(alias), std::process::id()));
        if let Err(e) = fs::rename(index_dir, &retired) {
            let _ = fs::remove_file(&link);
            return Err(e.into());
        }
    }

    if let Err(e) = fs::rename(&link, index_dir) {
        let _ = fs::remove_file(&link);
        return Err(e.into());
    }
    Ok(generation.to_path_buf())
}

/// Without symlinks the old set is moved aside and the new one renamed
/// into place
#[cfg(not(unix))]
fn publish(generation: &Path, index_dir: &Path, index_root: &Path, alias: &str) -> Result<PathBuf> {
    let stale = index_root.join(format!(".{}.stale-{}", alias, std::process::id()));
    let had_previous = index_dir.exists();
    if had_previous {
        if stale.exists() {
            fs::remove_dir_all(&stale)?;
        }
        fs::rename(index_dir, &stale)?;
    }
    if let Err(e) = fs::rename(generation, index_dir) {
        if had_previous {
            let _ = fs::rename(&stale, index_dir);
        }
        return Err(e.into());
    }
    Ok(index_dir.to_path_buf())
}
