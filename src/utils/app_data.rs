use crate::error::{FlatdexError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "flatdex";
const CONFIG_FILE: &str = "config.json";

/// Name of the per-alias manifest; its presence marks a complete index set
pub const META_FILE: &str = "meta.json";

/// Application configuration stored in the app data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding one sub-directory per database alias.
    /// If None, `<app data>/indexes` is used.
    #[serde(default)]
    pub index_dir: Option<PathBuf>,

    /// Default memory budget in bytes for the in-memory sort path
    #[serde(default = "default_memory_budget")]
    pub memory_budget: u64,

    /// Maximum number of field indices kept open per alias
    #[serde(default = "default_max_open_fields")]
    pub max_open_fields: usize,
}

fn default_memory_budget() -> u64 {
    256 * 1024 * 1024
}

fn default_max_open_fields() -> usize {
    16
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            index_dir: None,
            memory_budget: default_memory_budget(),
            max_open_fields: default_max_open_fields(),
        }
    }
}

impl AppConfig {
    /// Load config from the app data directory, or return default if not found
    pub fn load() -> Result<Self> {
        let config_path = get_config_path()?;

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            let config: AppConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the app data directory
    pub fn save(&self) -> Result<()> {
        let config_path = get_config_path()?;
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, content)?;
        Ok(())
    }

    /// The effective index root: explicit override, configured directory,
    /// or the app data default
    pub fn index_root(&self, override_dir: Option<&Path>) -> Result<PathBuf> {
        if let Some(dir) = override_dir {
            return Ok(dir.to_path_buf());
        }
        match self.index_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => Ok(get_app_data_dir()?.join("indexes")),
        }
    }
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let app_dir = get_app_data_dir()?;
    Ok(app_dir.join(CONFIG_FILE))
}

/// Get the application data directory
pub fn get_app_data_dir() -> Result<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library").join("Application Support"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
    } else {
        // Linux/Unix: use XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    };

    let base = base.ok_or_else(|| {
        FlatdexError::configuration("could not determine app data directory")
    })?;
    let app_dir = base.join(APP_NAME);

    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}

/// Live path of an alias's index set. On Unix this is a symlink to the
/// current generation directory.
pub fn get_index_dir(index_root: &Path, alias: &str) -> PathBuf {
    index_root.join(alias)
}

/// Name prefix of the generation directories of an alias. Aliases never
/// contain a dot, so the prefix cannot collide with another alias.
pub fn generation_prefix(alias: &str) -> String {
    format!(".{}.gen-", alias)
}

/// Directory the live path of an alias currently resolves to
pub fn resolve_index_dir(index_root: &Path, alias: &str) -> Result<PathBuf> {
    let live = get_index_dir(index_root, alias);
    fs::canonicalize(&live).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FlatdexError::configuration(format!(
                "no index for alias '{}' in {}",
                alias,
                index_root.display()
            ))
        } else {
            FlatdexError::Io(e)
        }
    })
}

/// Remove leftovers of earlier builds of an alias: retired generations,
/// staging directories of interrupted builds and temporary links.
/// `keep` names the generation that must survive.
pub fn prune_generations(index_root: &Path, alias: &str, keep: Option<&Path>) -> Result<usize> {
    if !index_root.is_dir() {
        return Ok(0);
    }
    let keep_name = keep.and_then(|p| p.file_name()).map(|n| n.to_os_string());
    let dotted = format!(".{}.", alias);

    let mut removed = 0;
    for entry in fs::read_dir(index_root)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(&dotted) || keep_name.as_ref() == Some(&name) {
            continue;
        }
        let path = entry.path();
        let result = if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove stale index"),
        }
    }
    Ok(removed)
}

/// Check that an alias name is usable as a directory name
pub fn validate_alias(alias: &str) -> Result<()> {
    let ok = !alias.is_empty()
        && !alias.starts_with('.')
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(FlatdexError::configuration(format!(
            "invalid database alias '{}'",
            alias
        )))
    }
}

/// Check if an alias has a complete index set
pub fn is_indexed(index_root: &Path, alias: &str) -> bool {
    get_index_dir(index_root, alias).join(META_FILE).exists()
}

/// List all aliases with a complete index set, sorted by name
pub fn list_aliases(index_root: &Path) -> Result<Vec<IndexLocation>> {
    if !index_root.exists() {
        return Ok(Vec::new());
    }

    let mut aliases = Vec::new();

    for entry in fs::read_dir(index_root)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        // Staging directories of in-flight builds start with a dot
        if name.starts_with('.') || !path.is_dir() {
            continue;
        }
        if path.join(META_FILE).exists() {
            aliases.push(IndexLocation {
                alias: name,
                index_dir: path,
            });
        }
    }

    aliases.sort_by(|a, b| a.alias.cmp(&b.alias));
    Ok(aliases)
}

/// Remove the index set of an alias along with every generation directory
pub fn remove_index(index_root: &Path, alias: &str) -> Result<()> {
    validate_alias(alias)?;
    let index_dir = get_index_dir(index_root, alias);
    match fs::symlink_metadata(&index_dir) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(&index_dir)?,
        Ok(_) => fs::remove_file(&index_dir)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    prune_generations(index_root, alias, None)?;
    Ok(())
}

/// Location of an indexed database
#[derive(Debug, Clone)]
pub struct IndexLocation {
    pub alias: String,
    pub index_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert!(config.index_dir.is_none());
        assert_eq!(config.memory_budget, 256 * 1024 * 1024);
        assert_eq!(config.max_open_fields, 16);
    }

    #[test]
    fn test_app_config_partial_json() {
        // Should use defaults for missing fields
        let json = r#"{"memory_budget": 1024}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.memory_budget, 1024);
        assert_eq!(config.max_open_fields, 16);
    }

    #[test]
    fn test_app_config_empty_json() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert!(config.index_dir.is_none());
        assert_eq!(config.memory_budget, default_memory_budget());
    }

    #[test]
    fn test_index_root_override() {
        let config = AppConfig {
            index_dir: Some(PathBuf::from("/configured")),
            ..AppConfig::default()
        };
        let root = config.index_root(Some(Path::new("/override"))).unwrap();
        assert_eq!(root, PathBuf::from("/override"));
        let root = config.index_root(None).unwrap();
        assert_eq!(root, PathBuf::from("/configured"));
    }

    #[test]
    fn test_validate_alias() {
        assert!(validate_alias("swissprot").is_ok());
        assert!(validate_alias("embl_hum-1").is_ok());
        assert!(validate_alias("").is_err());
        assert!(validate_alias(".hidden").is_err());
        assert!(validate_alias("../escape").is_err());
    }

    #[test]
    fn test_list_and_remove() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("beta")).unwrap();
        fs::write(root.path().join("beta").join(META_FILE), "{}").unwrap();
        fs::create_dir_all(root.path().join("alpha")).unwrap();
        fs::write(root.path().join("alpha").join(META_FILE), "{}").unwrap();
        fs::create_dir_all(root.path().join(".alpha-build-1")).unwrap();
        fs::create_dir_all(root.path().join("incomplete")).unwrap();

        let aliases = list_aliases(root.path()).unwrap();
        let names: Vec<_> = aliases.iter().map(|l| l.alias.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        remove_index(root.path(), "alpha").unwrap();
        assert!(!is_indexed(root.path(), "alpha"));
        assert!(is_indexed(root.path(), "beta"));
    }

    #[test]
    fn test_prune_generations_keeps_current() {
        let root = tempdir().unwrap();
        let current = root.path().join(".sw.gen-b");
        fs::create_dir_all(&current).unwrap();
        fs::create_dir_all(root.path().join(".sw.gen-a")).unwrap();
        fs::create_dir_all(root.path().join(".sw.stale-42")).unwrap();
        fs::write(root.path().join(".sw.link-42"), "").unwrap();
        // Another alias sharing a name prefix is left alone
        fs::create_dir_all(root.path().join(".sw-x.gen-a")).unwrap();

        let removed = prune_generations(root.path(), "sw", Some(&current)).unwrap();
        assert_eq!(removed, 3);

        let mut names: Vec<_> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec![".sw-x.gen-a", ".sw.gen-b"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_index_follows_generation_link() {
        let root = tempdir().unwrap();
        let generation = root.path().join(".sw.gen-1");
        fs::create_dir_all(&generation).unwrap();
        fs::write(generation.join(META_FILE), "{}").unwrap();
        std::os::unix::fs::symlink(".sw.gen-1", root.path().join("sw")).unwrap();

        assert!(is_indexed(root.path(), "sw"));
        assert_eq!(resolve_index_dir(root.path(), "sw").unwrap(), generation.canonicalize().unwrap());

        remove_index(root.path(), "sw").unwrap();
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
        assert!(matches!(
            resolve_index_dir(root.path(), "sw"),
            Err(FlatdexError::Configuration(_))
        ));
    }
}
