use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use flatdex::index::{BuildConfig, FieldConfig, SortMode, build_index, stats};
use flatdex::output::{OutputMode, RecordPrinter};
use flatdex::query::{CacheManager, Query, Session, parse_query};
use flatdex::utils::{AppConfig, is_indexed, remove_index, validate_alias};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "flatdex")]
#[command(about = "Indexed access to flat-file sequence databanks", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Index directory (overrides the configured one)
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or rebuild the index set of a database
    Build {
        /// JSON build configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Database alias
        #[arg(short, long)]
        alias: Option<String>,

        /// Directory holding the flat files
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Record format (embl, swissprot, fasta)
        #[arg(long)]
        format: Option<String>,

        /// Secondary field to index (repeatable; append `:cs` for case-sensitive)
        #[arg(short = 'F', long = "field")]
        fields: Vec<String>,

        /// Division file glob to include (repeatable)
        #[arg(long)]
        include: Vec<String>,

        /// Division file glob to mark excluded (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Release tag written into the headers
        #[arg(long)]
        release: Option<String>,

        /// Memory budget in bytes for the in-memory sort
        #[arg(long)]
        memory_budget: Option<u64>,

        /// Force a sort path
        #[arg(long, value_enum)]
        sort: Option<SortArg>,

        /// Suppress progress output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Fetch entries by identifier
    Entry {
        alias: String,

        /// Identifiers to look up
        #[arg(required = true)]
        ids: Vec<String>,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Run a field query, e.g. `org:homo* AND key:kinase`
    Query {
        alias: String,

        /// Query terms
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,

        /// Match case-sensitive fields as written
        #[arg(short = 's', long)]
        case_sensitive: bool,

        #[command(flatten)]
        filter: FilterArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Dump every record of a database
    All {
        alias: String,

        #[command(flatten)]
        filter: FilterArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Show index statistics
    Stats { alias: String },
    /// List all indexed databases
    List,
    /// Remove the index set of a database
    Remove { alias: String },
}

#[derive(clap::Args)]
struct FilterArgs {
    /// Only read divisions whose file name matches (repeatable)
    #[arg(long)]
    include: Vec<String>,

    /// Skip divisions whose file name matches (repeatable)
    #[arg(long)]
    exclude: Vec<String>,
}

#[derive(clap::Args)]
struct OutputArgs {
    /// Print identifiers and divisions only
    #[arg(short = 'l', long)]
    ids: bool,

    /// Also print the secondary record
    #[arg(long)]
    secondary: bool,

    /// Stop after this many records
    #[arg(short = 'n', long)]
    limit: Option<usize>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Auto,
    Memory,
    External,
}

impl From<SortArg> for SortMode {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Auto => SortMode::Auto,
            SortArg::Memory => SortMode::Memory,
            SortArg::External => SortMode::External,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app_config = AppConfig::load().context("Failed to load configuration")?;
    let index_root = app_config.index_root(cli.index_dir.as_deref())?;

    match cli.command {
        Commands::Build {
            config,
            alias,
            data_dir,
            format,
            fields,
            include,
            exclude,
            release,
            memory_budget,
            sort,
            quiet,
        } => {
            let mut build = match config {
                Some(path) => load_build_config(&path)?,
                None => {
                    let (Some(alias), Some(data_dir)) = (alias.as_ref(), data_dir.as_ref()) else {
                        bail!("either --config or both --alias and --data-dir are required");
                    };
                    let mut build = BuildConfig::new(alias, data_dir);
                    build.memory_budget = app_config.memory_budget;
                    build
                }
            };
            if let Some(alias) = alias {
                build.alias = alias;
            }
            if let Some(data_dir) = data_dir {
                build.data_dir = data_dir;
            }
            if let Some(format) = format {
                build.format = format;
            }
            build.fields.extend(fields.iter().map(|f| parse_field(f)));
            if !include.is_empty() {
                build.include = include;
            }
            build.exclude.extend(exclude);
            if let Some(release) = release {
                build.release = release;
            }
            if let Some(budget) = memory_budget {
                build.memory_budget = budget;
            }
            if let Some(sort) = sort {
                build.sort = sort.into();
            }

            std::fs::create_dir_all(&index_root).with_context(|| {
                format!("Failed to create index directory {}", index_root.display())
            })?;
            let report = build_index(&build, &index_root, quiet)
                .with_context(|| format!("Failed to build index for '{}'", build.alias))?;
            if !quiet {
                println!(
                    "Indexed {} entries from {} divisions into {} ({} sort)",
                    report.entry_count,
                    report.division_count,
                    report.index_dir.display(),
                    report.sort_strategy
                );
            }
        }
        Commands::Entry { alias, ids, output } => {
            let manager = CacheManager::new(&index_root, app_config.max_open_fields);
            let id_field = id_field(&manager, &alias)?;
            let mut query = Query::new(flatdex::query::QueryType::Entry);
            for id in &ids {
                query = query.or(&id_field, id);
            }
            run_session(&manager, &alias, query, &output)?;
        }
        Commands::Query {
            alias,
            query,
            case_sensitive,
            filter,
            output,
        } => {
            let manager = CacheManager::new(&index_root, app_config.max_open_fields);
            let id_field = id_field(&manager, &alias)?;
            let mut query = parse_query(&query.join(" "), &id_field).with_case_sensitive(case_sensitive);
            query.include = filter.include;
            query.exclude = filter.exclude;
            run_session(&manager, &alias, query, &output)?;
        }
        Commands::All {
            alias,
            filter,
            output,
        } => {
            let manager = CacheManager::new(&index_root, app_config.max_open_fields);
            let mut query = Query::all();
            query.include = filter.include;
            query.exclude = filter.exclude;
            run_session(&manager, &alias, query, &output)?;
        }
        Commands::Stats { alias } => {
            stats::show_stats(&index_root, &alias)?;
        }
        Commands::List => {
            stats::list_indexes(&index_root)?;
        }
        Commands::Remove { alias } => {
            validate_alias(&alias)?;
            if !is_indexed(&index_root, &alias) {
                anyhow::bail!("No index for '{}' in {}", alias, index_root.display());
            }
            remove_index(&index_root, &alias)
                .with_context(|| format!("Failed to remove index for '{}'", alias))?;
            println!("Removed index for: {}", alias);
        }
    }

    Ok(())
}

fn load_build_config(path: &Path) -> Result<BuildConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read build configuration {}", path.display()))?;
    let config = serde_json::from_str(&content)
        .with_context(|| format!("Invalid build configuration {}", path.display()))?;
    Ok(config)
}

/// `name` or `name:cs`
fn parse_field(spec: &str) -> FieldConfig {
    match spec.strip_suffix(":cs") {
        Some(name) => FieldConfig {
            name: name.to_string(),
            case_sensitive: true,
        },
        None => FieldConfig::new(spec),
    }
}

fn id_field(manager: &CacheManager, alias: &str) -> Result<String> {
    let cache = manager
        .acquire(alias)
        .with_context(|| format!("Failed to open index for '{}'", alias))?;
    Ok(cache.meta().id_field.name.clone())
}

fn run_session(manager: &CacheManager, alias: &str, query: Query, output: &OutputArgs) -> Result<()> {
    let mode = if output.ids {
        OutputMode::IdsOnly
    } else if output.secondary {
        OutputMode::WithSecondary
    } else {
        OutputMode::Records
    };
    let mut printer = RecordPrinter::stdout(mode, !output.no_color);
    let mut session = Session::open(manager, alias, query)
        .with_context(|| format!("Failed to open session on '{}'", alias))?;

    while let Some(record) = session.next_record().context("Query failed")? {
        printer.print(&record)?;
        if output.limit.is_some_and(|limit| printer.printed() >= limit) {
            session.close();
            break;
        }
    }
    tracing::info!(alias, records = printer.printed(), "query finished");

    if output.ids {
        printer.summary(alias)?;
    }
    Ok(())
}
