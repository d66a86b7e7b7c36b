mod banner;
mod wizard;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rollbook_config::{AppConfig, ConfigLoader};
use rollbook_db::{EntityKind, LookupTable, Store, StoreOptions};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollbook", version, about = "Classroom and survey data administration")]
struct Cli {
    /// Config directory (defaults to ~/.rollbook)
    #[arg(long, env = "ROLLBOOK_CONFIG_DIR", global = true)]
    config_dir: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a config file interactively
    Init,
    /// Create or upgrade the database schema
    Migrate,
    /// Show migration state and row counts
    Status,
    /// Manage lookup table values
    Lookup {
        #[command(subcommand)]
        action: LookupAction,
    },
    /// Delete sessions whose expiry has passed
    PurgeSessions,
    /// Print the JSON projection of one row
    Show {
        /// student, demographic, position, class, enrollment, survey, question or response
        entity: String,
        id: String,
    },
}

#[derive(Subcommand)]
enum LookupAction {
    /// List the values of a lookup table
    List { table: String },
    /// Add a value; days need an explicit --id
    Add {
        table: String,
        name: String,
        #[arg(long)]
        id: Option<i64>,
    },
    /// Remove a value (rows referencing it are removed too)
    Remove { table: String, id: i64 },
}

/// Subscriber used while the config is read, before `log_level` is known.
fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("ROLLBOOK_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish()
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.as_deref().unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: &AppConfig, db_path: &std::path::Path) -> Result<Store> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let options = StoreOptions {
        busy_timeout: std::time::Duration::from_millis(config.database.busy_timeout_ms),
        session_ttl: chrono::Duration::hours(i64::from(config.sessions.ttl_hours)),
    };
    Store::open_with(db_path, options)
        .with_context(|| format!("failed to open database {}", db_path.display()))
}

fn parse_table(raw: &str) -> Result<LookupTable> {
    raw.parse()
        .context("expected one of gender, grade-year, race, ethnicity, day")
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let loader = match &cli.config_dir {
        Some(dir) => ConfigLoader::with_dir(dir),
        None => ConfigLoader::new()?,
    };
    let config = tracing::subscriber::with_default(bootstrap_subscriber(), || loader.load())
        .context("failed to load config")?;
    init_tracing(&config);

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| config.database_path(loader.config_dir()));
    debug!("using database {}", db_path.display());

    match cli.command {
        Command::Init => wizard::run_wizard(&loader)?,
        Command::Migrate => {
            // Opening the store applies any pending migrations.
            let store = open_store(&config, &db_path)?;
            let status = store.migration_status()?;
            info!("schema at version {}", status.current_version());
            println!(
                "Database {} is at schema version {}.",
                db_path.display(),
                status.current_version()
            );
        }
        Command::Status => {
            let store = open_store(&config, &db_path)?;
            let status = store.migration_status()?;
            let counts = store.table_counts()?;
            banner::print_status(&db_path, loader.config_dir(), &status, &counts);
        }
        Command::Lookup { action } => {
            let store = open_store(&config, &db_path)?;
            match action {
                LookupAction::List { table } => {
                    let table = parse_table(&table)?;
                    for entry in store.list_lookup(table)? {
                        println!("{:>4}  {}", entry.id, entry.name);
                    }
                }
                LookupAction::Add { table, name, id } => {
                    let table = parse_table(&table)?;
                    let id = match id {
                        Some(id) => {
                            store.add_lookup_with_id(table, id, &name)?;
                            id
                        }
                        None => store.add_lookup(table, &name)?,
                    };
                    println!("Added {table} {id}: {name}");
                }
                LookupAction::Remove { table, id } => {
                    let table = parse_table(&table)?;
                    if !store.remove_lookup(table, id)? {
                        bail!("no {table} entry with id {id}");
                    }
                    println!("Removed {table} {id}");
                }
            }
        }
        Command::PurgeSessions => {
            let store = open_store(&config, &db_path)?;
            let removed = store.purge_expired_sessions(chrono::Utc::now())?;
            println!("Removed {removed} expired session(s).");
        }
        Command::Show { entity, id } => {
            let store = open_store(&config, &db_path)?;
            let kind: EntityKind = entity.parse()?;
            let value = store.projection(kind, &id)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}
