use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use dialoguer::{Input, Select};
use rollbook_config::{
    AppConfig, ConfigLoader, DatabaseConfig, MAX_SESSION_TTL_HOURS, SessionConfig,
};
use tracing::info;

/// Run the interactive setup wizard and write config.yml.
pub fn run_wizard(loader: &ConfigLoader) -> Result<()> {
    let config_dir = loader.config_dir();
    if !std::io::stdin().is_terminal() {
        println!("Non-interactive environment detected.");
        println!(
            "To configure Rollbook, edit: {}/config.yml",
            config_dir.display()
        );
        println!();
        println!("Minimal config.yml example:");
        println!("---");
        println!("database:");
        println!("  path: rollbook.db");
        println!("sessions:");
        println!("  ttl_hours: 24");
        return Ok(());
    }

    println!();
    println!("  Rollbook Setup Wizard");
    println!("  ---------------------");
    println!();

    // --- Database location ---
    let db_path: String = Input::new()
        .with_prompt("Database file (relative paths are kept next to the config)")
        .default("rollbook.db".to_string())
        .interact_text()
        .context("database path input cancelled")?;

    // --- Session lifetime ---
    let ttl_hours: u32 = Input::new()
        .with_prompt("Session lifetime in hours")
        .default(24)
        .validate_with(|h: &u32| {
            if (1..=MAX_SESSION_TTL_HOURS).contains(h) {
                Ok(())
            } else {
                Err(format!("lifetime must be between 1 and {MAX_SESSION_TTL_HOURS} hours"))
            }
        })
        .interact_text()
        .context("session lifetime input cancelled")?;

    // --- Log level ---
    let levels = &["info", "debug", "warn", "error"];
    let level = Select::new()
        .with_prompt("Log level")
        .items(levels)
        .default(0)
        .interact()
        .context("log level selection cancelled")?;

    let config = AppConfig {
        database: DatabaseConfig {
            path: Some(PathBuf::from(db_path.trim())),
            ..Default::default()
        },
        sessions: SessionConfig { ttl_hours },
        log_level: (level != 0).then(|| levels[level].to_string()),
    };

    let config_path = loader
        .save(&config)
        .with_context(|| format!("failed to write config in {}", config_dir.display()))?;

    info!("config written to {}", config_path.display());
    println!();
    println!("  Config written to {}", config_path.display());
    println!("  Run `rollbook migrate` to create the database.");
    println!();

    Ok(())
}
