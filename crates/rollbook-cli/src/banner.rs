use std::path::Path;

use rollbook_db::{MigrationStatus, TableCount};

/// Print a boxed summary of the database: location, schema version and
/// per-table row counts.
pub fn print_status(
    db_path: &Path,
    config_dir: &Path,
    status: &MigrationStatus,
    counts: &[TableCount],
) {
    let version = env!("CARGO_PKG_VERSION");

    let schema = if status.is_up_to_date() {
        format!("v{} (up to date)", status.current_version())
    } else {
        format!(
            "v{} ({} pending)",
            status.current_version(),
            status.pending.len()
        )
    };

    let tilde = |p: &Path| match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => p.to_string_lossy().replace(&home, "~"),
        _ => p.to_string_lossy().to_string(),
    };

    // Layout
    let width = 60;
    let inner = width - 4;

    let title = format!("Rollbook v{version}");
    let title_dashes = width - 2 - title.len() - 5;
    let top = format!("╭─── {title} {}╮", "─".repeat(title_dashes));
    let bottom = format!("╰{}╯", "─".repeat(width - 2));
    let row = |text: &str| format!("│ {:<inner$} │", text);

    println!("{top}");
    println!("{}", row(""));
    println!("{}", row(&format!("Database    {}", tilde(db_path))));
    println!("{}", row(&format!("Config      {}", tilde(config_dir))));
    println!("{}", row(&format!("Schema      {schema}")));
    println!("{}", row(&"─".repeat(inner)));
    for count in counts {
        println!("{}", row(&format!("{:<20}{:>8}", count.table, count.rows)));
    }
    for (version, name) in &status.pending {
        println!("{}", row(&format!("pending     {version} {name}")));
    }
    println!("{}", row(""));
    println!("{bottom}");
}
