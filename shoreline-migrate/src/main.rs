//! Shoreline Migration CLI Tool
//!
//! Applies pending schema migrations and inspects the migration ledger.
//! Exits with status 1 when a migration fails, so it can gate a deployment.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use shoreline::config::{MigrationsConfig, ShorelineConfig};
use shoreline::migration::{
    run_with_pool, FileMigrationProvider, Migration, MigrationError, MigrationReport,
    MigrationResultStatus, Migrator, PgSession,
};
use shoreline::PgPool;
use shoreline_migrate::{scaffold, settings};

#[derive(Parser)]
#[command(name = "shoreline-migrate")]
#[command(about = "Apply and inspect Shoreline schema migrations")]
#[command(version)]
struct Cli {
    /// Database connection URL (overrides the config file)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Migrations directory path
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Configuration file (default: config/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all pending migrations (the default)
    Up {
        /// Show what would be applied without running anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show applied and pending migrations
    Status,

    /// Check the ledger against the migration files without applying anything
    Validate,

    /// Create the next numbered migration file
    New {
        /// Migration slug, e.g. "add_orders"
        slug: String,
    },

    /// Print the down section of a migration for manual rollback
    RevertSql {
        /// Migration name, e.g. "003_add_orders"
        name: String,
    },
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = settings::load_config(cli.config.as_deref(), cli.database_url, cli.migrations_dir)?;
    config.migrations.validate()?;

    match cli.command.unwrap_or(Commands::Up { dry_run: false }) {
        Commands::Up { dry_run: false } => handle_up(&config),
        Commands::Up { dry_run: true } => with_session(&config, handle_dry_run),
        Commands::Status => with_session(&config, handle_status),
        Commands::Validate => with_session(&config, handle_validate),
        Commands::New { slug } => handle_new(&config.migrations.directory, &slug),
        Commands::RevertSql { name } => handle_revert_sql(&config.migrations, &name),
    }
}

fn open_pool(config: &ShorelineConfig) -> Result<PgPool> {
    config.database.validate().context("invalid database settings")?;
    Ok(PgPool::from_config(&config.database)?)
}

fn migrator(config: &MigrationsConfig) -> Result<Migrator, MigrationError> {
    Ok(Migrator::new(FileMigrationProvider::new(&config.directory)?).with_options(config.into()))
}

/// Run `handler` on one pooled session, then close the pool
fn with_session(
    config: &ShorelineConfig,
    handler: fn(&Migrator, &PgSession) -> Result<ExitCode>,
) -> Result<ExitCode> {
    let pool = open_pool(config)?;
    let result = (|| {
        let migrator = migrator(&config.migrations)?;
        let session = PgSession::new(pool.acquire()?, &config.migrations)?;
        handler(&migrator, &session)
    })();
    pool.close();
    result
}

fn handle_up(config: &ShorelineConfig) -> Result<ExitCode> {
    let pool = open_pool(config)?;
    let result = run_with_pool(&pool, &config.migrations);
    pool.close();

    match result {
        Ok(report) => Ok(print_report(&report)),
        Err(e) => {
            eprintln!("{}", "failed to migrate".red().bold());
            eprintln!("{e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_report(report: &MigrationReport) -> ExitCode {
    for result in report.results() {
        match result.status {
            MigrationResultStatus::Success => println!(
                "{}",
                format!("migration \"{}\" was executed successfully", result.name).green()
            ),
            MigrationResultStatus::Error => eprintln!(
                "{}",
                format!("failed to execute migration \"{}\"", result.name).red()
            ),
            MigrationResultStatus::NotExecuted => {
                log::debug!("migration \"{}\" was not executed", result.name)
            }
        }
    }

    match report.error() {
        Some(e) => {
            eprintln!("{}", "failed to migrate".red().bold());
            eprintln!("{e}");
            ExitCode::FAILURE
        }
        None => {
            if report.results().is_empty() {
                log::info!("no pending migrations");
            }
            ExitCode::SUCCESS
        }
    }
}

fn handle_dry_run(migrator: &Migrator, session: &PgSession) -> Result<ExitCode> {
    let pending = migrator.pending(session)?;
    if pending.is_empty() {
        println!("No pending migrations to apply");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Would apply {} migration(s):", pending.len());
    for (i, unit) in pending.iter().enumerate() {
        println!("  {}. {}", i + 1, unit.name);
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_status(migrator: &Migrator, session: &PgSession) -> Result<ExitCode> {
    let status = migrator.status(session)?;

    println!("\n{}\n", "Migration Status".bold());

    if status.applied.is_empty() {
        println!("Applied Migrations: None");
    } else {
        println!("Applied Migrations ({}):", status.applied.len());
        for record in &status.applied {
            let time_str = record
                .execution_time_ms
                .map_or_else(|| "N/A".to_string(), |ms| format!("{ms}ms"));
            println!(
                "  {} {} ({}, {})",
                "✓".green(),
                record.name,
                record.applied_at.format("%Y-%m-%d %H:%M:%S"),
                time_str
            );
        }
    }

    println!();

    if status.pending.is_empty() {
        println!("Pending Migrations: None");
    } else {
        println!("Pending Migrations ({}):", status.pending.len());
        for pending in &status.pending {
            println!("  {} {}", "…".yellow(), pending.name);
        }
    }

    println!(
        "\nSummary: {} applied, {} pending",
        status.applied.len(),
        status.pending.len()
    );
    Ok(ExitCode::SUCCESS)
}

fn handle_validate(migrator: &Migrator, session: &PgSession) -> Result<ExitCode> {
    match migrator.status(session) {
        Ok(status) => {
            println!(
                "{}",
                format!(
                    "ledger is consistent: {} applied, {} pending",
                    status.applied.len(),
                    status.pending.len()
                )
                .green()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{} {e}", "validation failed:".red().bold());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn handle_new(dir: &Path, slug: &str) -> Result<ExitCode> {
    let path = scaffold::create_migration(dir, slug)?;
    println!("Created {}", path.display());
    println!("   Fill in the -- migrate:up section before running `up`");
    Ok(ExitCode::SUCCESS)
}

fn handle_revert_sql(config: &MigrationsConfig, name: &str) -> Result<ExitCode> {
    let provider = FileMigrationProvider::new(&config.directory)?;
    let unit = provider
        .load()?
        .into_iter()
        .find(|unit| unit.name() == name)
        .ok_or_else(|| MigrationError::UnknownUnit {
            name: name.to_string(),
        })?;

    let down = unit.down_sql().ok_or_else(|| MigrationError::Irreversible {
        name: name.to_string(),
    })?;

    println!("-- Revert of {name} ({})", unit.path().display());
    println!("-- Run manually, then remove the ledger row:");
    println!("--   DELETE FROM {} WHERE name = '{name}';", config.table_name);
    println!("{}", down.trim_end());
    Ok(ExitCode::SUCCESS)
}
