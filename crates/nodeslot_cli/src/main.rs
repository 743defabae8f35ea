//! `nodeslot` command line tool.
//!
//! # Responsibility
//! - Inspect persisted node trees in a SQLite store without a class registry.
//! - Collect unreachable records.

use clap::{Parser, Subcommand};
use log::{error, info};
use nodeslot_core::{
    core_version, default_log_level, init_logging, init_logging_from_config, LoadedTree,
    RuntimeConfig, SqliteBackend, Store,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON runtime config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Absolute directory for log files (overrides the config)
    #[arg(long, global = true)]
    log_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the core version
    Version,

    /// Print a persisted tree and any entries that cannot be read
    Inspect {
        /// SQLite store file (defaults to the config's store_path)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Persist id of the root record
        #[arg(long)]
        root: String,
    },

    /// Delete records unreachable from the given roots
    Gc {
        #[arg(long)]
        db: Option<PathBuf>,

        /// Persist ids to keep, with everything below them
        #[arg(long = "root", required = true)]
        roots: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("event=cli_failed module=cli status=error error={}", message);
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path).map_err(|err| err.to_string())?,
        None => RuntimeConfig::default(),
    };
    match &cli.log_dir {
        Some(log_dir) => {
            let level = cli
                .log_level
                .as_deref()
                .or(config.log_level.as_deref())
                .unwrap_or_else(|| default_log_level());
            init_logging(level, log_dir)?;
        }
        None => {
            init_logging_from_config(&config)?;
        }
    }

    match cli.command {
        Commands::Version => {
            println!("nodeslot {}", core_version());
            Ok(())
        }
        Commands::Inspect { db, root } => {
            let store = open_store(db, &config)?;
            let tree = store.load(&root).await.map_err(|err| err.to_string())?;
            print_tree(&tree);
            Ok(())
        }
        Commands::Gc { db, roots } => {
            let mut store = open_store(db, &config)?;
            let roots: Vec<&str> = roots.iter().map(String::as_str).collect();
            let report = store
                .collect_garbage(&roots)
                .await
                .map_err(|err| err.to_string())?;
            info!(
                "event=cli_gc module=cli status=ok scanned={} deleted={}",
                report.scanned,
                report.deleted.len()
            );
            println!(
                "scanned={} reachable={} deleted={}",
                report.scanned,
                report.reachable,
                report.deleted.len()
            );
            for id in &report.deleted {
                println!("deleted {id}");
            }
            Ok(())
        }
    }
}

fn open_store(db: Option<PathBuf>, config: &RuntimeConfig) -> Result<Store<SqliteBackend>, String> {
    let path = db
        .or_else(|| config.store_path.clone())
        .ok_or_else(|| "no store given; pass --db or set store_path".to_string())?;
    let backend = SqliteBackend::open(&path).map_err(|err| err.to_string())?;
    Store::new(backend).map_err(|err| err.to_string())
}

fn print_tree(tree: &LoadedTree) {
    let mut visited = BTreeSet::new();
    print_record(tree, tree.root_id(), 0, &mut visited);
    if !tree.failures().is_empty() {
        println!();
        println!("unreadable entries: {}", tree.failures().len());
        for failure in tree.failures() {
            println!("  {}: {}", failure.id, failure.error);
        }
    }
}

fn print_record(tree: &LoadedTree, id: &str, depth: usize, visited: &mut BTreeSet<String>) {
    let indent = "  ".repeat(depth);
    let Some(record) = tree.record(id) else {
        println!("{indent}{id} <unreadable>");
        return;
    };
    if !visited.insert(id.to_string()) {
        println!("{indent}{id} <repeated>");
        return;
    }

    println!("{indent}{} [{}]", record.id, record.class_name);
    for (name, value) in &record.slot_values {
        println!("{indent}  .{name} = {value}");
    }
    for child in record.subnodes() {
        print_record(tree, child, depth + 1, visited);
    }
}
