mod commands;
mod logging;
mod progress;

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use sfs_core::analysis::DuplicateGroup;
use sfs_core::{
    AppConfig, Catalog, DuplicateFinder, DuplicateReport, DuplicateResolver, MergeEngine, MergeOptions,
    MergeState, ReconcileSummary, Reconciler, SqliteStore,
};
use tracing::{error, info};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match sfs_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    if let Err(err) = run(args, &config) {
        error!("{:#}", err);
        process::exit(1);
    }
}

fn run(args: Cli, config: &AppConfig) -> anyhow::Result<()> {
    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return Ok(());
    };
    let confirm = config.confirm_deletions && !args.yes;
    let explicit = args.catalog.as_deref();

    match command {
        Commands::Init { path } => {
            let catalog = Catalog::init(&path, config)
                .with_context(|| format!("Cannot initialize a catalog at {}", path.display()))?;
            println!("Initialized catalog at {}", catalog.root().display().to_string().green());
            Ok(())
        }
        Commands::AddCol { path, name } => {
            let mut catalog = open_catalog(explicit, None, config)?;
            run_add_collection(&mut catalog, &path, name, config)
        }
        Commands::ListCols => {
            let catalog = open_catalog(explicit, None, config)?;
            run_list_collections(&catalog)
        }
        Commands::SyncCol { name } => {
            let mut catalog = open_catalog(explicit, None, config)?;
            run_sync(&mut catalog, &name, config)
        }
        Commands::DelCol { name } => {
            let mut catalog = open_catalog(explicit, None, config)?;
            if confirm
                && !prompt_confirm(
                    &format!("Remove collection '{}' and all of its links?", name),
                    Some(false),
                )?
            {
                return Ok(());
            }
            let removed = catalog.remove_collection(&name)?;
            println!("Removed collection '{}' ({} links)", name.yellow(), removed);
            Ok(())
        }
        Commands::DelOrphans => {
            let mut catalog = open_catalog(explicit, None, config)?;
            if confirm && !prompt_confirm("Remove every orphan link in the catalog?", Some(false))? {
                return Ok(());
            }
            let removed = catalog.remove_orphans()?;
            println!("Removed {} orphan links", removed.to_string().yellow());
            Ok(())
        }
        Commands::FindDups {
            dir,
            override_existing,
            del_duplicates,
        } => {
            let dir = resolve_dir(dir)?;
            let catalog = open_catalog(explicit, Some(dir.as_path()), config)?;
            run_find_dups(&catalog, &dir, override_existing, del_duplicates)
        }
        Commands::Dedup { dir, del_json } => {
            let dir = resolve_dir(dir)?;
            let mut catalog = open_catalog(explicit, Some(dir.as_path()), config)?;
            run_dedup(&mut catalog, &dir, del_json, confirm)
        }
        Commands::Merge {
            target,
            source,
            continue_merge,
            on_conflict,
            json,
            override_existing,
            del_json,
            del_source,
        } => {
            let target = resolve_dir(Some(target))?;
            let source = resolve_dir(Some(source))?;
            let mut catalog = open_catalog(explicit, Some(target.as_path()), config)?;
            if del_source
                && confirm
                && !prompt_confirm(
                    &format!("Delete {} once it is fully merged?", source.display()),
                    Some(false),
                )?
            {
                return Ok(());
            }
            let options = MergeOptions {
                continue_merge,
                on_conflict: on_conflict.into(),
                use_json: json,
                override_existing,
                del_json,
                del_source,
                keep_both_marker: config.keep_both_marker.clone(),
            };
            run_merge(&mut catalog, &target, &source, &options)
        }
        Commands::PrintConfig => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
    }
}

/// Open the catalog named by `--catalog`, else the one containing `hint`,
/// else the one containing the working directory.
fn open_catalog(explicit: Option<&Path>, hint: Option<&Path>, config: &AppConfig) -> anyhow::Result<Catalog<SqliteStore>> {
    let start = match explicit.or(hint) {
        Some(path) => path.to_path_buf(),
        None => env::current_dir()?,
    };
    Catalog::discover(&start, config).with_context(|| format!("No catalog found at {}", start.display()))
}

fn resolve_dir(dir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let dir = match dir {
        Some(dir) => dir,
        None => env::current_dir()?,
    };
    let resolved = fs::canonicalize(&dir).with_context(|| format!("Cannot access {}", dir.display()))?;
    if !resolved.is_dir() {
        bail!("{} is not a directory", resolved.display());
    }
    Ok(resolved)
}

fn run_add_collection(
    catalog: &mut Catalog<SqliteStore>,
    path: &Path,
    name: Option<String>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let name = match name {
        Some(name) => name,
        None => fs::canonicalize(path)
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .with_context(|| format!("Cannot derive a collection name from {}; use --name", path.display()))?,
    };
    let collection = catalog.add_collection(&name, path)?;
    info!(
        "Added collection '{}' at {}",
        collection.name.cyan(),
        collection.base.display()
    );
    run_sync(catalog, &collection.name, config)
}

fn run_list_collections(catalog: &Catalog<SqliteStore>) -> anyhow::Result<()> {
    let collections = catalog.collections()?;
    if collections.is_empty() {
        println!("No collections");
        return Ok(());
    }
    for collection in collections {
        let status = if collection.base.is_dir() {
            "online".green()
        } else {
            "offline".red()
        };
        println!(
            "{:<20} {:<8} {} (added {})",
            collection.name.bold(),
            status,
            collection.base.display(),
            collection.added_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn run_sync(catalog: &mut Catalog<SqliteStore>, name: &str, config: &AppConfig) -> anyhow::Result<()> {
    let reporter = CliReporter::new();
    let changes = Reconciler::new(catalog)
        .with_reporter(&reporter)
        .with_ignore_patterns(&config.ignore_patterns)
        .reconcile(name)?;
    let summary = ReconcileSummary::from_changes(&changes);

    info!(
        "'{}': {} added, {} modified, {} deleted, {} unchanged",
        name,
        format!("{}", summary.added).green(),
        format!("{}", summary.modified).yellow(),
        format!("{}", summary.deleted).red(),
        summary.unchanged,
    );
    Ok(())
}

fn run_find_dups(
    catalog: &Catalog<SqliteStore>,
    dir: &Path,
    override_existing: bool,
    mark: bool,
) -> anyhow::Result<()> {
    let reporter = CliReporter::new();
    let report = DuplicateFinder::new(catalog)
        .with_reporter(&reporter)
        .find(dir, override_existing, mark)?;

    if report.items.is_empty() {
        println!("No duplicates found");
        return Ok(());
    }
    for group in &report.items {
        print_group(group);
    }
    let wasted: u64 = report.items.iter().map(DuplicateGroup::wasted_bytes).sum();
    info!(
        "{} duplicate groups, {} bytes in redundant copies. Report: {}",
        format!("{}", report.items.len()).red(),
        format!("{}", wasted).red(),
        DuplicateReport::path_for(dir).display()
    );
    Ok(())
}

fn print_group(group: &DuplicateGroup) {
    println!("{}", group.signature.to_string().bold());
    for member in &group.members {
        let label = if group.is_marked(&member.relative_path) {
            "delete".red()
        } else {
            "keep".green()
        };
        println!("    {:<6} {}", label, member.relative_path.display());
    }
}

fn run_dedup(catalog: &mut Catalog<SqliteStore>, dir: &Path, del_json: bool, confirm: bool) -> anyhow::Result<()> {
    let pending = DuplicateReport::load_pending(dir)?;
    let marked: usize = pending.items.iter().map(|g| g.marked_for_deletion.len()).sum();
    if marked > 0
        && confirm
        && !prompt_confirm(
            &format!(
                "Delete {} entries marked in {}?",
                marked,
                DuplicateReport::path_for(dir).display()
            ),
            Some(false),
        )?
    {
        return Ok(());
    }

    let reporter = CliReporter::new();
    let outcome = DuplicateResolver::new(catalog)
        .with_reporter(&reporter)
        .resolve(dir, del_json)?;
    info!(
        "{} deleted, {} already gone, {} failed, {} groups skipped",
        format!("{}", outcome.deleted).green(),
        outcome.skipped_missing,
        format!("{}", outcome.failed).red(),
        outcome.groups_skipped
    );
    if outcome.failed > 0 {
        bail!("{} deletions failed; the report was kept", outcome.failed);
    }
    Ok(())
}

fn run_merge(
    catalog: &mut Catalog<SqliteStore>,
    target: &Path,
    source: &Path,
    options: &MergeOptions,
) -> anyhow::Result<()> {
    let reporter = CliReporter::new();
    let result = MergeEngine::new(catalog)
        .with_reporter(&reporter)
        .merge(target, source, options)?;
    let stats = &result.stats;

    info!(
        "{} moved, {} already present, {} conflicts ({} kept target, {} kept source, {} kept both, {} failed)",
        format!("{}", stats.moved).green(),
        stats.identical,
        format!("{}", stats.conflicts).yellow(),
        stats.kept_target,
        stats.kept_source,
        stats.kept_both,
        format!("{}", stats.failed).red(),
    );

    match &result.state {
        MergeState::AwaitingResolution {
            manifest_path,
            remaining,
        } => {
            println!(
                "{} {} conflicts await resolution in {}",
                "!".yellow(),
                remaining,
                manifest_path.display()
            );
            println!(
                "  Set each \"resolution\" to keep-target, keep-source or keep-both, then rerun with --json"
            );
        }
        _ => {
            println!("{} Merge complete", "✓".green());
            if stats.source_deleted {
                println!("  Removed {}", source.display());
            }
        }
    }
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(default.unwrap_or(false));
        }

        match input.trim().to_uppercase().as_str() {
            "Y" | "YES" => return Ok(true),
            "N" | "NO" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
