use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use colored::*;
use dialoguer::{theme::ColorfulTheme, Confirm};
use indicatif::{ProgressBar, ProgressStyle};

use filekeeper::cli::{self, ArchiveArgs, Cli, Commands, PatternArgs, RecycleArgs};
use filekeeper::util::{format_size, validate_retention_days};
use filekeeper::{
    colors, logging, Archiver, Config, DisposalEngine, DisposalMode, DisposalSummary,
    FileAllocator, PurgeReport, RecordStatus, RecycleBin,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let _guard = logging::init_logger(cli.log_level.as_deref(), &config.log_level, &config.log_dir);
    tracing::debug!("running {} with config {}", cli.command.name(), config_path.display());

    match cli.command {
        Commands::Clean(args) => handle_clean(&config, &args)?,
        Commands::Recycle(subcommand) => handle_recycle(&config, subcommand)?,
        Commands::Archive(subcommand) => handle_archive(&config, subcommand)?,
        Commands::Sort(args) => handle_sort(&config, &args)?,
        Commands::Patterns(subcommand) => handle_patterns(&config, subcommand)?,
        Commands::Config => config.display(&config_path),
    }

    Ok(())
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn confirm(prompt: &str) -> Result<bool> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to get confirmation")
}

fn cutoff_days_ago(days: i64) -> Result<chrono::DateTime<Local>> {
    let days = validate_retention_days(days)?;
    Ok(Local::now() - chrono::Duration::days(i64::from(days)))
}

fn handle_clean(config: &Config, args: &cli::CleanArgs) -> Result<()> {
    let days = args.days.unwrap_or(i64::from(config.retention_days));
    let mode = args.mode.map(DisposalMode::from).unwrap_or(config.disposal_mode);
    let recursive = config.include_subfolders && !args.no_subfolders;

    let mut engine = DisposalEngine::new(&config.working_dir, mode);

    let pb = spinner(&format!("Scanning {}", args.path.display()))?;
    let scanned = engine.scan(&args.path, days, recursive);
    pb.finish_and_clear();
    let files = scanned.context("Failed to scan directory for cleanup")?;

    if files.is_empty() {
        println!("{} No files older than {} days", "✨".green(), days);
        return Ok(());
    }

    let preview = engine.dispose_all(files.clone(), true);
    print_files(&preview);
    print_summary(&preview);

    if args.dry_run {
        return Ok(());
    }

    if !args.yes {
        let prompt = format!(
            "Dispose of {} files ({}) using {} mode?",
            preview.total_found,
            preview.total_size(),
            mode
        );
        if !confirm(&prompt)? {
            println!("{} Cleanup cancelled", "ℹ️".cyan());
            return Ok(());
        }
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("#>-"),
    );
    let summary = engine.dispose_all_with(files, false, |file| {
        let name = file.path.file_name().unwrap_or_default().to_string_lossy();
        pb.set_message(name.into_owned());
        pb.inc(1);
    });
    pb.finish_and_clear();

    print_summary(&summary);

    match mode {
        DisposalMode::Recycle if summary.successfully_processed > 0 => {
            println!("{} Recover with: {}", "💡".cyan(), "filekeeper recycle list".bold());
        }
        DisposalMode::Archive if summary.successfully_processed > 0 => {
            if let Some(archiver) = engine.archiver() {
                println!("📦 {}", archiver.stats().summary());
            }
        }
        _ => {}
    }

    Ok(())
}

fn print_files(summary: &DisposalSummary) {
    println!();
    println!("{}", "🗂️  EXPIRED FILES".bold().color(colors::HEADER));
    println!("{}", "─".repeat(50).color(colors::PATH));

    let now = Local::now();
    for (i, file) in summary.processed.iter().take(20).enumerate() {
        println!(
            "{:3}. {} ({}, {} days old)",
            i + 1,
            file.path.display().to_string().color(colors::PATH),
            format_size(file.size),
            file.age_days(now)
        );
    }
    if summary.processed.len() > 20 {
        println!("     ... and {} more files", summary.processed.len() - 20);
    }
}

fn print_summary(summary: &DisposalSummary) {
    println!();
    let title = if summary.is_preview() {
        "📋 CLEANUP PREVIEW"
    } else {
        "📊 CLEANUP SUMMARY"
    };
    println!("{} ({} mode)", title.bold().color(colors::HEADER), summary.mode);
    println!("{}", "─".repeat(50).color(colors::PATH));

    println!("Expired files found: {}", summary.total_found);
    if summary.is_preview() {
        println!(
            "Would process: {} ({})",
            summary.successfully_processed.to_string().color(colors::SUCCESS),
            summary.total_size()
        );
        println!("{} No files were modified", "🌵".yellow());
    } else {
        println!(
            "Processed: {} ({})",
            summary.successfully_processed.to_string().color(colors::SUCCESS),
            summary.total_size()
        );
    }

    if summary.failed > 0 {
        println!("Failed: {}", summary.failed.to_string().color(colors::ERROR));
        for (file, error) in summary.failures.iter().take(10) {
            println!("  {} {}: {}", "•".red(), file.path.display(), error.dimmed());
        }
        if summary.failures.len() > 10 {
            println!("  ... and {} more", summary.failures.len() - 10);
        }
    }
}

fn print_purge(report: &PurgeReport, what: &str) {
    println!(
        "{} Purged {} {} ({} freed)",
        "🗑️".green(),
        report.purged,
        what,
        format_size(report.freed_bytes)
    );
    for (path, error) in &report.failures {
        println!("  {} {}: {}", "•".red(), path.display(), error.dimmed());
    }
}

fn status_label(status: RecordStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        RecordStatus::Available => label.color(colors::SUCCESS),
        RecordStatus::Restored => label.dimmed(),
        RecordStatus::Purged => label.dimmed(),
        RecordStatus::Missing => label.color(colors::WARNING),
    }
}

fn handle_recycle(config: &Config, subcommand: RecycleArgs) -> Result<()> {
    let mut bin = RecycleBin::open(&config.working_dir);

    match subcommand {
        RecycleArgs::List { all } => {
            println!("{}", "♻️  RECYCLED FILES".bold().color(colors::HEADER));
            println!("{}", "─".repeat(50).color(colors::PATH));

            let mut shown = 0;
            for (i, (record, status)) in bin.list().into_iter().enumerate() {
                if !all && status != RecordStatus::Available {
                    continue;
                }
                shown += 1;
                println!(
                    "{:3}. [{}] {} ({}, recycled {})",
                    i + 1,
                    status_label(status),
                    record.original_path.display().to_string().color(colors::PATH),
                    format_size(record.file_size),
                    record.deleted_time.format("%Y-%m-%d %H:%M")
                );
            }

            if shown == 0 {
                println!("{} Nothing to recover", "✨".green());
            }
            println!();
            println!(
                "{} recoverable files, {} held",
                bin.list_recoverable().len(),
                format_size(bin.occupied_bytes())
            );
        }

        RecycleArgs::Recover { index } => {
            let file_id = index
                .checked_sub(1)
                .and_then(|i| bin.records().get(i))
                .map(|r| r.file_id.clone())
                .with_context(|| format!("No recycled file number {}", index))?;

            let restored = bin.recover(&file_id).context("Failed to recover file")?;
            println!("{} Recovered {}", "✅".green(), restored.display());
        }

        RecycleArgs::Delete { index, yes } => {
            let (file_id, original) = index
                .checked_sub(1)
                .and_then(|i| bin.records().get(i))
                .map(|r| (r.file_id.clone(), r.original_path.clone()))
                .with_context(|| format!("No recycled file number {}", index))?;

            let prompt = format!("Permanently delete {}?", original.display());
            if !yes && !confirm(&prompt)? {
                println!("{} Delete cancelled", "ℹ️".cyan());
                return Ok(());
            }

            let freed = bin.purge(&file_id).context("Failed to delete recycled file")?;
            println!(
                "{} Deleted {} ({} freed)",
                "🗑️".green(),
                original.display(),
                format_size(freed)
            );
        }

        RecycleArgs::Purge { older_than, yes } => {
            let cutoff = cutoff_days_ago(older_than)?;
            let candidates = bin
                .list_recoverable()
                .iter()
                .filter(|r| r.deleted_time < cutoff)
                .count();

            if candidates == 0 {
                println!("{} Nothing older than {} days", "✨".green(), older_than);
                return Ok(());
            }
            if !yes && !confirm(&format!("Permanently delete {} recycled files?", candidates))? {
                println!("{} Purge cancelled", "ℹ️".cyan());
                return Ok(());
            }

            let report = bin.purge_older_than(cutoff);
            print_purge(&report, "files");
        }
    }

    Ok(())
}

fn handle_archive(config: &Config, subcommand: ArchiveArgs) -> Result<()> {
    let mut archiver = Archiver::open(&config.working_dir);

    match subcommand {
        ArchiveArgs::List => {
            println!("{}", "📦 ARCHIVED FILES".bold().color(colors::HEADER));
            println!("{}", "─".repeat(50).color(colors::PATH));

            let records = archiver.list();
            if records.is_empty() {
                println!("{} No archived files", "✨".green());
            }
            for (i, (record, status)) in records.into_iter().enumerate() {
                println!(
                    "{:3}. [{}] {} ({}, archived {})",
                    i + 1,
                    status_label(status),
                    record.original_path.display().to_string().color(colors::PATH),
                    format_size(record.original_size),
                    record.archived_time.format("%Y-%m-%d %H:%M")
                );
                println!(
                    "     {} : {}",
                    record.archive_path.display().to_string().dimmed(),
                    record.archive_internal_path.dimmed()
                );
            }
        }

        ArchiveArgs::Stats => {
            let stats = archiver.stats();
            println!("{}", "📊 ARCHIVE STATISTICS".bold().color(colors::HEADER));
            println!("{}", "─".repeat(50).color(colors::PATH));
            println!("Folder: {}", archiver.folder().display());
            println!("Containers: {}", stats.containers);
            println!("Files: {}", stats.files);
            println!("Original size: {}", format_size(stats.original_bytes));
            println!("Compressed size: {}", format_size(stats.compressed_bytes));
            println!(
                "Space saved: {}",
                format!("{:.1}%", stats.saved_percent()).color(colors::SUCCESS)
            );
        }

        ArchiveArgs::Extract { index, to } => {
            let (container, internal) = index
                .checked_sub(1)
                .and_then(|i| archiver.records().get(i))
                .map(|r| (r.archive_path.clone(), r.archive_internal_path.clone()))
                .with_context(|| format!("No archived file number {}", index))?;

            let restored = match to {
                Some(dir) => archiver.extract_to(&container, &internal, &dir),
                None => archiver.extract(&container, &internal),
            }
            .context("Failed to extract file")?;
            println!("{} Extracted {}", "✅".green(), restored.display());
        }

        ArchiveArgs::Contents { container } => {
            let container = archiver.folder().join(container);
            let entries = archiver
                .contents(&container)
                .with_context(|| format!("Failed to read {}", container.display()))?;

            println!("{}", container.display().to_string().bold().color(colors::HEADER));
            println!("{}", "─".repeat(50).color(colors::PATH));
            let (mut original, mut compressed) = (0, 0);
            for entry in &entries {
                original += entry.size;
                compressed += entry.compressed_size;
                println!(
                    "  {} ({} -> {})",
                    entry.name.color(colors::PATH),
                    format_size(entry.size),
                    format_size(entry.compressed_size)
                );
            }
            println!();
            println!(
                "{} files, {} -> {}",
                entries.len(),
                format_size(original),
                format_size(compressed)
            );
        }

        ArchiveArgs::Delete { container, yes } => {
            let container = archiver.folder().join(container);
            let prompt = format!("Delete {} and everything in it?", container.display());
            if !yes && !confirm(&prompt)? {
                println!("{} Delete cancelled", "ℹ️".cyan());
                return Ok(());
            }

            let report = archiver
                .delete_container(&container)
                .context("Failed to delete container")?;
            print_purge(&report, "archived files");
        }

        ArchiveArgs::Purge { older_than, yes } => {
            let cutoff = cutoff_days_ago(older_than)?;
            if !yes
                && !confirm(&format!(
                    "Delete archive containers with nothing newer than {} days?",
                    older_than
                ))?
            {
                println!("{} Purge cancelled", "ℹ️".cyan());
                return Ok(());
            }

            let report = archiver.purge_older_than(cutoff);
            print_purge(&report, "archived files");
        }

        ArchiveArgs::Prune => {
            let removed = archiver.prune().context("Failed to save archive log")?;
            println!("{} Removed {} stale log entries", "🧹".green(), removed);
        }
    }

    Ok(())
}

fn handle_sort(config: &Config, args: &cli::SortArgs) -> Result<()> {
    let mut settings = config.allocator.clone();
    if let Some(watch) = &args.watch {
        settings.watch_folder = watch.clone();
    }
    if let Some(target) = &args.target {
        settings.target_folder = target.clone();
    }

    let mut allocator = FileAllocator::from_config(&settings);

    let pb = spinner(&format!("Sorting {}", settings.watch_folder.display()))?;
    let result = allocator.organize_folder(&settings.watch_folder);
    pb.finish_and_clear();
    let report = result.context("Failed to sort watch folder")?;

    println!("{}", "📁 SORT RESULTS".bold().color(colors::HEADER));
    println!("{}", "─".repeat(50).color(colors::PATH));

    for (from, to) in &report.moved {
        let name = from.file_name().unwrap_or_default().to_string_lossy();
        let dest = to.strip_prefix(allocator.target_root()).unwrap_or(to);
        println!(
            "  {} {} → {}",
            "✓".green(),
            name,
            dest.display().to_string().color(colors::PATH)
        );
    }
    for (path, error) in &report.failed {
        println!("  {} {}: {}", "✗".red(), path.display(), error.dimmed());
    }

    println!();
    println!(
        "Moved {} of {} files ({} skipped, {} failed)",
        report.moved.len().to_string().color(colors::SUCCESS),
        report.total,
        report.skipped.len(),
        report.failed.len()
    );

    let unknown = allocator.unknown_patterns();
    if !unknown.is_empty() {
        println!();
        println!("{}", "🆕 NEW PATTERNS".bold().color(colors::HEADER));
        for (filename, analysis) in unknown {
            println!(
                "  {} {} → {}",
                analysis.signature.color(colors::WARNING),
                filename,
                analysis.suggested_structure.join("/")
            );
        }
        println!();
        println!(
            "{} Adjust with: {}",
            "💡".cyan(),
            "filekeeper patterns add <EXAMPLE> --structure a,b".bold()
        );
    }

    Ok(())
}

fn handle_patterns(config: &Config, subcommand: PatternArgs) -> Result<()> {
    let mut allocator = FileAllocator::from_config(&config.allocator);

    match subcommand {
        PatternArgs::List => {
            println!("{}", "🧠 LEARNED PATTERNS".bold().color(colors::HEADER));
            println!("{}", "─".repeat(50).color(colors::PATH));

            if allocator.patterns().is_empty() {
                println!("{} No patterns learned yet", "ℹ️".cyan());
            }
            for (signature, entry) in allocator.patterns() {
                println!(
                    "{} → {} (seen {}x, last {})",
                    signature.bold(),
                    entry.folder_structure.join("/").color(colors::PATH),
                    entry.count,
                    entry.last_seen.format("%Y-%m-%d")
                );
                for example in entry.examples.iter().rev().take(3) {
                    println!("    {}", example.dimmed());
                }
            }
        }

        PatternArgs::Add { example, structure } => {
            let entry = allocator.learn(&example, structure);
            println!(
                "{} Learned {} → {}",
                "✅".green(),
                example,
                entry.folder_structure.join("/")
            );
        }

        PatternArgs::Delete { signature } => {
            if allocator.delete_pattern(&signature).is_none() {
                bail!("No learned pattern {}", signature);
            }
            println!("{} Deleted pattern {}", "🗑️".green(), signature);
        }

        PatternArgs::Classify { filename } => {
            let analysis = allocator.analyze(&filename);
            let placement = allocator.placement(&filename);

            println!("{}", filename.bold());
            for token in &analysis.tokens {
                println!(
                    "  {:<20} {}",
                    token,
                    allocator.classifier().token_tag(token).color(colors::WARNING)
                );
            }
            println!(
                "Signature: {} ({})",
                placement.signature.bold(),
                if placement.known { "known" } else { "new" }
            );
            let dest = placement.directory(Path::new("")).join(&placement.file_name);
            println!("Destination: {}", dest.display().to_string().color(colors::PATH));
        }
    }

    Ok(())
}
