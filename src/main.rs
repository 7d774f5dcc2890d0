use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use bar_scraper::db::{self, SqliteStore};
use bar_scraper::summary::{JsonFileNotifier, LogNotifier, RunNotifier};
use bar_scraper::{ProgressStore, RunCoordinator, RunParams, SiteConfig};

#[derive(Parser)]
#[command(name = "bar_scraper", about = "Resumable attorney directory crawler")]
struct Cli {
    /// SQLite database holding contacts and crawl progress
    #[arg(long, env = "CRAWL_DB", default_value = db::DEFAULT_DB_PATH, global = true)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl one site until its budget or partition space runs out
    Run(RunArgs),
    /// Partition progress, contacts, and runs per site
    Stats {
        /// Only this site
        #[arg(short, long)]
        site: Option<String>,
    },
    /// Clear a site's partition progress so the next run re-seeds
    Reset {
        /// Site id as it appears in `stats`
        #[arg(short, long)]
        site: String,
        /// Apply the reset (default is a dry run)
        #[arg(long)]
        run: bool,
    },
    /// Report stored contacts the government filter rejects, and purge them
    AuditGov {
        /// Delete the flagged contacts (default is a dry run)
        #[arg(long)]
        run: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Site config JSON (adapter, cap, partition dimensions)
    #[arg(long)]
    site_config: PathBuf,
    /// Stop after this many new contacts
    #[arg(long, env = "MAX_ATTORNEYS", default_value = "500")]
    max_attorneys: usize,
    /// Stop after this many partitions
    #[arg(long, env = "MAX_PARTITIONS_PER_RUN")]
    max_partitions: Option<usize>,
    /// Stop starting partitions after this many seconds
    #[arg(long, env = "MAX_RUNTIME_SECS")]
    max_runtime_secs: Option<u64>,
    /// Log only; write nothing
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,
    /// Discard partition progress and re-seed first
    #[arg(long, env = "RESET_PROGRESS")]
    reset_progress: bool,
    /// Also write <site>-scrape-summary.json into this directory
    #[arg(long)]
    summary_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run(&cli.db, args).await,
        Commands::Stats { site } => {
            let store = open_store(&cli.db)?;
            print_stats(&store, site.as_deref())
        }
        Commands::Reset { site, run } => {
            let store = open_store(&cli.db)?;
            let counts = store.status_counts(&site)?;
            let total: usize = counts.iter().map(|(_, n)| n).sum();
            if total == 0 {
                println!("No partition progress for {}.", site);
                return Ok(());
            }
            for (status, n) in &counts {
                println!("  {:<12} {}", status.as_str(), n);
            }
            if run {
                let removed = store.reset(&site)?;
                println!("Removed {} partitions for {}. Next run re-seeds.", removed, site);
            } else {
                println!("Dry run: would remove {} partitions for {}. Pass --run to apply.", total, site);
            }
            Ok(())
        }
        Commands::AuditGov { run } => {
            let store = open_store(&cli.db)?;
            audit_gov(&store, run)
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_store(path: &Path) -> anyhow::Result<SqliteStore> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    SqliteStore::open(path).with_context(|| format!("opening {}", path.display()))
}

async fn run(db_path: &Path, args: RunArgs) -> anyhow::Result<()> {
    let config = SiteConfig::load(&args.site_config)
        .with_context(|| format!("loading {}", args.site_config.display()))?;
    let adapter = config.build_adapter()?;
    let store = open_store(db_path)?;

    let params = RunParams {
        max_attorneys: Some(args.max_attorneys),
        max_partitions: args.max_partitions,
        max_runtime: args.max_runtime_secs.map(Duration::from_secs),
        dry_run: args.dry_run,
        reset_progress: args.reset_progress,
    };

    let notifier: Box<dyn RunNotifier> = match args.summary_dir {
        Some(dir) => Box::new(JsonFileNotifier { dir }),
        None => Box::new(LogNotifier),
    };

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} partitions {msg}")?
            .progress_chars("=> "),
    );

    println!(
        "Crawling {} (cap {}, {}ms between requests{})...",
        config.site,
        config.cap,
        config.min_delay_ms,
        if params.dry_run { ", dry run" } else { "" }
    );

    let coordinator = RunCoordinator::from_config(&config, adapter.as_ref(), &store, &store)
        .with_notifier(notifier)
        .with_progress_bar(pb);
    let summary = coordinator.run(&params).await;

    print!("{}", summary.render());
    Ok(())
}

fn print_stats(store: &SqliteStore, only: Option<&str>) -> anyhow::Result<()> {
    let sites = match only {
        Some(s) => vec![s.to_string()],
        None => store.sites()?,
    };
    if sites.is_empty() {
        println!("No crawl data yet.");
        return Ok(());
    }

    println!(
        "{:<16} | {:>8} | {:>8} | {:>11} | {:>6} | {:>6} | {:>5} | {:<25}",
        "Site", "Contacts", "Pending", "In progress", "Done", "Capped", "Runs", "Last run"
    );
    println!("{}", "-".repeat(103));

    for site in &sites {
        let s = store.site_stats(site)?;
        let count = |status: bar_scraper::PartitionStatus| {
            s.partitions
                .iter()
                .find(|(st, _)| *st == status)
                .map(|(_, n)| *n)
                .unwrap_or(0)
        };
        println!(
            "{:<16} | {:>8} | {:>8} | {:>11} | {:>6} | {:>6} | {:>5} | {:<25}",
            truncate(&s.site, 16),
            s.contacts,
            count(bar_scraper::PartitionStatus::Pending),
            count(bar_scraper::PartitionStatus::InProgress),
            count(bar_scraper::PartitionStatus::Done),
            count(bar_scraper::PartitionStatus::Capped),
            s.runs,
            s.last_run.as_deref().unwrap_or("-"),
        );
    }

    println!("\n{} contacts total", store.total_contacts()?);
    Ok(())
}

fn audit_gov(store: &SqliteStore, apply: bool) -> anyhow::Result<()> {
    let scanned = store.total_contacts()?;
    let flagged = store.government_contacts()?;
    println!("Scanned {} contacts, {} government/institutional", scanned, flagged.len());
    if flagged.is_empty() {
        return Ok(());
    }

    let mut by_category: HashMap<&str, usize> = HashMap::new();
    let mut by_source: HashMap<&str, usize> = HashMap::new();
    for f in &flagged {
        *by_category.entry(f.category).or_default() += 1;
        *by_source.entry(f.source.as_str()).or_default() += 1;
    }
    for (title, counts) in [("By category", by_category), ("By source", by_source)] {
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        println!("\n{}:", title);
        for (name, n) in counts {
            println!("  {:<20} {}", name, n);
        }
    }

    println!("\nSample (first 20):");
    for f in flagged.iter().take(20) {
        println!("  [{}] {:<40} {}", f.source, truncate(&f.email, 40), f.category);
    }
    if flagged.len() > 20 {
        println!("  ... and {} more", flagged.len() - 20);
    }

    if apply {
        let ids: Vec<i64> = flagged.iter().map(|f| f.id).collect();
        let removed = store.delete_contacts(&ids)?;
        println!("\nDeleted {} contacts. {} remain.", removed, scanned - removed);
    } else {
        println!("\nDry run: pass --run to delete {} contacts.", flagged.len());
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
