use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use site_indexer::db::{self, SqliteStore};
use site_indexer::{job, Settings};

#[derive(Parser)]
#[command(name = "site_indexer", about = "Re-index a static site build into a searchable store")]
struct Cli {
    /// Settings file (default: ./site_indexer.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every page in the build's sitemap, then sweep stale records
    Index(IndexArgs),
    /// Show indexed page counts per hostname
    Stats {
        /// SQLite index path
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

#[derive(Args)]
struct IndexArgs {
    /// Directory holding the rendered pages and sitemap.xml
    #[arg(long)]
    build_root: Option<PathBuf>,
    /// Sitemap path (default: <build-root>/sitemap.xml)
    #[arg(long)]
    sitemap: Option<PathBuf>,
    /// SQLite index path
    #[arg(long)]
    database: Option<PathBuf>,
    /// Site identity used to scope records and the sweep
    #[arg(long)]
    hostname: Option<String>,
    /// URL of this deploy
    #[arg(long, env = "DEPLOY_URL")]
    deploy_url: Option<String>,
    /// Primary deploy URL; its host is used when --hostname is not given
    #[arg(long, env = "DEPLOY_PRIME_URL")]
    deploy_prime_url: Option<String>,
    /// Deploy URL of local/preview builds, which run dry
    #[arg(long)]
    preview_deploy_url: Option<String>,
    /// Extract pages without touching the index
    #[arg(long)]
    dry_run: bool,
    /// Max pages processed at once
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,
}

impl IndexArgs {
    fn into_settings(self) -> Settings {
        Settings {
            build_root: self.build_root,
            sitemap: self.sitemap,
            database: self.database,
            hostname: self.hostname,
            deploy_url: self.deploy_url,
            deploy_prime_url: self.deploy_prime_url,
            preview_deploy_url: self.preview_deploy_url,
            dry_run: self.dry_run,
            concurrency: self.concurrency,
        }
    }
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
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    match cli.command {
        Commands::Index(args) => {
            let config = settings.overlay(args.into_settings()).resolve()?;
            let report = job::run(&config).await?;

            println!(
                "Indexed {} of {} pages ({} empty, {} failed){}",
                report.indexed,
                report.discovered,
                report.skipped_empty,
                report.failed,
                if report.dry_run { " [dry run]" } else { "" },
            );
            match report.swept {
                Some(n) => println!("Removed {} stale page(s) for {}", n, config.hostname),
                None if report.sweep_failed => {
                    println!("Stale pages were not removed; they will be swept on the next run")
                }
                None => {}
            }
        }
        Commands::Stats { database } => {
            let path = database
                .or(settings.database)
                .unwrap_or_else(|| PathBuf::from(db::DEFAULT_DB_PATH));
            let store = SqliteStore::open(&path)
                .with_context(|| format!("Failed to open {:?}", path))?;
            let stats = store.stats()?;
            if stats.is_empty() {
                println!("No pages indexed.");
                return Ok(());
            }

            println!(
                "{:<40} | {:>6} | {:<32} | {:<32}",
                "Hostname", "Pages", "Oldest watermark", "Last indexed"
            );
            println!("{}", "-".repeat(119));
            for s in &stats {
                let show = |w: Option<site_indexer::Watermark>| {
                    w.map(|w| w.to_string()).unwrap_or_else(|| "-".into())
                };
                println!(
                    "{:<40} | {:>6} | {:<32} | {:<32}",
                    s.hostname,
                    s.pages,
                    show(s.oldest),
                    show(s.newest)
                );
            }
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }
    Ok(())
}
