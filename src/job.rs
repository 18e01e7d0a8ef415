use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::config::JobConfig;
use crate::db::SqliteStore;
use crate::error::{JobError, PageError, StoreError};
use crate::extract::{self, PageDocument};
use crate::index::{self, IndexStore, MarkOutcome, Watermark};
use crate::sitemap;

/// One indexing run. The watermark is fixed when the job starts.
#[derive(Debug, Clone)]
pub struct Job {
    pub watermark: Watermark,
    pub hostname: String,
    pub dry_run: bool,
    pub build_root: PathBuf,
    pub sitemap_path: PathBuf,
    pub concurrency: usize,
}

impl Job {
    pub fn start(config: &JobConfig) -> Self {
        Self::with_watermark(config, Watermark::now())
    }

    pub fn with_watermark(config: &JobConfig, watermark: Watermark) -> Self {
        Job {
            watermark,
            hostname: config.hostname.clone(),
            dry_run: config.dry_run,
            build_root: config.build_root.clone(),
            sitemap_path: config.sitemap_path.clone(),
            concurrency: config.concurrency.clamp(1, Semaphore::MAX_PERMITS),
        }
    }
}

/// What a finished job did.
#[derive(Debug, Clone, Default)]
pub struct JobReport {
    pub discovered: usize,
    pub extracted: usize,
    pub indexed: usize,
    pub skipped_empty: usize,
    pub failed: usize,
    /// Records removed by the sweep; `None` in dry-run or when it failed.
    pub swept: Option<usize>,
    pub sweep_failed: bool,
    pub dry_run: bool,
    pub elapsed: Duration,
}

struct PageOutcome {
    path: String,
    result: Result<PageDocument, PageError>,
}

/// Run a job against the SQLite store named in `config`.
pub async fn run(config: &JobConfig) -> Result<JobReport, JobError> {
    let job = Job::start(config);
    let database = config.database.clone();
    run_with(&job, || SqliteStore::open(&database)).await
}

/// Run a job, opening the store with `open_store` unless it is a dry run.
///
/// Pages are loaded and extracted concurrently, at most `job.concurrency` at a
/// time. Outcomes are marked one by one on this task as they arrive; the sweep
/// runs only after every page task has finished.
pub async fn run_with<S, F>(job: &Job, open_store: F) -> Result<JobReport, JobError>
where
    S: IndexStore,
    F: FnOnce() -> Result<S, StoreError>,
{
    let t0 = Instant::now();
    info!("Build dir is: {:?}", job.build_root);
    info!("Hostname is: {:?}", job.hostname);
    info!("Sitemap path is: {:?}", job.sitemap_path);

    let entries = sitemap::read_file(&job.sitemap_path).await?;

    let mut store = if job.dry_run {
        info!("Dry run: the index store will not be opened");
        None
    } else {
        Some(open_store().map_err(JobError::StoreUnavailable)?)
    };

    let total = entries.len();
    let mut report = JobReport {
        discovered: total,
        dry_run: job.dry_run,
        ..Default::default()
    };

    let pb = progress_bar(total);
    let semaphore = Arc::new(Semaphore::new(job.concurrency));
    let build_root: Arc<Path> = Arc::from(job.build_root.as_path());

    // Workers send outcomes, this task writes them to the store
    let (tx, mut rx) = mpsc::channel::<PageOutcome>(job.concurrency.saturating_mul(2));
    let mut handles = Vec::with_capacity(total);

    for (i, entry) in entries.into_iter().enumerate() {
        let sem = Arc::clone(&semaphore);
        let root = Arc::clone(&build_root);
        let tx = tx.clone();

        handles.push(tokio::spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return;
            };
            debug!("Crawling page {}/{}: {}", i + 1, total, entry.path);
            let result = match extract::load(&root, &entry.path).await {
                Ok(markup) => extract::extract(&markup),
                Err(e) => Err(e),
            };
            let _ = tx
                .send(PageOutcome {
                    path: entry.path,
                    result,
                })
                .await;
        }));
    }

    // Drop our copy of tx so rx closes when all page tasks finish
    drop(tx);

    while let Some(outcome) = rx.recv().await {
        record_outcome(job, store.as_mut(), outcome, &mut report);
        pb.inc(1);
    }

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Page task failed: {}", e);
            report.failed += 1;
            pb.inc(1);
        }
    }
    pb.finish_and_clear();

    if let Some(store) = store.as_mut() {
        info!("Removing stale pages");
        match index::sweep(store, &job.hostname, job.watermark) {
            Ok(removed) => {
                info!("Removed {} stale page(s) for {}", removed, job.hostname);
                report.swept = Some(removed);
            }
            Err(e) => {
                warn!(
                    "Failed to remove stale pages, they will remain until the next run: {}",
                    e
                );
                report.sweep_failed = true;
            }
        }
    }

    report.elapsed = t0.elapsed();
    info!(
        "Indexed {} of {} pages ({} empty, {} failed) in {:.1}s",
        report.indexed,
        report.discovered,
        report.skipped_empty,
        report.failed,
        report.elapsed.as_secs_f64()
    );
    Ok(report)
}

fn record_outcome<S: IndexStore>(
    job: &Job,
    store: Option<&mut S>,
    outcome: PageOutcome,
    report: &mut JobReport,
) {
    let PageOutcome { path, result } = outcome;
    let document = match result {
        Ok(document) => document,
        Err(e) => {
            warn!("Skipping page \"{}\": {}", path, e);
            report.failed += 1;
            return;
        }
    };
    report.extracted += 1;

    let Some(store) = store else {
        if document.content.is_empty() {
            report.skipped_empty += 1;
        }
        return;
    };

    match index::mark(store, &job.hostname, &path, job.watermark, document) {
        Ok(MarkOutcome::Indexed) => report.indexed += 1,
        Ok(MarkOutcome::SkippedEmpty) => report.skipped_empty += 1,
        Err(e) => {
            warn!("Failed to index \"{}\": {}", path, e);
            report.failed += 1;
        }
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}
