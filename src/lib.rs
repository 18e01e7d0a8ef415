//! Post-build indexer for static documentation sites.
//!
//! Pages listed in the build's sitemap are extracted and upserted into a
//! SQLite index stamped with the job's watermark; records of the same
//! hostname that the job did not refresh are swept afterwards.

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod index;
pub mod job;
pub mod sitemap;

pub use config::{JobConfig, Settings};
pub use error::{ConfigError, JobError, PageError, SitemapError, StoreError};
pub use extract::PageDocument;
pub use index::{IndexRecord, IndexStore, RecordKey, Watermark};
pub use job::{run, run_with, Job, JobReport};
