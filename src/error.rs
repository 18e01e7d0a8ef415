use std::path::PathBuf;

use thiserror::Error;

/// The sitemap could not be turned into a list of pages.
#[derive(Debug, Error)]
pub enum SitemapError {
    #[error("malformed sitemap: {0}")]
    Malformed(String),
}

impl From<quick_xml::Error> for SitemapError {
    fn from(err: quick_xml::Error) -> Self {
        SitemapError::Malformed(err.to_string())
    }
}

/// A single page could not be extracted. Recovered per page, never fatal.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("failed to read page file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("page file {0:?} is not valid UTF-8")]
    Encoding(PathBuf),
    #[error("page has no <title> element")]
    MissingTitle,
    #[error("page path {0:?} escapes the build root")]
    UnsafePath(String),
}

/// A store call failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Conditions that abort a job before any page is processed.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to read sitemap {path:?}: {source}")]
    SitemapUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Sitemap(#[from] SitemapError),
    #[error("index store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("no hostname configured and no deploy URL to derive one from")]
    MissingHostname,
    #[error("deploy URL {0:?} is not a valid absolute URL")]
    InvalidDeployUrl(String),
    #[error("concurrency must be between 1 and {}", tokio::sync::Semaphore::MAX_PERMITS)]
    InvalidConcurrency,
}
