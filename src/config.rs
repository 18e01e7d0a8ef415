use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::sync::Semaphore;
use url::Url;

use crate::db::DEFAULT_DB_PATH;
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "site_indexer";
pub const ENV_PREFIX: &str = "SITE_INDEXER";
pub const DEFAULT_BUILD_ROOT: &str = "build";
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Raw settings as read from the config file, the environment and the CLI.
/// Every field is optional here; `resolve` fills in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub build_root: Option<PathBuf>,
    pub sitemap: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub hostname: Option<String>,
    /// URL of the deploy being built.
    pub deploy_url: Option<String>,
    /// Primary URL of the deploy; its host becomes the hostname.
    pub deploy_prime_url: Option<String>,
    /// Deploy URL that identifies a local/preview build. A matching
    /// `deploy_url` turns the job into a dry run.
    pub preview_deploy_url: Option<String>,
    pub dry_run: bool,
    pub concurrency: Option<usize>,
}

/// Fully resolved job configuration. Computed once by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    pub build_root: PathBuf,
    pub sitemap_path: PathBuf,
    pub database: PathBuf,
    pub hostname: String,
    pub dry_run: bool,
    pub concurrency: usize,
}

impl Settings {
    /// Load `site_indexer.toml` (or `file`) and `SITE_INDEXER_*` variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = config::Config::builder();
        let builder = match file {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Values set in `other` win; `dry_run` is sticky once requested.
    pub fn overlay(self, other: Settings) -> Settings {
        Settings {
            build_root: other.build_root.or(self.build_root),
            sitemap: other.sitemap.or(self.sitemap),
            database: other.database.or(self.database),
            hostname: other.hostname.or(self.hostname),
            deploy_url: other.deploy_url.or(self.deploy_url),
            deploy_prime_url: other.deploy_prime_url.or(self.deploy_prime_url),
            preview_deploy_url: other.preview_deploy_url.or(self.preview_deploy_url),
            dry_run: self.dry_run || other.dry_run,
            concurrency: other.concurrency.or(self.concurrency),
        }
    }

    pub fn resolve(self) -> Result<JobConfig, ConfigError> {
        let dry_run = self.dry_run || self.is_preview_deploy();
        let hostname = self.resolve_hostname()?;

        let concurrency = self.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 || concurrency > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidConcurrency);
        }

        let build_root = self
            .build_root
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_ROOT));
        let sitemap_path = self
            .sitemap
            .unwrap_or_else(|| build_root.join("sitemap.xml"));

        Ok(JobConfig {
            build_root,
            sitemap_path,
            database: self
                .database
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            hostname,
            dry_run,
            concurrency,
        })
    }

    fn is_preview_deploy(&self) -> bool {
        match (&self.deploy_url, &self.preview_deploy_url) {
            (Some(deploy), Some(preview)) => {
                deploy.trim_end_matches('/') == preview.trim_end_matches('/')
            }
            _ => false,
        }
    }

    fn resolve_hostname(&self) -> Result<String, ConfigError> {
        if let Some(hostname) = self.hostname.as_deref().map(str::trim) {
            if !hostname.is_empty() {
                return Ok(hostname.to_ascii_lowercase());
            }
        }
        let deploy = self
            .deploy_prime_url
            .as_deref()
            .or(self.deploy_url.as_deref())
            .ok_or(ConfigError::MissingHostname)?;
        Url::parse(deploy)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .ok_or_else(|| ConfigError::InvalidDeployUrl(deploy.to_string()))
    }
}
