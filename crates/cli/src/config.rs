use std::path::{Path, PathBuf};
use std::time::Duration;

use cfwall_ranges::Endpoints;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing target bucket list (set TARGET_BUCKETS or --target-buckets)")]
    MissingBuckets,
    #[error("target bucket list contains an empty name: {0:?}")]
    EmptyBucketName(String),
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("read config {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Bucket list as written in a config file: a YAML list or a comma string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum BucketList {
    Many(Vec<String>),
    Joined(String),
}

impl BucketList {
    fn into_names(self) -> Result<Vec<String>, ConfigError> {
        match self {
            BucketList::Joined(s) => split_buckets(&s),
            BucketList::Many(v) => v.iter().map(|n| check_name(n, &v.join(","))).collect(),
        }
    }
}

/// Optional YAML config file. Command line flags and env vars win over it.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub target_buckets: Option<BucketList>,
    pub region: Option<String>,
    pub expected_owner: Option<String>,
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub dry_run: Option<bool>,
    pub endpoints: Option<Endpoints>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        serde_yaml::from_slice(&bytes).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }
}

fn check_name(name: &str, list: &str) -> Result<String, ConfigError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigError::EmptyBucketName(list.to_string()));
    }
    Ok(name.to_string())
}

/// Split a comma-delimited bucket list, e.g. `cdn.example.com,assets.example.com`.
pub fn split_buckets(list: &str) -> Result<Vec<String>, ConfigError> {
    if list.trim().is_empty() {
        return Err(ConfigError::MissingBuckets);
    }
    list.split(',').map(|n| check_name(n, list)).collect()
}

/// Values given on the command line or through the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub target_buckets: Option<String>,
    pub region: Option<String>,
    pub expected_owner: Option<String>,
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub dry_run: bool,
    pub ips_v4_url: Option<String>,
    pub ips_v6_url: Option<String>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub buckets: Vec<String>,
    pub region: String,
    pub expected_owner: Option<String>,
    pub concurrency: usize,
    pub timeout: Duration,
    pub dry_run: bool,
    pub endpoints: Endpoints,
}

impl Settings {
    pub fn resolve(overrides: Overrides, file: FileConfig) -> Result<Self, ConfigError> {
        let buckets = match (overrides.target_buckets, file.target_buckets) {
            (Some(list), _) => split_buckets(&list)?,
            (None, Some(list)) => list.into_names()?,
            (None, None) => return Err(ConfigError::MissingBuckets),
        };
        if buckets.is_empty() {
            return Err(ConfigError::MissingBuckets);
        }
        let concurrency = overrides.concurrency.or(file.concurrency).unwrap_or(1);
        if concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        let mut endpoints = file.endpoints.unwrap_or_default();
        if let Some(v4) = overrides.ips_v4_url { endpoints.v4 = v4; }
        if let Some(v6) = overrides.ips_v6_url { endpoints.v6 = v6; }

        Ok(Self {
            buckets,
            region: overrides.region.or(file.region).unwrap_or_else(|| DEFAULT_REGION.to_string()),
            expected_owner: overrides.expected_owner.or(file.expected_owner),
            concurrency,
            timeout: Duration::from_secs(overrides.timeout_secs.or(file.timeout_secs).unwrap_or(DEFAULT_TIMEOUT_SECS)),
            dry_run: overrides.dry_run || file.dry_run.unwrap_or(false),
            endpoints,
        })
    }
}
