use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::allocator::CounterConfig;

// ---------------------------------------------------------------------------
// Environment variable names
// ---------------------------------------------------------------------------

pub const ENV_BUCKET_NAME: &str = "BUCKET_NAME";
pub const ENV_BUILD_NUMBER_KEY: &str = "BUILD_NUMBER_KEY";
pub const ENV_VERSION_PREFIX: &str = "VERSION_PREFIX";
pub const ENV_START_BUILD_NUMBER: &str = "START_BUILD_NUMBER";
pub const ENV_ALLOCATION_MODE: &str = "ALLOCATION_MODE";
pub const ENV_MAX_ALLOCATION_ATTEMPTS: &str = "MAX_ALLOCATION_ATTEMPTS";
pub const ENV_S3_USE_FIPS: &str = "S3_USE_FIPS";
pub const ENV_S3_FORCE_PATH_STYLE: &str = "S3_FORCE_PATH_STYLE";

// ---------------------------------------------------------------------------
// Allocation mode
// ---------------------------------------------------------------------------

/// How the counter object is updated.
///
/// `unguarded` is a plain read-then-overwrite; concurrent runs against the
/// same key can issue duplicate numbers.  `conditional` uses S3 conditional
/// writes and retries when another writer got there first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationMode {
    #[default]
    Unguarded,
    Conditional,
}

impl FromStr for AllocationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unguarded" => Ok(Self::Unguarded),
            "conditional" => Ok(Self::Conditional),
            other => anyhow::bail!("unknown allocation mode {other:?} (expected unguarded or conditional)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bucket holding the counter object.
    pub bucket: String,
    /// Key of the counter object.
    pub build_number_key: String,
    /// Prepended to the build number to form the version string.  May be
    /// empty.
    pub version_prefix: String,
    /// First number issued when the counter object does not exist yet.
    pub start_build_number: u64,
    /// Region override; the default AWS provider chain is used when unset.
    #[serde(default)]
    pub region: Option<String>,
    /// Use the FIPS endpoints for S3 operations.
    #[serde(default)]
    pub use_fips: bool,
    /// Address the bucket path-style (for S3-compatible stores).
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default)]
    pub allocation_mode: AllocationMode,
    /// Attempts per invocation in `conditional` mode.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    5
}

impl Config {
    pub fn counter(&self) -> CounterConfig {
        CounterConfig {
            bucket: self.bucket.clone(),
            key: self.build_number_key.clone(),
            version_prefix: self.version_prefix.clone(),
            start_build_number: self.start_build_number,
        }
    }
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Load and validate a [`Config`] from the process environment.
pub fn load_from_env() -> Result<Config> {
    from_lookup(|name| std::env::var(name).ok())
}

fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let required = |name: &str| {
        lookup(name).with_context(|| format!("environment variable {name} is not set"))
    };

    let start_build_number = required(ENV_START_BUILD_NUMBER)?;
    let start_build_number = start_build_number
        .trim()
        .parse::<u64>()
        .with_context(|| {
            format!("{ENV_START_BUILD_NUMBER}={start_build_number:?} is not a non-negative integer")
        })?;

    let allocation_mode = match lookup(ENV_ALLOCATION_MODE) {
        Some(mode) => mode
            .parse::<AllocationMode>()
            .with_context(|| format!("invalid {ENV_ALLOCATION_MODE}"))?,
        None => AllocationMode::default(),
    };

    let max_attempts = match lookup(ENV_MAX_ALLOCATION_ATTEMPTS) {
        Some(n) => n
            .trim()
            .parse::<u32>()
            .with_context(|| format!("{ENV_MAX_ALLOCATION_ATTEMPTS}={n:?} is not a positive integer"))?,
        None => default_max_attempts(),
    };

    let config = Config {
        bucket: required(ENV_BUCKET_NAME)?,
        build_number_key: required(ENV_BUILD_NUMBER_KEY)?,
        version_prefix: required(ENV_VERSION_PREFIX)?,
        start_build_number,
        region: None,
        use_fips: flag(&lookup, ENV_S3_USE_FIPS)?,
        force_path_style: flag(&lookup, ENV_S3_FORCE_PATH_STYLE)?,
        allocation_mode,
        max_attempts,
    };
    validate_config(&config)?;
    Ok(config)
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<bool> {
    match lookup(name) {
        Some(v) => v
            .trim()
            .to_ascii_lowercase()
            .parse::<bool>()
            .with_context(|| format!("{name}={v:?} is not true or false")),
        None => Ok(false),
    }
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(!config.bucket.is_empty(), "bucket must not be empty");
    anyhow::ensure!(
        !config.build_number_key.is_empty(),
        "build_number_key must not be empty"
    );
    anyhow::ensure!(config.max_attempts >= 1, "max_attempts must be at least 1");
    Ok(())
}
