// src/config.rs
//! Process configuration, read once from the environment at startup.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const ENV_USERNAME: &str = "USERNAME_INTEGRATION";
pub const ENV_PASSWORD: &str = "PASSWORD_INTEGRATION";
pub const ENV_REGION: &str = "INSTANCE_REGION";
pub const ENV_INTERVAL: &str = "INTERVAL";
pub const ENV_CHECKPOINT_PATH: &str = "LAST_TIME_FILE";
pub const ENV_OUTPUT_PATH: &str = "OUTPUT_FILE";
pub const ENV_HTTP_TIMEOUT: &str = "HTTP_TIMEOUT_SECS";
pub const ENV_HTTP_CONNECT_TIMEOUT: &str = "HTTP_CONNECT_TIMEOUT_SECS";
pub const ENV_IAM_URL: &str = "ESET_IAM_URL";
pub const ENV_API_BASE: &str = "ESET_API_BASE";
pub const ENV_PAGE_SIZE: &str = "DETECTIONS_PAGE_SIZE";

pub const DEFAULT_INTERVAL_MINUTES: u64 = 3;
pub const DEFAULT_CHECKPOINT_PATH: &str = "/opt/eset_integration/last_detection_time.yml";
pub const DEFAULT_OUTPUT_PATH: &str = "/var/log/eset_integration.log";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Checkpoint key of the single data source this integration owns.
pub const DATA_SOURCE: &str = "EP";

/// API credentials. `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Immutable settings handed to every component.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub credentials: Credentials,
    pub region: String,
    pub iam_url: String,
    pub api_base: String,
    pub interval: Duration,
    pub checkpoint_path: PathBuf,
    pub output_path: PathBuf,
    pub source_key: String,
    pub http_timeout: Duration,
    pub http_connect_timeout: Duration,
    pub page_size: Option<u32>,
}

impl PollerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup (env, a map in tests, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let username = get(ENV_USERNAME).ok_or(ConfigError::Missing(ENV_USERNAME))?;
        let password = get(ENV_PASSWORD).ok_or(ConfigError::Missing(ENV_PASSWORD))?;
        let region = get(ENV_REGION)
            .ok_or(ConfigError::Missing(ENV_REGION))?
            .to_ascii_lowercase();

        let interval_min = parse_u64(ENV_INTERVAL, get(ENV_INTERVAL), DEFAULT_INTERVAL_MINUTES)?;
        if interval_min == 0 {
            return Err(ConfigError::Invalid {
                var: ENV_INTERVAL,
                value: "0".into(),
                reason: "interval must be at least one minute".into(),
            });
        }
        let http_timeout = parse_u64(
            ENV_HTTP_TIMEOUT,
            get(ENV_HTTP_TIMEOUT),
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?;
        let http_connect_timeout = parse_u64(
            ENV_HTTP_CONNECT_TIMEOUT,
            get(ENV_HTTP_CONNECT_TIMEOUT),
            DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
        )?;
        let page_size = match get(ENV_PAGE_SIZE) {
            Some(v) => Some(v.parse::<u32>().map_err(|e| ConfigError::Invalid {
                var: ENV_PAGE_SIZE,
                value: v.clone(),
                reason: e.to_string(),
            })?),
            None => None,
        };

        let iam_url = get(ENV_IAM_URL).unwrap_or_else(|| iam_url_for(&region));
        let api_base = get(ENV_API_BASE)
            .unwrap_or_else(|| api_base_for(&region))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            credentials: Credentials { username, password },
            region,
            iam_url,
            api_base,
            interval: Duration::from_secs(interval_min * 60),
            checkpoint_path: get(ENV_CHECKPOINT_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_PATH)),
            output_path: get(ENV_OUTPUT_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH)),
            source_key: DATA_SOURCE.to_string(),
            http_timeout: Duration::from_secs(http_timeout),
            http_connect_timeout: Duration::from_secs(http_connect_timeout),
            page_size,
        })
    }

    pub fn detections_url(&self) -> String {
        format!("{}/v1/detections", self.api_base)
    }
}

pub fn iam_url_for(region: &str) -> String {
    format!("https://{region}.business-account.iam.eset.systems/oauth/token")
}

pub fn api_base_for(region: &str) -> String {
    format!("https://{region}.incident-management.eset.systems")
}

fn parse_u64(var: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => v.parse::<u64>().map_err(|e| ConfigError::Invalid {
            var,
            value: v.clone(),
            reason: e.to_string(),
        }),
    }
}
