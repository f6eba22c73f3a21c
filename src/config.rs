//! Configuration types.
//!
//! Everything is read from environment variables (a `.env` file is loaded
//! first by `main`). `from_lookup` takes an arbitrary key → value function so
//! tests never have to touch the process environment.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::source::SourceTimezone;

/// Deployment profile. Selects which source credentials are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Uat,
    Live,
}

impl Environment {
    /// Env var prefix for profile-specific settings.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Uat => "UAT",
            Self::Live => "LIVE",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UAT" => Ok(Self::Uat),
            "LIVE" => Ok(Self::Live),
            other => Err(ConfigError::InvalidValue {
                key: "ENVIRONMENT".into(),
                message: format!("expected UAT or LIVE, got {other:?}"),
            }),
        }
    }
}

/// Where raw interaction rows come from.
#[derive(Debug, Clone)]
pub enum SourceConfig {
    /// Local libSQL/SQLite file.
    Local { path: PathBuf },
    /// Remote libSQL endpoint.
    Remote { url: String, auth_token: SecretString },
}

/// Remote collaborator endpoints.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL for the user directory and delivery APIs.
    pub base_url: String,
    pub classifier_url: String,
    pub generator_url: String,
    /// Username sent to the token endpoints.
    pub token_username: SecretString,
    pub timeout: Duration,
    /// Push each artifact to the delivery API after writing it.
    pub delivery_enabled: bool,
}

/// Full runtime configuration.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub environment: Environment,
    pub source: SourceConfig,
    /// Windowed SELECT with `?1` = window start, `?2` = window end.
    pub source_query: Option<String>,
    /// Zone the source writes naive timestamps in.
    pub source_timezone: SourceTimezone,
    pub queue_file: PathBuf,
    pub ledger_file: PathBuf,
    pub cursor_file: PathBuf,
    pub dead_letter_file: PathBuf,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    pub poll_interval: Duration,
    pub pull_lookback: Duration,
    pub max_concurrent_emails: usize,
    pub queue_check_interval: Duration,
    /// `None` means retry forever.
    pub max_attempts: Option<u32>,
    pub blocking_threads: usize,
    pub relevance_keywords: Vec<String>,
    pub services: ServiceConfig,
    pub api_port: u16,
}

impl IntakeConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from a key lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match get("ENVIRONMENT") {
            Some(v) => v.parse()?,
            None => Environment::Uat,
        };

        let prefix = environment.prefix();
        let source = match get(&format!("{prefix}_SOURCE_URL")) {
            Some(url) => SourceConfig::Remote {
                url,
                auth_token: SecretString::from(
                    get(&format!("{prefix}_SOURCE_TOKEN")).unwrap_or_default(),
                ),
            },
            None => SourceConfig::Local {
                path: get("SOURCE_DB_PATH")
                    .unwrap_or_else(|| "./data/interactions.db".to_string())
                    .into(),
            },
        };

        let base_url = get("BASE_URL")
            .unwrap_or_else(|| "http://localhost:8000".to_string())
            .trim_end_matches('/')
            .to_string();

        let services = ServiceConfig {
            classifier_url: get("CLASSIFIER_URL")
                .unwrap_or_else(|| format!("{base_url}/classifier/api/classify")),
            generator_url: get("GENERATOR_URL")
                .unwrap_or_else(|| format!("{base_url}/generator/api/generate")),
            token_username: SecretString::from(
                get("SERVICE_TOKEN_USERNAME").unwrap_or_else(|| "TOKEN".to_string()),
            ),
            timeout: Duration::from_secs(parse_or(&get, "SERVICE_TIMEOUT_SECS", 60u64)?),
            delivery_enabled: parse_bool(&get, "DELIVERY_ENABLED")?,
            base_url,
        };

        let max_concurrent_emails: usize = parse_or(&get, "MAX_CONCURRENT_EMAILS", 5)?;
        if max_concurrent_emails == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_CONCURRENT_EMAILS".into(),
                message: "must be at least 1".into(),
            });
        }

        let max_attempts = match parse_or(&get, "MAX_ATTEMPTS", 20u32)? {
            0 => None,
            n => Some(n),
        };

        let relevance_keywords: Vec<String> = get("RELEVANCE_KEYWORDS")
            .unwrap_or_else(|| "close,closure".to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            environment,
            source,
            source_query: get("SOURCE_QUERY"),
            source_timezone: match get("SOURCE_TIMEZONE") {
                Some(v) => v.parse()?,
                None => SourceTimezone::Local,
            },
            queue_file: path_or(&get, "QUEUE_FILE", "email_queue.json"),
            ledger_file: path_or(&get, "PROCESSED_EMAILS_FILE", "processed_emails.json"),
            cursor_file: path_or(&get, "LAST_PULL_TIME_FILE", "last_pull_time.json"),
            dead_letter_file: path_or(&get, "DEAD_LETTER_FILE", "dead_letter_queue.json"),
            output_dir: path_or(&get, "OUTPUT_DIR", "processed_output"),
            log_dir: path_or(&get, "LOG_DIR", "logs"),
            poll_interval: Duration::from_secs(60 * parse_or(&get, "POLL_INTERVAL_MINUTES", 1u64)?),
            pull_lookback: Duration::from_secs(60 * parse_or(&get, "PULL_LOOKBACK_MINUTES", 30u64)?),
            max_concurrent_emails,
            queue_check_interval: Duration::from_secs(parse_or(
                &get,
                "QUEUE_CHECK_INTERVAL_SECONDS",
                10u64,
            )?),
            max_attempts,
            blocking_threads: parse_or(&get, "BLOCKING_THREADS", 10usize)?.max(1),
            relevance_keywords,
            services,
            api_port: parse_or(&get, "API_PORT", 8080u16)?,
        })
    }
}

fn path_or<G>(get: &G, key: &str, default: &str) -> PathBuf
where
    G: Fn(&str) -> Option<String>,
{
    get(key).unwrap_or_else(|| default.to_string()).into()
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &str) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got {v:?}"),
            }),
        },
    }
}
