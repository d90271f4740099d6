use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use ipnet::IpNet;
use thiserror::Error;

use crate::queue::DEFAULT_TOPIC;
use crate::status::STATUS_TTL;
use crate::worker::RetryPolicy;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(String),

    #[error("Invalid {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub max_body_size: usize,
    pub trusted_proxies: Vec<IpNet>,
    /// Networks allowed to submit. Empty allows everyone.
    pub allowed_networks: Vec<IpNet>,
    pub log_level: String,
    /// JSON-lines record of every accepted submission. `None` disables it.
    pub audit_log: Option<PathBuf>,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub status_ttl: Duration,
    pub status_purge_interval: Duration,
    pub sink: SinkConfig,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub topic: String,
    /// How long a dequeued, unacknowledged entry stays invisible to other consumers.
    pub lease: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub count: usize,
    pub retry: RetryPolicy,
    pub attempt_timeout: Duration,
}

impl WorkerConfig {
    /// Longest a single entry can stay in delivery: every attempt timing out
    /// plus every wait between attempts.
    pub fn max_delivery_time(&self) -> Duration {
        self.attempt_timeout
            .saturating_mul(self.retry.max_attempts())
            .saturating_add(self.retry.delay.saturating_mul(self.retry.max_retries))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkConfig {
    Sheets {
        spreadsheet_id: String,
        sheet_name: String,
        access_token: String,
        api_base: String,
    },
    Webhook {
        url: String,
        bearer: Option<String>,
    },
    File {
        path: PathBuf,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let database_url = vars.required("DATABASE_URL")?;
        let host: IpAddr = vars.parsed("FORMRELAY_HOST", "::")?;
        let port: u16 = vars.parsed("FORMRELAY_PORT", "8081")?;
        let max_body_size: usize = vars.parsed("FORMRELAY_MAX_BODY_SIZE", "1048576")?;
        let trusted_proxies = vars.networks("FORMRELAY_TRUSTED_PROXIES")?;
        let allowed_networks = vars.networks("FORMRELAY_ALLOWED_NETWORKS")?;
        let log_level = vars.or("FORMRELAY_LOG_LEVEL", "info");
        let audit_log = Some(vars.or("FORMRELAY_AUDIT_LOG", "logs/form_submissions.log"))
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let queue = QueueConfig {
            topic: vars.or("FORMRELAY_QUEUE_TOPIC", DEFAULT_TOPIC),
            lease: Duration::from_secs(vars.parsed("FORMRELAY_QUEUE_LEASE_SECS", "600")?),
        };

        let count: usize = vars.parsed("FORMRELAY_WORKER_COUNT", "1")?;
        if count == 0 {
            return Err(ConfigError::Invalid {
                key: "FORMRELAY_WORKER_COUNT".into(),
                reason: "must be at least 1".into(),
            });
        }

        let defaults = RetryPolicy::default();
        let worker = WorkerConfig {
            count,
            retry: RetryPolicy {
                max_retries: vars.parsed(
                    "FORMRELAY_MAX_RETRIES",
                    &defaults.max_retries.to_string(),
                )?,
                delay: Duration::from_millis(vars.parsed(
                    "FORMRELAY_RETRY_DELAY_MS",
                    &defaults.delay.as_millis().to_string(),
                )?),
            },
            attempt_timeout: Duration::from_secs(
                vars.parsed("FORMRELAY_ATTEMPT_TIMEOUT_SECS", "30")?,
            ),
        };

        // The lease must outlive any delivery, or a second worker would claim
        // the entry while the first is still delivering it.
        let max_delivery = worker.max_delivery_time();
        if queue.lease <= max_delivery {
            return Err(ConfigError::Invalid {
                key: "FORMRELAY_QUEUE_LEASE_SECS".into(),
                reason: format!(
                    "lease of {}s must exceed the longest delivery ({}s)",
                    queue.lease.as_secs(),
                    max_delivery.as_secs_f64().ceil() as u64
                ),
            });
        }

        let status_ttl = Duration::from_secs(vars.parsed(
            "FORMRELAY_STATUS_TTL_SECS",
            &STATUS_TTL.as_secs().to_string(),
        )?);
        let status_purge_interval =
            Duration::from_secs(vars.parsed("FORMRELAY_STATUS_PURGE_SECS", "300")?);

        let sink = match vars.or("FORMRELAY_SINK", "sheets").as_str() {
            "sheets" => SinkConfig::Sheets {
                spreadsheet_id: vars.required("FORMRELAY_SHEETS_SPREADSHEET_ID")?,
                sheet_name: vars.or("FORMRELAY_SHEETS_SHEET_NAME", "Sheet1"),
                access_token: vars.required("FORMRELAY_SHEETS_ACCESS_TOKEN")?,
                api_base: vars.or("FORMRELAY_SHEETS_API_BASE", "https://sheets.googleapis.com"),
            },
            "webhook" => SinkConfig::Webhook {
                url: vars.required("FORMRELAY_WEBHOOK_URL")?,
                bearer: lookup("FORMRELAY_WEBHOOK_BEARER").filter(|s| !s.is_empty()),
            },
            "file" => SinkConfig::File {
                path: PathBuf::from(vars.or("FORMRELAY_FILE_PATH", "logs/delivered_submissions.log")),
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "FORMRELAY_SINK".into(),
                    reason: format!("unknown sink '{other}' (expected sheets, webhook or file)"),
                });
            }
        };

        Ok(Config {
            database_url,
            host,
            port,
            max_body_size,
            trusted_proxies,
            allowed_networks,
            log_level,
            audit_log,
            queue,
            worker,
            status_ttl,
            status_purge_interval,
            sink,
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        (self.0)(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    fn or(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &str, default: &str) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.or(key, default)
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    fn networks(&self, key: &str) -> Result<Vec<IpNet>, ConfigError> {
        self.or(key, "")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim().parse().map_err(|e| ConfigError::Invalid {
                    key: key.to_string(),
                    reason: format!("entry '{s}': {e}"),
                })
            })
            .collect()
    }
}
