use crate::retry::RetryPolicy;
use std::str::FromStr;
use tokio::time::Duration;

pub const MAX_SCHEDULER_WORKERS: usize = 15;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_workers: usize,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    /// A PROCESSING task started longer ago than this, and not running in
    /// this process, is failed by the stall sweep.
    pub stale_after: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub download_workers: usize,
    pub retry: RetryPolicy,
    pub reauth_budget: u32,
    pub drive_folder_id: Option<String>,
}

/// Everything read from the environment at start-up.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub body_limit: usize,
    pub max_label_urls: usize,
    pub idempotency_ttl_secs: u64,
    pub redis_url: Option<String>,
    pub scheduler: SchedulerConfig,
    pub pipeline: PipelineConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let max_workers = positive(parse("SCHEDULER_MAX_WORKERS"), 5).min(MAX_SCHEDULER_WORKERS);

        Self {
            port: number(parse("PORT"), 8000),
            body_limit: positive(parse("REQUEST_MAX_BYTES"), 256 * 1024),
            max_label_urls: positive(parse("MAX_LABEL_URLS"), 200),
            idempotency_ttl_secs: positive(parse("IDEMPOTENCY_TTL_SECS"), 3600),
            redis_url: parse("REDIS_URL"),
            scheduler: SchedulerConfig {
                max_workers,
                poll_interval: Duration::from_secs(positive(parse("SCHEDULER_POLL_SECS"), 3)),
                error_backoff: Duration::from_secs(positive(
                    parse("SCHEDULER_ERROR_BACKOFF_SECS"),
                    10,
                )),
                stale_after: Duration::from_secs(positive(
                    parse("SCHEDULER_STALE_AFTER_SECS"),
                    1800,
                )),
            },
            pipeline: PipelineConfig {
                download_workers: positive(parse("DOWNLOAD_WORKERS"), 10),
                retry: RetryPolicy::new(
                    3,
                    Duration::from_millis(number(parse("RETRY_BASE_DELAY_MS"), 1000)),
                ),
                reauth_budget: number(parse("DRIVE_REAUTH_BUDGET"), 1),
                drive_folder_id: parse("GOOGLE_DRIVE_FOLDER_ID"),
            },
        }
    }
}

fn number<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

fn positive<T: FromStr + PartialOrd + Default>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.parse::<T>().ok())
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}
