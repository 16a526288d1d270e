//! Ingest server configuration

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Ingest server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Work queue URL (normalized snapshot messages)
    pub queue_url: String,
    /// Dead-letter queue URL; when unset, dead letters only go to the DB
    pub dlq_url: Option<String>,
    /// Endpoint override for SQS/S3 (LocalStack); unset in real AWS
    pub aws_endpoint_url: Option<String>,
    /// Messages per receive call (SQS allows 1..=10)
    pub max_messages: i32,
    /// Long-poll wait per receive call (SQS allows 0..=20 seconds)
    pub wait_time_seconds: i32,
    /// Seconds a received message stays hidden from other workers
    /// (SQS allows 0..=43200)
    pub visibility_timeout: i32,
    /// Parallel poll loops
    pub worker_count: usize,
    /// Extra processing attempts before a message is dead-lettered
    pub retry_budget: u32,
    /// Leave the message on the queue on storage errors instead of
    /// dead-lettering it (redelivered after the visibility timeout)
    pub requeue_on_storage_error: bool,
    /// Seconds between expired-promo sweeps
    pub promo_sweep_interval_secs: u64,
    /// Receive/fetch retry attempts before giving up
    pub backoff_max_attempts: u32,
    /// Base delay for the first retry, in milliseconds
    pub backoff_base_ms: u64,
    /// Delay cap, in milliseconds
    pub backoff_cap_ms: u64,
}

fn int_env<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, BoxError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?,
            queue_url: std::env::var("SQS_QUEUE_URL").map_err(|_| "SQS_QUEUE_URL must be set")?,
            dlq_url: std::env::var("DLQ_URL").ok().filter(|s| !s.is_empty()),
            aws_endpoint_url: std::env::var("AWS_ENDPOINT_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            max_messages: int_env("SQS_MAX_MESSAGES", 10).clamp(1, 10),
            wait_time_seconds: int_env("SQS_WAIT_TIME_SECONDS", 10).clamp(0, 20),
            visibility_timeout: int_env("SQS_VISIBILITY_TIMEOUT", 60).clamp(0, 43_200),
            worker_count: int_env("WORKER_COUNT", 1usize).max(1),
            retry_budget: int_env("RETRY_BUDGET", 0),
            requeue_on_storage_error: bool_env("REQUEUE_ON_STORAGE_ERROR", false),
            promo_sweep_interval_secs: int_env("PROMO_SWEEP_INTERVAL_SECS", 300u64).max(1),
            backoff_max_attempts: int_env("BACKOFF_MAX_ATTEMPTS", 5u32).max(1),
            backoff_base_ms: int_env("BACKOFF_BASE_MS", 200),
            backoff_cap_ms: int_env("BACKOFF_CAP_MS", 10_000),
        })
    }
}
