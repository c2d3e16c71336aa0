use serde::Deserialize;

/// Main configuration structure for Stashy
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub frontier: FrontierConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub storage: StorageConfig,
    #[serde(default, rename = "seed")]
    pub seeds: Vec<SeedEntry>,
}

/// Queue policy configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueConfig {
    /// Maximum number of items a worker claims at once
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retry budget stamped on newly inserted items
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Age after which an in-progress claim is considered abandoned
    #[serde(default = "default_lease_expiry_secs")]
    pub lease_expiry_secs: u64,

    /// Base retry delay in seconds (0 retries immediately)
    #[serde(default)]
    pub retry_backoff_secs: u64,

    /// Maximum stored length of an item's last error
    #[serde(default = "default_error_max_len")]
    pub error_max_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            lease_expiry_secs: default_lease_expiry_secs(),
            retry_backoff_secs: 0,
            error_max_len: default_error_max_len(),
        }
    }
}

/// Worker runtime configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerConfig {
    /// Base worker identity; defaults to `worker-<pid>`
    #[serde(default)]
    pub worker_id: Option<String>,

    /// Number of workers run by this process
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Delay between claims when the queue is empty (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Processed items between metrics observations
    #[serde(default = "default_metrics_flush_every")]
    pub metrics_flush_every: u64,
}

impl WorkerConfig {
    /// The configured worker id, or one derived from the process id
    pub fn resolved_worker_id(&self) -> String {
        match &self.worker_id {
            Some(id) => id.clone(),
            None => format!("worker-{}", std::process::id()),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            metrics_flush_every: default_metrics_flush_every(),
        }
    }
}

/// Frontier expansion configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FrontierConfig {
    /// Pages at this depth or deeper do not contribute new links
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum number of candidate links taken from one page
    #[serde(default = "default_max_links")]
    pub max_links: usize,

    /// Candidates scoring below this are not merged
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_links: default_max_links(),
            relevance_threshold: default_relevance_threshold(),
        }
    }
}

/// Keyword lists for the relevance heuristic
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScoringConfig {
    #[serde(default)]
    pub topic_terms: Option<Vec<String>>,

    #[serde(default)]
    pub noise_terms: Option<Vec<String>>,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserAgentConfig {
    /// Name of the crawler
    pub crawler_name: String,

    /// Version of the crawler
    pub crawler_version: String,

    /// URL with information about the crawler
    pub contact_url: String,

    /// Email address for crawler-related contact
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the `User-Agent` header value
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Path to the SQLite database file
    pub database_path: String,
}

/// Seed URL entry
#[derive(Debug, Clone, Deserialize)]
pub struct SeedEntry {
    pub url: String,

    #[serde(default)]
    pub priority: i64,
}

fn default_batch_size() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_lease_expiry_secs() -> u64 {
    600
}

fn default_error_max_len() -> usize {
    4096
}

fn default_concurrency() -> u32 {
    4
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_metrics_flush_every() -> u64 {
    15
}

fn default_max_depth() -> u32 {
    2
}

fn default_max_links() -> usize {
    16
}

fn default_relevance_threshold() -> f64 {
    0.28
}
