use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the thumbnail service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// API configuration
    pub api: ApiConfig,
    /// File storage configuration
    pub file_store: FileStoreConfig,
    /// Redis metadata store configuration
    pub redis: RedisConfig,
    /// Kafka job queue configuration
    pub kafka: KafkaConfig,
    /// Per-collaborator call timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Largest accepted request body for uploads
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Which backend holds uploaded images and thumbnails
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileStoreBackend {
    #[default]
    Local,
    S3,
}

/// File storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FileStoreConfig {
    #[serde(default)]
    pub backend: FileStoreBackend,
    /// Directory uploads are moved into (local backend)
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    /// Bucket settings (s3 backend)
    pub s3: Option<S3Config>,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for image storage
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Key prefix for uploaded originals
    #[serde(default = "default_s3_prefix")]
    pub prefix: String,
}

/// Redis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Key holding the last allocated image id
    #[serde(default = "default_index_key")]
    pub index_key: String,
}

/// Kafka producer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Topic thumbnail jobs are published to
    #[serde(default = "default_job_topic")]
    pub topic: String,
    /// Partitions used when the topic has to be created
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    /// Replication factor used when the topic has to be created
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,
    /// Local delivery timeout in milliseconds
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    /// Required acknowledgments: 0, 1, or all
    #[serde(default = "default_acks")]
    pub acks: String,
    /// Enable SSL
    #[serde(default)]
    pub ssl_enabled: bool,
    /// SSL CA certificate path
    pub ssl_ca_location: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
}

/// Upper bounds on each external call made while handling a request
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_call_timeout_ms")]
    pub file_store_ms: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub metadata_store_ms: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub job_queue_ms: u64,
}

// Default value functions
fn default_service_name() -> String {
    "thumbnail-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_upload_dir() -> String {
    "img/uploaded/".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_s3_prefix() -> String {
    "uploaded".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_index_key() -> String {
    "imageIndex".to_string()
}

fn default_job_topic() -> String {
    "thumbnail.jobs".to_string()
}

fn default_partitions() -> i32 {
    1
}

fn default_replication_factor() -> i32 {
    1
}

fn default_message_timeout_ms() -> u64 {
    5000
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_call_timeout_ms() -> u64 {
    5000
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "thumbnail-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .set_default("api.port", 8080)?
            .set_default("file_store.backend", "local")?
            .set_default("redis.url", default_redis_url())?
            .set_default("kafka.bootstrap_servers", "localhost:9092")?
            // Add config file if present
            .add_source(
                config::File::with_name("config/thumbnail")
                    .required(false)
            )
            .add_source(
                config::File::with_name("/etc/nier/thumbnail")
                    .required(false)
            )
            // Override with environment variables
            // THUMBNAIL__REDIS__URL -> redis.url
            .add_source(
                config::Environment::with_prefix("THUMBNAIL")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations serde cannot catch on its own
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.file_store.backend == FileStoreBackend::S3 && self.file_store.s3.is_none() {
            anyhow::bail!("file_store.backend is s3 but no file_store.s3 block is configured");
        }
        if self.api.max_upload_bytes == 0 {
            anyhow::bail!("api.max_upload_bytes must be greater than zero");
        }
        Ok(())
    }
}

impl TimeoutConfig {
    pub fn file_store(&self) -> Duration {
        Duration::from_millis(self.file_store_ms)
    }

    pub fn metadata_store(&self) -> Duration {
        Duration::from_millis(self.metadata_store_ms)
    }

    pub fn job_queue(&self) -> Duration {
        Duration::from_millis(self.job_queue_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            file_store_ms: default_call_timeout_ms(),
            metadata_store_ms: default_call_timeout_ms(),
            job_queue_ms: default_call_timeout_ms(),
        }
    }
}
