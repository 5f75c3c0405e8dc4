use serde::Deserialize;

/// Main configuration for the receiver service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Upload API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Write target selection
    #[serde(default)]
    pub storage: StorageConfig,
    /// S3 configuration (required for the s3 backend)
    #[serde(default)]
    pub s3: Option<S3Config>,
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
    /// Log output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Expose Prometheus metrics
    #[serde(default)]
    pub metrics_enabled: bool,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Upload API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Route accepting uploads
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
    /// Multipart field carrying the file
    #[serde(default = "default_field_name")]
    pub field_name: String,
    /// Request body limit in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Which write target receives uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Filesystem,
    S3,
}

/// Write target configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Directory for the filesystem backend
    #[serde(default = "default_directory")]
    pub directory: String,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for uploaded images
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Prefix prepended to every object key
    #[serde(default)]
    pub key_prefix: String,
    /// Grant public read access on every stored object
    #[serde(default)]
    pub public_read: bool,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "camlink-receiver".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
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

fn default_upload_path() -> String {
    "/upload".to_string()
}

fn default_field_name() -> String {
    "file".to_string()
}

fn default_max_body_bytes() -> usize {
    32 * 1024 * 1024 // 32MB
}

fn default_true() -> bool {
    true
}

fn default_backend() -> StorageBackend {
    StorageBackend::Filesystem
}

fn default_directory() -> String {
    "uploads".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

/// Smallest part S3 accepts for all but the last part of a multipart upload
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "camlink-receiver")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/receiver").required(false))
            .add_source(config::File::with_name("/etc/camlink/receiver").required(false))
            // Override with environment variables
            // RECEIVER__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("RECEIVER")
                    .separator("__")
                    .try_parsing(true),
            )
            // Container platforms hand the listen port and bucket over plainly
            .set_override_option("api.port", std::env::var("PORT").ok())?
            .set_override_option("s3.bucket", std::env::var("STORAGE_BUCKET").ok())?
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !self.api.upload_path.starts_with('/') {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.upload_path".to_string(),
                message: "Path must start with /".to_string(),
            });
        }
        if self.api.upload_path == "/" || self.api.upload_path == "/health" {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.upload_path".to_string(),
                message: "Path is reserved".to_string(),
            });
        }
        if self.api.field_name.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "api.field_name".to_string(),
            ));
        }
        if self.api.max_body_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.max_body_bytes".to_string(),
                message: "Limit must be greater than 0".to_string(),
            });
        }

        match self.storage.backend {
            StorageBackend::Filesystem => {
                if self.storage.directory.is_empty() {
                    return Err(ConfigValidationError::MissingField(
                        "storage.directory".to_string(),
                    ));
                }
            }
            StorageBackend::S3 => {
                let s3 = self
                    .s3
                    .as_ref()
                    .ok_or_else(|| ConfigValidationError::MissingField("s3".to_string()))?;
                if s3.bucket.is_empty() {
                    return Err(ConfigValidationError::MissingField("s3.bucket".to_string()));
                }
                if s3.part_size_bytes < MIN_PART_SIZE {
                    return Err(ConfigValidationError::InvalidValue {
                        field: "s3.part_size_bytes".to_string(),
                        message: format!("Part size must be at least {} bytes", MIN_PART_SIZE),
                    });
                }
            }
        }

        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_enabled: false,
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            upload_path: default_upload_path(),
            field_name: default_field_name(),
            max_body_bytes: default_max_body_bytes(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            directory: default_directory(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
