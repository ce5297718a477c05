//! Configuration for the order queue and processor.
//!
//! Provides environment-based configuration with validation and secrets management.
//!
//! # Environment variables
//!
//! | variable | meaning |
//! |---|---|
//! | `CONFIG_ENV` | `development` (default), `staging` or `production` |
//! | `ORDER_QUEUE_BACKEND` | `memory`, `file` or `servicebus` |
//! | `ORDER_QUEUE_PATH` | root directory of the file queue |
//! | `SERVICEBUS_CONNECTION_STRING` | Service Bus connection string (secret) |
//! | `SERVICEBUS_QUEUE_NAME` | queue name, default `product-catalog-orders` |
//! | `SERVICEBUS_DEAD_LETTER_QUEUE` | side queue for dead letters, default `<queue>-deadletter` |
//! | `ORDER_RECEIVE_TIMEOUT_MS` | processor receive timeout |
//! | `ORDER_MAX_DELIVERY_COUNT` | redelivery cap, `0` disables it |
//! | `LOG_LEVEL` | `trace`, `debug`, `info`, `warn` or `error` |
//! | `METRICS_PORT` | enables the Prometheus listener on this port |
//!
//! # Example
//!
//! ```no_run
//! use order_queue_runtime::config::{OrderQueueConfig, Environment};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variable CONFIG_ENV (defaults to dev)
//! let config = OrderQueueConfig::from_env()?;
//!
//! // Or load explicitly
//! let config = OrderQueueConfig::load(Environment::Production)?;
//!
//! println!("Backend: {}", config.queue.backend);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default queue name shared by producer and consumer.
pub const DEFAULT_QUEUE_NAME: &str = "product-catalog-orders";

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable not set
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),
    /// Invalid environment value
    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development environment (local)
    Development,
    /// Staging environment (pre-production)
    Staging,
    /// Production environment
    Production,
}

impl Environment {
    /// Check if this is production environment
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if this is development environment
    #[must_use]
    pub const fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidEnvironment(s.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Which backing queue technology to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ephemeral in-process queue
    Memory,
    /// Durable file-backed queue
    File,
    /// Azure Service Bus
    ServiceBus,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "servicebus" | "service-bus" | "azure" => Ok(Self::ServiceBus),
            _ => Err(ConfigError::ParseError(format!("unknown queue backend: {s}"))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::File => write!(f, "file"),
            Self::ServiceBus => write!(f, "servicebus"),
        }
    }
}

/// File queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileQueueConfig {
    /// Root directory holding the queue
    pub path: Option<PathBuf>,
    /// How long a received message stays invisible before it is redelivered
    pub lock_duration_secs: u64,
    /// Poll interval while waiting for a message
    pub poll_interval_ms: u64,
}

impl FileQueueConfig {
    /// Lock duration as Duration
    #[must_use]
    pub const fn lock_duration(&self) -> Duration {
        Duration::from_secs(self.lock_duration_secs)
    }

    /// Poll interval as Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for FileQueueConfig {
    fn default() -> Self {
        Self {
            path: None,
            lock_duration_secs: 60,
            poll_interval_ms: 200,
        }
    }
}

/// Service Bus configuration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBusConfig {
    /// Connection string (from environment variable for security)
    #[serde(skip)]
    pub connection_string: Option<String>,
    /// Queue name
    pub queue_name: String,
    /// Side queue receiving dead-lettered messages, default `{queue_name}-deadletter`
    pub dead_letter_queue: Option<String>,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
}

impl fmt::Debug for ServiceBusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBusConfig")
            .field("connection_string", &self.connection_string.as_ref().map(|_| "<redacted>"))
            .field("queue_name", &self.queue_name)
            .field("dead_letter_queue", &self.dead_letter_queue)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ServiceBusConfig {
    /// Request timeout as Duration
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServiceBusConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            dead_letter_queue: None,
            request_timeout_secs: 90,
        }
    }
}

/// Queue backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Selected backend
    pub backend: BackendKind,
    /// File backend settings
    pub file: FileQueueConfig,
    /// Service Bus settings
    pub service_bus: ServiceBusConfig,
}

impl QueueConfig {
    /// Validate queue configuration
    ///
    /// # Errors
    ///
    /// Returns error if the selected backend lacks its target
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            BackendKind::Memory => {}
            BackendKind::File => {
                if self.file.path.is_none() {
                    return Err(ConfigError::EnvVarNotSet("ORDER_QUEUE_PATH".to_string()));
                }
                if self.file.lock_duration_secs == 0 {
                    return Err(ConfigError::ValidationError(
                        "file lock_duration_secs must be > 0".to_string(),
                    ));
                }
                if self.file.poll_interval_ms == 0 {
                    return Err(ConfigError::ValidationError(
                        "file poll_interval_ms must be > 0".to_string(),
                    ));
                }
            }
            BackendKind::ServiceBus => {
                if self.service_bus.connection_string.as_deref().is_none_or(str::is_empty) {
                    return Err(ConfigError::EnvVarNotSet(
                        "SERVICEBUS_CONNECTION_STRING".to_string(),
                    ));
                }
                if self.service_bus.queue_name.is_empty() {
                    return Err(ConfigError::ValidationError(
                        "service bus queue_name cannot be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            file: FileQueueConfig::default(),
            service_bus: ServiceBusConfig::default(),
        }
    }
}

/// Processor loop configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// How long one receive waits for a message
    pub receive_timeout_ms: u64,
    /// Dead-letter a failing message once it has been delivered this many times; `0` disables the cap
    pub max_delivery_count: u32,
    /// Upper bound on automatic lease renewal while the handler runs
    pub max_lock_renewal_secs: u64,
    /// How long shutdown waits for the current iteration to finish
    pub shutdown_timeout_secs: u64,
    /// First backoff after a failed receive
    pub error_backoff_initial_ms: u64,
    /// Largest backoff after repeated failed receives
    pub error_backoff_max_ms: u64,
}

impl ProcessorConfig {
    /// Validate processor configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.receive_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "receive_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.shutdown_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "shutdown_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.error_backoff_initial_ms > self.error_backoff_max_ms {
            return Err(ConfigError::ValidationError(
                "error_backoff_initial_ms must not exceed error_backoff_max_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Receive timeout as Duration
    #[must_use]
    pub const fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Maximum lease renewal as Duration
    #[must_use]
    pub const fn max_lock_renewal(&self) -> Duration {
        Duration::from_secs(self.max_lock_renewal_secs)
    }

    /// Shutdown join timeout as Duration
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Redelivery cap, `None` when disabled.
    #[must_use]
    pub const fn delivery_cap(&self) -> Option<u32> {
        if self.max_delivery_count == 0 {
            None
        } else {
            Some(self.max_delivery_count)
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: 2_000,
            max_delivery_count: 10,
            max_lock_renewal_secs: 300,
            shutdown_timeout_secs: 30,
            error_backoff_initial_ms: 500,
            error_backoff_max_ms: 30_000,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Prometheus listener port, disabled when `None`
    pub metrics_port: Option<u16>,
}

impl ObservabilityConfig {
    /// Validate observability configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "invalid log_level: {}. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: None,
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderQueueConfig {
    /// Deployment environment
    pub environment: Environment,
    /// Queue backend configuration
    pub queue: QueueConfig,
    /// Processor loop configuration
    pub processor: ProcessorConfig,
    /// Observability configuration
    pub observability: ObservabilityConfig,
}

impl OrderQueueConfig {
    /// Load configuration from environment
    ///
    /// Reads `CONFIG_ENV` environment variable (defaults to "development")
    ///
    /// # Errors
    ///
    /// Returns error if configuration cannot be loaded or is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_str = std::env::var("CONFIG_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = env_str.parse()?;
        Self::load(environment)
    }

    /// Load configuration for specific environment
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn load(environment: Environment) -> Result<Self, ConfigError> {
        Self::load_with(environment, |key| std::env::var(key).ok())
    }

    /// Load configuration reading variables through `lookup` instead of the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed or the result is invalid
    pub fn load_with<F>(environment: Environment, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            environment,
            ..Self::default()
        };

        // Environment-specific overrides
        match environment {
            Environment::Development => {
                config.observability.log_level = "debug".to_string();
                config.processor.shutdown_timeout_secs = 10;
            }
            Environment::Staging => {
                config.observability.log_level = "info".to_string();
                config.queue.backend = BackendKind::File;
            }
            Environment::Production => {
                config.observability.log_level = "info".to_string();
                config.queue.backend = BackendKind::ServiceBus;
            }
        }

        config.apply_overrides(&lookup)?;
        config.load_secrets(&lookup);
        config.validate()?;

        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("ORDER_QUEUE_BACKEND") {
            self.queue.backend = backend.parse()?;
        }
        if let Some(path) = lookup("ORDER_QUEUE_PATH") {
            self.queue.file.path = Some(PathBuf::from(path));
        }
        if let Some(name) = lookup("SERVICEBUS_QUEUE_NAME") {
            self.queue.service_bus.queue_name = name;
        }
        if let Some(name) = lookup("SERVICEBUS_DEAD_LETTER_QUEUE") {
            self.queue.service_bus.dead_letter_queue = Some(name).filter(|n| !n.is_empty());
        }
        if let Some(timeout) = lookup("ORDER_RECEIVE_TIMEOUT_MS") {
            self.processor.receive_timeout_ms = parse_number("ORDER_RECEIVE_TIMEOUT_MS", &timeout)?;
        }
        if let Some(count) = lookup("ORDER_MAX_DELIVERY_COUNT") {
            self.processor.max_delivery_count = parse_number("ORDER_MAX_DELIVERY_COUNT", &count)?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(port) = lookup("METRICS_PORT") {
            self.observability.metrics_port = Some(parse_number("METRICS_PORT", &port)?);
        }
        Ok(())
    }

    fn load_secrets<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(conn) = lookup("SERVICEBUS_CONNECTION_STRING") {
            self.queue.service_bus.connection_string = Some(conn);
        }
    }

    /// Validate entire configuration
    ///
    /// # Errors
    ///
    /// Returns error if any configuration section is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        self.processor.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

impl Default for OrderQueueConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            queue: QueueConfig::default(),
            processor: ProcessorConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

fn parse_number<T: FromStr>(var: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::ParseError(format!("{var} must be a number, got '{raw}'")))
}
