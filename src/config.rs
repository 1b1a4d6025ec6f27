use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub queue: QueueConfig,
    pub workers: WorkerConfig,
    pub analyzer: AnalyzerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Directory holding the durable queue trees
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub analysis_concurrency: usize,
    pub crisis_concurrency: usize,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// When false, the no-op analyzer is wired in
    pub enabled: bool,
    pub endpoint: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: "data/triage.db".to_string(),
                max_connections: 10,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            queue: QueueConfig {
                data_dir: "data/queues".to_string(),
            },
            workers: WorkerConfig {
                analysis_concurrency: 5,
                crisis_concurrency: 2,
                max_attempts: 3,
                retry_base_delay_ms: 250,
                retry_max_delay_ms: 10_000,
            },
            analyzer: AnalyzerConfig {
                enabled: false,
                endpoint: None,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default())
            .map_err(|e| anyhow::anyhow!("Failed to build default configuration: {}", e))?;

        let config = Config::builder()
            .add_source(defaults)
            // Config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("config").required(false))
            // Environment variables with prefix, e.g. TRIAGE__WORKERS__MAX_ATTEMPTS
            .add_source(Environment::with_prefix("TRIAGE").separator("__"))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.database.path.is_empty() {
            return Err(anyhow::anyhow!("database.path must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        if self.queue.data_dir.is_empty() {
            return Err(anyhow::anyhow!("queue.data_dir must not be empty"));
        }

        if self.workers.analysis_concurrency == 0 {
            return Err(anyhow::anyhow!("analysis_concurrency must be greater than 0"));
        }
        if self.workers.crisis_concurrency == 0 {
            return Err(anyhow::anyhow!("crisis_concurrency must be greater than 0"));
        }
        if self.workers.max_attempts == 0 {
            return Err(anyhow::anyhow!("max_attempts must be greater than 0"));
        }
        if self.workers.retry_base_delay_ms > self.workers.retry_max_delay_ms {
            return Err(anyhow::anyhow!(
                "retry_base_delay_ms must not exceed retry_max_delay_ms"
            ));
        }

        if self.analyzer.enabled && self.analyzer.endpoint.is_none() {
            return Err(anyhow::anyhow!(
                "analyzer.endpoint is required when the analyzer is enabled"
            ));
        }

        Ok(())
    }

    /// Get log level from environment or config
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}
