use crate::cli::{Cli, OutputFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub processing: ProcessingConfig,
    pub api: ApiConfig,
    pub output: OutputConfig,
    pub schemas: SchemaConfig,
    pub extraction: ExtractionConfig,
}

/// Worker-pool and session settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Grace delay before ephemeral cleanup, in seconds
    pub cleanup_grace_seconds: u64,
    /// Bound on shutdown drain, in seconds
    pub stop_timeout_seconds: u64,
}

/// Remote API settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// API base URL
    pub base_url: String,
    /// API token; usually supplied via NFE_PIPELINE_TOKEN
    pub token: String,
    /// HTTP request timeout in seconds
    pub timeout_seconds: u64,
    /// Number of retry attempts for transient failures
    pub retry_attempts: u32,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
}

/// Output placement settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Root directory for processed/errors/reprocess/logs
    pub root: PathBuf,
    /// Move finished files into the output layout
    pub auto_organize: bool,
    /// Report format
    pub format: OutputFormat,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode (errors only)
    pub quiet: bool,
}

/// Schema repository settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchemaConfig {
    /// Directory holding the XSD files
    pub directory: PathBuf,
}

/// Container extraction settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Maximum nested-container depth
    pub max_depth: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            cleanup_grace_seconds: 5,
            stop_timeout_seconds: 30,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.validanfe.com".to_string(),
            token: String::new(),
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("output"),
            auto_organize: true,
            format: OutputFormat::Human,
            verbose: false,
            quiet: false,
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            directory: dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("nfe-pipeline/schemas"),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self { max_depth: 3 }
    }
}

impl Config {
    pub fn remote_config(&self) -> crate::remote::RemoteConfig {
        crate::remote::RemoteConfig {
            base_url: self.api.base_url.clone(),
            token: self.api.token.clone(),
            timeout_seconds: self.api.timeout_seconds,
            retry_attempts: self.api.retry_attempts,
            retry_delay_ms: self.api.retry_delay_ms,
            ..Default::default()
        }
    }

    pub fn coordinator_config(&self) -> crate::coordinator::CoordinatorConfig {
        crate::coordinator::CoordinatorConfig {
            max_workers: self.processing.workers,
            cleanup_grace: Duration::from_secs(self.processing.cleanup_grace_seconds),
            stop_timeout: Duration::from_secs(self.processing.stop_timeout_seconds),
            auto_organize: self.output.auto_organize,
            output_root: self.output.root.clone(),
        }
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            config = Self::load_from_file(config_path).await?;
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = found_config;
        }

        config = Self::apply_environment_overrides(config)?;
        config = Self::merge_with_cli(config, cli);
        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "nfe-pipeline.toml",
            "nfe-pipeline.json",
            ".nfe-pipeline.toml",
            ".nfe-pipeline.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("nfe-pipeline");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(token) = env.get("NFE_PIPELINE_TOKEN") {
            config.api.token = token;
        }
        if let Some(url) = env.get("NFE_PIPELINE_API_URL") {
            config.api.base_url = url;
        }
        if let Some(timeout) = env.get("NFE_PIPELINE_TIMEOUT") {
            config.api.timeout_seconds = timeout.parse().map_err(|_| {
                ConfigError::Environment(format!("Invalid NFE_PIPELINE_TIMEOUT value: {timeout}"))
            })?;
        }
        if let Some(attempts) = env.get("NFE_PIPELINE_RETRY_ATTEMPTS") {
            config.api.retry_attempts = attempts.parse().map_err(|_| {
                ConfigError::Environment(format!(
                    "Invalid NFE_PIPELINE_RETRY_ATTEMPTS value: {attempts}"
                ))
            })?;
        }
        if let Some(workers) = env.get("NFE_PIPELINE_WORKERS") {
            config.processing.workers = workers.parse().map_err(|_| {
                ConfigError::Environment(format!("Invalid NFE_PIPELINE_WORKERS value: {workers}"))
            })?;
        }
        if let Some(output_dir) = env.get("NFE_PIPELINE_OUTPUT_DIR") {
            config.output.root = PathBuf::from(output_dir);
        }
        if let Some(schema_dir) = env.get("NFE_PIPELINE_SCHEMA_DIR") {
            config.schemas.directory = PathBuf::from(schema_dir);
        }
        if let Some(auto) = env.get("NFE_PIPELINE_AUTO_ORGANIZE") {
            config.output.auto_organize = auto.parse().map_err(|_| {
                ConfigError::Environment(format!(
                    "Invalid NFE_PIPELINE_AUTO_ORGANIZE value: {auto}"
                ))
            })?;
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if let Some(output_dir) = &cli.output_dir {
            config.output.root = output_dir.clone();
        }
        if let Some(token) = &cli.token {
            config.api.token = token.clone();
        }
        if let Some(api_url) = &cli.api_url {
            config.api.base_url = api_url.clone();
        }
        if let Some(workers) = cli.workers {
            config.processing.workers = workers;
        }
        if let Some(schema_dir) = &cli.schema_dir {
            config.schemas.directory = schema_dir.clone();
        }
        if let Some(timeout) = cli.timeout {
            config.api.timeout_seconds = timeout;
        }
        if let Some(attempts) = cli.retry_attempts {
            config.api.retry_attempts = attempts;
        }
        if let Some(format) = cli.format {
            config.output.format = format;
        }
        if cli.no_organize {
            config.output.auto_organize = false;
        }
        config.output.verbose = cli.verbose;
        config.output.quiet = cli.quiet;

        config
    }

    /// Validate the final configuration
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.processing.workers == 0 {
            return Err(ConfigError::Validation(
                "processing.workers must be at least 1".to_string(),
            ));
        }
        if config.processing.workers > 64 {
            return Err(ConfigError::Validation(
                "processing.workers must not exceed 64".to_string(),
            ));
        }
        if config.api.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "api.timeout_seconds must be at least 1".to_string(),
            ));
        }
        if config.api.retry_attempts > 10 {
            return Err(ConfigError::Validation(
                "api.retry_attempts must not exceed 10".to_string(),
            ));
        }
        if config.api.base_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "api.base_url must not be empty".to_string(),
            ));
        }
        if config.extraction.max_depth == 0 || config.extraction.max_depth > 10 {
            return Err(ConfigError::Validation(
                "extraction.max_depth must be between 1 and 10".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;

    struct FakeEnv(HashMap<String, String>);

    impl EnvProvider for FakeEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["nfe-pipeline"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.processing.workers, 10);
        assert_eq!(config.api.timeout_seconds, 30);
        assert_eq!(config.api.retry_attempts, 3);
        assert_eq!(config.extraction.max_depth, 3);
        assert!(config.output.auto_organize);
        assert!(ConfigManager::validate_config(&config).is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env = FakeEnv(HashMap::from([
            ("NFE_PIPELINE_TOKEN".to_string(), "secreto".to_string()),
            ("NFE_PIPELINE_WORKERS".to_string(), "4".to_string()),
            ("NFE_PIPELINE_OUTPUT_DIR".to_string(), "/tmp/saida".to_string()),
        ]));
        let config =
            ConfigManager::apply_environment_overrides_with(&env, Config::default()).unwrap();
        assert_eq!(config.api.token, "secreto");
        assert_eq!(config.processing.workers, 4);
        assert_eq!(config.output.root, PathBuf::from("/tmp/saida"));
    }

    #[test]
    fn test_invalid_env_value_is_an_error() {
        let env = FakeEnv(HashMap::from([(
            "NFE_PIPELINE_WORKERS".to_string(),
            "muitos".to_string(),
        )]));
        let result = ConfigManager::apply_environment_overrides_with(&env, Config::default());
        assert!(matches!(result, Err(ConfigError::Environment(_))));
    }

    #[test]
    fn test_cli_takes_precedence() {
        let config = ConfigManager::merge_with_cli(
            Config::default(),
            &cli(&["nota.xml", "--workers", "2", "--no-organize", "--api-url", "http://localhost:8080"]),
        );
        assert_eq!(config.processing.workers, 2);
        assert!(!config.output.auto_organize);
        assert_eq!(config.api.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.processing.workers = 0;
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.api.retry_attempts = 99;
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.api.base_url = "  ".to_string();
        assert!(ConfigManager::validate_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_load_from_toml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pipeline.toml");
        tokio::fs::write(
            &path,
            "[processing]\nworkers = 6\n\n[api]\nbase_url = \"http://localhost:9000\"\n",
        )
        .await
        .unwrap();

        let config = ConfigManager::load_from_file(&path).await.unwrap();
        assert_eq!(config.processing.workers, 6);
        assert_eq!(config.api.base_url, "http://localhost:9000");
        // Untouched sections keep their defaults.
        assert_eq!(config.api.retry_attempts, 3);
    }

    #[tokio::test]
    async fn test_unsupported_format_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pipeline.yaml");
        tokio::fs::write(&path, "workers: 6").await.unwrap();
        let result = ConfigManager::load_from_file(&path).await;
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_component_config_wiring() {
        let mut config = Config::default();
        config.api.token = "t".to_string();
        config.processing.workers = 5;

        let remote = config.remote_config();
        assert_eq!(remote.token, "t");
        assert_eq!(remote.retry_attempts, 3);

        let coordinator = config.coordinator_config();
        assert_eq!(coordinator.max_workers, 5);
        assert_eq!(coordinator.cleanup_grace, Duration::from_secs(5));
    }
}
