use core_config::{
    app_info, env_bool, env_duration_ms, env_or_default, server::ServerConfig, AppInfo, ConfigError,
};
use std::time::Duration;

// Re-export Environment for use in other modules
pub use core_config::Environment;

/// Gateway configuration, composed from the shared config components plus
/// the resilience knobs of the polling loop.
#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppInfo,
    pub server: ServerConfig,
    pub environment: Environment,
    /// Worker base URL (`BACKEND_PROXY_URL`)
    pub worker_url: String,
    /// Cadence between successful event polls (`POLL_INTERVAL_MS`)
    pub poll_interval: Duration,
    /// First retry delay after a failed poll (`RETRY_BACKOFF_INIT_MS`)
    pub backoff_init: Duration,
    /// Retry delay ceiling (`RETRY_BACKOFF_MAX_MS`)
    pub backoff_max: Duration,
    /// Overall budget for one client request (`JOB_TIMEOUT_MS`)
    pub job_timeout: Duration,
    /// Enforce bearer auth (`OPENAI_API_KEY_REQUIRED`)
    pub api_key_required: bool,
    /// Expected shared secret (`OPENAI_API_KEY`)
    pub api_key: Option<String>,
    /// Model ids served by `/v1/models` (`SERVED_MODELS`, comma-separated)
    pub served_models: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_env();
        let server = ServerConfig::from_env_with_default_port(8080)?;
        let worker_url = env_or_default("BACKEND_PROXY_URL", "http://localhost:5345")
            .trim_end_matches('/')
            .to_string();

        let api_key_required = env_bool("OPENAI_API_KEY_REQUIRED", false)?;
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        if api_key_required && api_key.is_none() {
            return Err(ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()));
        }

        let served_models = env_or_default("SERVED_MODELS", "llama3.2")
            .split(',')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();

        Ok(Self {
            app: app_info!(),
            server,
            environment,
            worker_url,
            poll_interval: env_duration_ms("POLL_INTERVAL_MS", 500)?,
            backoff_init: env_duration_ms("RETRY_BACKOFF_INIT_MS", 1000)?,
            backoff_max: env_duration_ms("RETRY_BACKOFF_MAX_MS", 30_000)?,
            job_timeout: env_duration_ms("JOB_TIMEOUT_MS", 1_800_000)?,
            api_key_required,
            api_key,
            served_models,
        })
    }
}
