use core_config::{app_info, env_or_default, env_parse, server::ServerConfig, AppInfo, ConfigError};
use database::redis::RedisConfig;

// Re-export Environment for use in other modules
pub use core_config::{Environment, FromEnv};

/// Default worker port; the gateway's default `BACKEND_PROXY_URL` points here.
const DEFAULT_PORT: u16 = 5345;

/// Worker configuration, composed from the shared config components.
#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppInfo,
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub environment: Environment,
    /// Inference backend base URL (`OLLAMA_BASE_URL`)
    pub backend_url: String,
    /// Executor pool size N (`WORKER_CONCURRENCY`); the admission ceiling is 2N
    pub concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_env();
        let server = ServerConfig::from_env_with_default_port(DEFAULT_PORT)?;
        let redis = RedisConfig::from_env()?;
        let backend_url = env_or_default("OLLAMA_BASE_URL", "http://127.0.0.1:11434")
            .trim_end_matches('/')
            .to_string();
        let concurrency: usize = env_parse("WORKER_CONCURRENCY", 10)?;
        if concurrency == 0 {
            return Err(ConfigError::ParseError {
                key: "WORKER_CONCURRENCY".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            app: app_info!(),
            server,
            redis,
            environment,
            backend_url,
            concurrency,
        })
    }
}
