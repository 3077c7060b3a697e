use core_config::{env_or_default, ConfigError, FromEnv};

/// Default store endpoint when `REDIS_URL` is unset.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";

/// Redis configuration
///
/// # Example
///
/// ```ignore
/// use database::redis::RedisConfig;
/// use core_config::FromEnv;
///
/// // From environment (REDIS_URL, with a localhost default)
/// let config = RedisConfig::from_env()?;
///
/// // Manual construction
/// let config = RedisConfig::new("redis://127.0.0.1:6379/0");
/// ```
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Get a reference to the Redis URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

impl FromEnv for RedisConfig {
    /// Reads `REDIS_URL`, defaulting to `redis://localhost:6379/0`.
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_or_default("REDIS_URL", DEFAULT_REDIS_URL),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_from_env() {
        temp_env::with_var("REDIS_URL", Some("redis://store:6379/2"), || {
            let config = RedisConfig::from_env().unwrap();
            assert_eq!(config.url, "redis://store:6379/2");
        });
    }

    #[test]
    fn test_redis_config_from_env_defaults() {
        temp_env::with_var_unset("REDIS_URL", || {
            let config = RedisConfig::from_env().unwrap();
            assert_eq!(config.url, DEFAULT_REDIS_URL);
        });
    }

    #[test]
    fn test_redis_config_new() {
        let config = RedisConfig::new("redis://prod-host:6379");
        assert_eq!(config.url(), "redis://prod-host:6379");
    }
}
