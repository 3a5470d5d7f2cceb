use crate::error::{RelayError, RelayResult};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    // Required
    pub database_url: String,
    pub bot_token: String,

    // Server
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    // Delivery API base, overridable so tests can point at a mock server
    #[serde(default = "default_delivery_base_url")]
    pub delivery_base_url: String,

    // Poll scheduler tick
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    // An update older than this that was never delivered is permanently
    // skipped so old backlog does not flood newly registered destinations.
    #[serde(default = "default_stale_update_hours")]
    pub stale_update_hours: i64,

    // An update older than this with no revision timestamp is not sent
    // (protects against delivering decayed queue items after a restart).
    #[serde(default = "default_freshness_window_hours")]
    pub freshness_window_hours: i64,

    // How many recent destination messages backfill reconciles against
    #[serde(default = "default_backfill_history_limit")]
    pub backfill_history_limit: u8,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_delivery_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_stale_update_hours() -> i64 {
    50
}

fn default_freshness_window_hours() -> i64 {
    6
}

fn default_backfill_history_limit() -> u8 {
    100
}

impl AppConfig {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let builder = config::Config::builder().add_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.database_url.is_empty() {
            return Err(RelayError::ConfigError("DATABASE_URL is required".to_string()));
        }
        if self.bot_token.is_empty() {
            return Err(RelayError::ConfigError("BOT_TOKEN is required".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(RelayError::ConfigError(
                "POLL_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }
        if self.delivery_base_url.ends_with('/') {
            return Err(RelayError::ConfigError(
                "DELIVERY_BASE_URL must not end with a slash".to_string(),
            ));
        }

        if self.freshness_window_hours >= self.stale_update_hours {
            tracing::warn!(
                "FRESHNESS_WINDOW_HOURS >= STALE_UPDATE_HOURS; the staleness guard will rarely fire"
            );
        }
        if self.poll_interval_ms < 5_000 {
            tracing::warn!(
                "POLL_INTERVAL_MS below 5s will hammer upstream status pages; consider raising it"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/status_relay".to_string(),
            bot_token: "test-token".to_string(),
            host: default_host(),
            port: default_port(),
            delivery_base_url: default_delivery_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            stale_update_hours: default_stale_update_hours(),
            freshness_window_hours: default_freshness_window_hours(),
            backfill_history_limit: default_backfill_history_limit(),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_database_url() {
        let config = AppConfig {
            database_url: String::new(),
            ..base_config()
        };
        let err = config.validate().expect_err("Expected validation error");
        assert_eq!(err.to_string(), "Configuration error: DATABASE_URL is required");
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = AppConfig {
            poll_interval_ms: 0,
            ..base_config()
        };
        let err = config.validate().expect_err("Expected validation error");
        assert!(matches!(err, RelayError::ConfigError(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: POLL_INTERVAL_MS must be greater than zero"
        );
    }

    #[test]
    fn test_validate_rejects_trailing_slash_base_url() {
        let config = AppConfig {
            delivery_base_url: "https://discord.com/api/v10/".to_string(),
            ..base_config()
        };
        assert!(config.validate().is_err());
    }
}
