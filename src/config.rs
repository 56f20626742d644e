//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Discord credentials and target guild.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub token: SecretString,
    pub guild_id: u64,
}

/// Service configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` runs against the in-memory transport.
    pub discord: Option<DiscordConfig>,
    /// Delay between session completion and automatic room deletion.
    pub auto_close: Duration,
    pub db_path: PathBuf,
    pub http_port: u16,
    /// Number of matches returned by a ranking request.
    pub top_k: usize,
}

impl AppConfig {
    /// Build config from environment variables.
    ///
    /// Without `DISCORD_TOKEN` the service runs locally; with it, `GUILD_ID`
    /// is required too. Everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let discord = match std::env::var("DISCORD_TOKEN") {
            Ok(token) if !token.trim().is_empty() => {
                let guild_id = std::env::var("GUILD_ID")
                    .map_err(|_| ConfigError::MissingEnvVar("GUILD_ID".into()))?;
                Some(DiscordConfig {
                    token: SecretString::from(token),
                    guild_id: parse_value("GUILD_ID", &guild_id)?,
                })
            }
            _ => None,
        };

        let auto_close_secs: u64 = env_or("AUTO_CLOSE_SECONDS", 300)?;
        let http_port: u16 = env_or("MATCHROOM_HTTP_PORT", 8080)?;
        let top_k: usize = env_or("MATCHROOM_TOP_K", 3)?;

        let db_path = std::env::var("MATCHROOM_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/matchroom.db"));

        Ok(Self {
            discord,
            auto_close: Duration::from_secs(auto_close_secs),
            db_path,
            http_port,
            top_k,
        })
    }
}

/// Read an optional numeric variable, falling back to `default` when unset.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_value_accepts_padded_numbers() {
        let port: u16 = parse_value("MATCHROOM_HTTP_PORT", " 9090 ").unwrap();
        assert_eq!(port, 9090);
    }

    #[test]
    fn parse_value_rejects_garbage() {
        let err = parse_value::<u64>("AUTO_CLOSE_SECONDS", "five").unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "AUTO_CLOSE_SECONDS"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn env_or_uses_default_when_unset() {
        let value: usize = env_or("MATCHROOM_TEST_SURELY_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }
}
