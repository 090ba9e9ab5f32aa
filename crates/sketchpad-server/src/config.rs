use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::info;

use crate::entitlements::Entitlements;
use crate::repositories::{SqliteStore, Store, StoreResult, UnavailableStore};

/// Value of `SKETCHPAD_DATABASE_URL` that runs without persistence.
pub const DATABASE_DISABLED: &str = "disabled";

#[derive(Debug, Clone, Parser)]
#[command(name = "sketchpad-server", version, about = "Relay sketchpad chats to the v0 API")]
pub struct Args {
    /// API key for the v0 platform.
    #[arg(long, env = "V0_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Override the v0 API base URL.
    #[arg(long, env = "V0_API_URL")]
    pub api_url: Option<String>,

    /// SQLite file path or `sqlite:` URL; `disabled` runs without a database.
    #[arg(long, env = "SKETCHPAD_DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "SKETCHPAD_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    #[arg(long, env = "SKETCHPAD_ANONYMOUS_DAILY_LIMIT", default_value_t = 3)]
    pub anonymous_daily_limit: u64,

    #[arg(long, env = "SKETCHPAD_GUEST_DAILY_LIMIT", default_value_t = 5)]
    pub guest_daily_limit: u64,

    #[arg(long, env = "SKETCHPAD_REGULAR_DAILY_LIMIT", default_value_t = 50)]
    pub regular_daily_limit: u64,
}

/// A required setting that was not provided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingVar {
    pub name: &'static str,
    pub description: &'static str,
    pub example: &'static str,
}

impl fmt::Display for MissingVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (e.g. {})", self.name, self.description, self.example)
    }
}

const API_KEY_VAR: MissingVar = MissingVar {
    name: "V0_API_KEY",
    description: "Your v0 API key for generating apps",
    example: "v0_sk_...",
};

const DATABASE_VAR: MissingVar = MissingVar {
    name: "SKETCHPAD_DATABASE_URL",
    description: "SQLite database location (no config directory to default to)",
    example: "/var/lib/sketchpad/sketchpad.db",
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "missing required environment variables: {}",
        .0.iter().map(|v| v.name).collect::<Vec<_>>().join(", ")
    )]
    MissingVariables(Vec<MissingVar>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Database {
    Disabled,
    Sqlite(String),
}

impl Database {
    pub async fn open(&self) -> StoreResult<Arc<dyn Store>> {
        match self {
            Database::Disabled => {
                info!("Running without a database; ownership and limits are not recorded");
                Ok(Arc::new(UnavailableStore))
            }
            Database::Sqlite(location) => Ok(Arc::new(SqliteStore::connect(location).await?)),
        }
    }
}

/// Validated server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub api_key: String,
    pub api_url: Option<String>,
    pub database: Database,
    pub bind: SocketAddr,
    pub limits: Entitlements,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    /// Check every required setting and report all missing ones at once.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();

        let api_key = present(args.api_key);
        if api_key.is_none() {
            missing.push(API_KEY_VAR);
        }

        let database = match present(args.database_url) {
            Some(url) if url.trim() == DATABASE_DISABLED => Some(Database::Disabled),
            Some(url) => Some(Database::Sqlite(url.trim().to_string())),
            None => SqliteStore::default_path()
                .ok()
                .map(|path| Database::Sqlite(path.to_string_lossy().into_owned())),
        };
        if database.is_none() {
            missing.push(DATABASE_VAR);
        }

        match (api_key, database) {
            (Some(api_key), Some(database)) if missing.is_empty() => Ok(Self {
                api_key,
                api_url: present(args.api_url),
                database,
                bind: args.bind,
                limits: Entitlements {
                    anonymous_per_day: args.anonymous_daily_limit,
                    guest_per_day: args.guest_daily_limit,
                    regular_per_day: args.regular_daily_limit,
                },
            }),
            _ => Err(ConfigError::MissingVariables(missing)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            api_key: Some("v0_sk_test".into()),
            api_url: None,
            database_url: Some("sqlite::memory:".into()),
            bind: "127.0.0.1:3000".parse().unwrap(),
            anonymous_daily_limit: 3,
            guest_daily_limit: 5,
            regular_daily_limit: 50,
        }
    }

    #[test]
    fn test_valid_config() {
        let config = ServerConfig::from_args(args()).unwrap();
        assert_eq!(config.database, Database::Sqlite("sqlite::memory:".into()));
        assert_eq!(config.limits, Entitlements::default());
    }

    #[test]
    fn test_blank_api_key_is_missing() {
        let err = ServerConfig::from_args(Args {
            api_key: Some("   ".into()),
            ..args()
        })
        .unwrap_err();
        let ConfigError::MissingVariables(missing) = err;
        assert_eq!(missing, vec![API_KEY_VAR]);
        assert!(missing[0].to_string().contains("v0_sk_"));
    }

    #[test]
    fn test_disabled_database() {
        let config = ServerConfig::from_args(Args {
            database_url: Some("disabled".into()),
            api_url: Some(" ".into()),
            ..args()
        })
        .unwrap();
        assert_eq!(config.database, Database::Disabled);
        assert!(config.api_url.is_none());
    }

    #[test]
    fn test_flags_parse() {
        let args = Args::try_parse_from([
            "sketchpad-server",
            "--api-key",
            "k",
            "--database-url",
            "disabled",
            "--bind",
            "0.0.0.0:8080",
            "--anonymous-daily-limit",
            "10",
        ])
        .unwrap();
        assert_eq!(args.anonymous_daily_limit, 10);
        assert_eq!(args.bind.port(), 8080);
    }

    #[tokio::test]
    async fn test_disabled_database_opens_unavailable_store() {
        let store = Database::Disabled.open().await.unwrap();
        assert!(store.ownership("chat-1").await.is_err());
    }
}
