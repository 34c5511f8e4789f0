//! Settings of the admin tool, read from `paygate.toml` and `PAYGATE__*`
//! environment variables (e.g. `PAYGATE__APP__LEVEL=debug`).
//!
//! See `paygate.toml` at the repository root for an annotated example.
use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use engine::AccountNames;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Database {
    Memory,
    Sqlite { path: String },
    Url { url: String },
}

impl Default for Database {
    fn default() -> Self {
        Self::Sqlite {
            path: "paygate.db".to_string(),
        }
    }
}

impl Database {
    pub fn url(&self) -> String {
        match self {
            Database::Memory => String::from("sqlite::memory:"),
            Database::Sqlite { path } => format!("sqlite:{path}?mode=rwc"),
            Database::Url { url } => url.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    pub accounts: AccountNames,
}

impl Settings {
    /// Loads `path`, or `paygate.toml` from the working directory when it
    /// exists, then applies the environment on top.
    pub fn new(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("paygate").required(false),
        };

        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("PAYGATE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        settings.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_urls() {
        assert_eq!(Database::Memory.url(), "sqlite::memory:");
        assert_eq!(Database::default().url(), "sqlite:paygate.db?mode=rwc");
        let url = Database::Url {
            url: "postgres://localhost/paygate".to_string(),
        };
        assert_eq!(url.url(), "postgres://localhost/paygate");
    }

    #[test]
    fn parses_tagged_database_section() {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(
                r#"
                [app]
                level = "debug"

                [database]
                type = "sqlite"
                path = "/var/lib/paygate/ledger.db"

                [accounts]
                payout_pool = "payout_pool:vcb"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .and_then(Config::try_deserialize)
            .unwrap();

        assert_eq!(settings.app.level, "debug");
        assert_eq!(
            settings.database.url(),
            "sqlite:/var/lib/paygate/ledger.db?mode=rwc"
        );
        assert_eq!(settings.accounts.payout_pool, "payout_pool:vcb");
        assert_eq!(settings.accounts.crypto_pool, "crypto_pool");
    }
}
