//! Environment-driven configuration.
//!
//! All knobs come from the process environment; defaults match a local
//! single-instance deployment.

use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;

use crate::error::{Error, Result};

fn default_port() -> u16 {
    4000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/chimer.db")
}

fn default_retention_days() -> u32 {
    3
}

/// Which relational backend to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbConfig {
    Sqlite {
        path: PathBuf,
    },
    /// Parsed for compatibility; this build ships only the SQLite backend
    /// and rejects mysql at startup.
    Mysql {
        host: String,
        port: u16,
        username: String,
        password: String,
        database: String,
    },
}

/// Process configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the REST gateway binds to (`PORT`, default 4000).
    pub port: u16,
    /// Relational backend (`DB_TYPE` + `DB_*`).
    pub db: DbConfig,
    /// Retention horizon in days (`LOG_RETENTION_DAYS`, default 3, must be > 0).
    pub log_retention_days: u32,
    /// Whether the retention sweeper runs (`LOG_CLEANUP_ENABLED`, default true).
    pub log_cleanup_enabled: bool,
    /// Zone governing cron evaluation (`TZ`, default UTC).
    pub timezone: Tz,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            db: DbConfig::Sqlite {
                path: default_db_path(),
            },
            log_retention_days: default_retention_days(),
            log_cleanup_enabled: true,
            timezone: Tz::UTC,
        }
    }
}

impl Config {
    /// Assemble configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let port = parse_var("PORT", default_port())?;

        let db = match std::env::var("DB_TYPE").ok().as_deref() {
            None | Some("sqlite") => DbConfig::Sqlite {
                path: std::env::var("DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| default_db_path()),
            },
            Some("mysql") => DbConfig::Mysql {
                host: std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".into()),
                port: parse_var("DB_PORT", 3306)?,
                username: std::env::var("DB_USERNAME").unwrap_or_default(),
                password: std::env::var("DB_PASSWORD").unwrap_or_default(),
                database: std::env::var("DB_DATABASE").unwrap_or_else(|_| "chimer".into()),
            },
            Some(other) => {
                return Err(Error::Config(format!("unknown DB_TYPE: {other}")));
            }
        };

        let log_retention_days = parse_var("LOG_RETENTION_DAYS", default_retention_days())?;
        if log_retention_days == 0 {
            return Err(Error::Config(
                "LOG_RETENTION_DAYS must be greater than zero".into(),
            ));
        }

        let log_cleanup_enabled = match std::env::var("LOG_CLEANUP_ENABLED").ok().as_deref() {
            None => true,
            Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        };

        let timezone = match std::env::var("TZ").ok() {
            None => Tz::UTC,
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| Error::Config(format!("unknown TZ: {name}")))?,
        };

        Ok(Self {
            port,
            db,
            log_retention_days,
            log_cleanup_enabled,
            timezone,
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| Error::Config(format!("invalid {name}: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.log_retention_days, 3);
        assert!(cfg.log_cleanup_enabled);
        assert_eq!(cfg.timezone, Tz::UTC);
        assert_eq!(
            cfg.db,
            DbConfig::Sqlite {
                path: PathBuf::from("data/chimer.db")
            }
        );
    }

    #[test]
    fn parse_var_rejects_garbage() {
        std::env::set_var("CHIMER_TEST_PORT_VAR", "not-a-number");
        let res: Result<u16> = parse_var("CHIMER_TEST_PORT_VAR", 4000);
        assert!(res.is_err());
        std::env::remove_var("CHIMER_TEST_PORT_VAR");
    }
}
