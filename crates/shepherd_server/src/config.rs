//! Server configuration, read from the environment.
//!
//!   SHEPHERD_DATABASE_URL / DATABASE_URL: Postgres connection string. When
//!                                    neither is set the in-memory store is used.
//!   SHEPHERD_JWT_SECRET            : HS256 secret (required)
//!   SHEPHERD_BIND_ADDR             : listen address (default 0.0.0.0:4200)
//!   SHEPHERD_DB_POOL_SIZE          : max pool connections (default 10)
//!   SHEPHERD_KEYWORD_MATCH         : `substring` (default) or `word`
//!   SHEPHERD_IMPORT_MAX_ROWS       : bulk import row cap (default 2000)
//!   SHEPHERD_IMPORT_TIMEOUT_SECS   : bulk import statement timeout (default 120)
//!   SHEPHERD_DEV_TENANTS           : comma-separated tenant ids to provision at start-up

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use shepherd_core::automation::KeywordMatch;
use shepherd_core::config::DEFAULT_IMPORT_MAX_ROWS;
use shepherd_core::EngineConfig;
use uuid::Uuid;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:4200";
const DEFAULT_POOL_SIZE: u32 = 10;
const DEFAULT_IMPORT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub db_pool_size: u32,
    pub engine: EngineConfig,
    pub dev_tenants: Vec<Uuid>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let jwt_secret = get("SHEPHERD_JWT_SECRET")
            .ok_or_else(|| anyhow!("SHEPHERD_JWT_SECRET must be set"))?;
        let database_url = get("SHEPHERD_DATABASE_URL").or_else(|| get("DATABASE_URL"));
        let bind_addr = get("SHEPHERD_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into());

        let db_pool_size = parse_or(
            get("SHEPHERD_DB_POOL_SIZE"),
            "SHEPHERD_DB_POOL_SIZE",
            DEFAULT_POOL_SIZE,
        )?;
        let keyword_match = match get("SHEPHERD_KEYWORD_MATCH") {
            Some(v) => KeywordMatch::from_str(&v).map_err(|_| {
                anyhow!("SHEPHERD_KEYWORD_MATCH must be 'substring' or 'word', got '{v}'")
            })?,
            None => KeywordMatch::default(),
        };
        let import_max_rows = parse_or(
            get("SHEPHERD_IMPORT_MAX_ROWS"),
            "SHEPHERD_IMPORT_MAX_ROWS",
            DEFAULT_IMPORT_MAX_ROWS,
        )?;
        let import_timeout_secs = parse_or(
            get("SHEPHERD_IMPORT_TIMEOUT_SECS"),
            "SHEPHERD_IMPORT_TIMEOUT_SECS",
            DEFAULT_IMPORT_TIMEOUT_SECS,
        )?;

        let dev_tenants = get("SHEPHERD_DEV_TENANTS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        Uuid::parse_str(s)
                            .with_context(|| format!("bad tenant id '{s}' in SHEPHERD_DEV_TENANTS"))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            database_url,
            bind_addr,
            jwt_secret,
            db_pool_size,
            engine: EngineConfig {
                keyword_match,
                import_max_rows,
                import_timeout: Duration::from_secs(import_timeout_secs),
            },
            dev_tenants,
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(v) => v.parse().map_err(|_| anyhow!("{key} has an invalid value '{v}'")),
        None => Ok(default),
    }
}
