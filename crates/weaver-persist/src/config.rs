use std::time::Duration;

use url::Url;

use crate::error::{ConfigError, PersistError};

/// ClickHouse connection configuration
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub url: Url,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl ClickHouseConfig {
    pub const DEFAULT_DATABASE: &'static str = "default";
    pub const DEFAULT_USER: &'static str = "default";

    /// Connection to `url` with the default database and user.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(url).map_err(|e| ConfigError::UrlParse {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            url,
            database: Self::DEFAULT_DATABASE.to_string(),
            user: Self::DEFAULT_USER.to_string(),
            password: String::new(),
        })
    }

    /// Read the connection from `CLICKHOUSE_URL` (required) and the optional
    /// `CLICKHOUSE_DATABASE`, `CLICKHOUSE_USER` and `CLICKHOUSE_PASSWORD`.
    pub fn from_env() -> Result<Self, PersistError> {
        let url = std::env::var("CLICKHOUSE_URL").map_err(|_| ConfigError::MissingEnv {
            var: "CLICKHOUSE_URL",
        })?;
        Ok(Self {
            database: env_or("CLICKHOUSE_DATABASE", Self::DEFAULT_DATABASE),
            user: env_or("CLICKHOUSE_USER", Self::DEFAULT_USER),
            password: env_or("CLICKHOUSE_PASSWORD", ""),
            ..Self::parse(&url)?
        })
    }
}

/// Document table layout and write limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub table: String,
    pub key_column: String,
    pub content_column: String,
    /// Per-record size at which writes warn
    pub max_record_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table: Self::DEFAULT_TABLE.to_string(),
            key_column: Self::DEFAULT_KEY_COLUMN.to_string(),
            content_column: Self::DEFAULT_CONTENT_COLUMN.to_string(),
            max_record_bytes: Self::DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

impl StoreConfig {
    pub const DEFAULT_TABLE: &'static str = "collab_documents";
    pub const DEFAULT_KEY_COLUMN: &'static str = "doc_key";
    pub const DEFAULT_CONTENT_COLUMN: &'static str = "content";
    pub const DEFAULT_MAX_RECORD_BYTES: usize = 1024 * 1024;

    /// Load configuration from environment variables.
    ///
    /// Optional env vars:
    /// - `COLLAB_STORE_TABLE`: Table name (default: collab_documents)
    /// - `COLLAB_STORE_KEY_COLUMN`: Primary key column (default: doc_key)
    /// - `COLLAB_STORE_CONTENT_COLUMN`: Content column (default: content)
    /// - `COLLAB_STORE_MAX_RECORD_BYTES`: Size warning ceiling (default: 1 MiB)
    pub fn from_env() -> Result<Self, PersistError> {
        let max_record_bytes = match std::env::var("COLLAB_STORE_MAX_RECORD_BYTES") {
            Ok(s) => parse_positive("COLLAB_STORE_MAX_RECORD_BYTES", &s)? as usize,
            Err(_) => Self::DEFAULT_MAX_RECORD_BYTES,
        };

        Ok(Self {
            table: env_or("COLLAB_STORE_TABLE", Self::DEFAULT_TABLE),
            key_column: env_or("COLLAB_STORE_KEY_COLUMN", Self::DEFAULT_KEY_COLUMN),
            content_column: env_or("COLLAB_STORE_CONTENT_COLUMN", Self::DEFAULT_CONTENT_COLUMN),
            max_record_bytes,
        })
    }
}

/// Which persistence implementation the process runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistMode {
    /// Accept every call, persist nothing
    #[default]
    Disabled,
    /// Seed from and save to ClickHouse
    Durable,
}

impl PersistMode {
    /// `COLLAB_PERSIST`: `true`/`1`/`yes` selects durable persistence.
    pub fn from_env() -> Self {
        match std::env::var("COLLAB_PERSIST") {
            Ok(v) if parse_flag(&v) => PersistMode::Durable,
            _ => PersistMode::Disabled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PersistMode::Disabled => "disabled",
            PersistMode::Durable => "durable",
        }
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_positive(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            field,
            message: "must be greater than zero".into(),
        }),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::Invalid {
            field,
            message: e.to_string(),
        }),
    }
}

/// Combined persistence configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct PersistConfig {
    pub mode: PersistMode,
    pub debounce: Duration,
    pub store: StoreConfig,
    /// Present only in durable mode
    pub clickhouse: Option<ClickHouseConfig>,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            mode: PersistMode::Disabled,
            debounce: Self::DEFAULT_DEBOUNCE,
            store: StoreConfig::default(),
            clickhouse: None,
        }
    }
}

impl PersistConfig {
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2000);

    /// Load all configuration from environment variables.
    ///
    /// - `COLLAB_PERSIST`: enable durable persistence (default: false)
    /// - `COLLAB_DEBOUNCE_MS`: quiet period before a save (default: 2000)
    ///
    /// ClickHouse variables are only read, and only required, in durable mode.
    pub fn from_env() -> Result<Self, PersistError> {
        let mode = PersistMode::from_env();

        let debounce = match std::env::var("COLLAB_DEBOUNCE_MS") {
            Ok(s) => Duration::from_millis(parse_positive("COLLAB_DEBOUNCE_MS", &s)?),
            Err(_) => Self::DEFAULT_DEBOUNCE,
        };

        let clickhouse = match mode {
            PersistMode::Durable => Some(ClickHouseConfig::from_env()?),
            PersistMode::Disabled => None,
        };

        Ok(Self {
            mode,
            debounce,
            store: StoreConfig::from_env()?,
            clickhouse,
        })
    }
}
