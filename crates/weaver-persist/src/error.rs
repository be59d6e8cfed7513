//! Error types for document persistence.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for weaver-persist operations
#[derive(Debug, Error, Diagnostic)]
pub enum PersistError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Document(#[from] DocumentError),

    #[error("no tokio runtime available to schedule persistence work")]
    #[diagnostic(
        code(persist::runtime),
        help("Construct persistence from inside a tokio runtime")
    )]
    Runtime,
}

/// Backing store errors.
///
/// Transport failures are never retried here; callers log them and treat the
/// operation as not having happened.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("store query failed: {message}: {source}")]
    #[diagnostic(code(store::query))]
    Query {
        message: String,
        #[source]
        source: clickhouse::error::Error,
    },

    #[error("store write failed: {message}: {source}")]
    #[diagnostic(code(store::insert))]
    Insert {
        message: String,
        #[source]
        source: clickhouse::error::Error,
    },

    #[error("store unavailable: {message}")]
    #[diagnostic(code(store::unavailable))]
    Unavailable { message: String },

    #[error("invalid identifier for {field}: {value:?}")]
    #[diagnostic(
        code(store::identifier),
        help("Identifiers must match [A-Za-z_][A-Za-z0-9_]*")
    )]
    InvalidIdentifier { field: &'static str, value: String },
}

/// A document name that cannot be mapped to a store key.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum KeyError {
    #[error("document name is empty")]
    #[diagnostic(code(key::empty))]
    Empty,

    #[error("document name {name:?} contains an empty path segment")]
    #[diagnostic(
        code(key::empty_segment),
        help("Leading, trailing and repeated '/' are not allowed")
    )]
    EmptySegment { name: String },

    #[error("document name {name:?} contains a '.' or '..' segment")]
    #[diagnostic(code(key::dot_segment))]
    DotSegment { name: String },

    #[error("document name {name:?} contains a control character")]
    #[diagnostic(code(key::control_character))]
    ControlCharacter { name: String },

    #[error("document name is {len} bytes, the limit is {max}")]
    #[diagnostic(code(key::too_long))]
    TooLong { len: usize, max: usize },
}

/// Configuration errors
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("missing required environment variable: {var}")]
    #[diagnostic(
        code(config::missing_env),
        help("Set the {var} environment variable or add it to your .env file")
    )]
    MissingEnv { var: &'static str },

    #[error("invalid configuration value for {field}: {message}")]
    #[diagnostic(code(config::invalid))]
    Invalid { field: &'static str, message: String },

    #[error("failed to parse URL: {url}")]
    #[diagnostic(code(config::url_parse))]
    UrlParse { url: String, message: String },
}

/// Errors raised by the in-memory CRDT document.
#[derive(Debug, Error, Diagnostic)]
pub enum DocumentError {
    #[error("failed to insert at offset {offset}: {message}")]
    #[diagnostic(code(document::insert))]
    Insert { offset: usize, message: String },

    #[error("failed to import CRDT data: {0}")]
    #[diagnostic(code(document::import))]
    Import(String),
}

impl From<loro::LoroError> for DocumentError {
    fn from(e: loro::LoroError) -> Self {
        DocumentError::Import(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PersistError>;
