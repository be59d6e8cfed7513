use miette::Diagnostic;
use thiserror::Error;
use weaver_persist::PersistError;

/// Top-level error type for the collaboration host
#[derive(Debug, Error, Diagnostic)]
pub enum CollabError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Server(#[from] ServerError),
}

/// HTTP server errors
#[derive(Debug, Error, Diagnostic)]
pub enum ServerError {
    #[error("invalid listen address {addr}")]
    #[diagnostic(code(server::addr), help("Check the HOST and PORT environment variables"))]
    Addr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("failed to bind to {addr}")]
    #[diagnostic(code(server::bind))]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server terminated unexpectedly")]
    #[diagnostic(code(server::serve))]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

impl From<weaver_persist::StoreError> for CollabError {
    fn from(e: weaver_persist::StoreError) -> Self {
        CollabError::Persist(e.into())
    }
}

pub type Result<T> = std::result::Result<T, CollabError>;
