//! Collaboration host: one shared document per room, persisted through
//! `weaver-persist`, with health and metrics endpoints.

pub mod config;
pub mod error;
pub mod rooms;
pub mod server;
pub mod telemetry;

pub use config::{Config, ServerConfig};
pub use error::{CollabError, Result, ServerError};
pub use rooms::RoomRegistry;
pub use server::{AppState, DEFAULT_ROOM};
