pub mod config;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::{AppConfig, LoggingConfig, ServerConfig};
pub use middleware::{api_rate_limit, client_ip, enforce};
pub use observability::{apply_logging_level, init_tracing};
pub use server::{AppState, ServerBuilder, VitaeServer, build_app};
