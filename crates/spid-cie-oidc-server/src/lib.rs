pub mod config;
pub mod observability;
pub mod server;

pub use config::{AppConfig, load_config};
pub use observability::init_tracing;
pub use server::{RelyingPartyServer, ServerBuilder, build_app};
