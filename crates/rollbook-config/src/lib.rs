pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{AppConfig, DatabaseConfig, MAX_SESSION_TTL_HOURS, SessionConfig};
