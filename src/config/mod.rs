//! Manager configuration: slice defaults and cache settings, loaded from TOML.

mod loader;
mod types;

pub use loader::ConfigError;
pub use types::{CacheConfig, Defaults, StateConfig};
