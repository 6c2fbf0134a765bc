use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Initial values for the global slices, restored by `reset()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defaults {
    /// Locale tag (default: "en").
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Theme name (default: "light").
    #[serde(default = "default_theme")]
    pub theme: String,
}

/// TTL cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a caller does not pass one, in seconds (default: 300).
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Upper bound on stored entries. Unbounded when absent.
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_theme() -> String {
    "light".to_string()
}

fn default_ttl_secs() -> u64 {
    300
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            defaults: Defaults::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            theme: default_theme(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            max_entries: None,
        }
    }
}
