use std::str::FromStr;

use lazy_static::lazy_static;
use log::warn;

lazy_static! {
    static ref CONFIG: Config = Config;
}

/// A singleton for accessing global configuration values.
///
pub fn config() -> &'static Config {
    &CONFIG
}

/// Interface for reading process-wide configuration values from the environment.
///
/// Keys used across the workspace:
///
/// * `QUEUE_1` .. `QUEUE_9` - Destination directories of the queues.
/// * `WORKSPACE_ROOT` - Directory under which the working directory is created. Defaults to the
///   platform temp directory.
/// * `AUDIT_LOG` - Path of the append-only audit file.
/// * `WKHTMLTOPDF`, `SOFFICE`, `PDF_VIEWER` - Programs backing the renderers and the preview.
/// * `SAVE_RETRY_ATTEMPTS`, `SAVE_RETRY_DELAY_MS` - Retry policy of the body save.
/// * `ATTACHMENT_FAILURE_POLICY` - `abort` or `skip`.
///
#[derive(Debug, Clone, Default)]
pub struct Config;

impl Config {
    /// Get the value of an environment variable.
    ///
    /// Empty values are treated as unset.
    ///
    pub fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.is_empty())
    }

    /// Get the value of an environment variable, or a default value.
    ///
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Get the value of an environment variable parsed into `T`, or a default value.
    ///
    /// A value that fails to parse is logged and replaced by the default.
    ///
    pub fn get_parsed_or<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!("Ignoring unparsable value '{}' for {}", value, key);
                default
            }),
            None => default,
        }
    }
}
