//! Runtime configuration, read from the Lambda environment.
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Production logs warnings and up unless told otherwise.
    pub fn default_for(environment: &str) -> Self {
        match environment.to_ascii_lowercase().as_str() {
            "production" | "prod" => LogLevel::Warn,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(LogLevel::Off),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub tickets: String,
    pub assignees: String,
    /// Holds the ticket id counter row.
    pub config: String,
    pub inventory: String,
}

impl Default for TableNames {
    fn default() -> Self {
        TableNames {
            tickets: "Tickets".to_string(),
            assignees: "Assignees".to_string(),
            config: "Config".to_string(),
            inventory: "InventoryOperations".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub log_level: LogLevel,
    /// Environment tag shown in the UI footer.
    pub environment: String,
    pub version: String,
    pub tables: TableNames,
    pub attachments_bucket: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Missing or unparseable values take their default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("APP_ENV").unwrap_or_else(|| "development".to_string());
        let log_level = lookup("LOG_LEVEL")
            .and_then(|l| l.parse().ok())
            .unwrap_or_else(|| LogLevel::default_for(&environment));
        let defaults = TableNames::default();

        AppConfig {
            log_level,
            version: lookup("APP_VERSION").unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            tables: TableNames {
                tickets: lookup("TICKETS_TABLE").unwrap_or(defaults.tickets),
                assignees: lookup("ASSIGNEES_TABLE").unwrap_or(defaults.assignees),
                config: lookup("CONFIG_TABLE").unwrap_or(defaults.config),
                inventory: lookup("INVENTORY_TABLE").unwrap_or(defaults.inventory),
            },
            attachments_bucket: lookup("ATTACHMENTS_BUCKET").unwrap_or_else(|| "maintenance-ticket-images".to_string()),
            environment,
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(level: LogLevel) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_str()));

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time() // CloudWatch adds timestamps
        .try_init();
    if result.is_err() {
        tracing::debug!("logging was already initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.environment, "development");
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert_eq!(cfg.tables, TableNames::default());
        assert_eq!(cfg.attachments_bucket, "maintenance-ticket-images");
        assert_eq!(cfg.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_production_defaults_to_warn() {
        assert_eq!(config(&[("APP_ENV", "production")]).log_level, LogLevel::Warn);
        assert_eq!(config(&[("APP_ENV", "production"), ("LOG_LEVEL", "debug")]).log_level, LogLevel::Debug);
        assert_eq!(config(&[("APP_ENV", "prod"), ("LOG_LEVEL", "loud")]).log_level, LogLevel::Warn);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[("TICKETS_TABLE", "tickets-dev"), ("ATTACHMENTS_BUCKET", "tickets-dev-images"), ("APP_VERSION", "2.3.1")]);
        assert_eq!(cfg.tables.tickets, "tickets-dev");
        assert_eq!(cfg.tables.assignees, "Assignees");
        assert_eq!(cfg.attachments_bucket, "tickets-dev-images");
        assert_eq!(cfg.version, "2.3.1");
    }
}
