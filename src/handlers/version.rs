//! Build information for the UI footer.
use serde_json::{json, Value};

use crate::config::AppConfig;

/// Display only; the values are whatever the deployment injected.
pub fn handle_get_version(config: &AppConfig) -> Value {
    json!({
        "version": config.version,
        "environment": config.environment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_configured_build() {
        let config = AppConfig::from_lookup(|key| match key {
            "APP_VERSION" => Some("1.4.0".to_string()),
            "APP_ENV" => Some("staging".to_string()),
            _ => None,
        });
        let body = handle_get_version(&config);
        assert_eq!(body["version"], "1.4.0");
        assert_eq!(body["environment"], "staging");
    }
}
