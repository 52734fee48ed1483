//! Configuration loading from disk and the environment.

use crate::config::schema::{AppConfig, RateLimitStoreKind};
use crate::config::validation::{validate_config, ValidationError};
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = AppConfig::from_toml_str(&content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> Result<AppConfig, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Applies overrides from `lookup`, normally the process environment.
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
            let value = raw.trim().parse().ok();
            if value.is_none() {
                tracing::warn!(key, value = raw, "ignoring unparsable environment override");
            }
            value
        }
        fn flag(key: &str, raw: &str) -> Option<bool> {
            let value = parse_bool(raw);
            if value.is_none() {
                tracing::warn!(key, value = raw, "ignoring unparsable environment override");
            }
            value
        }

        if let Some(v) = lookup("APP_NAME") {
            self.app.name = v;
        }
        if let Some(v) = lookup("APP_ENV") {
            self.app.env = v;
        }
        if let Some(v) = lookup("APP_DEBUG").and_then(|v| flag("APP_DEBUG", &v)) {
            self.app.debug = v;
        }
        if let Some(v) = lookup("APP_URL_PARAM") {
            self.routing.url_param = Some(v).filter(|v| !v.is_empty());
        }
        if let Some(v) = lookup("BIND_ADDRESS") {
            self.server.bind_address = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("CORS_ENABLED").and_then(|v| flag("CORS_ENABLED", &v)) {
            self.cors.enabled = v;
        }
        if let Some(v) = lookup("CORS_ALLOWED_ORIGINS") {
            self.cors.policy.allowed_origins = parse_list(&v);
        }
        if let Some(v) = lookup("RATE_LIMIT_ENABLED").and_then(|v| flag("RATE_LIMIT_ENABLED", &v)) {
            self.rate_limit.enabled = v;
        }
        if let Some(v) = lookup("RATE_LIMIT_REQUESTS").and_then(|v| parsed("RATE_LIMIT_REQUESTS", &v)) {
            self.rate_limit.max_requests = v;
        }
        if let Some(v) = lookup("RATE_LIMIT_WINDOW").and_then(|v| parsed("RATE_LIMIT_WINDOW", &v)) {
            self.rate_limit.window_secs = v;
        }
        if let Some(v) = lookup("RATE_LIMIT_STORE") {
            match v.trim().to_ascii_lowercase().as_str() {
                "memory" => self.rate_limit.store = RateLimitStoreKind::Memory,
                "cache" => self.rate_limit.store = RateLimitStoreKind::Cache,
                other => tracing::warn!(value = other, "unknown RATE_LIMIT_STORE"),
            }
        }
        if let Some(v) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Some(v) = lookup("JWT_EXPIRY").and_then(|v| parsed("JWT_EXPIRY", &v)) {
            self.auth.token_ttl_secs = v;
        }
    }

    pub fn apply_process_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    pub fn is_production(&self) -> bool {
        self.app.env.eq_ignore_ascii_case("production")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.rate_limit.max_requests, 60);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.auth.token_ttl_secs, 3600);
        assert!(config.cors.enabled);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [app]
            debug = true

            [routing]
            url_param = "url"

            [cors]
            allowed_origins = ["https://app.example"]

            [rate_limit]
            store = "cache"
            max_requests = 5
            "#,
        )
        .unwrap();

        assert!(config.app.debug);
        assert_eq!(config.app.name, "Viper");
        assert_eq!(config.routing.url_param.as_deref(), Some("url"));
        assert_eq!(config.cors.policy.allowed_origins, ["https://app.example"]);
        assert!(config.cors.policy.allowed_methods.contains(&"GET".to_string()));
        assert_eq!(config.rate_limit.store, RateLimitStoreKind::Cache);
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window_secs, 60);
    }

    #[test]
    fn environment_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("APP_ENV", "development"),
            ("APP_DEBUG", "true"),
            ("CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example"),
            ("RATE_LIMIT_ENABLED", "false"),
            ("RATE_LIMIT_REQUESTS", "100"),
            ("RATE_LIMIT_WINDOW", "not-a-number"),
            ("JWT_SECRET", "s3cret"),
            ("JWT_EXPIRY", "120"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.app.env, "development");
        assert!(config.app.debug);
        assert!(!config.is_production());
        assert_eq!(
            config.cors.policy.allowed_origins,
            ["https://a.example", "https://b.example"]
        );
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.auth.jwt_secret, "s3cret");
        assert_eq!(config.auth.token_ttl_secs, 120);
    }

    #[test]
    fn load_reports_validation_errors() {
        let dir = std::env::temp_dir().join(format!("viper-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "[rate_limit]\nmax_requests = 0\nwindow_secs = 0\n").unwrap();

        let err = load_config(&path).unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }
}
