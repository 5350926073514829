//! Environment-driven process settings.
use std::collections::HashMap;

use eyre::{Result, eyre};

/// Deployment environment, selecting log format among other defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
    Test,
}

impl AppEnv {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(eyre!(
                "APP_ENV must be one of development|production|test, got '{other}'"
            )),
        }
    }
}

/// Process settings resolved from the environment.
///
/// `DATABASE_URL`, `REDIS_URL` and `ADMIN_API_KEY` are required; everything
/// else has a default. `ADMIN_API_KEY` guards the administrative surface
/// mounted outside this core, but is validated at startup so a misconfigured
/// deployment fails fast.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub env: AppEnv,
    pub database_url: String,
    pub redis_url: String,
    pub admin_api_key: String,
    pub log_level: String,
    pub metrics_enabled: bool,
    pub tracing_enabled: bool,
    pub tracing_endpoint: Option<String>,
}

const VALID_LOG_LEVELS: [&str; 6] = ["fatal", "error", "warn", "info", "debug", "trace"];

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Resolve settings from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let get = |name: &str| vars.get(name).map(String::as_str).filter(|v| !v.is_empty());
        let require = |name: &str| {
            get(name).map(str::to_string).ok_or_else(|| eyre!("{name} must be set"))
        };

        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| eyre!("PORT must be a valid port number: {e}"))?,
            None => 8080,
        };

        let env = match get("APP_ENV") {
            Some(raw) => AppEnv::parse(raw)?,
            None => AppEnv::Development,
        };

        let log_level = get("LOG_LEVEL").unwrap_or("info").to_string();
        if !VALID_LOG_LEVELS.contains(&log_level.as_str()) {
            return Err(eyre!(
                "LOG_LEVEL must be one of {}, got '{log_level}'",
                VALID_LOG_LEVELS.join("|")
            ));
        }

        Ok(Self {
            port,
            env,
            database_url: require("DATABASE_URL")?,
            redis_url: require("REDIS_URL")?,
            admin_api_key: require("ADMIN_API_KEY")?,
            log_level,
            metrics_enabled: parse_bool(get("METRICS_ENABLED"), true)?,
            tracing_enabled: parse_bool(get("TRACING_ENABLED"), false)?,
            tracing_endpoint: get("TRACING_ENDPOINT").map(str::to_string),
        })
    }

    /// The `tracing_subscriber` filter directive for the configured level.
    ///
    /// `fatal` is accepted for compatibility with the level set other stacks
    /// use and maps onto `error`.
    pub fn filter_directive(&self) -> &str {
        match self.log_level.as_str() {
            "fatal" => "error",
            other => other,
        }
    }
}

fn parse_bool(value: Option<&str>, default: bool) -> Result<bool> {
    match value {
        None => Ok(default),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(eyre!("expected true|false, got '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        [
            ("DATABASE_URL", "postgres://localhost/gateway"),
            ("REDIS_URL", "redis://localhost:6379"),
            ("ADMIN_API_KEY", "admin-secret"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_vars(&base_vars()).unwrap();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.env, AppEnv::Development);
        assert_eq!(settings.log_level, "info");
        assert!(settings.metrics_enabled);
        assert!(!settings.tracing_enabled);
        assert!(settings.tracing_endpoint.is_none());
    }

    #[test]
    fn test_missing_required_var() {
        let mut vars = base_vars();
        vars.remove("ADMIN_API_KEY");
        let err = Settings::from_vars(&vars).unwrap_err();
        assert!(err.to_string().contains("ADMIN_API_KEY"));
    }

    #[test]
    fn test_invalid_port_rejected() {
        let mut vars = base_vars();
        vars.insert("PORT".into(), "70000".into());
        assert!(Settings::from_vars(&vars).is_err());
    }

    #[test]
    fn test_invalid_env_rejected() {
        let mut vars = base_vars();
        vars.insert("APP_ENV".into(), "staging".into());
        assert!(Settings::from_vars(&vars).is_err());
    }

    #[test]
    fn test_fatal_maps_to_error_directive() {
        let mut vars = base_vars();
        vars.insert("LOG_LEVEL".into(), "fatal".into());
        let settings = Settings::from_vars(&vars).unwrap();
        assert_eq!(settings.filter_directive(), "error");
    }

    #[test]
    fn test_bool_parsing() {
        let mut vars = base_vars();
        vars.insert("METRICS_ENABLED".into(), "false".into());
        vars.insert("TRACING_ENABLED".into(), "1".into());
        let settings = Settings::from_vars(&vars).unwrap();
        assert!(!settings.metrics_enabled);
        assert!(settings.tracing_enabled);
    }
}
