//! Shared configuration helpers for the mailer workspace.
//!
//! Everything here is read from process environment variables once at startup.

pub mod tracing;

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Application environment, selected with `APP_ENV`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env_or_default("APP_ENV", "development");

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Read `key`, falling back to `default` when it is unset.
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read `key` or fail with [`ConfigError::MissingEnvVar`].
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Read `key`, treating an empty value the same as an unset one.
pub fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse `key`, using `default` when it is unset.
///
/// A value that is present but does not parse is an error rather than a
/// silent fallback, so a typo in `SMTP_PORT` is reported at startup.
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Development);
            assert!(env.is_development());
            assert!(!env.is_production());
        });
    }

    #[test]
    fn test_environment_production_case_insensitive() {
        for value in ["production", "PRODUCTION", "Production"] {
            temp_env::with_var("APP_ENV", Some(value), || {
                assert_eq!(Environment::from_env(), Environment::Production);
            });
        }
    }

    #[test]
    fn test_environment_unknown_defaults_to_development() {
        temp_env::with_var("APP_ENV", Some("staging"), || {
            assert_eq!(Environment::from_env(), Environment::Development);
        });
    }

    #[test]
    fn test_env_or_default() {
        temp_env::with_var("MAILER_TEST_VAR", Some("value"), || {
            assert_eq!(env_or_default("MAILER_TEST_VAR", "fallback"), "value");
        });
        temp_env::with_var_unset("MAILER_TEST_VAR", || {
            assert_eq!(env_or_default("MAILER_TEST_VAR", "fallback"), "fallback");
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("MAILER_REQUIRED", || {
            let err = env_required("MAILER_REQUIRED").unwrap_err();
            assert!(err.to_string().contains("MAILER_REQUIRED"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_env_optional_treats_blank_as_unset() {
        temp_env::with_var("MAILER_OPTIONAL", Some("   "), || {
            assert_eq!(env_optional("MAILER_OPTIONAL"), None);
        });
        temp_env::with_var("MAILER_OPTIONAL", Some("Bobo"), || {
            assert_eq!(env_optional("MAILER_OPTIONAL").as_deref(), Some("Bobo"));
        });
    }

    #[test]
    fn test_env_parse_default_and_value() {
        temp_env::with_var_unset("MAILER_PORT", || {
            assert_eq!(env_parse("MAILER_PORT", 587u16).unwrap(), 587);
        });
        temp_env::with_var("MAILER_PORT", Some(" 465 "), || {
            assert_eq!(env_parse("MAILER_PORT", 587u16).unwrap(), 465);
        });
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        temp_env::with_var("MAILER_PORT", Some("99999"), || {
            let err = env_parse("MAILER_PORT", 587u16).unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { ref key, .. } if key == "MAILER_PORT"));
        });
    }
}
