//! Authentication configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication configuration (`[auth]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require a valid token on chat and file-watch connections.
    pub enabled: bool,

    /// HS256 secret. `env:VAR_NAME` reads it from the environment.
    /// Required when `enabled` is true.
    pub jwt_secret: Option<String>,

    /// Cookie checked for a token when no Authorization header is sent.
    pub cookie_name: String,

    /// The one email allowed in. Takes priority over the domain list.
    pub allowed_email: Option<String>,

    /// Email domains allowed in when `allowed_email` is unset.
    pub allowed_email_domains: Vec<String>,

    /// Lifetime of minted tokens.
    pub token_ttl_hours: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jwt_secret: None,
            cookie_name: "donna_session".to_string(),
            allowed_email: None,
            allowed_email_domains: Vec::new(),
            token_ttl_hours: 24 * 7,
        }
    }
}

impl AuthConfig {
    /// Resolve the JWT secret, expanding `env:VAR_NAME` syntax.
    pub fn resolve_jwt_secret(&self) -> Result<Option<String>, ConfigValidationError> {
        match &self.jwt_secret {
            None => Ok(None),
            Some(value) => {
                if let Some(var_name) = value.strip_prefix("env:") {
                    match std::env::var(var_name) {
                        Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
                        Ok(_) => Err(ConfigValidationError::EnvVarEmpty(var_name.to_string())),
                        Err(_) => Err(ConfigValidationError::EnvVarNotFound(var_name.to_string())),
                    }
                } else {
                    Ok(Some(value.clone()))
                }
            }
        }
    }

    /// Validate the configuration. Disabled auth is always valid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !self.enabled {
            return Ok(());
        }

        let secret = self
            .resolve_jwt_secret()?
            .ok_or(ConfigValidationError::MissingJwtSecret)?;
        if secret.len() < 32 {
            return Err(ConfigValidationError::JwtSecretTooShort);
        }
        Ok(())
    }

    /// Whether `email` may sign in.
    ///
    /// An exact `allowed_email` wins over the domain list. With neither set,
    /// everyone is allowed.
    pub fn is_email_allowed(&self, email: &str) -> bool {
        let email = email.trim();
        if let Some(allowed) = self.allowed_email.as_deref().filter(|e| !e.trim().is_empty()) {
            return email.eq_ignore_ascii_case(allowed.trim());
        }
        if self.allowed_email_domains.is_empty() {
            return true;
        }

        let Some((_, domain)) = email.rsplit_once('@') else {
            return false;
        };
        self.allowed_email_domains
            .iter()
            .map(|d| d.trim().trim_start_matches('@'))
            .any(|d| d.eq_ignore_ascii_case(domain))
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error(
        "JWT secret is required when auth is enabled. Set auth.jwt_secret or DONNA__AUTH__JWT_SECRET."
    )]
    MissingJwtSecret,

    #[error("JWT secret must be at least 32 characters long.")]
    JwtSecretTooShort,

    #[error("Environment variable '{0}' not found (referenced via env:{0} in config).")]
    EnvVarNotFound(String),

    #[error("Environment variable '{0}' is empty (referenced via env:{0} in config).")]
    EnvVarEmpty(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "a-very-long-and-secure-jwt-secret-that-is-at-least-32-chars";

    #[test]
    fn test_disabled_auth_is_valid_without_secret() {
        let config = AuthConfig::default();
        assert!(!config.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_enabled_auth_requires_secret() {
        let mut config = AuthConfig {
            enabled: true,
            ..AuthConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigValidationError::MissingJwtSecret
        );

        config.jwt_secret = Some("tooshort".to_string());
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigValidationError::JwtSecretTooShort
        );

        config.jwt_secret = Some(SECRET.to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_secret_missing_var() {
        let config = AuthConfig {
            enabled: true,
            jwt_secret: Some("env:DONNA_TEST_SURELY_UNSET_SECRET_VAR".to_string()),
            ..AuthConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigValidationError::EnvVarNotFound("DONNA_TEST_SURELY_UNSET_SECRET_VAR".to_string())
        );
    }

    #[test]
    fn test_email_allow_list() {
        let mut config = AuthConfig::default();
        assert!(config.is_email_allowed("anyone@anywhere.org"));

        config.allowed_email_domains = vec!["example.com".to_string()];
        assert!(config.is_email_allowed("ada@Example.com"));
        assert!(!config.is_email_allowed("ada@other.com"));
        assert!(!config.is_email_allowed("not-an-email"));

        config.allowed_email = Some("boss@other.com".to_string());
        assert!(config.is_email_allowed("boss@other.com"));
        assert!(!config.is_email_allowed("ada@example.com"));
    }
}
