//! Authentication configuration.

use serde::{Deserialize, Serialize};

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// JWT secret for HS256. Supports `env:VAR_NAME` indirection so the
    /// secret itself never lands in the config file.
    pub jwt_secret: Option<String>,
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

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let secret = self.resolve_jwt_secret()?;
        match secret {
            None => Err(ConfigValidationError::MissingJwtSecret),
            Some(secret) if secret.len() < 32 => Err(ConfigValidationError::JwtSecretTooShort),
            Some(_) => Ok(()),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error(
        "JWT secret is required: set auth.jwt_secret in config or point it at env:PLING_JWT_SECRET"
    )]
    MissingJwtSecret,

    #[error("JWT secret must be at least 32 characters long")]
    JwtSecretTooShort,

    #[error("environment variable '{0}' not found (referenced via env: in config)")]
    EnvVarNotFound(String),

    #[error("environment variable '{0}' is empty (referenced via env: in config)")]
    EnvVarEmpty(String),
}
