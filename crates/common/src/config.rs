//! Configuration types shared by the harness binaries.
//!
//! Cloud credentials come from a credentials file (the same document the
//! controller under test receives as its cloud provider config); everything
//! else comes from environment variables.

use crate::secret::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "remedy_chaos=info,common=info";

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("Failed to read credentials file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse credentials file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Credentials field '{0}' must not be empty")]
    EmptyField(&'static str),
}

/// Azure service principal and target scope.
///
/// Field names follow the Azure cloud provider config format, so the file can
/// be handed to the controller deployment unchanged.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureCredentials {
    pub subscription_id: String,
    pub resource_group: String,
    pub location: String,
    pub tenant_id: String,
    pub aad_client_id: String,
    pub aad_client_secret: SecretString,
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("subscription_id", &self.subscription_id)
            .field("resource_group", &self.resource_group)
            .field("location", &self.location)
            .field("tenant_id", &self.tenant_id)
            .field("aad_client_id", &self.aad_client_id)
            .field("aad_client_secret", &"[REDACTED]")
            .finish()
    }
}

impl AzureCredentials {
    /// Load credentials from a YAML (or JSON) file.
    pub fn from_file(path: &Path) -> Result<Self, CredentialsError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialsError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_yaml_str(&raw).map_err(|e| match e {
            CredentialsError::Parse { message, .. } => CredentialsError::Parse {
                path: display,
                message,
            },
            other => other,
        })
    }

    /// Parse credentials from a YAML (or JSON) document.
    pub fn from_yaml_str(raw: &str) -> Result<Self, CredentialsError> {
        let credentials: Self = serde_yaml::from_str(raw).map_err(|e| CredentialsError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        credentials.validate()?;
        Ok(credentials)
    }

    fn validate(&self) -> Result<(), CredentialsError> {
        let required = [
            ("subscriptionId", &self.subscription_id),
            ("resourceGroup", &self.resource_group),
            ("location", &self.location),
            ("tenantId", &self.tenant_id),
            ("aadClientId", &self.aad_client_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(CredentialsError::EmptyField(field));
            }
        }
        Ok(())
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive string.
    pub log_filter: String,
    /// Emit JSON-formatted logs.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// Load from `RUST_LOG` / `LOG_FORMAT`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Load from a map (for testing).
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let log_filter = vars
            .get("RUST_LOG")
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let json_logs = vars
            .get("LOG_FORMAT")
            .is_some_and(|v| v.eq_ignore_ascii_case("json"));
        Self {
            log_filter,
            json_logs,
        }
    }
}
