//! Error types for the chaos harness.
//!
//! Each collaborator layer has its own error enum; [`HarnessError`] is the
//! top-level taxonomy the orchestrator and the CLI work with. Routine
//! load-balancer write contention is not an error at all, see
//! [`crate::load_balancer::RuleBinding`].

use crate::config::ConfigError;
use crate::leak::LeakReport;
use common::token_manager::TokenError;
use thiserror::Error;

/// Errors from the cloud networking API.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Transport-level failure (connect, timeout, body decode).
    #[error("Network request failed: {0}")]
    Http(String),

    /// The API answered with an error status.
    #[error("Cloud API error (status {status}, code {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Write rejected because of a concurrent modification or throttling.
    #[error("Conflicting update rejected: {0}")]
    Conflict(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Long-running operation ended in a non-success state.
    #[error("Provisioning of {resource} ended in state {state}")]
    ProvisioningFailed { resource: String, state: String },

    /// Long-running operation did not finish in time.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Token acquisition failed: {0}")]
    Token(#[from] TokenError),
}

impl NetworkError {
    /// Whether the error signals a concurrent writer or throttling.
    pub fn is_conflict(&self) -> bool {
        matches!(self, NetworkError::Conflict(_))
    }
}

/// Errors from the cluster API.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Cluster object not found: {0}")]
    NotFound(String),

    #[error("Cluster API error (status {code}): {message}")]
    Api { code: u16, message: String },

    /// Client construction or transport failure.
    #[error("Cluster client error: {0}")]
    Client(String),

    /// An object did not have the expected shape.
    #[error("Invalid cluster object: {0}")]
    InvalidObject(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => {
                ClusterError::NotFound(response.message)
            }
            kube::Error::Api(response) => ClusterError::Api {
                code: response.code,
                message: response.message,
            },
            other => ClusterError::Client(other.to_string()),
        }
    }
}

/// Top-level harness error.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An external deployment command failed.
    #[error("Installer failed: {0}")]
    Installer(String),

    /// The external VM-failure simulator could not be started.
    #[error("VM failure simulator failed: {0}")]
    Simulator(String),

    /// Orphaned resources were found after a run.
    #[error("Resource leaks detected: {0}")]
    LeakDetected(LeakReport),

    /// Leftovers from an earlier run survived the pre-run cleanup.
    #[error("Pre-run cleanup did not remove leftover resources: {0}")]
    Precondition(LeakReport),

    /// A chaos actor task panicked or was cancelled.
    #[error("Chaos actor '{actor}' failed: {message}")]
    ActorFailed { actor: &'static str, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
