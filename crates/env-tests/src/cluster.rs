//! Connection to the live environment.
//!
//! [`LiveEnvironment::connect`] reads the same inputs as the `remedy-chaos`
//! binary and fails with an actionable message when one is missing.

use common::config::{AzureCredentials, CredentialsError};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use remedy_chaos::cloud::arm::ArmNetworkClient;
use remedy_chaos::cloud::{NetworkApi, ResourceScope};
use remedy_chaos::cluster::kube_cluster::KubeCluster;
use remedy_chaos::cluster::ClusterApi;
use remedy_chaos::context::ChaosContext;
use remedy_chaos::errors::NetworkError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Path of the Azure cloud provider config.
pub const CREDENTIALS_ENV: &str = "REMEDY_CHAOS_CREDENTIALS";

/// Controller checkout used to start the VM failure simulator.
pub const CONTROLLER_REPO_ENV: &str = "REMEDY_CONTROLLER_REPO";

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{0} is not set. Export it before running env-tests")]
    MissingVariable(&'static str),

    #[error("Failed to load Azure credentials: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("Azure Resource Manager unavailable: {0}")]
    Network(#[from] NetworkError),

    #[error("Cluster unavailable (check KUBECONFIG): {0}")]
    Cluster(#[from] kube::Error),

    #[error("Controller not ready: {0}")]
    ControllerNotReady(String),
}

/// Live cloud and cluster handles for one test.
pub struct LiveEnvironment {
    pub context: Arc<ChaosContext>,
    pub cluster: Arc<dyn ClusterApi>,
    pub scope: ResourceScope,
    client: Client,
    token_task: JoinHandle<()>,
}

impl Drop for LiveEnvironment {
    fn drop(&mut self) {
        self.token_task.abort();
    }
}

impl LiveEnvironment {
    /// Connect using `REMEDY_CHAOS_CREDENTIALS` and the default kube client
    /// chain (which honors `KUBECONFIG`).
    pub async fn connect() -> Result<Self, EnvError> {
        let path = required_path(CREDENTIALS_ENV)?;
        let credentials = AzureCredentials::from_file(&path)?;

        let client = Client::try_default().await?;
        let (network, token_task) = ArmNetworkClient::connect(&credentials).await?;
        let scope = network.scope().clone();

        let network: Arc<dyn NetworkApi> = Arc::new(network);
        let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(client.clone()));
        let context = Arc::new(ChaosContext::new(
            network,
            Arc::clone(&cluster),
            scope.clone(),
        ));

        Ok(Self {
            context,
            cluster,
            scope,
            client,
            token_task,
        })
    }

    /// Raw client for checks outside the harness's own API surface.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Check that the controller deployment has at least one ready replica.
    pub async fn check_controller_ready(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<i32, EnvError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = deployments.get(name).await?;

        let ready = deployment
            .status
            .and_then(|status| status.ready_replicas)
            .unwrap_or(0);
        if ready < 1 {
            return Err(EnvError::ControllerNotReady(format!(
                "deployment {namespace}/{name} has no ready replicas"
            )));
        }
        Ok(ready)
    }
}

/// Path from a required environment variable.
pub fn required_path(name: &'static str) -> Result<PathBuf, EnvError> {
    std::env::var_os(name)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .ok_or(EnvError::MissingVariable(name))
}
