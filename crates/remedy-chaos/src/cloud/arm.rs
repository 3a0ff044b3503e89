//! Azure Resource Manager implementation of [`NetworkApi`].
//!
//! Plain REST over `reqwest` with a bearer token from the shared token
//! manager. Create, update and delete block until the long-running
//! operation has settled, which is what every caller in this crate expects.

use super::model::{LoadBalancer, PublicIpAddress, PublicIpParameters};
use super::{NetworkApi, ResourceScope};
use crate::errors::NetworkError;
use common::config::AzureCredentials;
use common::secret::ExposeSecret;
use common::token_manager::{spawn_token_manager, TokenManagerConfig, TokenReceiver};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

// ===== Constants =====

/// Public Azure cloud management endpoint.
pub const ARM_ENDPOINT: &str = "https://management.azure.com";

/// Network resource provider API version.
pub const ARM_API_VERSION: &str = "2023-09-01";

/// Default interval between provisioning state polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default upper bound for a single long-running operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How long startup waits for the first access token.
pub const DEFAULT_TOKEN_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

const PROVISIONING_SUCCEEDED: &str = "Succeeded";
const PROVISIONING_FAILED: &[&str] = &["Failed", "Canceled"];

// ===== Configuration =====

#[derive(Debug, Clone)]
pub struct ArmClientConfig {
    /// Management endpoint, without trailing slash.
    pub endpoint: String,
    pub scope: ResourceScope,
    pub poll_interval: Duration,
    pub operation_timeout: Duration,
    pub request_timeout: Duration,
}

impl ArmClientConfig {
    pub fn new(scope: ResourceScope) -> Self {
        Self {
            endpoint: ARM_ENDPOINT.to_string(),
            scope,
            poll_interval: DEFAULT_POLL_INTERVAL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

// ===== Wire types =====

#[derive(Deserialize)]
struct ArmList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink", default)]
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct ArmErrorEnvelope {
    error: ArmErrorBody,
}

#[derive(Deserialize)]
struct ArmErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

// ===== Client =====

/// ARM networking client for one resource group.
pub struct ArmNetworkClient {
    http: reqwest::Client,
    config: ArmClientConfig,
    token: TokenReceiver,
}

impl ArmNetworkClient {
    /// Build a client around an existing token source.
    pub fn new(config: ArmClientConfig, token: TokenReceiver) -> Result<Self, NetworkError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NetworkError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            token,
        })
    }

    /// Start a token manager for the service principal in `credentials` and
    /// build a client scoped to its resource group.
    ///
    /// The returned handle owns the token refresh task; abort it when done.
    #[instrument(skip_all, fields(resource_group = %credentials.resource_group))]
    pub async fn connect(
        credentials: &AzureCredentials,
    ) -> Result<(Self, JoinHandle<()>), NetworkError> {
        let token_config = TokenManagerConfig::azure(
            credentials.tenant_id.clone(),
            credentials.aad_client_id.clone(),
            credentials.aad_client_secret.clone(),
        );

        let (handle, token) = tokio::time::timeout(
            DEFAULT_TOKEN_STARTUP_TIMEOUT,
            spawn_token_manager(token_config),
        )
        .await
        .map_err(|_| NetworkError::Timeout("initial access token".to_string()))??;

        let scope = ResourceScope::new(
            credentials.subscription_id.clone(),
            credentials.resource_group.clone(),
            credentials.location.clone(),
        );

        match Self::new(ArmClientConfig::new(scope), token) {
            Ok(client) => Ok((client, handle)),
            Err(e) => {
                handle.abort();
                Err(e)
            }
        }
    }

    pub fn scope(&self) -> &ResourceScope {
        &self.config.scope
    }

    fn resource_url(&self, relative: &str) -> String {
        format!(
            "{}{}/{relative}",
            self.config.endpoint,
            self.config.scope.network_provider_path()
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let token = self.token.token();
        self.http
            .request(method, url)
            .query(&[("api-version", ARM_API_VERSION)])
            .bearer_auth(token.expose_secret())
    }

    /// Request without the api-version query, for `nextLink` URLs that
    /// already carry it.
    fn request_absolute(&self, url: &str) -> RequestBuilder {
        let token = self.token.token();
        self.http.get(url).bearer_auth(token.expose_secret())
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, NetworkError> {
        let response = builder
            .send()
            .await
            .map_err(|e| NetworkError::Http(e.to_string()))?;
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, NetworkError> {
        let response = self.send(self.request(Method::GET, url)).await?;
        response
            .json()
            .await
            .map_err(|e| NetworkError::InvalidResponse(e.to_string()))
    }

    /// Poll `url` until the resource's provisioning state is terminal.
    async fn wait_for_provisioning<T: DeserializeOwned>(
        &self,
        url: &str,
        resource: &str,
    ) -> Result<T, NetworkError> {
        let deadline = tokio::time::Instant::now() + self.config.operation_timeout;

        loop {
            let body: Value = self.get_json(url).await?;
            let state = body
                .pointer("/properties/provisioningState")
                .and_then(Value::as_str)
                .unwrap_or(PROVISIONING_SUCCEEDED)
                .to_string();

            if state == PROVISIONING_SUCCEEDED {
                return serde_json::from_value(body)
                    .map_err(|e| NetworkError::InvalidResponse(e.to_string()));
            }
            if PROVISIONING_FAILED.contains(&state.as_str()) {
                return Err(NetworkError::ProvisioningFailed {
                    resource: resource.to_string(),
                    state,
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(NetworkError::Timeout(format!(
                    "{resource} to finish provisioning"
                )));
            }

            debug!(
                target: "remedy_chaos.cloud",
                resource = %resource,
                state = %state,
                "Waiting for provisioning"
            );
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Poll `url` until it answers 404.
    async fn wait_for_deletion(&self, url: &str, resource: &str) -> Result<(), NetworkError> {
        let deadline = tokio::time::Instant::now() + self.config.operation_timeout;

        loop {
            match self.send(self.request(Method::GET, url)).await {
                Err(NetworkError::NotFound(_)) => return Ok(()),
                Err(e) => return Err(e),
                Ok(_) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(NetworkError::Timeout(format!("{resource} to be deleted")));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait::async_trait]
impl NetworkApi for ArmNetworkClient {
    #[instrument(skip_all, fields(name = %name))]
    async fn create_public_ip(
        &self,
        name: &str,
        parameters: &PublicIpParameters,
    ) -> Result<PublicIpAddress, NetworkError> {
        let url = self.resource_url(&format!("publicIPAddresses/{name}"));

        self.send(
            self.request(Method::PUT, &url)
                .json(&parameters.request_body()),
        )
        .await?;

        self.wait_for_provisioning(&url, name).await
    }

    #[instrument(skip_all, fields(name = %name))]
    async fn delete_public_ip(&self, name: &str) -> Result<(), NetworkError> {
        let url = self.resource_url(&format!("publicIPAddresses/{name}"));

        self.send(self.request(Method::DELETE, &url)).await?;

        self.wait_for_deletion(&url, name).await
    }

    #[instrument(skip_all)]
    async fn list_public_ips(&self) -> Result<Vec<PublicIpAddress>, NetworkError> {
        let url = self.resource_url("publicIPAddresses");
        let mut page: ArmList<PublicIpAddress> = self.get_json(&url).await?;
        let mut addresses = std::mem::take(&mut page.value);

        while let Some(next) = page.next_link.take() {
            let response = self.send(self.request_absolute(&next)).await?;
            page = response
                .json()
                .await
                .map_err(|e| NetworkError::InvalidResponse(e.to_string()))?;
            addresses.append(&mut page.value);
        }

        Ok(addresses)
    }

    #[instrument(skip_all, fields(name = %name))]
    async fn get_load_balancer(&self, name: &str) -> Result<LoadBalancer, NetworkError> {
        let url = self.resource_url(&format!("loadBalancers/{name}"));
        let response = self.send(self.request(Method::GET, &url)).await?;

        let header_etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut load_balancer: LoadBalancer = response
            .json()
            .await
            .map_err(|e| NetworkError::InvalidResponse(e.to_string()))?;

        if load_balancer.etag.is_none() {
            load_balancer.etag = header_etag;
        }
        Ok(load_balancer)
    }

    #[instrument(skip_all, fields(name = %load_balancer.name))]
    async fn update_load_balancer(
        &self,
        load_balancer: &LoadBalancer,
    ) -> Result<LoadBalancer, NetworkError> {
        let url = self.resource_url(&format!("loadBalancers/{}", load_balancer.name));

        let mut builder = self.request(Method::PUT, &url).json(load_balancer);
        if let Some(etag) = &load_balancer.etag {
            builder = builder.header(reqwest::header::IF_MATCH, etag);
        }
        self.send(builder).await?;

        self.wait_for_provisioning(&url, &load_balancer.name).await
    }
}

/// Map non-success responses to [`NetworkError`].
async fn check_status(response: Response) -> Result<Response, NetworkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ArmErrorEnvelope>(&body) {
        Ok(envelope) => (envelope.error.code, envelope.error.message),
        Err(_) => (String::new(), body),
    };

    match status {
        StatusCode::NOT_FOUND => Err(NetworkError::NotFound(message)),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED | StatusCode::TOO_MANY_REQUESTS => {
            warn!(
                target: "remedy_chaos.cloud",
                status = status.as_u16(),
                code = %code,
                "Cloud API rejected a conflicting or throttled request"
            );
            Err(NetworkError::Conflict(format!("{code}: {message}")))
        }
        _ => Err(NetworkError::Api {
            status: status.as_u16(),
            code,
            message,
        }),
    }
}
