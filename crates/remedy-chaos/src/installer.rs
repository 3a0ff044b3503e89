//! Deploys the controller under test with Helm.

use crate::errors::HarnessError;
use serde_yaml::{Mapping, Value};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, instrument, warn};

/// Release (and chart) name of the controller deployment.
pub const CONTROLLER_RELEASE: &str = "remedy-controller-azure";

/// Namespace the controller release is installed into.
pub const CONTROLLER_NAMESPACE: &str = "default";

/// Runs the `helm` binary.
#[derive(Debug, Clone)]
pub struct HelmInstaller {
    helm: PathBuf,
}

impl Default for HelmInstaller {
    fn default() -> Self {
        Self {
            helm: PathBuf::from("helm"),
        }
    }
}

impl HelmInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `helm` executable instead of the one on `PATH`.
    pub fn with_binary(helm: impl Into<PathBuf>) -> Self {
        Self { helm: helm.into() }
    }

    /// `helm upgrade --install` `chart` as `release`, with `values` passed
    /// through a temporary values file.
    #[instrument(skip_all, fields(release = %release, namespace = %namespace))]
    pub async fn install_release(
        &self,
        kubeconfig: Option<&Path>,
        namespace: &str,
        chart: &Path,
        release: &str,
        values: &Value,
    ) -> Result<(), HarnessError> {
        let rendered = serde_yaml::to_string(values)
            .map_err(|e| HarnessError::Installer(format!("Failed to render values: {e}")))?;
        let mut values_file = tempfile::Builder::new()
            .prefix("remedy-values-")
            .suffix(".yaml")
            .tempfile()?;
        values_file.write_all(rendered.as_bytes())?;
        values_file.flush()?;

        let args = install_args(namespace, chart, release, values_file.path());
        self.run(kubeconfig, args).await?;

        info!(target: "remedy_chaos.installer", "Installed controller release");
        Ok(())
    }

    #[instrument(skip_all, fields(release = %release, namespace = %namespace))]
    pub async fn uninstall_release(
        &self,
        kubeconfig: Option<&Path>,
        namespace: &str,
        release: &str,
    ) -> Result<(), HarnessError> {
        self.run(kubeconfig, uninstall_args(namespace, release))
            .await?;
        info!(target: "remedy_chaos.installer", "Uninstalled controller release");
        Ok(())
    }

    async fn run(&self, kubeconfig: Option<&Path>, args: Vec<OsString>) -> Result<(), HarnessError> {
        let mut command = Command::new(&self.helm);
        command.args(&args).kill_on_drop(true);
        if let Some(path) = kubeconfig {
            command.env("KUBECONFIG", path);
        }

        let output = command.output().await.map_err(|e| {
            HarnessError::Installer(format!("Failed to run {}: {e}", self.helm.display()))
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(
            target: "remedy_chaos.installer",
            status = %output.status,
            stderr = %stderr,
            "helm command failed"
        );
        Err(HarnessError::Installer(format!(
            "helm exited with {}: {stderr}",
            output.status
        )))
    }
}

fn install_args(namespace: &str, chart: &Path, release: &str, values_file: &Path) -> Vec<OsString> {
    vec![
        "upgrade".into(),
        "--install".into(),
        release.into(),
        chart.into(),
        "--namespace".into(),
        namespace.into(),
        "--values".into(),
        values_file.into(),
    ]
}

fn uninstall_args(namespace: &str, release: &str) -> Vec<OsString> {
    vec![
        "uninstall".into(),
        release.into(),
        "--namespace".into(),
        namespace.into(),
    ]
}

/// Values for the controller chart: the chart's own `values.yaml` with
/// `image.tag` set to `version` and `cloudProviderConfig` set to the
/// credentials document encoded as JSON.
pub fn chart_values(
    chart_dir: &Path,
    version: &str,
    credentials_file: &Path,
) -> Result<Value, HarnessError> {
    let values_raw = std::fs::read_to_string(chart_dir.join("values.yaml"))?;
    let credentials_raw = std::fs::read_to_string(credentials_file)?;
    merge_chart_values(&values_raw, version, &credentials_raw)
}

fn merge_chart_values(
    values_raw: &str,
    version: &str,
    credentials_raw: &str,
) -> Result<Value, HarnessError> {
    let mut values: Value = serde_yaml::from_str(values_raw)
        .map_err(|e| HarnessError::Installer(format!("Invalid chart values: {e}")))?;
    let credentials: serde_json::Value = serde_yaml::from_str(credentials_raw)
        .map_err(|e| HarnessError::Installer(format!("Invalid credentials file: {e}")))?;
    let cloud_provider_config = serde_json::to_string(&credentials)
        .map_err(|e| HarnessError::Installer(format!("Failed to encode credentials: {e}")))?;

    let root = values
        .as_mapping_mut()
        .ok_or_else(|| HarnessError::Installer("Chart values are not a mapping".to_string()))?;

    if !root.contains_key("image") {
        root.insert(Value::from("image"), Value::Mapping(Mapping::new()));
    }
    let image = root
        .get_mut("image")
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| HarnessError::Installer("Chart value 'image' is not a mapping".to_string()))?;
    image.insert(Value::from("tag"), Value::from(version.trim()));

    root.insert(
        Value::from("cloudProviderConfig"),
        Value::from(cloud_provider_config),
    );
    Ok(values)
}
