//! Command-line driver.

use crate::cloud::arm::ArmNetworkClient;
use crate::cloud::NetworkApi;
use crate::cluster::kube_cluster::KubeCluster;
use crate::cluster::ClusterApi;
use crate::config::{ChaosConfig, ConfigError, FailedVmConfig, DEFAULT_FAILED_VM_NAMESPACE};
use crate::context::ChaosContext;
use crate::failed_vm::{FailedVmCheck, MakeSimulator};
use crate::installer::{chart_values, HelmInstaller, CONTROLLER_NAMESPACE, CONTROLLER_RELEASE};
use crate::objects::ObjectManager;
use crate::orchestrator::{ChaosOrchestrator, RunOutcome};
use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use common::config::AzureCredentials;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "remedy-chaos",
    version,
    about = "Chaos workloads and leak checks for the Azure remedy controller"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the public IP chaos test and check for leaked resources.
    Pubip(PubipArgs),
    /// Fail a worker VM and check the controller's reapply attempts.
    FailedVm(FailedVmArgs),
    /// Remove harness leftovers and stuck controller finalizers.
    Cleanup(CleanupArgs),
    /// Install the controller, run the public IP test, uninstall.
    Ci(CiArgs),
}

/// Cluster and cloud access.
#[derive(Debug, Args)]
pub struct ConnectionArgs {
    /// Kubeconfig file. Falls back to the default client chain if unset.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Azure credentials file (cloud provider config format).
    #[arg(long)]
    pub credentials: PathBuf,
}

/// Overrides for [`ChaosConfig`] fields. Durations are in seconds.
#[derive(Debug, Args, Default)]
pub struct ChaosOverrides {
    #[arg(long)]
    pub run_duration: Option<u64>,
    #[arg(long)]
    pub svc_min_sleep: Option<u64>,
    #[arg(long)]
    pub svc_max_sleep: Option<u64>,
    #[arg(long)]
    pub min_svc_count: Option<usize>,
    #[arg(long)]
    pub max_svc_count: Option<usize>,
    #[arg(long)]
    pub orphaned_ip_min_sleep: Option<u64>,
    #[arg(long)]
    pub orphaned_ip_max_sleep: Option<u64>,
    #[arg(long)]
    pub shutdown_grace_period: Option<u64>,
    /// Namespace for churn services and public IP custom resources.
    #[arg(long)]
    pub namespace: Option<String>,
}

impl ChaosOverrides {
    /// Parse `vars`, apply the flags on top and validate the result.
    pub fn resolve(&self, vars: &HashMap<String, String>) -> Result<ChaosConfig, ConfigError> {
        let mut config = ChaosConfig::parse_vars(vars)?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&self, config: &mut ChaosConfig) {
        let secs = Duration::from_secs;
        if let Some(v) = self.run_duration {
            config.run_duration = secs(v);
        }
        if let Some(v) = self.svc_min_sleep {
            config.svc_min_sleep = secs(v);
        }
        if let Some(v) = self.svc_max_sleep {
            config.svc_max_sleep = secs(v);
        }
        if let Some(v) = self.min_svc_count {
            config.min_svc_count = v;
        }
        if let Some(v) = self.max_svc_count {
            config.max_svc_count = v;
        }
        if let Some(v) = self.orphaned_ip_min_sleep {
            config.orphaned_ip_min_sleep = secs(v);
        }
        if let Some(v) = self.orphaned_ip_max_sleep {
            config.orphaned_ip_max_sleep = secs(v);
        }
        if let Some(v) = self.shutdown_grace_period {
            config.shutdown_grace_period = secs(v);
        }
        if let Some(ns) = &self.namespace {
            config.namespace.clone_from(ns);
        }
    }
}

#[derive(Debug, Args)]
pub struct PubipArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    #[command(flatten)]
    pub overrides: ChaosOverrides,
}

#[derive(Debug, Args)]
pub struct FailedVmArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Reapply attempts required for a pass.
    #[arg(long)]
    pub required_attempts: Option<u32>,
    /// Seconds between status checks.
    #[arg(long)]
    pub check_interval: Option<u64>,
    /// Seconds to observe the controller.
    #[arg(long)]
    pub run_duration: Option<u64>,
    /// Worker pool of the VM to fail.
    #[arg(long)]
    pub worker_group: Option<String>,
    /// Namespace of the virtual machine objects.
    #[arg(long)]
    pub namespace: Option<String>,
    /// Controller repository providing the simulator make target.
    #[arg(long, default_value = ".")]
    pub repo_dir: PathBuf,
}

impl FailedVmArgs {
    /// Parse `vars`, apply the flags on top and validate the result.
    pub fn resolve(&self, vars: &HashMap<String, String>) -> Result<FailedVmConfig, ConfigError> {
        let mut config = FailedVmConfig::parse_vars(vars)?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&self, config: &mut FailedVmConfig) {
        if let Some(v) = self.required_attempts {
            config.required_attempts = v;
        }
        if let Some(v) = self.check_interval {
            config.check_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.run_duration {
            config.run_duration = Duration::from_secs(v);
        }
        if let Some(v) = &self.worker_group {
            config.worker_group.clone_from(v);
        }
        if let Some(v) = &self.namespace {
            config.namespace.clone_from(v);
        }
    }
}

#[derive(Debug, Args)]
pub struct CleanupArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Namespace holding the custom resources to remove.
    #[arg(long, default_value = DEFAULT_FAILED_VM_NAMESPACE)]
    pub namespace: String,
}

#[derive(Debug, Args)]
pub struct CiArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    #[command(flatten)]
    pub overrides: ChaosOverrides,

    /// Directory of the controller Helm chart.
    #[arg(long)]
    pub chart_dir: PathBuf,
    /// File holding the image tag to deploy.
    #[arg(long, default_value = "VERSION")]
    pub version_file: PathBuf,
    #[arg(long, default_value = CONTROLLER_RELEASE)]
    pub release: String,
    #[arg(long, default_value = CONTROLLER_NAMESPACE)]
    pub release_namespace: String,
}

/// Run the parsed command. `Ok(false)` means the check ran and failed.
pub async fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Command::Pubip(args) => run_pubip(&args.connection, &args.overrides).await,
        Command::FailedVm(args) => run_failed_vm(&args).await,
        Command::Cleanup(args) => run_cleanup(&args).await,
        Command::Ci(args) => run_ci(&args).await,
    }
}

struct Connected {
    context: Arc<ChaosContext>,
    cluster: Arc<dyn ClusterApi>,
    token_task: JoinHandle<()>,
}

impl Drop for Connected {
    fn drop(&mut self) {
        self.token_task.abort();
    }
}

async fn connect(args: &ConnectionArgs) -> anyhow::Result<Connected> {
    let credentials = AzureCredentials::from_file(&args.credentials)
        .context("Failed to load Azure credentials")?;
    let (network, token_task) = ArmNetworkClient::connect(&credentials)
        .await
        .context("Failed to connect to Azure Resource Manager")?;
    let scope = network.scope().clone();

    let cluster = match KubeCluster::connect(args.kubeconfig.as_deref()).await {
        Ok(cluster) => cluster,
        Err(e) => {
            token_task.abort();
            return Err(e).context("Failed to connect to the cluster");
        }
    };

    let network: Arc<dyn NetworkApi> = Arc::new(network);
    let cluster: Arc<dyn ClusterApi> = Arc::new(cluster);
    let context = Arc::new(ChaosContext::new(network, Arc::clone(&cluster), scope));
    Ok(Connected {
        context,
        cluster,
        token_task,
    })
}

async fn run_pubip(connection: &ConnectionArgs, overrides: &ChaosOverrides) -> anyhow::Result<bool> {
    let config = overrides
        .resolve(&std::env::vars().collect())
        .context("Invalid chaos configuration")?;

    let connected = connect(connection).await?;
    let orchestrator = ChaosOrchestrator::new(Arc::clone(&connected.context));

    match orchestrator.run(&config).await? {
        RunOutcome::Passed => {
            info!(target: "remedy_chaos.cli", "Public IP chaos test passed");
            Ok(true)
        }
        RunOutcome::Leaked(report) => {
            error!(
                target: "remedy_chaos.cli",
                leaked = %report,
                "Public IP chaos test failed: leaked resources"
            );
            Ok(false)
        }
    }
}

async fn run_failed_vm(args: &FailedVmArgs) -> anyhow::Result<bool> {
    let config = args
        .resolve(&std::env::vars().collect())
        .context("Invalid failed-VM configuration")?;

    let connected = connect(&args.connection).await?;
    let check = FailedVmCheck::new(
        ObjectManager::new(Arc::clone(&connected.cluster)),
        Arc::new(MakeSimulator::new(&args.repo_dir)),
    );
    Ok(check.run(&config).await?)
}

async fn run_cleanup(args: &CleanupArgs) -> anyhow::Result<bool> {
    let connected = connect(&args.connection).await?;
    let objects = &connected.context.objects;

    let custom_resources = objects.cleanup_custom_resources(&args.namespace).await?;
    let virtual_machines = objects
        .cleanup_virtual_machine_resources(&args.namespace)
        .await?;
    let finalizers = objects.cleanup_orphaned_finalizers().await?;

    let orchestrator = ChaosOrchestrator::new(Arc::clone(&connected.context));
    let summary = orchestrator.cleanup_sweep(&args.namespace).await?;

    info!(
        target: "remedy_chaos.cli",
        custom_resources,
        virtual_machines,
        finalizers,
        services = summary.services,
        load_balancer_children = summary.load_balancer_children,
        public_ips = summary.public_ips,
        "Cleanup complete"
    );
    Ok(true)
}

async fn run_ci(args: &CiArgs) -> anyhow::Result<bool> {
    let version = read_version(&args.version_file)?;
    let values = chart_values(&args.chart_dir, &version, &args.connection.credentials)?;
    let kubeconfig = args.connection.kubeconfig.as_deref();
    let helm = HelmInstaller::new();

    helm.install_release(
        kubeconfig,
        &args.release_namespace,
        &args.chart_dir,
        &args.release,
        &values,
    )
    .await?;

    let result = run_pubip(&args.connection, &args.overrides).await;

    if let Err(e) = helm
        .uninstall_release(kubeconfig, &args.release_namespace, &args.release)
        .await
    {
        warn!(target: "remedy_chaos.cli", error = %e, "Failed to uninstall controller release");
        if result.is_ok() {
            return Err(e.into());
        }
    }
    result
}

fn read_version(path: &Path) -> anyhow::Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read version file {}", path.display()))?;
    let version = raw.trim();
    anyhow::ensure!(!version.is_empty(), "Version file {} is empty", path.display());
    Ok(version.to_string())
}
