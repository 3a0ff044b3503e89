//! Chaos orchestrator.
//!
//! A run has three phases:
//!
//! 1. Pre-check: leftovers from an earlier run are swept once; if any
//!    survive, the run aborts before creating anything.
//! 2. Chaos: two uncoordinated actors run until the shared run duration has
//!    elapsed. Each checks its deadline only between iterations, so an
//!    iteration in flight always completes.
//! 3. Post-check: after a grace period for the controller to settle, a leak
//!    sweep decides the outcome. Leaks are cleaned up before reporting.

use crate::config::ChaosConfig;
use crate::context::ChaosContext;
use crate::errors::HarnessError;
use crate::leak::LeakReport;
use crate::load_balancer::RuleBinding;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// Final verdict of a chaos run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Passed,
    /// Orphans were found after the grace period (and then cleaned up).
    Leaked(LeakReport),
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, RunOutcome::Passed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceChurnStats {
    pub iterations: usize,
    pub services_created: usize,
    pub services_deleted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrphanedIpStats {
    pub iterations: usize,
    pub bound: usize,
    pub contended: usize,
}

/// What one cleanup sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub services: usize,
    pub custom_resources: usize,
    pub load_balancer_children: usize,
    pub public_ips: usize,
}

pub struct ChaosOrchestrator {
    context: Arc<ChaosContext>,
}

impl ChaosOrchestrator {
    pub fn new(context: Arc<ChaosContext>) -> Self {
        Self { context }
    }

    /// Run the full pre-check / chaos / post-check cycle.
    ///
    /// # Errors
    ///
    /// - `HarnessError::Precondition` if leftovers survive the pre-run sweep
    /// - `HarnessError::ActorFailed` if an actor task panicked
    /// - any collaborator error raised by an actor or a sweep
    #[instrument(skip_all, fields(namespace = %config.namespace))]
    pub async fn run(&self, config: &ChaosConfig) -> Result<RunOutcome, HarnessError> {
        config.validate()?;

        info!(
            target: "remedy_chaos.orchestrator",
            "Ensuring there are no leftover resources from a previous run"
        );
        self.precheck(&config.namespace).await?;

        info!(
            target: "remedy_chaos.orchestrator",
            run_duration_secs = config.run_duration.as_secs(),
            "Starting chaos actors"
        );
        let (churn, orphaned) = self.run_actors(config).await?;
        info!(
            target: "remedy_chaos.orchestrator",
            churn_iterations = churn.iterations,
            services_created = churn.services_created,
            services_deleted = churn.services_deleted,
            ip_iterations = orphaned.iterations,
            bound = orphaned.bound,
            contended = orphaned.contended,
            "Chaos actors finished"
        );

        info!(
            target: "remedy_chaos.orchestrator",
            grace_period_secs = config.shutdown_grace_period.as_secs(),
            "Waiting for the controller to settle"
        );
        tokio::time::sleep(config.shutdown_grace_period).await;

        let report = self.context.leak_detector().check(false).await?;
        if report.is_clean() {
            info!(target: "remedy_chaos.orchestrator", "No leaked resources found");
            return Ok(RunOutcome::Passed);
        }

        warn!(
            target: "remedy_chaos.orchestrator",
            leaked = %report,
            "Leaked resources found, cleaning up"
        );
        self.best_effort_sweep(&config.namespace).await;
        Ok(RunOutcome::Leaked(report))
    }

    async fn precheck(&self, namespace: &str) -> Result<(), HarnessError> {
        let detector = self.context.leak_detector();

        let report = detector.check(false).await?;
        if report.is_clean() {
            return Ok(());
        }

        warn!(
            target: "remedy_chaos.orchestrator",
            leftovers = %report,
            "Found leftovers from a previous run, cleaning up"
        );
        self.best_effort_sweep(namespace).await;

        let report = detector.check(false).await?;
        if report.is_clean() {
            return Ok(());
        }
        Err(HarnessError::Precondition(report))
    }

    /// Remove every harness-named leftover: churn services, public IP custom
    /// resources, load-balancer children, then public IPs (an address cannot
    /// be deleted while a frontend configuration still references it).
    pub async fn cleanup_sweep(&self, namespace: &str) -> Result<CleanupSummary, HarnessError> {
        let services = self.context.objects.cleanup_services(None, namespace).await?;
        let custom_resources = self
            .context
            .objects
            .cleanup_custom_resources(namespace)
            .await?;
        let load_balancer_children = self.context.load_balancer.remove_orphans().await?;
        let public_ips = self.context.public_ips.cleanup_all().await?;

        let summary = CleanupSummary {
            services,
            custom_resources,
            load_balancer_children,
            public_ips,
        };
        info!(
            target: "remedy_chaos.orchestrator",
            services,
            custom_resources,
            load_balancer_children,
            public_ips,
            "Cleanup sweep complete"
        );
        Ok(summary)
    }

    async fn best_effort_sweep(&self, namespace: &str) {
        if let Err(e) = self.cleanup_sweep(namespace).await {
            warn!(
                target: "remedy_chaos.orchestrator",
                error = %e,
                "Cleanup sweep failed"
            );
        }
    }

    /// Spawn both actors and wait for both. An actor error is reported only
    /// after the other actor has finished too.
    async fn run_actors(
        &self,
        config: &ChaosConfig,
    ) -> Result<(ServiceChurnStats, OrphanedIpStats), HarnessError> {
        let churn = tokio::spawn(service_churn_actor(
            Arc::clone(&self.context),
            config.clone(),
        ));
        let orphaned = tokio::spawn(orphaned_ip_actor(
            Arc::clone(&self.context),
            config.clone(),
        ));

        let (churn, orphaned) = tokio::join!(churn, orphaned);

        let churn = actor_result("service-churn", churn);
        let orphaned = actor_result("orphaned-ip", orphaned);
        Ok((churn?, orphaned?))
    }
}

fn actor_result<T>(
    actor: &'static str,
    joined: Result<Result<T, HarnessError>, JoinError>,
) -> Result<T, HarnessError> {
    match joined {
        Ok(Ok(stats)) => Ok(stats),
        Ok(Err(e)) => {
            warn!(target: "remedy_chaos.orchestrator", actor, error = %e, "Chaos actor failed");
            Err(e)
        }
        Err(e) => Err(HarnessError::ActorFailed {
            actor,
            message: e.to_string(),
        }),
    }
}

// ===== Actors =====

/// Create a random number of services, wait, delete exactly those.
async fn service_churn_actor(
    context: Arc<ChaosContext>,
    config: ChaosConfig,
) -> Result<ServiceChurnStats, HarnessError> {
    let deadline = Instant::now() + config.run_duration;
    let mut stats = ServiceChurnStats::default();

    while Instant::now() < deadline {
        let count = random_count(config.min_svc_count, config.max_svc_count);
        let names = context
            .objects
            .create_services(count, &config.namespace)
            .await?;
        stats.services_created += names.len();

        tokio::time::sleep(random_duration(config.svc_min_sleep, config.svc_max_sleep)).await;

        stats.services_deleted += context
            .objects
            .cleanup_services(Some(&names), &config.namespace)
            .await?;
        stats.iterations += 1;
    }

    Ok(stats)
}

/// Create one public IP and try to bind it into the load balancer. A bound
/// IP is mirrored as a custom resource for a while, then the custom resource
/// and the rules are removed and the address is left for the controller to
/// reclaim. A contended IP is deleted right away.
async fn orphaned_ip_actor(
    context: Arc<ChaosContext>,
    config: ChaosConfig,
) -> Result<OrphanedIpStats, HarnessError> {
    let deadline = Instant::now() + config.run_duration;
    let mut stats = OrphanedIpStats::default();
    let namespace = config.namespace.as_str();

    while Instant::now() < deadline {
        let ips = context.public_ips.create(1).await?;

        match context.load_balancer.add_rules(&ips).await? {
            RuleBinding::Bound => {
                for ip in &ips {
                    context.objects.create_custom_resource(ip, namespace).await?;
                }
                tokio::time::sleep(random_duration(
                    config.orphaned_ip_min_sleep,
                    config.orphaned_ip_max_sleep,
                ))
                .await;
                for ip in &ips {
                    context.objects.delete_custom_resource(ip, namespace).await?;
                }
                context.load_balancer.delete_rules(&ips).await?;
                stats.bound += 1;
            }
            RuleBinding::Contended { reason } => {
                warn!(
                    target: "remedy_chaos.orchestrator",
                    reason = %reason,
                    "Failed to create load balancer rules for public IP, releasing it. \
                     Check the load balancer if this persists"
                );
                for ip in &ips {
                    context.public_ips.delete(ip).await?;
                }
                stats.contended += 1;
            }
        }

        stats.iterations += 1;
        tokio::time::sleep(random_duration(
            config.orphaned_ip_min_sleep,
            config.orphaned_ip_max_sleep,
        ))
        .await;
    }

    Ok(stats)
}

// ===== Randomness =====

/// Uniform in `[min, max]`.
fn random_count(min: usize, max: usize) -> usize {
    if min >= max {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}

/// Uniform in `[min, max]` at millisecond granularity.
fn random_duration(min: Duration, max: Duration) -> Duration {
    let min_ms = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if min_ms >= max_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}
