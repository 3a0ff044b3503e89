//! Eventual consistency helpers for controller-dependent tests.
//!
//! The controller reconciles asynchronously, so assertions about what it did
//! are retried with exponential backoff until a category-specific deadline.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Categories of eventual consistency with their deadlines.
#[derive(Debug, Clone, Copy)]
pub enum ConsistencyCategory {
    /// The controller picks up a new or deleted custom resource (2x 30s).
    ControllerReconcile,

    /// A load-balancer write becomes visible to readers (2x 60s).
    LoadBalancerUpdate,

    /// The controller reclaims an orphaned public IP, including its
    /// load-balancer children. Same as the default shutdown grace period.
    AddressReclaim,
}

impl ConsistencyCategory {
    /// Get the maximum timeout for this consistency category.
    pub fn timeout(&self) -> Duration {
        match self {
            ConsistencyCategory::ControllerReconcile => Duration::from_secs(60),
            ConsistencyCategory::LoadBalancerUpdate => Duration::from_secs(120),
            ConsistencyCategory::AddressReclaim => Duration::from_secs(900),
        }
    }

    fn initial_delay(&self) -> Duration {
        match self {
            ConsistencyCategory::AddressReclaim => Duration::from_secs(5),
            _ => Duration::from_millis(500),
        }
    }

    /// Backoff never waits longer than this between attempts.
    fn max_delay(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// Assert that a condition becomes true within the timeout for the given
/// consistency category.
///
/// The delay between attempts starts at the category's initial delay,
/// doubles after every attempt and is capped at 30s and at the remaining
/// time.
///
/// # Example
///
/// ```no_run
/// use env_tests::eventual::{assert_eventually, ConsistencyCategory};
///
/// # async fn address_gone() -> bool { true }
/// # async fn example() {
/// assert_eventually(ConsistencyCategory::AddressReclaim, || async {
///     address_gone().await
/// })
/// .await
/// .expect("Controller should reclaim the address");
/// # }
/// ```
pub async fn assert_eventually<F, Fut>(
    category: ConsistencyCategory,
    mut condition: F,
) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let timeout = category.timeout();
    let mut delay = category.initial_delay();
    let start = Instant::now();

    loop {
        if condition().await {
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(format!(
                "Condition not met within {:?} (category: {:?})",
                timeout, category
            ));
        }

        sleep(delay).await;

        delay = (delay * 2)
            .min(category.max_delay())
            .min(timeout.saturating_sub(start.elapsed()));
    }
}
