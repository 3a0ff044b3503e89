//! # Chaos Test Utilities
//!
//! Shared test utilities for the remedy-chaos harness.
//!
//! This crate provides:
//! - An in-memory cloud network with conditional load-balancer writes
//!   (`FakeNetwork`)
//! - An in-memory cluster with finalizer semantics and optional controller
//!   remediation (`FakeCluster`)
//! - A VM failure simulator stand-in (`FakeVmSimulator`)
//! - Fixed scopes and fast configurations
//! - Custom assertions (`NetworkAssertions` trait)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chaos_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let network = Arc::new(FakeNetwork::new(test_scope()));
//!     let cluster = Arc::new(FakeCluster::with_remediation(network.clone()));
//!     let context = Arc::new(ChaosContext::new(network.clone(), cluster, test_scope()));
//!
//!     let outcome = ChaosOrchestrator::new(context).run(&fast_chaos_config()).await?;
//!
//!     assert!(outcome.passed());
//!     network.assert_no_harness_resources();
//! }
//! ```

pub mod assertions;
pub mod fake_cluster;
pub mod fake_network;
pub mod fake_simulator;
pub mod fixtures;

// Re-export commonly used items
pub use assertions::*;
pub use fake_cluster::*;
pub use fake_network::*;
pub use fake_simulator::*;
pub use fixtures::*;
