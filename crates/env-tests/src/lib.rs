//! Environment Test Suite
//!
//! Live tests for the Azure remedy controller: they run the harness against a
//! real shoot cluster and its Azure resource group instead of the in-memory
//! fakes used by the `remedy-chaos` tests.
//!
//! # Features
//!
//! - `smoke`: Cluster reachability, controller deployment, leak check (1min)
//! - `flows`: One orphaned public IP, reclaimed by the controller (up to 15min)
//! - `chaos`: A full public IP chaos run (20min+)
//! - `failed-vm`: The failed-VM reapply check (10min+)
//! - `all`: Enable all test categories
//!
//! # Prerequisites
//!
//! 1. `KUBECONFIG` pointing at the shoot cluster
//! 2. `REMEDY_CHAOS_CREDENTIALS` pointing at the cloud provider config the
//!    controller itself uses
//! 3. For `failed-vm`: `REMEDY_CONTROLLER_REPO` pointing at a controller
//!    checkout (the simulator is started through its Makefile) and a worker
//!    pool named `fail-me`
//!
//! # Usage
//!
//! ```bash
//! # From repo root - runs 0 env-tests (no default features)
//! cargo test
//!
//! # Smoke tests only
//! cargo test -p env-tests --features smoke
//!
//! # Full suite
//! cargo test -p env-tests --features all
//! ```

pub mod cluster;
pub mod eventual;
