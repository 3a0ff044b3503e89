//! Remedy Chaos Library
//!
//! Chaos workloads and leak detection for the Azure remedy controller. The
//! harness creates public IPs, load-balancer rules, Kubernetes services and
//! custom resources while the controller runs, then checks that nothing it
//! was responsible for cleaning up was left behind.
//!
//! # Modules
//!
//! - `cli` - Command-line driver
//! - `cloud` - Cloud networking API seam and its ARM implementation
//! - `cluster` - Kubernetes API seam and its `kube` implementation
//! - `config` - Run configuration
//! - `context` - Shared managers for one run
//! - `errors` - Error types
//! - `failed_vm` - Failed-VM remediation check
//! - `identity` - Resource naming scheme
//! - `installer` - Helm deployment of the controller
//! - `leak` - Leak detection
//! - `load_balancer` - Load-balancer compound rules
//! - `objects` - Services and custom resources
//! - `orchestrator` - Chaos run phases and actors
//! - `public_ip` - Public IP lifecycle

pub mod cli;
pub mod cloud;
pub mod cluster;
pub mod config;
pub mod context;
pub mod errors;
pub mod failed_vm;
pub mod identity;
pub mod installer;
pub mod leak;
pub mod load_balancer;
pub mod objects;
pub mod orchestrator;
pub mod public_ip;
