//! Shared plumbing for the remedy-chaos harness crates.

#![warn(clippy::pedantic)]

/// Credentials file and observability configuration
pub mod config;

/// Tracing subscriber setup
pub mod observability;

/// Secret types that prevent accidental logging
pub mod secret;

/// Azure AD client credentials token management with automatic refresh
pub mod token_manager;
