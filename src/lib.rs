// Library root module for xchain-router
// This file defines the public API and module structure for the
// cross-chain execution router library.

pub mod adapters;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod security;
pub mod telemetry;
