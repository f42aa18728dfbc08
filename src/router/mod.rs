// Router module - main routing and execution plane
// This file implements the execution router that selects chains, runs the
// failover loop, plans bridge paths, and serves the HTTP API.

pub mod api;
pub mod breaker;
pub mod engine;
pub mod health;
pub mod path;
pub mod retry;
pub mod selector;

pub use api::create_api_router;
pub use breaker::{BreakerState, BridgeBreakers};
pub use engine::{ExecutionRouter, ExecutionStats, RouteExecution, RouterFactory};
pub use health::{HealthMonitor, SystemHealth};
pub use path::{find_optimal_path, ChainNode, PathResult};
pub use retry::{RetryEntry, RetryQueue};
pub use selector::ChainSelector;
