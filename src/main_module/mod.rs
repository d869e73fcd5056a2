//! HTTP server assembly: router, middleware, health checks and shutdown.

mod health;
mod server;

pub use health::{configure_health_routes, health_check, health_check_simple};
pub use server::{build_router, run_server, shutdown_signal};
