// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Domain
pub mod campaign;
pub mod message;
pub mod scheduler;
pub mod smssync;
pub mod store;
pub mod transport;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod shutdown;
pub mod tasks;
