pub mod health;

pub use health::{HealthResponse, HealthServer, HealthState, HealthStatus};
