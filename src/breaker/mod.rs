// Failure-driven circuit breaker for the upstream provider

pub mod config;
pub mod state;

pub use config::CircuitBreakerConfig;
pub use state::{CircuitBreaker, CircuitBreakerStats, CircuitPhase};
