//! Fault tolerance for the vision model dependency.

mod breaker;
mod retry;

pub use breaker::{CircuitBreaker, CircuitBreakerState, CircuitState};
pub use retry::ResilientVisionClient;
