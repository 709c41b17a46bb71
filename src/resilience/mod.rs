pub mod backoff;
pub mod call;
pub mod circuit_breaker;
pub mod registry;

pub use backoff::{Backoff, RetryPolicy};
pub use call::{call, CallError, CallOptions, Classify};
pub use circuit_breaker::{Admission, BreakerConfig, CircuitBreaker, CircuitOpen, CircuitState};
pub use registry::BreakerRegistry;
