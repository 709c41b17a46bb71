use std::future::Future;
use std::time::Duration;

use super::registry::BreakerRegistry;

/// Whether an error means the downstream is unhealthy. Business errors
/// (not found, invalid input, ...) are healthy responses and must return false.
pub trait Classify {
    fn counts_as_failure(&self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    #[error("service unavailable: circuit '{0}' is open")]
    CircuitOpen(String),
    #[error("deadline exceeded after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Inner(E),
}

impl<E> CallError<E> {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CallError::CircuitOpen(_) | CallError::Timeout(_))
    }
}

#[derive(Clone, Debug)]
pub struct CallOptions {
    pub breaker: String,
    pub timeout: Duration,
}

impl CallOptions {
    pub fn new(breaker: impl Into<String>, timeout: Duration) -> Self {
        Self {
            breaker: breaker.into(),
            timeout,
        }
    }
}

/// Runs `f` under `timeout → breaker → f`. A timeout counts as a failure.
pub async fn call<T, E, F, Fut>(
    registry: &BreakerRegistry,
    opts: &CallOptions,
    f: F,
) -> Result<T, CallError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify,
{
    let breaker = registry.get(&opts.breaker);
    let admission = breaker
        .admit()
        .map_err(|open| CallError::CircuitOpen(open.0))?;

    match tokio::time::timeout(opts.timeout, f()).await {
        Err(_) => {
            admission.failure();
            Err(CallError::Timeout(opts.timeout))
        }
        Ok(Ok(value)) => {
            admission.success();
            Ok(value)
        }
        Ok(Err(e)) => {
            if e.counts_as_failure() {
                admission.failure();
            } else {
                admission.success();
            }
            Err(CallError::Inner(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{BreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Down,
        Missing,
    }

    impl Classify for TestError {
        fn counts_as_failure(&self) -> bool {
            matches!(self, TestError::Down)
        }
    }

    fn registry() -> BreakerRegistry {
        BreakerRegistry::new(BreakerConfig {
            max_failures: 2,
            timeout: Duration::from_secs(60),
            ..BreakerConfig::default()
        })
    }

    #[tokio::test]
    async fn business_errors_do_not_trip() {
        let registry = registry();
        let opts = CallOptions::new("svc", Duration::from_secs(1));
        for _ in 0..5 {
            let r: Result<(), _> = call(&registry, &opts, || async { Err(TestError::Missing) }).await;
            assert!(matches!(r, Err(CallError::Inner(TestError::Missing))));
        }
        assert_eq!(registry.get("svc").state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_circuit_skips_the_call() {
        let registry = registry();
        let opts = CallOptions::new("svc", Duration::from_secs(1));
        let invoked = AtomicU32::new(0);
        for _ in 0..4 {
            let _: Result<(), _> = call(&registry, &opts, || async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Down)
            })
            .await;
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let registry = registry();
        let opts = CallOptions::new("slow", Duration::from_millis(10));
        for _ in 0..2 {
            let r: Result<(), CallError<TestError>> = call(&registry, &opts, || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
            .await;
            assert!(matches!(r, Err(CallError::Timeout(_))));
        }
        assert_eq!(registry.get("slow").state(), CircuitState::Open);
    }
}
