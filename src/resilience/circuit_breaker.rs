//! Circuit breaker guarding a single downstream.
//!
//! - **Closed**: calls flow; consecutive failures are counted.
//! - **Open**: calls are rejected until `timeout` has elapsed since the trip.
//! - **HalfOpen**: at most `half_open_probes` concurrent probes; `success_threshold`
//!   successes close the circuit, any failure re-opens it.

use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct BreakerConfig {
    pub max_failures: u32,
    pub timeout: Duration,
    pub half_open_probes: u32,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout: Duration::from_secs(30),
            half_open_probes: 3,
            success_threshold: 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
enum State {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { successes: u32, in_flight: u32 },
}

impl State {
    fn public(&self) -> CircuitState {
        match self {
            State::Closed { .. } => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("circuit '{0}' is open")]
pub struct CircuitOpen(pub String);

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: RwLock<State>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(State::Closed { failures: 0 }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.read().public()
    }

    /// Admission check. The returned ticket must be settled with
    /// [`Admission::success`] or [`Admission::failure`]; dropping it unsettled
    /// only releases a half-open probe slot.
    pub fn admit(&self) -> Result<Admission<'_>, CircuitOpen> {
        let mut state = self.write();
        match *state {
            State::Closed { .. } => Ok(Admission::new(self, false)),
            State::Open { since } => {
                if since.elapsed() >= self.config.timeout {
                    info!("Circuit '{}' half-open, admitting probe", self.name);
                    *state = State::HalfOpen {
                        successes: 0,
                        in_flight: 1,
                    };
                    Ok(Admission::new(self, true))
                } else {
                    Err(CircuitOpen(self.name.clone()))
                }
            }
            State::HalfOpen {
                ref mut in_flight, ..
            } => {
                if *in_flight < self.config.half_open_probes {
                    *in_flight += 1;
                    Ok(Admission::new(self, true))
                } else {
                    Err(CircuitOpen(self.name.clone()))
                }
            }
        }
    }

    fn on_success(&self, probe: bool) {
        let mut state = self.write();
        match *state {
            State::Closed { ref mut failures } => {
                if !probe {
                    *failures = 0;
                }
            }
            State::Open { .. } => {}
            State::HalfOpen {
                ref mut successes,
                ref mut in_flight,
            } => {
                if !probe {
                    return;
                }
                *in_flight = in_flight.saturating_sub(1);
                *successes += 1;
                if *successes >= self.config.success_threshold {
                    info!("Circuit '{}' closed after {} successful probes", self.name, successes);
                    *state = State::Closed { failures: 0 };
                }
            }
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut state = self.write();
        match *state {
            State::Closed { ref mut failures } => {
                if probe {
                    return;
                }
                *failures += 1;
                if *failures >= self.config.max_failures {
                    warn!(
                        "Circuit '{}' opened after {} consecutive failures",
                        self.name, failures
                    );
                    *state = State::Open {
                        since: Instant::now(),
                    };
                }
            }
            State::Open { .. } => {}
            State::HalfOpen { .. } => {
                if !probe {
                    return;
                }
                warn!("Circuit '{}' probe failed, re-opening", self.name);
                *state = State::Open {
                    since: Instant::now(),
                };
            }
        }
    }

    fn release_probe(&self) {
        let mut state = self.write();
        if let State::HalfOpen {
            ref mut in_flight, ..
        } = *state
        {
            *in_flight = in_flight.saturating_sub(1);
        }
    }

    // A poisoned lock only means a panic mid-transition; the state itself is still usable.
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Permission to run one call through the breaker.
#[must_use = "an admission must be settled with success() or failure()"]
pub struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> Admission<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(max_failures: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                max_failures,
                timeout,
                half_open_probes: 2,
                success_threshold: 2,
            },
        )
    }

    #[test]
    fn opens_after_max_failures() {
        let b = breaker(3, Duration::from_secs(60));
        for _ in 0..3 {
            b.admit().unwrap().failure();
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.admit().is_err());
    }

    #[test]
    fn success_resets_failure_count() {
        let b = breaker(3, Duration::from_secs(60));
        b.admit().unwrap().failure();
        b.admit().unwrap().failure();
        b.admit().unwrap().success();
        b.admit().unwrap().failure();
        b.admit().unwrap().failure();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_limits_concurrent_probes() {
        let b = breaker(1, Duration::ZERO);
        b.admit().unwrap().failure();
        assert_eq!(b.state(), CircuitState::Open);

        let first = b.admit().unwrap();
        assert!(first.is_probe());
        let second = b.admit().unwrap();
        assert!(b.admit().is_err());

        drop(second);
        let third = b.admit().unwrap();
        first.success();
        third.success();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn probe_failure_reopens() {
        let b = breaker(1, Duration::ZERO);
        b.admit().unwrap().failure();
        let probe = b.admit().unwrap();
        probe.failure();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn stale_closed_results_do_not_touch_half_open() {
        let b = breaker(1, Duration::ZERO);
        let early = b.admit().unwrap();
        b.admit().unwrap().failure();
        let probe = b.admit().unwrap();
        early.failure();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        probe.success();
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }
}
