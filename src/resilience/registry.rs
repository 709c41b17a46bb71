use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};

static GLOBAL: Lazy<Arc<BreakerRegistry>> = Lazy::new(|| Arc::new(BreakerRegistry::default()));

/// Named breakers, created on first use and shared for the life of the process.
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    defaults: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(defaults: BreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    pub fn global() -> Arc<BreakerRegistry> {
        GLOBAL.clone()
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create(name, || self.defaults.clone())
    }

    /// Uses `config` only if this call creates the breaker.
    pub fn get_with(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        self.get_or_create(name, || config)
    }

    fn get_or_create<F>(&self, name: &str, config: F) -> Arc<CircuitBreaker>
    where
        F: FnOnce() -> BreakerConfig,
    {
        {
            let breakers = self.breakers.read().unwrap_or_else(|p| p.into_inner());
            if let Some(b) = breakers.get(name) {
                return b.clone();
            }
        }

        let mut breakers = self.breakers.write().unwrap_or_else(|p| p.into_inner());
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config())))
            .clone()
    }

    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let breakers = self.breakers.read().unwrap_or_else(|p| p.into_inner());
        let mut states: Vec<_> = breakers
            .iter()
            .map(|(name, b)| (name.clone(), b.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
