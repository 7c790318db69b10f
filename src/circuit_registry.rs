//! Registry of per-task-class circuit breakers, keyed by [`crate::model::TaskClass`].

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};
use crate::model::TaskClass;
use std::collections::HashMap;
use std::sync::Mutex;

/// Owns one [`CircuitBreakerPolicy`] per task class, created lazily from a
/// config table on first use.
pub struct CircuitBreakerRegistry {
    configs: HashMap<TaskClass, CircuitBreakerConfig>,
    breakers: Mutex<HashMap<TaskClass, CircuitBreakerPolicy>>,
}

impl CircuitBreakerRegistry {
    pub fn new(configs: HashMap<TaskClass, CircuitBreakerConfig>) -> Self {
        Self { configs, breakers: Mutex::new(HashMap::new()) }
    }

    /// Fetch (or lazily create) the breaker for a task class.
    pub fn get(&self, class: TaskClass) -> CircuitBreakerPolicy {
        let mut breakers = self.breakers.lock().expect("circuit registry mutex poisoned");
        breakers
            .entry(class)
            .or_insert_with(|| {
                let config = self.configs.get(&class).cloned().unwrap_or_default();
                CircuitBreakerPolicy::new(class.as_str(), config)
            })
            .clone()
    }

    /// Reset one task class's breaker to CLOSED.
    pub fn reset(&self, class: TaskClass) {
        if let Some(breaker) = self.breakers.lock().expect("circuit registry mutex poisoned").get(&class) {
            breaker.reset();
        }
    }

    /// Reset every known breaker to CLOSED.
    pub fn reset_all(&self) {
        for breaker in self.breakers.lock().expect("circuit registry mutex poisoned").values() {
            breaker.reset();
        }
    }

    /// Sorted snapshot of task class -> current state, for the progress surface.
    pub fn snapshot(&self) -> Vec<(TaskClass, CircuitState)> {
        let breakers = self.breakers.lock().expect("circuit registry mutex poisoned");
        let mut out: Vec<_> = breakers.iter().map(|(class, b)| (*class, b.state())).collect();
        out.sort_by_key(|(class, _)| class.as_str());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn lazily_creates_and_reuses_breakers() {
        let mut configs = HashMap::new();
        configs.insert(TaskClass::Ec2Metrics, CircuitBreakerConfig::new(2, Duration::from_secs(30)));
        let registry = CircuitBreakerRegistry::new(configs);

        let a = registry.get(TaskClass::Ec2Metrics);
        let b = registry.get(TaskClass::Ec2Metrics);
        a.reset();
        assert_eq!(b.state(), crate::circuit_breaker::CircuitState::Closed);
    }

    #[test]
    fn unconfigured_class_gets_default_breaker() {
        let registry = CircuitBreakerRegistry::new(HashMap::new());
        let breaker = registry.get(TaskClass::CostAnalysis);
        assert_eq!(breaker.state(), crate::circuit_breaker::CircuitState::Closed);
    }

    #[test]
    fn snapshot_is_sorted_by_task_class() {
        let registry = CircuitBreakerRegistry::new(HashMap::new());
        registry.get(TaskClass::S3Metrics);
        registry.get(TaskClass::CostAnalysis);
        let snapshot = registry.snapshot();
        let names: Vec<_> = snapshot.iter().map(|(c, _)| c.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
