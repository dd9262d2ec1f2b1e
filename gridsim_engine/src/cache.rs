//! Memoised results for seeded runs.

use crate::config::SimulationConfig;
use crate::error::Result;
use gridsim_core::{Scenario, SimulationResult};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Entries kept before the oldest is evicted.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Identifies a scenario run under a given configuration and seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Hashes the JSON forms of the scenario and configuration.
    ///
    /// The scenario id is part of the scenario, so two scenarios built
    /// separately never share an entry.
    pub fn of(scenario: &Scenario, config: &SimulationConfig, seed: u64) -> Result<Self> {
        let mut hasher = DefaultHasher::new();
        serde_json::to_string(scenario)?.hash(&mut hasher);
        serde_json::to_string(config)?.hash(&mut hasher);
        seed.hash(&mut hasher);
        Ok(Self(hasher.finish()))
    }
}

struct Inner {
    entries: HashMap<Fingerprint, SimulationResult>,
    order: VecDeque<Fingerprint>,
}

/// Bounded FIFO cache of simulation results.
pub struct ResultCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: Fingerprint) -> Option<SimulationResult> {
        self.inner().entries.get(&key).cloned()
    }

    /// Stores a result, evicting the oldest entry when full.
    pub fn insert(&self, key: Fingerprint, result: SimulationResult) {
        let mut inner = self.inner();
        if inner.entries.insert(key, result).is_some() {
            return;
        }
        inner.order.push_back(key);
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner();
        inner.entries.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsim_core::{aggregate, ScenarioBuilder, WorkerResult};
    use gridsim_env::ScenarioId;
    use std::collections::BTreeMap;

    fn scenario() -> Scenario {
        ScenarioBuilder::new("cached")
            .with_id(ScenarioId::from_seed(9))
            .iterations(100)
            .add_normal_variable("x", 0.5, 0.1)
            .build()
            .unwrap()
    }

    fn result(mean: f64) -> SimulationResult {
        let scenario_id = ScenarioId::from_seed(9);
        aggregate(&[WorkerResult {
            task_id: gridsim_core::TaskId {
                scenario: scenario_id,
                index: 0,
            },
            scenario_id,
            iterations: 1,
            outcomes: vec![mean],
            factors: BTreeMap::new(),
            execution_time_ms: 1,
            error: None,
        }])
        .unwrap()
    }

    #[test]
    fn test_fingerprint_tracks_seed_and_config() {
        let scenario = scenario();
        let config = SimulationConfig::default();

        let a = Fingerprint::of(&scenario, &config, 1).unwrap();
        assert_eq!(a, Fingerprint::of(&scenario, &config, 1).unwrap());
        assert_ne!(a, Fingerprint::of(&scenario, &config, 2).unwrap());

        let other = SimulationConfig {
            confidence_level: 0.9,
            ..config
        };
        assert_ne!(a, Fingerprint::of(&scenario, &other, 1).unwrap());
    }

    #[test]
    fn test_evicts_oldest() {
        let cache = ResultCache::new(2);
        let scenario = scenario();
        let config = SimulationConfig::default();
        let keys: Vec<Fingerprint> = (0..3).map(|s| Fingerprint::of(&scenario, &config, s).unwrap()).collect();

        for (i, key) in keys.iter().enumerate() {
            cache.insert(*key, result(i as f64 / 10.0));
        }

        assert_eq!(cache.len(), 2);
        assert!(cache.get(keys[0]).is_none());
        assert_eq!(cache.get(keys[2]).unwrap().outcome_distribution.mean, 0.2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
