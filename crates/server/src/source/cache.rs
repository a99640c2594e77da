use std::{collections::HashMap, sync::Arc, time::Duration};

use ephemeropt::EphemeralOption;
use nightscout::{Dataset, TimeRange};

type CacheKey = (i64, i64);

/// Fetched datasets by exact range, each expiring on its own.
pub struct DatasetCache {
    ttl: Duration,
    slots: HashMap<CacheKey, EphemeralOption<Arc<Dataset>>>,
}

fn key(range: &TimeRange) -> CacheKey {
    (range.start_ms(), range.end_ms())
}

impl DatasetCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: HashMap::new(),
        }
    }

    pub fn get(&self, range: &TimeRange) -> Option<Arc<Dataset>> {
        self.slots.get(&key(range))?.get().cloned()
    }

    pub fn insert(&mut self, range: &TimeRange, data: Arc<Dataset>) {
        self.slots.retain(|_, slot| slot.get().is_some());

        let ttl = self.ttl;
        self.slots
            .entry(key(range))
            .or_insert_with(|| EphemeralOption::new_empty(ttl))
            .insert(data);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
