use std::sync::{Arc, Mutex};

use anyhow::Result;
use cache::DatasetCache;
use config::Config;
use log::{debug, info};
use nightscout::{ClientSettings, Dataset, NightscoutClient, TimeRange};

mod cache;

/// Nightscout client with a TTL cache in front of it.
pub struct NightscoutSource {
    client: NightscoutClient,
    cache: Mutex<DatasetCache>,
    // One fetch at a time, so concurrent misses for a range share the result
    fetching: tokio::sync::Mutex<()>,
}

impl NightscoutSource {
    pub fn new(config: &Config) -> Result<Self> {
        info!("Using Nightscout at {}", config.nightscout_url);

        let client = NightscoutClient::new(ClientSettings {
            base_url: config.nightscout_url.clone(),
            token: config.token().map(str::to_string),
            connect_timeout: config.connect_timeout(),
            timeout: config.read_timeout(),
        })?;

        Ok(Self {
            client,
            cache: Mutex::new(DatasetCache::new(config.cache_ttl())),
            fetching: tokio::sync::Mutex::new(()),
        })
    }

    fn cached(&self, range: &TimeRange) -> Option<Arc<Dataset>> {
        let cached = self.cache.lock().unwrap().get(range);

        if cached.is_some() {
            debug!("Cache hit for {}..{}", range.start_ms(), range.end_ms());
        }

        cached
    }

    pub async fn dataset(&self, range: &TimeRange) -> Result<Arc<Dataset>> {
        if let Some(data) = self.cached(range) {
            return Ok(data);
        }

        let _fetching = self.fetching.lock().await;

        // Filled in while waiting for the lock
        if let Some(data) = self.cached(range) {
            return Ok(data);
        }

        let data = Arc::new(self.client.fetch(range).await?);

        debug!(
            "Fetched {} entries and {} treatments",
            data.entries.len(),
            data.treatments.len()
        );

        self.cache.lock().unwrap().insert(range, data.clone());

        Ok(data)
    }
}
