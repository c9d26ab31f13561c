//! In-memory cache store for native hosts and tests.
//!
//! Generations live in a `Vec` so creation order is preserved; entries inside a generation
//! are kept in a `BTreeMap` keyed by request URL.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use shellrelay_core::cache::{CacheError, CacheStore, CachedResponse};

type Generations = Vec<(String, BTreeMap<String, CachedResponse>)>;

pub struct MemoryCacheStore {
    data: Mutex<Generations>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Vec::new()),
        }
    }

    fn lock_data(&self) -> Result<MutexGuard<'_, Generations>, CacheError> {
        self.data
            .lock()
            .map_err(|_| CacheError::Internal(anyhow::anyhow!("cache store lock poisoned")))
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

fn entries_mut<'a>(
    data: &'a mut Generations,
    generation: &str,
) -> &'a mut BTreeMap<String, CachedResponse> {
    let index = match data.iter().position(|(name, _)| name == generation) {
        Some(index) => index,
        None => {
            data.push((generation.to_string(), BTreeMap::new()));
            data.len() - 1
        }
    };
    &mut data[index].1
}

fn entries<'a>(
    data: &'a Generations,
    generation: &str,
) -> Option<&'a BTreeMap<String, CachedResponse>> {
    data.iter()
        .find(|(name, _)| name == generation)
        .map(|(_, entries)| entries)
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, generation: &str) -> Result<(), CacheError> {
        let mut data = self.lock_data()?;
        entries_mut(&mut data, generation);
        Ok(())
    }

    async fn get(
        &self,
        generation: &str,
        key: &str,
    ) -> Result<Option<CachedResponse>, CacheError> {
        let data = self.lock_data()?;
        Ok(entries(&data, generation).and_then(|entries| entries.get(key).cloned()))
    }

    async fn put(
        &self,
        generation: &str,
        key: &str,
        response: CachedResponse,
    ) -> Result<(), CacheError> {
        let mut data = self.lock_data()?;
        entries_mut(&mut data, generation).insert(key.to_string(), response);
        Ok(())
    }

    async fn delete(&self, generation: &str) -> Result<bool, CacheError> {
        let mut data = self.lock_data()?;
        match data.iter().position(|(name, _)| name == generation) {
            Some(index) => {
                data.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn generations(&self) -> Result<Vec<String>, CacheError> {
        let data = self.lock_data()?;
        Ok(data.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn keys(&self, generation: &str) -> Result<Vec<String>, CacheError> {
        let data = self.lock_data()?;
        Ok(entries(&data, generation)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}
