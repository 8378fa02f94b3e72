//! Process-wide reuse of loaded model instances.
//!
//! One slot per `(model, device)`. The slot mutex is the load guard: the first
//! caller loads while later callers for the same pair block on it and then share
//! the instance. Different pairs never wait on each other. A failed load leaves
//! the slot empty so the next caller retries, and other devices are unaffected.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Instant,
};

use crate::{
    error::{Result, StemError},
    model::backend::{ModelLoader, SharedModel},
    types::Device,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub model_name: String,
    pub device: Device,
}

pub struct ModelCacheEntry {
    pub model_name: String,
    pub device: Device,
    pub instance: SharedModel,
    pub last_used: Instant,
}

type Slot = Arc<Mutex<Option<ModelCacheEntry>>>;

pub struct ModelCache {
    loader: Arc<dyn ModelLoader>,
    slots: Mutex<HashMap<CacheKey, Slot>>,
    /// `None` keeps every instance for the life of the process.
    max_instances: Option<usize>,
    loads: AtomicUsize,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            slots: Mutex::new(HashMap::new()),
            max_instances: None,
            loads: AtomicUsize::new(0),
        }
    }

    /// Bounds the number of live instances; the least recently used one is
    /// evicted when a new load would exceed it.
    pub fn with_capacity_limit(mut self, max_instances: Option<usize>) -> Self {
        self.max_instances = max_instances.filter(|n| *n > 0);
        self
    }

    pub fn loader(&self) -> &dyn ModelLoader {
        self.loader.as_ref()
    }

    pub fn resolve(&self, model_name: &str) -> Result<String> {
        self.loader.resolve(model_name)
    }

    /// Number of successful loads performed so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn lock_slots(&self) -> Result<MutexGuard<'_, HashMap<CacheKey, Slot>>> {
        self.slots
            .lock()
            .map_err(|_| StemError::Anyhow(anyhow::anyhow!("model cache index poisoned")))
    }

    pub fn get_or_load(&self, model_name: &str, device: Device) -> Result<SharedModel> {
        // Unknown names fail here, before any slot exists or anything loads.
        let model_name = self.loader.resolve(model_name)?;
        let key = CacheKey {
            model_name: model_name.clone(),
            device,
        };

        let slot = {
            let mut slots = self.lock_slots()?;
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let mut guard = match slot.lock() {
            Ok(g) => g,
            // A panicking loader never stored anything; the slot is still usable.
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(entry) = guard.as_mut() {
            entry.last_used = Instant::now();
            return Ok(Arc::clone(&entry.instance));
        }

        tracing::info!(model = %model_name, %device, "loading model");
        let started = Instant::now();
        let instance = self.loader.load(&model_name, device).map_err(|e| match e {
            e @ (StemError::ModelNotFound(_) | StemError::ModelLoad { .. }) => e,
            other => StemError::ModelLoad {
                model: model_name.clone(),
                device,
                reason: other.to_string(),
            },
        })?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            model = %model_name,
            %device,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model loaded"
        );

        *guard = Some(ModelCacheEntry {
            model_name,
            device,
            instance: Arc::clone(&instance),
            last_used: Instant::now(),
        });
        drop(guard);

        self.evict_over_capacity(&key);
        Ok(instance)
    }

    /// Keys with a live instance, in sorted order.
    pub fn loaded(&self) -> Vec<CacheKey> {
        let Ok(slots) = self.slots.lock() else {
            return Vec::new();
        };
        let mut keys: Vec<CacheKey> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot.try_lock().as_deref(), Ok(Some(_))))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn evict_over_capacity(&self, just_loaded: &CacheKey) {
        let Some(max) = self.max_instances else {
            return;
        };
        let Ok(mut slots) = self.slots.lock() else {
            return;
        };

        loop {
            // Slots busy loading are skipped rather than waited on.
            let mut live: Vec<(CacheKey, Instant)> = slots
                .iter()
                .filter_map(|(k, slot)| {
                    let g = slot.try_lock().ok()?;
                    g.as_ref().map(|e| (k.clone(), e.last_used))
                })
                .collect();
            if live.len() <= max {
                return;
            }
            live.retain(|(k, _)| k != just_loaded);
            let Some((victim, _)) = live.into_iter().min_by_key(|(_, used)| *used) else {
                return;
            };
            tracing::info!(model = %victim.model_name, device = %victim.device, "evicting model");
            slots.remove(&victim);
        }
    }
}
