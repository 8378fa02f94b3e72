mod common;

use std::{sync::Arc, thread, time::Duration};

use common::MockLoader;
use stem_splitter::{model::cache::ModelCache, Device, StemError, StemModel};

#[test]
fn concurrent_get_or_load_loads_once_and_shares_instance() {
    let loader = Arc::new(MockLoader {
        load_delay: Some(Duration::from_millis(150)),
        ..Default::default()
    });
    let cache = Arc::new(ModelCache::new(loader.clone()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get_or_load("htdemucs", Device::Cpu).unwrap())
        })
        .collect();
    let models: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(loader.load_count(), 1);
    assert_eq!(cache.load_count(), 1);
    for m in &models[1..] {
        assert!(Arc::ptr_eq(&models[0], m));
    }
}

#[test]
fn empty_name_resolves_to_the_same_entry_as_default() {
    let loader = Arc::new(MockLoader::default());
    let cache = ModelCache::new(loader.clone());

    let a = cache.get_or_load("", Device::Cpu).unwrap();
    let b = cache.get_or_load("htdemucs", Device::Cpu).unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(loader.load_count(), 1);
}

#[test]
fn unknown_model_fails_before_loading() {
    let loader = Arc::new(MockLoader::default());
    let cache = ModelCache::new(loader.clone());

    match cache.get_or_load("not-a-model", Device::Cpu) {
        Err(StemError::ModelNotFound(name)) => assert_eq!(name, "not-a-model"),
        Err(other) => panic!("expected ModelNotFound, got {other:?}"),
        Ok(_) => panic!("expected ModelNotFound, got a model"),
    }
    assert_eq!(loader.load_count(), 0);
    assert!(cache.loaded().is_empty());
}

#[test]
fn load_failure_does_not_poison_other_devices() {
    let loader = Arc::new(MockLoader {
        fail_on: Some(Device::Gpu),
        ..Default::default()
    });
    let cache = ModelCache::new(loader.clone());

    assert!(matches!(
        cache.get_or_load("htdemucs", Device::Gpu),
        Err(StemError::ModelLoad { .. })
    ));
    let cpu = cache.get_or_load("htdemucs", Device::Cpu).unwrap();
    assert_eq!(cpu.device(), Device::Cpu);

    // The failed slot stays empty and is retried on the next call.
    assert!(cache.get_or_load("htdemucs", Device::Gpu).is_err());
    assert_eq!(loader.load_count(), 3);
    assert_eq!(cache.loaded().len(), 1);
}

#[test]
fn distinct_devices_get_distinct_instances() {
    let loader = Arc::new(MockLoader::default());
    let cache = ModelCache::new(loader.clone());

    let cpu = cache.get_or_load("htdemucs", Device::Cpu).unwrap();
    let gpu = cache.get_or_load("htdemucs", Device::Gpu).unwrap();

    assert!(!Arc::ptr_eq(&cpu, &gpu));
    assert_eq!(cache.loaded().len(), 2);
}

#[test]
fn capacity_limit_evicts_least_recently_used() {
    let loader = Arc::new(MockLoader::default());
    let cache = ModelCache::new(loader.clone()).with_capacity_limit(Some(2));

    cache.get_or_load("htdemucs", Device::Cpu).unwrap();
    thread::sleep(Duration::from_millis(5));
    cache.get_or_load("htdemucs_ort_v1", Device::Cpu).unwrap();
    thread::sleep(Duration::from_millis(5));
    // Touch the first so the second becomes the oldest.
    cache.get_or_load("htdemucs", Device::Cpu).unwrap();
    thread::sleep(Duration::from_millis(5));
    cache.get_or_load("htdemucs", Device::Gpu).unwrap();

    let loaded: Vec<_> = cache
        .loaded()
        .into_iter()
        .map(|k| (k.model_name, k.device))
        .collect();
    assert_eq!(
        loaded,
        vec![
            ("htdemucs".to_string(), Device::Cpu),
            ("htdemucs".to_string(), Device::Gpu),
        ]
    );
    assert_eq!(loader.load_count(), 3);
}
