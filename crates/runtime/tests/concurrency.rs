//! Concurrency scenarios: the write-once herd and readers racing writers

use ftl_runtime::args;
use ftl_runtime::bundle::{Bundle, BundleConfig};
use ftl_runtime::cache::{fingerprint, CacheConfig, IntegrityCache};
use ftl_runtime::value::FluentArgs;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn write_once_herd_32_threads() {
    // Thundering herd: 32 threads resolve the same key concurrently and
    // all try to store the identical result. Exactly one write lands;
    // the rest are counted idempotent; nobody errors.
    let cache = Arc::new(IntegrityCache::new(CacheConfig {
        write_once: true,
        ..CacheConfig::default()
    }));
    let args = FluentArgs::new();
    let key = Arc::new(fingerprint("greeting", None, &args, "en", true));
    let barrier = Arc::new(Barrier::new(32));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let cache = cache.clone();
            let key = key.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.put(&key, "Hello".to_string(), vec![])
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.stores, 1);
    assert_eq!(stats.idempotent_writes, 31);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(&key).unwrap().unwrap().formatted, "Hello");
}

#[test]
fn sequence_is_monotonic_across_clear() {
    let cache = IntegrityCache::new(CacheConfig::default());
    let args = FluentArgs::new();
    let mut last = 0;
    for round in 0..3 {
        for i in 0..5 {
            let key = fingerprint(&format!("m{round}-{i}"), None, &args, "en", false);
            cache.put(&key, "v".to_string(), vec![]).unwrap();
            let seq = cache.get(&key).unwrap().unwrap().sequence;
            assert!(seq > last, "sequence must strictly increase");
            last = seq;
        }
        cache.clear().unwrap();
    }
}

#[test]
fn readers_and_writers_on_one_bundle() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let bundle = Arc::new(
        Bundle::with_config(BundleConfig {
            use_isolating: false,
            strict: false,
            cache: Some(CacheConfig::default()),
            ..BundleConfig::new("en")
        })
        .unwrap(),
    );
    bundle.add_resource("greet = Hello, { $name }!").unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let bundle = bundle.clone();
        handles.push(thread::spawn(move || {
            for i in 0..200 {
                let out = bundle
                    .format_value("greet", &args!(name => format!("t{i}")))
                    .unwrap();
                assert!(out.value.starts_with("Hello"));
            }
        }));
    }
    for round in 0..20 {
        // Interleave writes; each invalidates the cache.
        bundle
            .add_resource(&format!("extra{round} = value {round}"))
            .unwrap();
    }
    for handle in handles {
        handle.join().unwrap();
    }
    // All writes landed and the bundle stays consistent.
    assert!(bundle.has_message("extra19"));
    let out = bundle.format_value("greet", &args!(name => "end")).unwrap();
    assert_eq!(out.value, "Hello, end!");
}

#[test]
fn concurrent_distinct_keys() {
    let cache = Arc::new(IntegrityCache::new(CacheConfig::default()));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                let args = FluentArgs::new();
                for i in 0..100 {
                    let key = fingerprint(&format!("m-{t}-{i}"), None, &args, "en", false);
                    cache.put(&key, format!("v{t}-{i}"), vec![]).unwrap();
                    let entry = cache.get(&key).unwrap().unwrap();
                    assert!(entry.verify());
                    assert_eq!(entry.formatted, format!("v{t}-{i}"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(cache.stats().stores, 800);
}
