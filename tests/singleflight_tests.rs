use coalesce_rs::{BoxError, Manager, Store};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_key_runs_fetch_once() {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();

    let manager = Arc::new(Manager::new(
        move |_token, key: i32| {
            let counter = counter_clone.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, BoxError>(format!("loaded_{}", key))
            })
        },
        Duration::from_secs(10),
    ));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let token = CancellationToken::new();
            manager.get_result(&token, 42).await.unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), "loaded_42");
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(manager.size().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_productions_for_different_keys_overlap() {
    // Both fetches rendezvous on the barrier, which only works if production
    // for one key does not block production for another.
    let barrier = Arc::new(Barrier::new(2));
    let barrier_clone = barrier.clone();

    let manager = Arc::new(Manager::new(
        move |_token, key: i32| {
            let barrier = barrier_clone.clone();
            Box::pin(async move {
                barrier.wait().await;
                Ok::<_, BoxError>(key * 10)
            })
        },
        Duration::from_secs(10),
    ));

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let token = CancellationToken::new();
            manager.get_result(&token, 1).await.unwrap()
        })
    };
    let second = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let token = CancellationToken::new();
            manager.get_result(&token, 2).await.unwrap()
        })
    };

    let results = tokio::time::timeout(Duration::from_secs(5), async {
        (first.await.unwrap(), second.await.unwrap())
    })
    .await
    .expect("cross-key productions must not serialize");

    assert_eq!(results, (10, 20));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_randomized_load_reuses_first_seen_values() {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();

    let manager = Arc::new(Manager::new(
        move |_token, key: String| {
            let counter = counter_clone.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let stamp = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap()
                    .as_nanos();
                Ok::<_, BoxError>(format!("value_for_{}-{}", key, stamp))
            })
        },
        Duration::from_secs(2),
    ));

    let keys: Vec<String> = (1..=6).map(|i| i.to_string()).collect();
    let token = CancellationToken::new();
    let mut values = Vec::new();
    for key in &keys {
        values.push(manager.get_result(&token, key.clone()).await.unwrap());
    }

    let mut handles = Vec::new();
    for _ in 0..1000 {
        let manager = manager.clone();
        let keys = keys.clone();
        let values = values.clone();
        handles.push(tokio::spawn(async move {
            let el = rand::thread_rng().gen_range(0..keys.len());
            let token = CancellationToken::new();
            let value = manager.get_result(&token, keys[el].clone()).await.unwrap();
            assert_eq!(value, values[el]);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(counter.load(Ordering::SeqCst), 6);
}

/// A deliberately unsynchronized store: a plain map plus instrumentation that
/// panics if the manager ever lets two mutations overlap.
struct CountingStore {
    map: HashMap<String, String>,
    sets: Arc<AtomicUsize>,
    mutating: Arc<AtomicBool>,
}

impl Store<String, String> for CountingStore {
    fn get(&self, key: &String) -> Option<String> {
        assert!(
            !self.mutating.load(Ordering::SeqCst),
            "get overlapped a mutation"
        );
        self.map.get(key).cloned()
    }

    fn set(&mut self, key: String, value: String) {
        assert!(
            !self.mutating.swap(true, Ordering::SeqCst),
            "two mutations overlapped"
        );
        self.map.insert(key, value);
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.mutating.store(false, Ordering::SeqCst);
    }

    fn remove(&mut self, key: &String) {
        self.map.remove(key);
    }

    fn clear(&mut self) {
        self.map.clear();
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_plain_map_store_under_concurrent_load() {
    let sets = Arc::new(AtomicUsize::new(0));
    let store = CountingStore {
        map: HashMap::new(),
        sets: sets.clone(),
        mutating: Arc::new(AtomicBool::new(false)),
    };

    let manager = Arc::new(Manager::with_store(
        |_token, key: String| Box::pin(async move { Ok::<_, BoxError>(format!("value_for_{}", key)) }),
        store,
    ));

    let token = CancellationToken::new();
    let first = manager.get_result(&token, "1".to_string()).await.unwrap();
    assert_eq!(first, "value_for_1");

    let keys: Vec<String> = (2..=6).map(|i| i.to_string()).collect();
    let mut handles = Vec::new();
    for _ in 0..=100 {
        for key in &keys {
            let manager = manager.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                let token = CancellationToken::new();
                let result = manager.get_result(&token, key.clone()).await.unwrap();
                assert_eq!(result, format!("value_for_{}", key));
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Exactly one stored entry per key, written exactly once each.
    assert_eq!(manager.size().await, 6);
    assert_eq!(sets.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_hashmap_is_a_valid_store() {
    let manager = Manager::with_store(
        |_token, key: u32| Box::pin(async move { Ok::<_, BoxError>(key + 1) }),
        HashMap::new(),
    );

    let token = CancellationToken::new();
    assert_eq!(manager.get_result(&token, 1).await.unwrap(), 2);
    assert_eq!(manager.get_result(&token, 1).await.unwrap(), 2);
    assert_eq!(manager.size().await, 1);

    manager.delete(&1).await;
    assert_eq!(manager.size().await, 0);
}
