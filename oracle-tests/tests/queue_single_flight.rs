// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Queue single-flight: K concurrent workers draining N distinct keys must each complete exactly
//! once per enqueue, and no two workers may ever observe the same key leased at the same time.

mod support;

use oracle_common::domain::{QueueName, storage::Storage};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

const WORKERS: usize = 8;
const KEYS: usize = 40;

#[tokio::test]
async fn k_workers_each_complete_a_distinct_key_exactly_once() {
    let store = support::sqlite_storage().await;

    for i in 0..KEYS {
        store.enqueue(QueueName::KWallet, &format!("wallet-{i}"), 0).await.unwrap();
    }

    let completions: Arc<Mutex<HashMap<String, u32>>> = Arc::new(Mutex::new(HashMap::new()));
    let held: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..WORKERS {
        let store = store.clone();
        let completions = completions.clone();
        let held = held.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let entry = store.dequeue(QueueName::KWallet, 60, 1_000).await.unwrap();
                let Some(entry) = entry else { break };

                {
                    let mut held = held.lock().unwrap();
                    assert!(!held.contains(&entry.key), "two workers held {} at once", entry.key);
                    held.push(entry.key.clone());
                }

                tokio::task::yield_now().await;

                {
                    let mut held = held.lock().unwrap();
                    held.retain(|k| k != &entry.key);
                }

                store.complete(QueueName::KWallet, &entry.key).await.unwrap();
                *completions.lock().unwrap().entry(entry.key.clone()).or_insert(0) += 1;
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let completions = completions.lock().unwrap();
    assert_eq!(completions.len(), KEYS, "every enqueued key must be drained");
    for (key, count) in completions.iter() {
        assert_eq!(*count, 1, "key {key} was completed {count} times, expected exactly once");
    }
}
