#![allow(dead_code)]

use async_trait::async_trait;
use rate_guard_bucket::cores::TokenBucketCore;
use rate_guard_bucket::distributed::script::{
    AVAIL_FIELD, CAPACITY_FIELD, DENIED, FILL_INTERVAL_FIELD, LATEST_TICK_FIELD, MAX_SCRIPT_UNITS,
    QUANTUM_FIELD, START_TIME_FIELD,
};
use rate_guard_bucket::{BucketScript, BucketStore, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-process stand-in for Redis.
///
/// Each script runs the matching `TokenBucketCore` transition while holding
/// one lock over all keys, the same guarantee Redis gives Lua scripts.
#[derive(Debug, Default)]
pub struct ScriptedStore {
    records: Mutex<HashMap<String, TokenBucketCore>>,
    expiries: Mutex<HashMap<String, i64>>,
    offline: AtomicBool,
    evals: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the key expiring or being deleted.
    pub fn evict(&self, key: &str) {
        self.records.lock().unwrap().remove(key);
    }

    /// Makes every call fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn record(&self, key: &str) -> Option<TokenBucketCore> {
        self.records.lock().unwrap().get(key).copied()
    }

    pub fn expiry_ms(&self, key: &str) -> Option<i64> {
        self.expiries.lock().unwrap().get(key).copied()
    }

    pub fn eval_count(&self) -> usize {
        self.evals.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BucketStore for ScriptedStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }

    async fn eval(&self, script: BucketScript, key: &str, args: &[i64]) -> Result<Option<i64>, StoreError> {
        self.check_online()?;
        self.evals.fetch_add(1, Ordering::SeqCst);

        let mut records = self.records.lock().unwrap();
        let reply = match script {
            BucketScript::Create => {
                if records.contains_key(key) {
                    Some(0)
                } else {
                    records.insert(key.to_string(), TokenBucketCore::new(args[0], args[1], args[2], args[3]));
                    if args[4] > 0 {
                        self.expiries.lock().unwrap().insert(key.to_string(), args[4]);
                    }
                    Some(1)
                }
            }
            BucketScript::Acquire => records.get_mut(key).map(|b| b.acquire_at(args[0], args[1])),
            BucketScript::TryAcquire => {
                // Waits are capped before the bound is checked, as in the script
                let max_wait = if args[2] >= MAX_SCRIPT_UNITS { i64::MAX } else { args[2] };
                records.get_mut(key).map(|b| {
                    b.try_acquire_at(args[0], args[1], max_wait)
                        .map_or(DENIED, |wait| wait.min(MAX_SCRIPT_UNITS))
                })
            }
            BucketScript::Available => records.get_mut(key).map(|b| b.available_at(args[0])),
        };
        Ok(reply)
    }

    async fn read_fields(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<i64>>, StoreError> {
        self.check_online()?;
        let records = self.records.lock().unwrap();
        let record = records.get(key);
        Ok(fields
            .iter()
            .map(|field| {
                record.and_then(|b| match *field {
                    START_TIME_FIELD => Some(b.start()),
                    FILL_INTERVAL_FIELD => Some(b.fill_interval()),
                    CAPACITY_FIELD => Some(b.capacity()),
                    QUANTUM_FIELD => Some(b.quantum()),
                    AVAIL_FIELD => Some(b.avail()),
                    LATEST_TICK_FIELD => Some(b.latest_tick()),
                    _ => None,
                })
            })
            .collect())
    }
}

/// Routes `tracing` output through the test harness; `RUST_LOG` filters it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
