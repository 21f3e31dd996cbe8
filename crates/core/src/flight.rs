//! Per-key single-flight execution.
//!
//! The first caller for a key starts the work on a detached tokio task;
//! callers arriving while it runs join that task and receive a clone of its
//! outcome. Work is never cancelled by callers going away, and the slot is
//! released as soon as the task ends, so the next call after completion
//! starts fresh work.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::Error;

type Call<T> = Shared<BoxFuture<'static, Result<T, Error>>>;
type Calls<K, T> = Arc<Mutex<HashMap<K, Call<T>>>>;

/// Deduplicates concurrent computations that share a key.
pub struct SingleFlight<K, T> {
    calls: Calls<K, T>,
}

impl<K, T> Default for SingleFlight<K, T> {
    fn default() -> Self {
        Self { calls: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key`, or join the call already in flight for it.
    ///
    /// Every caller joined to one call observes the same result. A panic in
    /// `work` is reported as `Error::TaskFailed`.
    pub async fn run<F>(&self, key: K, work: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let call = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            match calls.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let call = self.spawn(key.clone(), work);
                    calls.insert(key, call.clone());
                    call
                }
            }
        };
        call.await
    }

    /// Number of calls currently running.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether a call for `key` is running.
    pub fn is_running(&self, key: &K) -> bool {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).contains_key(key)
    }

    fn spawn<F>(&self, key: K, work: F) -> Call<T>
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let release = Release { calls: Arc::clone(&self.calls), key: Some(key) };
        let handle = tokio::spawn(async move {
            let _release = release;
            work.await
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::TaskFailed(e.to_string())),
            }
        }
        .boxed()
        .shared()
    }
}

/// Frees the key's slot when the task finishes, including by panic.
struct Release<K: Eq + Hash, T> {
    calls: Calls<K, T>,
    key: Option<K>,
}

impl<K: Eq + Hash, T> Drop for Release<K, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.calls.lock().unwrap_or_else(PoisonError::into_inner).remove(&key);
        }
    }
}
