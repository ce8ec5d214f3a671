// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::{AbortHandle, JoinHandle};

/// Keeps every background task (poll loops, job lifecycles, deferred
/// removals) reachable until it finishes, so shutdown can wait for them.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
    // Tasks already handed to a `drain` call.
    draining: Mutex<Vec<AbortHandle>>,
}

impl RegistryInner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn draining(&self) -> MutexGuard<'_, Vec<AbortHandle>> {
        self.draining.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, label: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);

        // The lock is held until the handle is stored, so the task cannot
        // try to remove itself before it was inserted.
        let mut tasks = self.inner.tasks();
        tasks.retain(|_, handle| !handle.is_finished());
        let handle = tokio::spawn(async move {
            future.await;
            tracing::trace!(task = label, id, "background task finished");
            inner.tasks().remove(&id);
        });
        tasks.insert(id, handle);
    }

    pub fn len(&self) -> usize {
        let mut tasks = self.inner.tasks();
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels whatever is still running. Returns how many tasks were aborted.
    pub fn abort_all(&self) -> usize {
        let mut handles: Vec<AbortHandle> = self
            .inner
            .tasks()
            .drain()
            .map(|(_, handle)| handle.abort_handle())
            .collect();
        handles.append(&mut self.inner.draining());
        let mut aborted = 0;
        for handle in handles {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }
        aborted
    }

    /// Waits until no task is left. Tasks spawned while draining are awaited
    /// as well.
    pub async fn drain(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut tasks = self.inner.tasks();
                tasks.drain().map(|(_, handle)| handle).collect()
            };
            self.inner
                .draining()
                .extend(handles.iter().map(JoinHandle::abort_handle));
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                match handle.await {
                    Ok(()) => {}
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => tracing::warn!("background task ended abnormally: {err}"),
                }
            }
            self.inner.draining().retain(|handle| !handle.is_finished());
        }
    }
}
