//! In-process deferred tasks keyed by id

use crate::error::{ContestError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Boxed task run when a timer fires
pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// One pending task per id; a fired task removes its own entry before running
#[derive(Clone, Default)]
pub struct TaskTimers {
    pending: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl TaskTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`. Fails if `id` is already armed.
    pub fn schedule(&self, id: String, delay: Duration, task: TimerTask) -> Result<()> {
        let mut pending = self.lock()?;
        if pending.contains_key(&id) {
            return Err(ContestError::SchedulingFailed {
                reason: format!("Task {} is already scheduled", id),
            }
            .into());
        }

        let registry = self.pending.clone();
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let armed = registry
                .lock()
                .map(|mut pending| pending.remove(&task_id).is_some())
                .unwrap_or(false);
            if armed {
                task.await;
            }
        });

        pending.insert(id, handle);
        Ok(())
    }

    pub fn is_armed(&self, id: &str) -> bool {
        self.lock()
            .map(|pending| pending.contains_key(id))
            .unwrap_or(false)
    }

    pub fn armed_count(&self) -> usize {
        self.lock().map(|pending| pending.len()).unwrap_or(0)
    }

    /// Abort everything still pending, returning how many were dropped
    pub fn abort_all(&self) -> usize {
        match self.lock() {
            Ok(mut pending) => {
                let count = pending.len();
                for (_, handle) in pending.drain() {
                    handle.abort();
                }
                count
            }
            Err(_) => 0,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>>> {
        self.pending.lock().map_err(|_| {
            ContestError::InternalError {
                message: "Timer registry lock poisoned".to_string(),
            }
            .into()
        })
    }
}
