//! Running agent processes keyed by conversation.
//!
//! At most one process is live per key. Registering a new process for a key
//! stops the previous one, and a finishing run only removes its own entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::supervisor;

/// Stop handle for one spawned agent process.
///
/// The owning run holds the receiving end of the cancel channel; stopping
/// signals the process group and wakes the run so it can finish tearing down.
#[derive(Debug)]
pub struct ProcessHandle {
    id: Uuid,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    terminated: AtomicBool,
    exited: AtomicBool,
    cancel_tx: mpsc::Sender<()>,
}

impl ProcessHandle {
    pub fn new(pid: Option<u32>) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        let handle = Arc::new(Self {
            id: Uuid::new_v4(),
            pid,
            started_at: Utc::now(),
            terminated: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            cancel_tx,
        });
        (handle, cancel_rx)
    }

    /// Request termination. Returns false if the process already exited or
    /// was already stopped.
    pub fn terminate(&self) -> bool {
        if self.exited.load(Ordering::SeqCst) || self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(pid) = self.pid {
            supervisor::signal_terminate(pid);
        }
        let _ = self.cancel_tx.try_send(());
        true
    }

    pub fn mark_exited(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningProcess {
    pub key: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    entries: Mutex<HashMap<String, Arc<ProcessHandle>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<ProcessHandle>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `handle` under `key`, stopping whatever was registered there before.
    pub fn register(&self, key: &str, handle: Arc<ProcessHandle>) {
        let mut entries = self.lock();
        if let Some(previous) = entries.remove(key) {
            if !Arc::ptr_eq(&previous, &handle) && previous.terminate() {
                info!(key, pid = ?previous.pid(), "replaced running agent process");
            }
        }
        entries.insert(key.to_string(), Arc::clone(&handle));
        debug!(key, pid = ?handle.pid(), "registered agent process");
    }

    /// Stop and forget the process under `key`. Returns whether one was running.
    pub fn stop(&self, key: &str) -> bool {
        let removed = self.lock().remove(key);
        match removed {
            Some(handle) => {
                handle.terminate();
                info!(key, pid = ?handle.pid(), "stopped agent process");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Stop every tracked process; returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        for (_, handle) in &drained {
            handle.terminate();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "stopped all agent processes");
        }
        drained.len()
    }

    /// Remove `key` only if it still maps to `handle`.
    ///
    /// A run that was replaced must not evict its successor.
    pub fn release(&self, key: &str, handle: &Arc<ProcessHandle>) -> bool {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> Vec<RunningProcess> {
        let mut running: Vec<RunningProcess> = self
            .lock()
            .iter()
            .map(|(key, handle)| RunningProcess {
                key: key.clone(),
                pid: handle.pid(),
                started_at: handle.started_at(),
            })
            .collect();
        running.sort_by(|a, b| a.key.cmp(&b.key));
        running
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
