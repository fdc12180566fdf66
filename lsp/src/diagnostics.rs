//! Per-server diagnostics cache and settle waiters.
//!
//! Servers push `publishDiagnostics` whenever they like. The store keeps the
//! latest publish per path and wakes anyone waiting on that path; a
//! [`Waiter`] turns the stream of wakes into a single "settled" outcome.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sonar_types::Diagnostic;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

#[derive(Default)]
struct StoreInner {
    data: HashMap<PathBuf, Vec<Diagnostic>>,
    waiters: HashMap<PathBuf, Vec<(u64, mpsc::UnboundedSender<()>)>>,
    next_waiter: u64,
}

#[derive(Default)]
pub(crate) struct DocumentStore {
    inner: Mutex<StoreInner>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Replace the diagnostics for `path` and wake its waiters.
    pub fn publish(&self, path: PathBuf, items: Vec<Diagnostic>) {
        let mut inner = self.lock();
        if let Some(waiters) = inner.waiters.get(&path) {
            for (_, tx) in waiters {
                let _ = tx.send(());
            }
        }
        inner.data.insert(path, items);
    }

    /// Whether anything was published for `path` since it was last cleared.
    pub fn contains(&self, path: &Path) -> bool {
        self.lock().data.contains_key(path)
    }

    pub fn get(&self, path: &Path) -> Vec<Diagnostic> {
        self.lock().data.get(path).cloned().unwrap_or_default()
    }

    /// Remove and return the diagnostics for `path`.
    pub fn take(&self, path: &Path) -> Vec<Diagnostic> {
        self.lock().data.remove(path).unwrap_or_default()
    }

    pub fn clear(&self, path: &Path) {
        self.lock().data.remove(path);
    }

    /// Start listening for publishes on `path`.
    pub fn register_waiter(self: &Arc<Self>, path: &Path) -> Waiter {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = inner.next_waiter;
        inner.next_waiter += 1;
        inner
            .waiters
            .entry(path.to_path_buf())
            .or_default()
            .push((id, tx));
        Waiter {
            store: Arc::clone(self),
            path: path.to_path_buf(),
            id,
            wake: rx,
        }
    }

    fn unregister(&self, path: &Path, id: u64) {
        let mut inner = self.lock();
        if let Some(waiters) = inner.waiters.get_mut(path) {
            waiters.retain(|(waiter_id, _)| *waiter_id != id);
            if waiters.is_empty() {
                inner.waiters.remove(path);
            }
        }
    }

    /// Drop every waiter; their `settle` calls resolve immediately.
    pub fn close_waiters(&self) {
        self.lock().waiters.clear();
    }

    #[cfg(test)]
    pub fn waiter_count(&self, path: &Path) -> usize {
        self.lock().waiters.get(path).map_or(0, Vec::len)
    }
}

/// How a settle wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settled {
    /// A publish arrived and no further publish followed within the debounce.
    Quiet,
    /// The ceiling elapsed first (e.g. the server never publishes for clean files).
    Ceiling,
    /// The store dropped its waiters (server went away).
    Closed,
}

#[derive(Debug, Clone, Copy)]
enum SettleState {
    Idle,
    Debouncing(Instant),
}

/// A registered interest in one path's publishes.
///
/// Unregisters on drop, so cleanup happens exactly once whichever way the
/// wait ends.
pub(crate) struct Waiter {
    store: Arc<DocumentStore>,
    path: PathBuf,
    id: u64,
    wake: mpsc::UnboundedReceiver<()>,
}

impl Waiter {
    /// Wait for publishes on the path to go quiet.
    ///
    /// `Idle → Debouncing(deadline) → Settled`, raced against the ceiling.
    /// Every publish pushes the debounce deadline out again.
    pub async fn settle(&mut self, debounce: Duration, ceiling: Duration) -> Settled {
        let ceiling_at = Instant::now() + ceiling;
        let mut state = SettleState::Idle;

        loop {
            let debounce_at = match state {
                SettleState::Idle => ceiling_at,
                SettleState::Debouncing(deadline) => deadline,
            };
            tokio::select! {
                () = sleep_until(ceiling_at) => return Settled::Ceiling,
                () = sleep_until(debounce_at), if matches!(state, SettleState::Debouncing(_)) => {
                    return Settled::Quiet;
                }
                wake = self.wake.recv() => match wake {
                    Some(()) => state = SettleState::Debouncing(Instant::now() + debounce),
                    None => return Settled::Closed,
                },
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.store.unregister(&self.path, self.id);
    }
}
