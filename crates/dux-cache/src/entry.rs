//! Cache entry (C2): one path's size state machine, progress pub/sub, and
//! completion signal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dux_config::log_cache_debug;
use tokio::sync::watch;

type SubscriberId = u64;
type Subscriber = Box<dyn Fn(u64) + Send + Sync>;

struct State {
    size: u64,
    done: bool,
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, Subscriber>,
}

/// A single directory path's cached, still-computing-or-final size.
///
/// `size`, `done` and the subscriber set live behind one mutex (§5); the
/// completion signal is a `watch::<bool>` channel rather than a plain
/// `Notify`, so a `wait()` call can never miss a `mark_done` that lands
/// between its state check and its await (see SPEC_FULL.md §4.2).
pub struct CacheEntry {
    path: PathBuf,
    state: Mutex<State>,
    done_tx: watch::Sender<bool>,
}

/// Handle returned by [`CacheEntry::subscribe`]. Calling `unsubscribe`
/// removes the registration; dropping it without calling `unsubscribe`
/// leaves the subscription registered (unsubscription is an explicit
/// operation per §4.2, not an RAII side effect, since the sizer keeps a
/// subscription alive across many `.await` points before choosing to drop
/// it on child completion).
pub struct Subscription {
    entry: Option<Arc<CacheEntry>>,
    id: SubscriberId,
}

impl Subscription {
    fn noop() -> Self {
        Self {
            entry: None,
            id: 0,
        }
    }

    /// Remove this subscription's callback from its entry. No-op if the
    /// entry was already done at subscribe time (fast path) or if called
    /// more than once.
    pub fn unsubscribe(&mut self) {
        if let Some(entry) = self.entry.take() {
            let mut state = entry.state.lock().unwrap();
            state.subscribers.remove(&self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl CacheEntry {
    pub fn new(path: PathBuf) -> Self {
        let (done_tx, _rx) = watch::channel(false);
        Self {
            path,
            state: Mutex::new(State {
                size: 0,
                done: false,
                next_id: 0,
                subscribers: HashMap::new(),
            }),
            done_tx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size snapshot (may still be a running estimate).
    pub fn size(&self) -> u64 {
        self.state.lock().unwrap().size
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().unwrap().done
    }

    /// Register `callback` for progress updates. If the entry is already
    /// done, `callback` is invoked once synchronously with the final size
    /// and a no-op handle is returned (inv. 4). Otherwise `callback` is
    /// invoked once immediately with the current size (possibly 0) and
    /// registered for future updates.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let mut state = self.state.lock().unwrap();
        let size = state.size;
        if state.done {
            drop(state);
            callback(size);
            return Subscription::noop();
        }

        callback(size);
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, Box::new(callback));
        drop(state);

        Subscription {
            entry: Some(Arc::clone(self)),
            id,
        }
    }

    /// Publish a new running total. Callers must only pass monotonically
    /// non-decreasing values (inv. 3). No-op once `done`.
    pub fn update_size(&self, new_size: u64) {
        let mut state = self.state.lock().unwrap();
        if state.done {
            return;
        }
        debug_assert!(
            new_size >= state.size,
            "size must be monotonically non-decreasing"
        );
        state.size = new_size;
        for callback in state.subscribers.values() {
            callback(new_size);
        }
    }

    /// Atomically finalize this entry at `final_size`: sets `done`, invokes
    /// every subscriber one last time, clears the subscriber set, and
    /// raises the completion signal. Idempotent — a second call is a no-op,
    /// since production code guarantees this runs exactly once per entry,
    /// but abnormal exit paths (panics caught at the task boundary) may
    /// race a supervisor's own `mark_done` against one that already ran.
    pub fn mark_done(&self, final_size: u64) {
        let mut state = self.state.lock().unwrap();
        if state.done {
            return;
        }
        state.done = true;
        state.size = final_size;
        for callback in state.subscribers.values() {
            callback(final_size);
        }
        state.subscribers.clear();
        drop(state);

        log_cache_debug!("entry marked done", path = %self.path.display(), size = final_size);
        let _ = self.done_tx.send(true);
    }

    /// Block until `mark_done` has run. Cheap no-op if already done.
    pub async fn wait(&self) {
        let mut rx = self.done_tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without ever marking done (process
                // shutdown mid-computation) — treat as done to avoid
                // hanging waiters forever.
                return;
            }
        }
    }
}
