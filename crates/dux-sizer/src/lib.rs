//! # dux-sizer
//!
//! The recursive parallel sizer (C4): populates one cache entry for a
//! directory path by enumerating its children via `dux-fs`, recursing into
//! subdirectories through the `dux-cache` registry (so overlapping requests
//! for the same subtree share one computation), and publishing throttled
//! running totals to the entry's subscribers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dux_cache::{CacheEntry, Registry, Subscription};
use dux_config::log_sizer_warn;
use dux_config::{log_sizer_debug, path::join_child};
use dux_fs::DirReader;
use futures::future::FutureExt;
use tokio_util::sync::CancellationToken;

/// Shared context every sizer task needs: the registry it recurses through,
/// the directory reader it lists with, the publish cadence, and a
/// cancellation token tied to process shutdown.
#[derive(Clone)]
pub struct SizerContext {
    pub registry: Arc<Registry>,
    pub reader: DirReader,
    pub publish_interval: Duration,
    pub cancel: CancellationToken,
}

impl SizerContext {
    pub fn new(registry: Arc<Registry>, reader: DirReader, publish_interval: Duration) -> Self {
        Self {
            registry,
            reader,
            publish_interval,
            cancel: CancellationToken::new(),
        }
    }
}

/// Local, mutex-guarded state a single sizer task accumulates while it
/// waits on its children (§5: one mutex covering `files_total`, `sub_sizes`
/// and the dirty flag).
struct SizerState {
    files_total: u64,
    sub_sizes: HashMap<String, u64>,
    dirty: bool,
}

impl SizerState {
    fn total(&self) -> u64 {
        self.files_total + self.sub_sizes.values().sum::<u64>()
    }
}

/// Spawn the sizer for `entry` on a fresh `tokio` task. The caller has
/// already established (via `registry.get_or_create`) that it owns this
/// computation. Returns the `JoinHandle` so a supervisor can observe panics;
/// production call sites hand it to [`supervise`].
pub fn spawn(path: PathBuf, entry: Arc<CacheEntry>, ctx: SizerContext) -> tokio::task::JoinHandle<()> {
    tokio::spawn(supervise(path, entry, ctx))
}

/// Run `run` and guarantee `entry.mark_done` executes on every exit path,
/// including a caught panic — §7's "sizer panic ... the owning entry is
/// still marked done with accumulated size to avoid leaking waiters".
async fn supervise(path: PathBuf, entry: Arc<CacheEntry>, ctx: SizerContext) {
    let entry_for_panic = entry.clone();
    let path_for_panic = path.clone();
    let result = std::panic::AssertUnwindSafe(run(path, entry.clone(), ctx))
        .catch_unwind()
        .await;

    if let Err(panic) = result {
        let msg = panic_message(&panic);
        tracing::error!(
            path = %path_for_panic.display(),
            panic = %msg,
            "sizer task panicked, marking entry done with partial total"
        );
        // run() already calls mark_done on every non-panicking exit path;
        // a panic is the one case it cannot guard itself, so the
        // supervisor finalizes with whatever the entry already holds.
        if !entry_for_panic.is_done() {
            let partial = entry_for_panic.size();
            entry_for_panic.mark_done(partial);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// `size(path, entry)` from §4.4: enumerate, recurse, throttle-publish,
/// finalize. Never returns an error — every failure mode is absorbed into
/// the entry's eventual `mark_done` call, per §7's "prefers completion with
/// partial results over abort".
async fn run(path: PathBuf, entry: Arc<CacheEntry>, ctx: SizerContext) {
    log_sizer_debug!("listing", path = %path.display());

    let children = match ctx.reader.list(&path).await {
        Ok(children) => children,
        Err(e) => {
            log_sizer_warn!("listing failed, marking done with zero", path = %path.display(), error = %e);
            entry.mark_done(0);
            return;
        }
    };

    let state = Arc::new(Mutex::new(SizerState {
        files_total: 0,
        sub_sizes: HashMap::new(),
        dirty: true,
    }));

    let mut subscriptions: Vec<Subscription> = Vec::new();
    let mut child_entries: Vec<Arc<CacheEntry>> = Vec::new();

    for child in children {
        if ctx.cancel.is_cancelled() {
            break;
        }

        if !child.is_dir {
            let mut s = state.lock().unwrap();
            s.files_total += child.size;
            s.dirty = true;
            continue;
        }

        let child_path = join_child(&path, &child.name);
        let (sub_entry, existed) = ctx.registry.get_or_create(child_path.clone());

        if !existed {
            spawn(child_path.clone(), sub_entry.clone(), ctx.clone());
        }

        let name = child.name.clone();
        let state_for_cb = state.clone();
        let sub = sub_entry.subscribe(move |size| {
            let mut s = state_for_cb.lock().unwrap();
            s.sub_sizes.insert(name.clone(), size);
            s.dirty = true;
        });

        subscriptions.push(sub);
        child_entries.push(sub_entry);
    }

    // AGGREGATING: race the publish timer against every child's completion
    // signal until all children are done (or cancellation fires). Each
    // child gets its own watcher task reporting back over an mpsc channel
    // rather than a hand-rolled `select_all`, the same shape the teacher
    // uses for fan-in over background work (`vrift-vdird::watch`).
    let mut ticker = tokio::time::interval(ctx.publish_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    for child in &child_entries {
        let child = child.clone();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            child.wait().await;
            let _ = done_tx.send(());
        });
    }
    drop(done_tx);

    let mut remaining = child_entries.len();
    while remaining > 0 {
        tokio::select! {
            _ = ticker.tick() => {
                publish_if_dirty(&state, &entry);
            }
            msg = done_rx.recv() => {
                match msg {
                    Some(()) => remaining -= 1,
                    None => break,
                }
            }
            _ = ctx.cancel.cancelled() => {
                break;
            }
        }
    }

    // Unsubscribe from every child now that it (or cancellation) has
    // settled — step 6 of §4.4.
    for mut sub in subscriptions {
        sub.unsubscribe();
    }

    let total = state.lock().unwrap().total();
    log_sizer_debug!("finalising", path = %path.display(), total = total);
    entry.mark_done(total);
}

fn publish_if_dirty(state: &Arc<Mutex<SizerState>>, entry: &Arc<CacheEntry>) {
    let mut s = state.lock().unwrap();
    if !s.dirty {
        return;
    }
    let total = s.total();
    s.dirty = false;
    drop(s);
    entry.update_size(total);
}
