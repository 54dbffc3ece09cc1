//! # dux-session
//!
//! The per-request session driver (C5): resolves a root path, enumerates
//! its immediate children via `dux-fs`, joins or spawns a `dux-sizer` task
//! for each subdirectory through the shared `dux-cache` registry, and
//! translates cache progress into a client-facing [`Event`] stream.
//!
//! Grounded in the live job-progress subscription pattern from the pack's
//! `spacedriveapp-spacedrive` (`core/src/api/jobs.rs`'s `"newThumbnail"`
//! subscription): an `async_stream::stream!` block bridging a
//! callback/channel-driven background computation into `Stream<Item = T>`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dux_cache::{Registry, Subscription};
use dux_config::log_session_debug;
use dux_config::log_session_info;
use dux_config::path::{join_child, resolve_absolute};
use dux_fs::DirReader;
use dux_sizer::SizerContext;
use futures::Stream;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Status of an [`Event::Item`]'s size: `pending` is a non-final running
/// estimate, `done` means no further updates will be emitted for that name
/// in the current session (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Done,
}

/// The client-facing event stream (§6). `path` is emitted once first,
/// `item` zero or more times per child name, and exactly one of `done` /
/// `server_error` terminates the sequence.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Path { path: String },
    Item {
        name: String,
        size: u64,
        #[serde(rename = "isDir")]
        is_dir: bool,
        status: Status,
    },
    Done,
    ServerError { error: String },
}

/// Shared collaborators a session needs to drive C1/C3/C4: the directory
/// reader, the cache registry, and the sizer context template spawned
/// sizers are given (carries the publish interval and the process-wide
/// shutdown token).
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<Registry>,
    pub reader: DirReader,
    pub sizer_ctx: SizerContext,
    /// Concurrent subdirectory subscriptions a single session may hold
    /// open at once (§4.5 step 6, default 20).
    pub session_concurrency: usize,
}

/// Cancels its token when dropped. Held inside the stream's generator state
/// so that dropping the stream itself — e.g. a transport tearing down the
/// connection without ever calling [`UsageSession::cancel`] explicitly —
/// cancels the session's token the same as an explicit disconnect signal
/// would, per SPEC_FULL.md §4.5.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Drive one client request for one root path, yielding [`Event`]s as the
/// walk progresses. `cancel` is the session's per-request cancellation
/// token (§5); cancelling it — e.g. on client disconnect — stops the
/// stream from yielding further events and unsubscribes from every
/// in-flight child entry. Sizer tasks spawned for children are unaffected:
/// they are reference-counted by the registry, not by this session, and
/// keep running if another session (or a future request) still needs them.
/// Dropping the returned stream without explicitly cancelling has the same
/// effect: a `CancelOnDrop` guard living inside the stream's generator state
/// cancels `cancel` as soon as the stream is torn down, so a transport that
/// simply drops its event stream on disconnect still stops the session.
pub fn run(root: PathBuf, ctx: SessionContext, cancel: CancellationToken) -> impl Stream<Item = Event> {
    async_stream::stream! {
        let _cancel_guard = CancelOnDrop(cancel.clone());
        let absolute = match resolve_absolute(&root) {
            Ok(p) => p,
            Err(e) => {
                yield Event::ServerError { error: format!("failed to resolve path: {e}") };
                return;
            }
        };
        log_session_info!("session starting", root = %absolute.display());
        yield Event::Path { path: absolute.display().to_string() };

        let children = match ctx.reader.list(&absolute).await {
            Ok(children) => children,
            Err(e) => {
                yield Event::ServerError { error: e.to_string() };
                return;
            }
        };

        let mut dir_names = Vec::new();
        for child in &children {
            if child.is_dir {
                yield Event::Item {
                    name: child.name.clone(),
                    size: 0,
                    is_dir: true,
                    status: Status::Pending,
                };
                dir_names.push(child.name.clone());
            } else {
                yield Event::Item {
                    name: child.name.clone(),
                    size: child.size,
                    is_dir: false,
                    status: Status::Done,
                };
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let semaphore = Arc::new(Semaphore::new(ctx.session_concurrency.max(1)));
        // Keeping each subscription alive here (rather than dropping it
        // immediately) is what keeps the progress callback registered;
        // removing an entry finalizes and drops its tx clone.
        let mut live: HashMap<String, Subscription> = HashMap::new();

        for name in &dir_names {
            if cancel.is_cancelled() {
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            let child_path = join_child(&absolute, name);
            let (entry, existed) = ctx.registry.get_or_create(child_path.clone());
            if !existed {
                dux_sizer::spawn(child_path.clone(), entry.clone(), ctx.sizer_ctx.clone());
            }

            let name_progress = name.clone();
            let tx_progress = tx.clone();
            let sub = entry.subscribe(move |size| {
                let _ = tx_progress.send(Event::Item {
                    name: name_progress.clone(),
                    size,
                    is_dir: true,
                    status: Status::Pending,
                });
            });
            live.insert(name.clone(), sub);

            let name_final = name.clone();
            let tx_final = tx.clone();
            let entry_wait = entry.clone();
            tokio::spawn(async move {
                entry_wait.wait().await;
                let _ = tx_final.send(Event::Item {
                    name: name_final,
                    size: entry_wait.size(),
                    is_dir: true,
                    status: Status::Done,
                });
                drop(permit);
            });
        }
        drop(tx);

        let mut remaining = dir_names.len();
        while remaining > 0 {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log_session_debug!("session cancelled, unsubscribing", root = %absolute.display());
                    break;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(event) => {
                            if let Event::Item { ref name, status: Status::Done, .. } = event {
                                live.remove(name);
                                remaining -= 1;
                            }
                            yield event;
                        }
                        None => break,
                    }
                }
            }
        }

        drop(live);

        if !cancel.is_cancelled() {
            log_session_info!("session done", root = %absolute.display());
            yield Event::Done;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dux_config::testing::TestTree;
    use futures::StreamExt;
    use std::time::Duration;

    fn context() -> SessionContext {
        let registry = Arc::new(Registry::new());
        let reader = DirReader::new(4);
        let sizer_ctx = SizerContext::new(registry.clone(), reader.clone(), Duration::from_millis(20));
        SessionContext {
            registry,
            reader,
            sizer_ctx,
            session_concurrency: 20,
        }
    }

    #[tokio::test]
    async fn flat_directory_emits_done_items_and_terminal_done() {
        let tree = TestTree::new().unwrap();
        tree.write_file("a.txt", &[0u8; 100]).unwrap();
        tree.write_file("b.txt", &[0u8; 50]).unwrap();

        let ctx = context();
        let events: Vec<Event> = run(tree.root().to_path_buf(), ctx, CancellationToken::new())
            .collect()
            .await;

        assert!(matches!(events.first(), Some(Event::Path { .. })));
        assert!(matches!(events.last(), Some(Event::Done)));

        let items: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::Item { name, size, status, .. } => Some((name.clone(), *size, *status)),
                _ => None,
            })
            .collect();
        assert!(items.contains(&("a.txt".to_string(), 100, Status::Done)));
        assert!(items.contains(&("b.txt".to_string(), 50, Status::Done)));
    }

    #[tokio::test]
    async fn nested_directory_reports_final_aggregate_size() {
        let tree = TestTree::new().unwrap();
        tree.write_file("d/x", &[0u8; 1000]).unwrap();
        tree.write_file("d/y", &[0u8; 2000]).unwrap();
        tree.write_file("e.txt", &[0u8; 7]).unwrap();

        let ctx = context();
        let events: Vec<Event> = run(tree.root().to_path_buf(), ctx, CancellationToken::new())
            .collect()
            .await;

        let final_d = events.iter().rev().find_map(|e| match e {
            Event::Item { name, size, status: Status::Done, is_dir: true } if name == "d" => Some(*size),
            _ => None,
        });
        assert_eq!(final_d, Some(3000));

        let e_item = events.iter().find_map(|e| match e {
            Event::Item { name, size, status: Status::Done, is_dir: false } if name == "e.txt" => Some(*size),
            _ => None,
        });
        assert_eq!(e_item, Some(7));
    }

    #[tokio::test]
    async fn empty_directory_has_no_items() {
        let tree = TestTree::new().unwrap();
        let ctx = context();
        let events: Vec<Event> = run(tree.root().to_path_buf(), ctx, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::Path { .. }));
        assert!(matches!(events[1], Event::Done));
    }

    #[tokio::test]
    async fn unreadable_root_emits_server_error_not_done() {
        let ctx = context();
        let missing = PathBuf::from("/no/such/dux-session-test-path");
        let events: Vec<Event> = run(missing, ctx, CancellationToken::new()).collect().await;

        assert!(events.iter().any(|e| matches!(e, Event::ServerError { .. })));
        assert!(!events.iter().any(|e| matches!(e, Event::Done)));
    }

    #[tokio::test]
    async fn cancellation_stops_stream_without_terminal_done() {
        let tree = TestTree::new().unwrap();
        for i in 0..50 {
            tree.write_file(&format!("d/f{i}"), &[0u8; 10]).unwrap();
        }

        let ctx = context();
        let cancel = CancellationToken::new();
        let stream = run(tree.root().to_path_buf(), ctx, cancel.clone());
        tokio::pin!(stream);

        // Drain the immediate synchronous events (path + pending placeholder).
        let _ = stream.next().await;
        let _ = stream.next().await;
        cancel.cancel();

        let mut saw_done = false;
        while let Some(event) = stream.next().await {
            if matches!(event, Event::Done) {
                saw_done = true;
            }
        }
        assert!(!saw_done);
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_the_token() {
        let tree = TestTree::new().unwrap();
        for i in 0..50 {
            tree.write_file(&format!("d/f{i}"), &[0u8; 10]).unwrap();
        }

        let ctx = context();
        let cancel = CancellationToken::new();
        let stream = run(tree.root().to_path_buf(), ctx, cancel.clone());
        tokio::pin!(stream);

        // Drain the immediate synchronous events, then tear the stream down
        // without ever calling `cancel.cancel()` ourselves — a transport
        // simply dropping its event stream on disconnect, rather than
        // signalling cancellation explicitly.
        let _ = stream.next().await;
        let _ = stream.next().await;
        assert!(!cancel.is_cancelled());
        drop(stream);

        assert!(cancel.is_cancelled());
    }
}
