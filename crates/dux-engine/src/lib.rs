//! # dux-engine
//!
//! The top-level facade (wiring C1-C5): owns the process-wide directory
//! reader and cache registry, and exposes the two request-level operations
//! named in `spec.md` §6 — `usage` (open an event stream for a root path)
//! and `refresh` (invalidate a cached subtree) — as plain async methods.
//! The HTTP/SSE transport and routing this spec places out of scope
//! (§1) are the caller's concern; `Engine` stops at producing a
//! `Stream<Item = dux_session::Event>`.

use std::path::PathBuf;
use std::sync::Arc;

use dux_cache::Registry;
use dux_config::path::resolve_absolute;
use dux_config::EngineConfig;
use dux_fs::DirReader;
use dux_session::{Event, SessionContext};
use dux_sizer::SizerContext;
use futures::Stream;
use tokio_util::sync::CancellationToken;

/// One request's event stream plus the cancellation handle a transport
/// layer calls when the client disconnects (§4.5's cancellation
/// semantics). Dropping the stream without calling [`UsageSession::cancel`]
/// still works — the session simply runs to its natural `done`/
/// `server_error` terminal event — but an explicit disconnect signal lets
/// the transport stop the session promptly rather than waiting for the
/// stream to be polled again.
pub struct UsageSession<S> {
    pub stream: S,
    cancel: CancellationToken,
}

impl<S> UsageSession<S> {
    /// Signal client disconnect: the session stops emitting events and
    /// unsubscribes from every entry it was watching. Shared sizer tasks
    /// are unaffected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// The engine: a process-wide cache registry and directory reader shared
/// across every session, plus the tunables from `EngineConfig`.
#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    registry: Arc<Registry>,
    reader: DirReader,
    sizer_ctx: SizerContext,
    /// Cancelled on process shutdown; every outstanding sizer task shares
    /// this token so a clean shutdown doesn't leave orphaned background
    /// work (§4.4's "any state -> DONE via mark_done if context cancelled").
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let reader = DirReader::new(config.fs_read_concurrency);
        let shutdown = CancellationToken::new();

        let mut sizer_ctx = SizerContext::new(registry.clone(), reader.clone(), config.publish_interval());
        sizer_ctx.cancel = shutdown.clone();

        Self {
            config,
            registry,
            reader,
            sizer_ctx,
            shutdown,
        }
    }

    /// `usage(path?)` (§6): open an event stream for `path`, or the
    /// configured initial directory, or the process's current working
    /// directory if neither is set. The path is resolved to absolute form
    /// inside the session itself; a resolution failure becomes a
    /// session-terminal [`Event::ServerError`] rather than a `Result` here.
    pub fn usage(&self, path: Option<PathBuf>) -> UsageSession<impl Stream<Item = Event>> {
        let root = path
            .or_else(|| self.config.initial_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."));

        // A child of the engine's own shutdown token: an explicit
        // `UsageSession::cancel()` or a dropped stream cancels only this
        // session, but `Engine::shutdown()` cancelling the parent cascades
        // to every outstanding session too.
        let cancel = self.shutdown.child_token();
        let ctx = SessionContext {
            registry: self.registry.clone(),
            reader: self.reader.clone(),
            sizer_ctx: self.sizer_ctx.clone(),
            session_concurrency: self.config.session_concurrency,
        };

        UsageSession {
            stream: dux_session::run(root, ctx, cancel.clone()),
            cancel,
        }
    }

    /// `refresh(path)` (§6): invalidate `path` and every cached descendant,
    /// so a subsequent `usage` recomputes from scratch. Always succeeds —
    /// a path with no cached entry is simply a no-op retain.
    pub fn refresh(&self, path: PathBuf) {
        let absolute = resolve_absolute(&path).unwrap_or(path);
        self.registry.invalidate(&absolute);
    }

    /// Number of entries ever created — test/ops instrumentation for §8
    /// property 2 ("the sizer for `p` runs exactly once").
    pub fn sizer_spawn_count(&self) -> u64 {
        self.registry.created_count()
    }

    /// Cancel every outstanding sizer task's shared shutdown token. Call
    /// once when the process is shutting down; in-flight sizers still run
    /// their `mark_done` finalization with whatever total they had
    /// accumulated (§7).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dux_config::testing::TestTree;
    use futures::StreamExt;

    fn engine() -> Engine {
        Engine::new(EngineConfig {
            publish_interval_ms: 20,
            ..EngineConfig::default()
        })
    }

    #[tokio::test]
    async fn usage_emits_path_items_and_done() {
        let tree = TestTree::new().unwrap();
        tree.write_file("a.txt", &[0u8; 100]).unwrap();
        tree.write_file("b.txt", &[0u8; 50]).unwrap();

        let engine = engine();
        let session = engine.usage(Some(tree.root().to_path_buf()));
        let events: Vec<Event> = session.stream.collect().await;

        assert!(matches!(events.first(), Some(Event::Path { .. })));
        assert!(matches!(events.last(), Some(Event::Done)));
    }

    #[tokio::test]
    async fn refresh_forces_a_fresh_sizer_spawn() {
        let tree = TestTree::new().unwrap();
        tree.write_file("d/file", &[0u8; 10]).unwrap();

        let engine = engine();
        let events: Vec<Event> = engine
            .usage(Some(tree.root().to_path_buf()))
            .stream
            .collect()
            .await;
        assert!(matches!(events.last(), Some(Event::Done)));
        let spawned_before = engine.sizer_spawn_count();

        engine.refresh(tree.root().to_path_buf());

        let events: Vec<Event> = engine
            .usage(Some(tree.root().to_path_buf()))
            .stream
            .collect()
            .await;
        assert!(matches!(events.last(), Some(Event::Done)));

        // Both the root and "d" get a fresh entry after invalidation.
        assert!(engine.sizer_spawn_count() > spawned_before);
    }

    #[tokio::test]
    async fn concurrent_sessions_share_one_sizer_for_the_same_subtree() {
        let tree = TestTree::new().unwrap();
        tree.write_file("shared/file", &[0u8; 123]).unwrap();

        let engine = engine();
        let (a, b) = tokio::join!(
            engine.usage(Some(tree.root().to_path_buf())).stream.collect::<Vec<_>>(),
            engine.usage(Some(tree.root().to_path_buf())).stream.collect::<Vec<_>>(),
        );

        let final_size = |events: &[Event]| {
            events.iter().rev().find_map(|e| match e {
                Event::Item { name, size, status: dux_session::Status::Done, .. } if name == "shared" => {
                    Some(*size)
                }
                _ => None,
            })
        };

        assert_eq!(final_size(&a), Some(123));
        assert_eq!(final_size(&b), Some(123));
        // A session never caches the root itself (only its directory
        // children), so the only entry either session creates is the
        // "shared" subdirectory's — exactly once, shared by both.
        assert_eq!(engine.sizer_spawn_count(), 1);
    }

    #[tokio::test]
    async fn missing_root_surfaces_server_error() {
        let engine = engine();
        let events: Vec<Event> = engine
            .usage(Some(PathBuf::from("/no/such/dux-engine-test-path")))
            .stream
            .collect()
            .await;

        assert!(matches!(events.last(), Some(Event::ServerError { .. })));
    }
}
