//! Filesystem-event adapter
//!
//! Wraps a notify watcher and reduces its raw event stream to a
//! deduplicated stream of absolute paths: only writes and creates count,
//! and rapid repeat events for the same path within the debounce window
//! collapse into one admission. A later event for a path cancels and
//! restarts its pending debounce; stopping the adapter cancels all
//! pending debounces unfired.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ChainsawError, Result};

/// Watcher configuration. The repo historically cites both 500 ms and 1 s
/// for the debounce window; it is configurable with a 500 ms default.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

type ChangeCallback = Arc<dyn Fn(PathBuf) + Send + Sync>;

/// Per-path debounce timers. Observing a path arms (or re-arms) a timer;
/// the callback fires only when the window elapses with no newer event.
pub struct Debouncer {
    window: Duration,
    on_fire: ChangeCallback,
    pending: Arc<Mutex<HashMap<PathBuf, JoinHandle<()>>>>,
}

impl Debouncer {
    pub fn new(window: Duration, on_fire: ChangeCallback) -> Self {
        Self {
            window,
            on_fire,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record an event for a path, cancelling any pending timer for it
    pub fn observe(&self, path: PathBuf) {
        let mut pending = self.pending.lock().expect("debounce map poisoned");

        if let Some(previous) = pending.remove(&path) {
            previous.abort();
        }

        let window = self.window;
        let on_fire = Arc::clone(&self.on_fire);
        let map = Arc::clone(&self.pending);
        let key = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            map.lock().expect("debounce map poisoned").remove(&key);
            on_fire(key);
        });

        pending.insert(path, handle);
    }

    /// Cancel every pending timer without firing
    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock().expect("debounce map poisoned");
        for (_, handle) in pending.drain() {
            handle.abort();
        }
    }

    /// Number of paths currently waiting out their window
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("debounce map poisoned").len()
    }
}

/// Watches directories and emits debounced change notifications
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    watched: HashSet<PathBuf>,
    events: Option<tokio::sync::mpsc::UnboundedReceiver<notify::Result<Event>>>,
    debouncer: Arc<Debouncer>,
}

fn watch_error(op: &'static str, path: &Path, err: notify::Error) -> ChainsawError {
    ChainsawError::io(op, path, std::io::Error::other(err))
}

impl FileWatcher {
    /// Create a watcher that calls `on_change` once per debounced path
    pub fn new(config: WatcherConfig, on_change: ChangeCallback) -> Result<Self> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = tx.send(event);
        })
        .map_err(|e| watch_error("watch", Path::new(""), e))?;

        Ok(Self {
            watcher,
            watched: HashSet::new(),
            events: Some(rx),
            debouncer: Arc::new(Debouncer::new(config.debounce, on_change)),
        })
    }

    /// Subscribe a directory. Already-watched paths are a no-op.
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        if self.watched.contains(&path) {
            return Ok(());
        }
        self.watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| watch_error("watch", &path, e))?;
        debug!(path = %path.display(), "watching directory");
        self.watched.insert(path);
        Ok(())
    }

    /// Unsubscribe a directory. Unknown paths are a no-op.
    pub fn unwatch(&mut self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        if !self.watched.contains(&path) {
            return Ok(());
        }
        self.watcher
            .unwatch(&path)
            .map_err(|e| watch_error("unwatch", &path, e))?;
        self.watched.remove(&path);
        Ok(())
    }

    /// Currently-watched directories
    pub fn watched(&self) -> Vec<PathBuf> {
        self.watched.iter().cloned().collect()
    }

    /// Dispatch loop: reduce raw events to debounced per-path callbacks.
    /// Returns when cancelled, after cancelling all pending debounces.
    pub async fn run(&mut self, cancel: CancellationToken) {
        let Some(mut events) = self.events.take() else {
            warn!("watcher dispatch loop started twice");
            return;
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.debouncer.cancel_all();
                    debug!("watcher stopped");
                    return;
                }
                event = events.recv() => {
                    match event {
                        Some(Ok(event)) => self.handle_event(event),
                        Some(Err(e)) => warn!(error = %e, "watcher error"),
                        None => {
                            self.debouncer.cancel_all();
                            return;
                        }
                    }
                }
            }
        }
    }

    fn handle_event(&self, event: Event) {
        // only writes and creates feed admission
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        for path in event.paths {
            self.debouncer.observe(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_callback() -> (ChangeCallback, Arc<AtomicUsize>, Arc<Mutex<Vec<PathBuf>>>) {
        let count = Arc::new(AtomicUsize::new(0));
        let fired: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));
        let cb_count = Arc::clone(&count);
        let cb_fired = Arc::clone(&fired);
        let callback: ChangeCallback = Arc::new(move |path| {
            cb_count.fetch_add(1, Ordering::SeqCst);
            cb_fired.lock().unwrap().push(path);
        });
        (callback, count, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_events_collapse_to_one() {
        let (callback, count, fired) = counter_callback();
        let debouncer = Debouncer::new(Duration::from_millis(500), callback);

        let path = PathBuf::from("/tmp/file.rs");
        debouncer.observe(path.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.observe(path.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.observe(path.clone());

        // inside the window nothing fires
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(fired.lock().unwrap().as_slice(), &[path]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_paths_fire_independently() {
        let (callback, count, _) = counter_callback();
        let debouncer = Debouncer::new(Duration::from_millis(500), callback);

        debouncer.observe(PathBuf::from("/a"));
        debouncer.observe(PathBuf::from("/b"));
        assert_eq!(debouncer.pending_count(), 2);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_suppresses_pending() {
        let (callback, count, _) = counter_callback();
        let debouncer = Debouncer::new(Duration::from_millis(500), callback);

        debouncer.observe(PathBuf::from("/a"));
        debouncer.observe(PathBuf::from("/b"));
        debouncer.cancel_all();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_event_restarts_window() {
        let (callback, count, _) = counter_callback();
        let debouncer = Debouncer::new(Duration::from_millis(500), callback);

        let path = PathBuf::from("/tmp/file.rs");
        debouncer.observe(path.clone());
        tokio::time::sleep(Duration::from_millis(400)).await;
        // still pending; this restarts the clock
        debouncer.observe(path.clone());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watch_dedup_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let (callback, _, _) = counter_callback();
        let mut watcher = FileWatcher::new(WatcherConfig::default(), callback).unwrap();

        watcher.watch(dir.path()).unwrap();
        watcher.watch(dir.path()).unwrap();
        assert_eq!(watcher.watched().len(), 1);

        watcher.unwatch(dir.path()).unwrap();
        assert!(watcher.watched().is_empty());
        // unknown path is a no-op
        watcher.unwatch(Path::new("/nonexistent")).unwrap();
    }

    #[tokio::test]
    async fn test_file_write_triggers_debounced_callback() {
        let dir = tempfile::tempdir().unwrap();
        let (callback, count, _) = counter_callback();
        let mut watcher =
            FileWatcher::new(
                WatcherConfig {
                    debounce: Duration::from_millis(100),
                },
                callback,
            )
            .unwrap();
        watcher.watch(dir.path()).unwrap();

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            watcher.run(run_cancel).await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("touched.rs"), "fn x() {}\n").unwrap();

        // allow inotify delivery plus the debounce window
        let mut waited = 0;
        while count.load(Ordering::SeqCst) == 0 && waited < 3000 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += 50;
        }
        assert!(count.load(Ordering::SeqCst) >= 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
