// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Directory watcher that debounces new screenshots into a bounded queue
//!
//! Detection (notify's event thread) and dispatch (a tokio task) share one
//! [`WatchState`] behind a single mutex.

use async_trait::async_trait;
use futures_util::FutureExt;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::Read;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::WatcherConfig;
use crate::Result;

/// Extensions picked up by the watcher and by directory scans
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Receives each ready path from the dispatch loop
#[async_trait]
pub trait FileProcessor: Send + Sync {
    async fn process(&self, path: PathBuf) -> Result<()>;
}

/// Pending detections plus the queue of paths ready for dispatch
#[derive(Debug)]
pub struct WatchState {
    pending: HashMap<PathBuf, Instant>,
    queue: VecDeque<PathBuf>,
    max_queue: usize,
    evicted: u64,
}

impl WatchState {
    pub fn new(max_queue: usize) -> Self {
        Self {
            pending: HashMap::new(),
            queue: VecDeque::new(),
            max_queue: max_queue.max(1),
            evicted: 0,
        }
    }

    /// Record a first detection. Returns false if the path was already pending.
    pub fn record(&mut self, path: PathBuf, now: Instant) -> bool {
        if self.pending.contains_key(&path) {
            return false;
        }
        self.pending.insert(path, now);
        true
    }

    /// Move every pending path older than `debounce` whose state is
    /// [`FileState::Ready`] into the queue. Busy paths stay pending; missing
    /// ones are forgotten.
    pub fn promote_ready<F>(&mut self, now: Instant, debounce: Duration, state_of: F) -> usize
    where
        F: Fn(&Path) -> FileState,
    {
        let mut ready: Vec<(PathBuf, Instant)> = Vec::new();
        let mut gone: Vec<PathBuf> = Vec::new();
        for (path, seen) in &self.pending {
            if now.duration_since(*seen) < debounce {
                continue;
            }
            match state_of(path) {
                FileState::Ready => ready.push((path.clone(), *seen)),
                FileState::Missing => gone.push(path.clone()),
                FileState::Busy => {}
            }
        }

        for path in gone {
            debug!("Dropping vanished file {:?}", path);
            self.pending.remove(&path);
        }

        ready.sort_by_key(|(_, seen)| *seen);
        let count = ready.len();
        for (path, _) in ready {
            self.pending.remove(&path);
            self.enqueue(path);
        }
        count
    }

    /// Append to the queue, evicting the oldest entry when full
    pub fn enqueue(&mut self, path: PathBuf) {
        while self.queue.len() >= self.max_queue {
            if let Some(dropped) = self.queue.pop_front() {
                self.evicted += 1;
                warn!("Queue full, dropping {:?}", dropped);
            }
        }
        self.queue.push_back(path);
    }

    pub fn pop(&mut self) -> Option<PathBuf> {
        self.queue.pop_front()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queued(&self) -> impl Iterator<Item = &PathBuf> {
        self.queue.iter()
    }

    /// Number of paths dropped because the queue was full
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

type SharedState = Arc<Mutex<WatchState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, WatchState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Watches screenshot directories and feeds a [`FileProcessor`]
pub struct ScreenshotWatcher {
    dirs: Vec<PathBuf>,
    config: WatcherConfig,
    state: SharedState,
    fs_watcher: Option<RecommendedWatcher>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl ScreenshotWatcher {
    pub fn new(dirs: Vec<PathBuf>, config: WatcherConfig) -> Self {
        let state = Arc::new(Mutex::new(WatchState::new(config.max_queue)));
        Self {
            dirs,
            config,
            state,
            fs_watcher: None,
            shutdown_tx: None,
            task: None,
        }
    }

    /// Entry point for a creation event
    pub fn on_file_created(&self, path: &Path) -> bool {
        detect(&self.state, path)
    }

    /// Subscribe to the monitored directories and spawn the dispatch loop.
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, processor: Arc<dyn FileProcessor>) -> Result<()> {
        if self.task.is_some() {
            warn!("Watcher already running");
            return Ok(());
        }

        let state = Arc::clone(&self.state);
        let mut fs_watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for path in created_paths(&event) {
                        detect(&state, path);
                    }
                }
                Err(e) => warn!("Watch error: {}", e),
            },
            Config::default(),
        )?;

        for dir in &self.dirs {
            if !dir.is_dir() {
                warn!("Monitored directory does not exist, skipping: {:?}", dir);
                continue;
            }
            fs_watcher.watch(dir, RecursiveMode::NonRecursive)?;
            info!("Watching: {:?}", dir);
        }

        self.fs_watcher = Some(fs_watcher);
        self.spawn_dispatch(processor);
        Ok(())
    }

    /// Spawn only the debounce/dispatch loop, without filesystem notifications
    pub fn spawn_dispatch(&mut self, processor: Arc<dyn FileProcessor>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.task = Some(tokio::spawn(dispatch_loop(
            Arc::clone(&self.state),
            processor,
            self.config.debounce(),
            self.config.poll_interval(),
            shutdown_rx,
        )));
        self.shutdown_tx = Some(shutdown_tx);
    }

    /// Stop detection, then wait for the in-flight dispatch up to the stop
    /// timeout before aborting it.
    pub async fn stop(&mut self) {
        // Dropping the notify watcher ends detection first.
        self.fs_watcher = None;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.config.stop_timeout(), &mut task).await {
                Ok(Ok(())) => info!("Watcher stopped"),
                Ok(Err(e)) => error!("Dispatch loop failed: {}", e),
                Err(_) => {
                    warn!("Dispatch loop did not stop within {:?}, aborting", self.config.stop_timeout());
                    task.abort();
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn evicted(&self) -> u64 {
        lock(&self.state).evicted()
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.state).queue_len()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.state).pending_len()
    }
}

fn detect(state: &SharedState, path: &Path) -> bool {
    if path.is_dir() || !is_monitored_image(path) || is_temporary(path) {
        return false;
    }
    let recorded = lock(state).record(path.to_path_buf(), Instant::now());
    if recorded {
        debug!("Detected {:?}", path);
    }
    recorded
}

/// Paths a notify event introduces into a directory
fn created_paths(event: &Event) -> Vec<&Path> {
    match event.kind {
        EventKind::Create(_) => event.paths.iter().map(PathBuf::as_path).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both)) => {
            event.paths.last().map(PathBuf::as_path).into_iter().collect()
        }
        _ => Vec::new(),
    }
}

async fn dispatch_loop(
    state: SharedState,
    processor: Arc<dyn FileProcessor>,
    debounce: Duration,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!("Dispatch loop started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let next = {
            let mut state = lock(&state);
            state.promote_ready(Instant::now(), debounce, file_state);
            state.pop()
        };

        if let Some(path) = next {
            let outcome = AssertUnwindSafe(processor.process(path.clone()))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => debug!("Processed {:?}", path),
                Ok(Err(e)) => error!("Failed to process {:?}: {}", path, e),
                Err(_) => error!("Processor panicked on {:?}", path),
            }
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    debug!("Dispatch loop exited");
}

/// Extension is one of [`IMAGE_EXTENSIONS`], compared case-insensitively
pub fn is_monitored_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|m| ext.eq_ignore_ascii_case(m)))
        .unwrap_or(false)
}

/// Names starting with `~` or `.` are editor temp files or hidden files
pub fn is_temporary(path: &Path) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.starts_with('~') || name.starts_with('.'),
        None => true,
    }
}

/// Should a directory entry be handed to the pipeline
pub fn is_eligible(path: &Path) -> bool {
    path.is_file() && is_monitored_image(path) && !is_temporary(path)
}

/// Write-completion status of a pending path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Opens and reads
    Ready,
    /// Exists but cannot be read yet
    Busy,
    /// Deleted or moved away since detection
    Missing,
}

/// Best-effort write-completion check: the file opens and a 1-byte read succeeds.
pub fn file_state(path: &Path) -> FileState {
    if !path.exists() {
        return FileState::Missing;
    }
    let mut buf = [0u8; 1];
    match File::open(path).and_then(|mut f| f.read(&mut buf)) {
        Ok(_) => FileState::Ready,
        Err(_) => FileState::Busy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SnapsortError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(PathBuf, Instant)>>,
    }

    #[async_trait]
    impl FileProcessor for Recorder {
        async fn process(&self, path: PathBuf) -> Result<()> {
            self.seen.lock().unwrap().push((path, Instant::now()));
            Ok(())
        }
    }

    /// Fails on the first call, panics on the second, then records
    #[derive(Default)]
    struct Flaky {
        calls: AtomicUsize,
        recorded: Recorder,
    }

    #[async_trait]
    impl FileProcessor for Flaky {
        async fn process(&self, path: PathBuf) -> Result<()> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(SnapsortError::Extraction("boom".to_string())),
                1 => panic!("processor blew up"),
                _ => self.recorded.process(path).await,
            }
        }
    }

    fn fast_config() -> WatcherConfig {
        WatcherConfig {
            debounce_ms: 200,
            max_queue: 100,
            poll_interval_ms: 10,
            stop_timeout_ms: 1000,
        }
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"\x89PNG fake").unwrap();
        path
    }

    #[test]
    fn test_filters() {
        assert!(is_monitored_image(Path::new("/a/shot.png")));
        assert!(is_monitored_image(Path::new("/a/shot.JPEG")));
        assert!(!is_monitored_image(Path::new("/a/shot.gif")));
        assert!(!is_monitored_image(Path::new("/a/shot")));

        for name in ["~shot.png", ".shot.png", "~$lock.jpg", ".DS_Store.png"] {
            assert!(is_temporary(Path::new(name)), "{}", name);
        }
        assert!(!is_temporary(Path::new("/a/shot.png")));
    }

    #[test]
    fn test_temporary_names_never_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let watcher = ScreenshotWatcher::new(vec![], fast_config());

        assert!(!watcher.on_file_created(&touch(tmp.path(), "~draft.png")));
        assert!(!watcher.on_file_created(&touch(tmp.path(), ".hidden.png")));
        assert!(!watcher.on_file_created(&touch(tmp.path(), "notes.txt")));
        assert!(!watcher.on_file_created(tmp.path()));
        assert_eq!(watcher.pending_len(), 0);
    }

    #[test]
    fn test_redetection_is_noop() {
        let mut state = WatchState::new(10);
        let now = Instant::now();
        assert!(state.record(PathBuf::from("/a.png"), now));
        assert!(!state.record(PathBuf::from("/a.png"), now + Duration::from_millis(100)));
        assert_eq!(state.pending_len(), 1);

        // Age is measured from the first detection
        assert_eq!(state.promote_ready(now + Duration::from_millis(499), Duration::from_millis(500), |_| FileState::Ready), 0);
        assert_eq!(state.promote_ready(now + Duration::from_millis(500), Duration::from_millis(500), |_| FileState::Ready), 1);
        assert_eq!(state.pop(), Some(PathBuf::from("/a.png")));
    }

    #[test]
    fn test_unready_files_stay_pending() {
        let mut state = WatchState::new(10);
        let now = Instant::now();
        state.record(PathBuf::from("/a.png"), now);
        let later = now + Duration::from_secs(1);

        assert_eq!(state.promote_ready(later, Duration::from_millis(500), |_| FileState::Busy), 0);
        assert_eq!(state.pending_len(), 1);
        assert_eq!(state.promote_ready(later, Duration::from_millis(500), |_| FileState::Ready), 1);
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn test_queue_bound_evicts_oldest() {
        let mut state = WatchState::new(3);
        for i in 0..5 {
            state.enqueue(PathBuf::from(format!("/{}.png", i)));
            assert!(state.queue_len() <= 3);
        }
        let queued: Vec<_> = state.queued().cloned().collect();
        assert_eq!(
            queued,
            vec![PathBuf::from("/2.png"), PathBuf::from("/3.png"), PathBuf::from("/4.png")]
        );
        assert_eq!(state.evicted(), 2);
    }

    #[test]
    fn test_file_state() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(file_state(&touch(tmp.path(), "a.png")), FileState::Ready);
        assert_eq!(file_state(&tmp.path().join("missing.png")), FileState::Missing);
    }

    #[test]
    fn test_deleted_file_leaves_pending() {
        let tmp = tempfile::tempdir().unwrap();
        let path = touch(tmp.path(), "gone.png");
        let mut state = WatchState::new(10);
        let now = Instant::now();
        assert!(state.record(path.clone(), now));
        std::fs::remove_file(&path).unwrap();

        // Still inside the window: kept even though the file is gone
        assert_eq!(state.promote_ready(now + Duration::from_millis(100), Duration::from_millis(500), file_state), 0);
        assert_eq!(state.pending_len(), 1);

        assert_eq!(state.promote_ready(now + Duration::from_secs(1), Duration::from_millis(500), file_state), 0);
        assert_eq!(state.pending_len(), 0);
        assert_eq!(state.queue_len(), 0);

        // A later file at the same path is detected afresh
        assert!(state.record(path, now + Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_rapid_events_dispatch_once() {
        let tmp = tempfile::tempdir().unwrap();
        let path = touch(tmp.path(), "shot.png");
        let recorder = Arc::new(Recorder::default());
        let mut watcher = ScreenshotWatcher::new(vec![], fast_config());
        watcher.spawn_dispatch(recorder.clone());

        let first = Instant::now();
        for _ in 0..5 {
            watcher.on_file_created(&path);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(600)).await;
        watcher.stop().await;

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, path);
        assert!(seen[0].1.duration_since(first) >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_processor_failures_do_not_stop_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let flaky = Arc::new(Flaky::default());
        let mut watcher = ScreenshotWatcher::new(vec![], fast_config());
        watcher.spawn_dispatch(flaky.clone());

        for name in ["a.png", "b.png", "c.png"] {
            watcher.on_file_created(&touch(tmp.path(), name));
        }
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(watcher.is_running());
        watcher.stop().await;

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(flaky.recorded.seen.lock().unwrap().len(), 1);
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_missing_directory_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let mut watcher = ScreenshotWatcher::new(
            vec![tmp.path().join("does-not-exist"), tmp.path().to_path_buf()],
            fast_config(),
        );
        watcher.start(Arc::new(Recorder::default())).unwrap();
        assert!(watcher.is_running());
        watcher.stop().await;
    }
}
