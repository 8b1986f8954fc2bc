use crate::error::LoadError;
use crate::index::ReferenceIndex;
use crate::parser::{self, LoadOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// The published state: a complete index and the mtime of the file it came from.
struct Snapshot {
    index: Arc<ReferenceIndex>,
    modified_at: SystemTime,
    skipped_rows: usize,
}

struct Failure {
    message: String,
    /// mtime of a file version that failed permanently; not reparsed until it changes
    modified_at: Option<SystemTime>,
}

/// Owns the lifecycle of the current [`ReferenceIndex`] for one reference file.
///
/// Readers get an `Arc` to an immutable index and never wait on a reparse when
/// a previous index exists. Rebuilds are single-flight: a caller that finds the
/// rebuild lock taken either serves the previous index or, when there is none,
/// waits and reuses the result instead of reparsing again.
pub struct ReferenceCache {
    source_path: PathBuf,
    options: LoadOptions,
    current: RwLock<Option<Arc<Snapshot>>>,
    /// Completed reparse attempts, successful or not
    reloads: AtomicU64,
    /// Successfully published indices
    builds: AtomicU64,
    rebuild_lock: Mutex<()>,
    last_failure: Mutex<Option<Failure>>,
}

impl ReferenceCache {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self::with_options(source_path, LoadOptions::default())
    }

    pub fn with_options(source_path: impl Into<PathBuf>, options: LoadOptions) -> Self {
        Self {
            source_path: source_path.into(),
            options,
            current: RwLock::new(None),
            reloads: AtomicU64::new(0),
            builds: AtomicU64::new(0),
            rebuild_lock: Mutex::new(()),
            last_failure: Mutex::new(None),
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Number of reparses attempted so far.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Acquire)
    }

    /// Modification time of the file behind the current index.
    pub fn source_modified_at(&self) -> Option<SystemTime> {
        self.snapshot().map(|s| s.modified_at)
    }

    /// Rows of the current file skipped for an unrecognised level.
    pub fn skipped_rows(&self) -> usize {
        self.snapshot().map(|s| s.skipped_rows).unwrap_or(0)
    }

    /// Returns the current index, reparsing first if it is absent, stale, or
    /// `force_reload` is set. On a failed reparse the previous index (if any)
    /// is returned unchanged.
    pub fn get_index(&self, force_reload: bool) -> Option<Arc<ReferenceIndex>> {
        let seen_reloads = self.reloads.load(Ordering::Acquire);
        let current = self.snapshot();

        let observed = match parser::source_modified(&self.source_path) {
            Ok(mtime) => mtime,
            Err(e) => {
                self.report_failure(&e, None);
                return current.map(|s| Arc::clone(&s.index));
            }
        };

        if !force_reload {
            if let Some(snap) = &current {
                if snap.modified_at == observed {
                    return Some(Arc::clone(&snap.index));
                }
            }
            if self.failed_version() == Some(observed) {
                return current.map(|s| Arc::clone(&s.index));
            }
        }

        let _guard = match self.rebuild_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                if !force_reload {
                    if let Some(snap) = &current {
                        debug!("Rebuild in progress, serving previous index");
                        return Some(Arc::clone(&snap.index));
                    }
                }
                self.wait_for_rebuild_lock()
            }
            Err(TryLockError::Poisoned(e)) => {
                warn!("Rebuild lock poisoned, continuing");
                e.into_inner()
            }
        };

        // Another caller finished a reparse while we were getting here.
        if self.reloads.load(Ordering::Acquire) != seen_reloads {
            return self.snapshot().map(|s| Arc::clone(&s.index));
        }

        self.rebuild(observed)
    }

    /// Reparses unconditionally. Returns true if a new index was published.
    pub fn force_reload(&self) -> bool {
        let before = self.builds.load(Ordering::Acquire);
        self.get_index(true);
        self.builds.load(Ordering::Acquire) != before
    }

    /// Drops the current index; the next `get_index` rebuilds from disk.
    pub fn clear(&self) {
        let mut current = match self.current.write() {
            Ok(guard) => guard,
            Err(e) => e.into_inner(),
        };
        *current = None;
        info!(path = ?self.source_path, "Reference cache cleared");
    }

    fn snapshot(&self) -> Option<Arc<Snapshot>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    fn wait_for_rebuild_lock(&self) -> MutexGuard<'_, ()> {
        match self.rebuild_lock.lock() {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Rebuild lock poisoned, continuing");
                e.into_inner()
            }
        }
    }

    fn rebuild(&self, observed: SystemTime) -> Option<Arc<ReferenceIndex>> {
        debug!(path = ?self.source_path, "Reparsing reference dataset");

        let result = match parser::read_records_with_retry(&self.source_path, &self.options) {
            Ok(dataset) => {
                let index = Arc::new(ReferenceIndex::build(dataset.records));
                let snapshot = Arc::new(Snapshot {
                    index: Arc::clone(&index),
                    modified_at: observed,
                    skipped_rows: dataset.skipped_rows,
                });
                match self.current.write() {
                    Ok(mut guard) => *guard = Some(snapshot),
                    Err(e) => *e.into_inner() = Some(snapshot),
                }
                self.builds.fetch_add(1, Ordering::Release);
                self.clear_failure();

                if dataset.skipped_rows > 0 {
                    warn!(
                        skipped = dataset.skipped_rows,
                        "Reference rows with unrecognised level were skipped"
                    );
                }
                info!(path = ?self.source_path, names = index.len(), "Reference index published");
                Some(index)
            }
            Err(e) => {
                let failed_version = (!e.is_transient()).then_some(observed);
                self.report_failure(&e, failed_version);
                self.snapshot().map(|s| Arc::clone(&s.index))
            }
        };

        self.reloads.fetch_add(1, Ordering::Release);
        result
    }

    fn failed_version(&self) -> Option<SystemTime> {
        self.failure_slot().as_ref().and_then(|f| f.modified_at)
    }

    /// Logs once per distinct failure; repeats of the same failure go to debug.
    fn report_failure(&self, error: &LoadError, modified_at: Option<SystemTime>) {
        let message = error.to_string();
        let mut slot = self.failure_slot();
        match slot.as_mut() {
            Some(previous) if previous.message == message => {
                debug!(error = %message, "Reference dataset still unavailable");
                previous.modified_at = modified_at;
            }
            _ => {
                warn!(
                    error = %message,
                    has_previous = self.is_loaded(),
                    "Reference dataset unavailable, keeping previous index"
                );
                *slot = Some(Failure {
                    message,
                    modified_at,
                });
            }
        }
    }

    fn clear_failure(&self) {
        if self.failure_slot().take().is_some() {
            info!(path = ?self.source_path, "Reference dataset available again");
        }
    }

    fn failure_slot(&self) -> MutexGuard<'_, Option<Failure>> {
        match self.last_failure.lock() {
            Ok(guard) => guard,
            Err(e) => e.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Level;
    use std::fs::{self, File};
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::time::Duration;
    use tempfile::TempDir;
    use tracing::Subscriber;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Counts WARN events emitted on the current thread.
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn count_warnings(f: impl FnOnce()) -> usize {
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&warnings)));
        tracing::subscriber::with_default(subscriber, f);
        warnings.load(Ordering::SeqCst)
    }

    const REFERENCE: &str = "level,name,code,parent\n\
        municipality,Ibagué,73001,\n\
        township,La Esperanza,73001001,Ibagué\n";

    fn write_reference(path: &Path, contents: &str, mtime_offset_secs: u64) {
        let mut file = File::create(path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + mtime_offset_secs);
        file.set_modified(mtime).unwrap();
    }

    fn fixture() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("territorios.csv");
        write_reference(&path, REFERENCE, 0);
        (dir, path)
    }

    #[test]
    fn missing_file_yields_none_without_reparse() {
        let dir = TempDir::new().unwrap();
        let cache = ReferenceCache::new(dir.path().join("absent.csv"));
        assert!(cache.get_index(false).is_none());
        assert!(cache.get_index(false).is_none());
        assert!(!cache.is_loaded());
        assert_eq!(cache.reload_count(), 0);
    }

    #[test]
    fn first_call_builds_and_later_calls_reuse() {
        let (_dir, path) = fixture();
        let cache = ReferenceCache::new(&path);

        let first = cache.get_index(false).unwrap();
        assert_eq!(first.code_for("IBAGUE"), Some("73001"));
        for _ in 0..10 {
            let again = cache.get_index(false).unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }
        assert_eq!(cache.reload_count(), 1);
    }

    #[test]
    fn mtime_change_triggers_rebuild() {
        let (_dir, path) = fixture();
        let cache = ReferenceCache::new(&path);
        cache.get_index(false).unwrap();

        write_reference(&path, "level,name,code\nmunicipality,Ibagué,73002\n", 60);

        let index = cache.get_index(false).unwrap();
        assert_eq!(index.code_for("IBAGUE"), Some("73002"));
        assert_eq!(cache.reload_count(), 2);
    }

    #[test]
    fn force_reload_reparses_unchanged_file() {
        let (_dir, path) = fixture();
        let cache = ReferenceCache::new(&path);
        cache.get_index(false).unwrap();

        assert!(cache.force_reload());
        assert_eq!(cache.reload_count(), 2);
    }

    #[test]
    fn broken_update_keeps_previous_index() {
        let (_dir, path) = fixture();
        let cache = ReferenceCache::new(&path);
        let before = cache.get_index(false).unwrap();

        write_reference(&path, "name,code\nIbagué,73002\n", 60);

        let after = cache.get_index(false).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(!cache.force_reload());
        assert_eq!(cache.get_index(false).unwrap().code_for("IBAGUE"), Some("73001"));
    }

    #[test]
    fn broken_file_is_not_reparsed_until_it_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("territorios.csv");
        write_reference(&path, "name,code\nIbagué,73001\n", 0);
        let cache = ReferenceCache::new(&path);

        assert!(cache.get_index(false).is_none());
        assert!(cache.get_index(false).is_none());
        assert_eq!(cache.reload_count(), 1);

        write_reference(&path, REFERENCE, 60);
        assert!(cache.get_index(false).is_some());
        assert_eq!(cache.reload_count(), 2);
    }

    #[test]
    fn deleted_file_keeps_previous_index() {
        let (_dir, path) = fixture();
        let cache = ReferenceCache::new(&path);
        cache.get_index(false).unwrap();

        fs::remove_file(&path).unwrap();

        assert!(cache.get_index(false).is_some());
        assert!(!cache.force_reload());
        assert_eq!(cache.reload_count(), 1);
    }

    #[test]
    fn clear_drops_index_until_next_call() {
        let (_dir, path) = fixture();
        let cache = ReferenceCache::new(&path);
        cache.get_index(false).unwrap();

        cache.clear();
        assert!(!cache.is_loaded());
        assert!(cache.get_index(false).is_some());
        assert_eq!(cache.reload_count(), 2);
    }

    #[test]
    fn readers_get_previous_index_while_rebuild_in_progress() {
        let (_dir, path) = fixture();
        let cache = ReferenceCache::new(&path);
        let before = cache.get_index(false).unwrap();

        write_reference(&path, "level,name,code\nmunicipality,Ibagué,73002\n", 60);

        let _rebuilding = cache.rebuild_lock.lock().unwrap();
        let during = cache.get_index(false).unwrap();
        assert!(Arc::ptr_eq(&before, &during));
        assert_eq!(cache.reload_count(), 1);
    }

    #[test]
    fn concurrent_first_load_reparses_once() {
        let (_dir, path) = fixture();
        let cache = ReferenceCache::new(&path);
        let barrier = Barrier::new(8);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();
                    let index = cache.get_index(false).unwrap();
                    assert_eq!(index.records(Level::Township).len(), 1);
                });
            }
        });

        assert_eq!(cache.reload_count(), 1);
    }

    #[test]
    fn skipped_rows_reported_for_current_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("territorios.csv");
        write_reference(&path, "level,name,code\nbarrio,Centro,1\nmunicipality,Honda,73349\n", 0);
        let cache = ReferenceCache::new(&path);
        cache.get_index(false).unwrap();
        assert_eq!(cache.skipped_rows(), 1);
    }

    #[test]
    fn repeated_failure_is_reported_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("territorios.csv");
        let cache = ReferenceCache::new(&path);

        let warnings = count_warnings(|| {
            for _ in 0..5 {
                assert!(cache.get_index(false).is_none());
            }
        });
        assert_eq!(warnings, 1);
    }

    #[test]
    fn distinct_failures_are_each_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("territorios.csv");
        let cache = ReferenceCache::new(&path);

        let warnings = count_warnings(|| {
            cache.get_index(false);
            cache.get_index(false);
            write_reference(&path, "name,code\nIbagué,73001\n", 0);
            cache.get_index(false);
            cache.get_index(false);
        });
        assert_eq!(warnings, 2);
    }

    #[cfg(unix)]
    #[test]
    fn transient_failure_keeps_previous_index_and_retries_next_call() {
        let (_dir, path) = fixture();
        let options = LoadOptions {
            retry_delay: Duration::ZERO,
            ..LoadOptions::default()
        };
        let cache = ReferenceCache::with_options(&path, options);
        let before = cache.get_index(false).unwrap();

        // a directory opens but cannot be read, which is an I/O error rather than "missing"
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        let after = cache.get_index(false).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(cache.reload_count(), 2);

        // transient failures do not pin the file version as broken
        cache.get_index(false).unwrap();
        assert_eq!(cache.reload_count(), 3);
    }
}
