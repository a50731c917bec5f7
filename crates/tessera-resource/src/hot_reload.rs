//! Hot reload of live resources during development.
//!
//! [`HotReloader`] reloads batches of changed paths and reports per-path
//! results. With the `hot-reload` feature, [`FileWatcher`] watches the loose
//! file root and reports which resource paths changed on disk.

use tessera_core::alloc::HashSet;

use crate::error::ResourceError;
use crate::factory::Factory;
use crate::hash::hash_path;

#[cfg(feature = "hot-reload")]
use std::path::{Component, Path, PathBuf};
#[cfg(feature = "hot-reload")]
use std::sync::mpsc::{Receiver, channel};

#[cfg(feature = "hot-reload")]
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Outcome of a batch reload.
#[derive(Debug, Default)]
pub struct ReloadReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, ResourceError)>,
}

impl ReloadReport {
    /// True when no path failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of paths attempted.
    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Feeds changed paths to [`Factory::reload`].
///
/// Failures are reported, never retried.
#[derive(Debug, Clone)]
pub struct HotReloader {
    factory: Factory,
}

impl HotReloader {
    pub fn new(factory: Factory) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Reload each distinct path once, in order of first appearance.
    ///
    /// Paths that are not live are reported as `NotFound`, and any bytes the
    /// preloader cached for them are dropped.
    pub fn reload_batch<I, S>(&self, paths: I) -> ReloadReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = ReloadReport::default();
        let mut seen = HashSet::new();

        for path in paths {
            let path = path.as_ref();
            if !seen.insert(path.to_string()) {
                continue;
            }

            if !self.factory.is_live(hash_path(path)) {
                self.factory.preloader().invalidate(path);
                report.failed.push((
                    path.to_string(),
                    ResourceError::NotFound {
                        path: path.to_string(),
                    },
                ));
                continue;
            }

            match self.factory.reload(path) {
                Ok(()) => report.succeeded.push(path.to_string()),
                Err(err) => report.failed.push((path.to_string(), err)),
            }
        }

        if !report.is_empty() {
            tracing::debug!(
                "Hot reload: {} succeeded, {} failed",
                report.succeeded.len(),
                report.failed.len()
            );
        }
        report
    }

    /// Reload the live resources among the watcher's pending changes.
    ///
    /// Changed files that are not live resources are not reloaded, but their
    /// prefetched bytes are dropped so the next `get` reads the new file.
    #[cfg(feature = "hot-reload")]
    pub fn poll(&self, watcher: &mut FileWatcher) -> ReloadReport {
        let changed: Vec<String> = watcher
            .poll_changes()
            .into_iter()
            .filter(|path| {
                let live = self.factory.is_live(hash_path(path));
                if !live && self.factory.preloader().invalidate(path) {
                    tracing::trace!("Dropped prefetched bytes of changed '{}'", path);
                }
                live
            })
            .collect();
        self.reload_batch(changed)
    }
}

/// Watches a directory of loose resource files.
#[cfg(feature = "hot-reload")]
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    receiver: Receiver<notify::Result<Event>>,
    root: PathBuf,
    /// The root as given and canonicalized, since events may report either.
    prefixes: Vec<PathBuf>,
}

#[cfg(feature = "hot-reload")]
impl FileWatcher {
    /// Watch `root` recursively.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, notify::Error> {
        let root = root.as_ref().to_path_buf();
        let (sender, receiver) = channel();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = sender.send(res);
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        tracing::debug!("Watching directory for changes: {}", root.display());

        let mut prefixes = vec![root.clone()];
        if let Ok(canonical) = root.canonicalize() {
            if canonical != root {
                prefixes.push(canonical);
            }
        }

        Ok(Self {
            _watcher: watcher,
            receiver,
            root,
            prefixes,
        })
    }

    /// Watch the factory's loose file root.
    pub fn for_factory(factory: &Factory) -> crate::error::ResourceResult<Self> {
        let loose = factory
            .loose_files()
            .ok_or_else(|| ResourceError::NotSupported {
                reason: "factory has no loose file root to watch".to_string(),
            })?;
        Self::new(loose.base_path()).map_err(|err| ResourceError::Unknown {
            message: format!("failed to watch {}: {err}", loose.base_path().display()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a file path under the root to a `/`-separated resource path.
    pub fn to_resource_path(&self, path: &Path) -> Option<String> {
        let relative = self
            .prefixes
            .iter()
            .find_map(|prefix| path.strip_prefix(prefix).ok())?;

        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => segments.push(segment.to_str()?),
                _ => return None,
            }
        }
        if segments.is_empty() {
            return None;
        }
        Some(segments.join("/"))
    }

    /// Drain pending file events into distinct resource paths.
    pub fn poll_changes(&mut self) -> Vec<String> {
        let mut changed = Vec::new();
        let mut seen = HashSet::new();

        while let Ok(event) = self.receiver.try_recv() {
            match event {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        continue;
                    }
                    for path in &event.paths {
                        if let Some(resource) = self.to_resource_path(path) {
                            if seen.insert(resource.clone()) {
                                tracing::debug!("File changed: {}", resource);
                                changed.push(resource);
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("File watcher error: {}", e);
                }
            }
        }

        changed
    }
}

#[cfg(feature = "hot-reload")]
impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher").field("root", &self.root).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveBuilder, ArchiveIndex, EntryOptions};
    use crate::error::{ResourceResult, ResultCode};
    use crate::registry::{CreateContext, ResourceType, TypeRegistry};

    struct Plain;

    impl ResourceType for Plain {
        type Resource = Vec<u8>;

        fn create(&self, ctx: &mut CreateContext<'_>) -> ResourceResult<Vec<u8>> {
            Ok(ctx.bytes().to_vec())
        }
    }

    struct Reloadable;

    impl ResourceType for Reloadable {
        type Resource = Vec<u8>;

        fn create(&self, ctx: &mut CreateContext<'_>) -> ResourceResult<Vec<u8>> {
            Ok(ctx.bytes().to_vec())
        }

        fn supports_recreate(&self) -> bool {
            true
        }

        fn recreate(&self, _current: &Vec<u8>, ctx: &mut CreateContext<'_>) -> ResourceResult<Vec<u8>> {
            Ok(ctx.bytes().to_vec())
        }
    }

    fn reloader() -> HotReloader {
        let mut builder = ArchiveBuilder::new();
        for path in ["a.dat", "b.dat", "c.raw"] {
            builder.add_path(path, b"bytes", EntryOptions::default()).unwrap();
        }
        let archive = ArchiveIndex::from_memory([builder.to_bytes()]).unwrap();
        let types = TypeRegistry::new()
            .with("dat", Reloadable)
            .with("raw", Plain);
        HotReloader::new(Factory::new(archive, types))
    }

    #[test]
    fn test_batch_report() {
        let reloader = reloader();
        let _a = reloader.factory().get("a.dat").unwrap();
        let _c = reloader.factory().get("c.raw").unwrap();

        let report = reloader.reload_batch(["a.dat", "b.dat", "c.raw", "a.dat"]);
        assert_eq!(report.succeeded, vec!["a.dat".to_string()]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].0, "b.dat");
        assert_eq!(report.failed[0].1.code(), ResultCode::NotFound);
        assert_eq!(report.failed[1].0, "c.raw");
        assert_eq!(report.failed[1].1.code(), ResultCode::NotSupported);
        assert!(!report.is_clean());
        assert_eq!(report.len(), 3);
    }

    #[test]
    fn test_duplicates_reloaded_once() {
        let reloader = reloader();
        let handle = reloader.factory().get("a.dat").unwrap();

        let report = reloader.reload_batch(vec!["a.dat"; 3]);
        assert!(report.is_clean());
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(handle.version(), 1);
    }

    #[test]
    fn test_empty_batch() {
        let report = reloader().reload_batch(Vec::<String>::new());
        assert!(report.is_empty());
        assert!(report.is_clean());
    }

    #[cfg(feature = "hot-reload")]
    mod watcher {
        use super::super::*;
        use std::thread;
        use std::time::Duration;
        use tempfile::TempDir;

        #[test]
        fn test_resource_path_mapping() {
            let temp_dir = TempDir::new().unwrap();
            let watcher = FileWatcher::new(temp_dir.path()).unwrap();

            let file = temp_dir.path().join("textures").join("a.tex");
            assert_eq!(
                watcher.to_resource_path(&file).as_deref(),
                Some("textures/a.tex")
            );
            assert!(watcher.to_resource_path(Path::new("/elsewhere/a.tex")).is_none());
            assert!(watcher.to_resource_path(temp_dir.path()).is_none());
        }

        #[test]
        fn test_poll_changes_no_events() {
            let temp_dir = TempDir::new().unwrap();
            let mut watcher = FileWatcher::new(temp_dir.path()).unwrap();
            assert!(watcher.poll_changes().is_empty());
        }

        #[test]
        fn test_poll_changes_deduplicates() {
            let temp_dir = TempDir::new().unwrap();
            let file_path = temp_dir.path().join("test.txt");
            std::fs::write(&file_path, "initial content").unwrap();

            let mut watcher = FileWatcher::new(temp_dir.path()).unwrap();
            thread::sleep(Duration::from_millis(100));
            let _ = watcher.poll_changes();

            std::fs::write(&file_path, "modified content 1").unwrap();
            std::fs::write(&file_path, "modified content 2").unwrap();
            thread::sleep(Duration::from_millis(200));

            let changes = watcher.poll_changes();
            assert!(changes.len() <= 1, "Expected at most 1 change, got {}", changes.len());
        }
    }
}
