//! Budgeted breadth-first prefetch of resource dependencies.
//!
//! Each top-level request starts a walk with its own visited set. Hints made
//! while a member of a walk is created or prefetched join that walk, so a
//! cycle in the dependency graph is visited once and then skipped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tessera_core::alloc::{HashMap64, HashSet64};
use tessera_core::profiling::profile_function;

use crate::hash::{extension_of, hash_path};
use crate::io::ContentSources;
use crate::registry::{PreloadContext, TypeRegistry};

/// A queued prefetch.
#[derive(Debug, Clone)]
pub struct PreloadRequest {
    pub name_hash: u64,
    pub path: Arc<str>,
    /// The resource that hinted this one, if any.
    pub parent: Option<u64>,
    /// Distance from the root of the walk.
    pub depth: u32,
    root: u64,
}

#[derive(Default)]
struct Walk {
    visited: HashSet64,
    pending: usize,
}

#[derive(Default)]
struct PreloadState {
    queue: VecDeque<PreloadRequest>,
    walks: HashMap64<Walk>,
    /// Walk root and depth of every hash visited by a live walk.
    membership: HashMap64<(u64, u32)>,
    warm: HashMap64<Bytes>,
    /// Hashes with a live resource. Their bytes are never prefetched.
    live: HashSet64,
}

impl PreloadState {
    /// Whether a hash needs no prefetch: already warm or already live.
    fn is_settled(&self, name_hash: u64) -> bool {
        self.warm.contains_key(&name_hash) || self.live.contains(&name_hash)
    }

    /// Forget a walk that ended up with nothing queued.
    fn drop_if_idle(&mut self, root: u64) {
        if self.walks.get(&root).is_some_and(|walk| walk.pending == 0) {
            self.walks.remove(&root);
        }
    }

    fn enqueue(&mut self, capacity: usize, request: PreloadRequest) -> bool {
        if self.queue.len() >= capacity {
            tracing::warn!(
                "Preload queue is full ({} requests), dropping '{}'",
                capacity,
                request.path
            );
            return false;
        }

        let Some(walk) = self.walks.get_mut(&request.root) else {
            return false;
        };
        if !walk.visited.insert(request.name_hash) {
            return false;
        }
        walk.pending += 1;
        self.membership
            .insert(request.name_hash, (request.root, request.depth));
        self.queue.push_back(request);
        true
    }

    fn finish(&mut self, request: &PreloadRequest) {
        let Some(walk) = self.walks.get_mut(&request.root) else {
            return;
        };
        walk.pending = walk.pending.saturating_sub(1);
        if walk.pending > 0 {
            return;
        }

        if let Some(walk) = self.walks.remove(&request.root) {
            for hash in walk.visited {
                if self
                    .membership
                    .get(&hash)
                    .is_some_and(|&(root, _)| root == request.root)
                {
                    self.membership.remove(&hash);
                }
            }
        }
    }
}

/// Cooperative prefetcher filling a warm cache of resource bytes.
pub struct Preloader {
    sources: Arc<ContentSources>,
    registry: Arc<TypeRegistry>,
    capacity: usize,
    state: Mutex<PreloadState>,
}

impl Preloader {
    pub(crate) fn new(sources: Arc<ContentSources>, registry: Arc<TypeRegistry>, capacity: usize) -> Self {
        Self {
            sources,
            registry,
            capacity,
            state: Mutex::new(PreloadState::default()),
        }
    }

    /// Start a walk rooted at `path`.
    ///
    /// Returns `false` if the path is already being walked, already warm or
    /// live, or the queue is full.
    pub fn request(&self, path: &str) -> bool {
        let name_hash = hash_path(path);
        let mut state = self.state.lock();
        if state.walks.contains_key(&name_hash) || state.is_settled(name_hash) {
            return false;
        }

        state.walks.insert(name_hash, Walk::default());
        let queued = state.enqueue(
            self.capacity,
            PreloadRequest {
                name_hash,
                path: Arc::from(path),
                parent: None,
                depth: 0,
                root: name_hash,
            },
        );
        if !queued {
            state.walks.remove(&name_hash);
        }
        queued
    }

    /// Queue `child_path` as a dependency of `parent_hash`.
    ///
    /// The child joins the parent's walk, or a new walk rooted at the parent
    /// when the parent is not part of one. Children already visited by the
    /// walk are skipped, as are children that are warm or live.
    pub fn hint(&self, parent_hash: u64, child_path: &str) -> bool {
        let name_hash = hash_path(child_path);
        let mut state = self.state.lock();
        if state.is_settled(name_hash) {
            return false;
        }

        let (root, depth) = match state.membership.get(&parent_hash) {
            Some(&(root, depth)) => (root, depth + 1),
            None => {
                let mut walk = Walk::default();
                walk.visited.insert(parent_hash);
                state.walks.insert(parent_hash, walk);
                (parent_hash, 1)
            }
        };

        let queued = state.enqueue(
            self.capacity,
            PreloadRequest {
                name_hash,
                path: Arc::from(child_path),
                parent: Some(parent_hash),
                depth,
                root,
            },
        );
        state.drop_if_idle(root);
        queued
    }

    /// Process queued requests until the read time spent in this call
    /// exceeds `budget`. At least one request is processed per call.
    ///
    /// Returns `true` while work remains.
    pub fn update(&self, budget: Duration) -> bool {
        profile_function!();
        let mut spent = Duration::ZERO;

        loop {
            let request = {
                let mut state = self.state.lock();
                let Some(request) = state.queue.pop_front() else {
                    break;
                };
                if state.live.contains(&request.name_hash) {
                    state.finish(&request);
                    continue;
                }
                request
            };

            let started = Instant::now();
            let mut hints = Vec::new();
            let fetched = self.sources.fetch(&request.path, request.name_hash);
            match &fetched {
                Ok(bytes) => {
                    let ty = extension_of(&request.path)
                        .ok()
                        .and_then(|ext| self.registry.get(ext));
                    if let Some(ty) = ty {
                        ty.preload_hint(&mut PreloadContext {
                            path: &request.path,
                            name_hash: request.name_hash,
                            bytes,
                            hints: &mut hints,
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!("Preload of '{}' failed: {}", request.path, err);
                }
            }
            spent += started.elapsed();

            let mut state = self.state.lock();
            if let Ok(bytes) = fetched {
                if state.live.contains(&request.name_hash) {
                    // became live while its bytes were read
                } else if state.warm.len() >= self.capacity {
                    tracing::debug!(
                        "Preload cache is full ({} entries), not keeping '{}'",
                        self.capacity,
                        request.path
                    );
                } else {
                    state.warm.insert(request.name_hash, bytes);
                }
            }
            for child in hints {
                let name_hash = hash_path(&child);
                if state.is_settled(name_hash) {
                    continue;
                }
                state.enqueue(
                    self.capacity,
                    PreloadRequest {
                        name_hash,
                        path: child,
                        parent: Some(request.name_hash),
                        depth: request.depth + 1,
                        root: request.root,
                    },
                );
            }
            state.finish(&request);
            drop(state);

            if spent >= budget {
                break;
            }
        }

        !self.state.lock().queue.is_empty()
    }

    /// Take prefetched bytes for a hash, if any.
    pub(crate) fn take_warm(&self, name_hash: u64) -> Option<Bytes> {
        self.state.lock().warm.remove(&name_hash)
    }

    pub(crate) fn discard_warm(&self, name_hash: u64) {
        self.state.lock().warm.remove(&name_hash);
    }

    /// Drop prefetched bytes for `path`, e.g. after its file changed.
    ///
    /// Returns `true` if bytes were cached.
    pub fn invalidate(&self, path: &str) -> bool {
        self.state.lock().warm.remove(&hash_path(path)).is_some()
    }

    /// Called by the factory when a resource becomes live.
    pub(crate) fn mark_live(&self, name_hash: u64) {
        let mut state = self.state.lock();
        state.live.insert(name_hash);
        state.warm.remove(&name_hash);
    }

    /// Called by the factory when a live resource is destroyed.
    pub(crate) fn mark_released(&self, name_hash: u64) {
        self.state.lock().live.remove(&name_hash);
    }

    pub fn is_warm(&self, name_hash: u64) -> bool {
        self.state.lock().warm.contains_key(&name_hash)
    }

    /// Number of queued requests.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Number of prefetched payloads waiting to be consumed.
    pub fn warm_count(&self) -> usize {
        self.state.lock().warm.len()
    }

    /// Bound on both queued requests and cached payloads.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all queued requests, walks and prefetched bytes.
    ///
    /// Which resources are live is kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.queue.clear();
        state.walks.clear();
        state.membership.clear();
        state.warm.clear();
    }
}

impl std::fmt::Debug for Preloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Preloader")
            .field("pending", &state.queue.len())
            .field("walks", &state.walks.len())
            .field("warm", &state.warm.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveBuilder, ArchiveIndex, EntryOptions};
    use crate::error::ResourceResult;
    use crate::registry::{CreateContext, ResourceType};

    /// Lines of the form `dep:<path>` are dependencies.
    struct SceneType;

    impl ResourceType for SceneType {
        type Resource = String;

        fn create(&self, ctx: &mut CreateContext<'_>) -> ResourceResult<String> {
            Ok(String::from_utf8_lossy(ctx.bytes()).into_owned())
        }

        fn preload_hint(&self, ctx: &mut PreloadContext<'_>) {
            let text = String::from_utf8_lossy(ctx.bytes()).into_owned();
            for dep in text.lines().filter_map(|l| l.strip_prefix("dep:")) {
                ctx.hint(dep);
            }
        }
    }

    fn preloader(files: &[(&str, &str)], capacity: usize) -> Preloader {
        let mut builder = ArchiveBuilder::new();
        for (path, body) in files {
            builder
                .add_path(path, body.as_bytes(), EntryOptions::default())
                .unwrap();
        }
        let index = ArchiveIndex::from_memory([builder.to_bytes()]).unwrap();
        let sources = Arc::new(ContentSources::new(index, None, None));
        let registry = Arc::new(TypeRegistry::new().with("scn", SceneType));
        Preloader::new(sources, registry, capacity)
    }

    fn drain(preloader: &Preloader) -> usize {
        let mut ticks = 0;
        while preloader.update(Duration::ZERO) {
            ticks += 1;
            assert!(ticks < 100, "preloader did not converge");
        }
        ticks + 1
    }

    #[test]
    fn test_walk_warms_dependencies() {
        let preloader = preloader(
            &[
                ("root.scn", "dep:a.scn\ndep:b.scn"),
                ("a.scn", "dep:c.scn"),
                ("b.scn", ""),
                ("c.scn", ""),
            ],
            16,
        );

        assert!(preloader.request("root.scn"));
        assert_eq!(preloader.pending(), 1);
        drain(&preloader);

        assert_eq!(preloader.warm_count(), 4);
        for path in ["root.scn", "a.scn", "b.scn", "c.scn"] {
            assert!(preloader.is_warm(hash_path(path)), "{path} not warm");
        }
        assert_eq!(preloader.pending(), 0);
    }

    #[test]
    fn test_zero_budget_processes_one() {
        let preloader = preloader(&[("root.scn", "dep:a.scn"), ("a.scn", "")], 16);
        preloader.request("root.scn");

        assert!(preloader.update(Duration::ZERO));
        assert_eq!(preloader.warm_count(), 1);
        assert!(!preloader.update(Duration::ZERO));
        assert_eq!(preloader.warm_count(), 2);
    }

    #[test]
    fn test_cycle_visited_once() {
        let preloader = preloader(
            &[("a.scn", "dep:b.scn"), ("b.scn", "dep:a.scn\ndep:b.scn")],
            16,
        );
        preloader.request("a.scn");
        let ticks = drain(&preloader);

        assert_eq!(ticks, 2);
        assert_eq!(preloader.warm_count(), 2);
    }

    #[test]
    fn test_missing_dependency_dropped() {
        let preloader = preloader(&[("root.scn", "dep:missing.scn")], 16);
        preloader.request("root.scn");
        drain(&preloader);

        assert_eq!(preloader.warm_count(), 1);
        assert!(!preloader.is_warm(hash_path("missing.scn")));
    }

    #[test]
    fn test_full_queue_drops_hints() {
        let preloader = preloader(&[("a.scn", ""), ("b.scn", ""), ("c.scn", "")], 2);
        assert!(preloader.request("a.scn"));
        assert!(preloader.request("b.scn"));
        assert!(!preloader.request("c.scn"));
        assert!(!preloader.hint(hash_path("a.scn"), "c.scn"));
        assert_eq!(preloader.pending(), 2);
    }

    #[test]
    fn test_hint_from_unwalked_parent() {
        let preloader = preloader(&[("a.scn", "")], 16);
        assert!(preloader.hint(hash_path("parent.scn"), "a.scn"));
        // the parent itself counts as visited
        assert!(!preloader.hint(hash_path("a.scn"), "parent.scn"));
        drain(&preloader);
        assert!(preloader.is_warm(hash_path("a.scn")));
    }

    #[test]
    fn test_warm_child_does_not_leave_a_walk_behind() {
        let preloader = preloader(&[("a.scn", ""), ("parent.scn", "")], 16);
        preloader.request("a.scn");
        drain(&preloader);

        assert!(!preloader.hint(hash_path("parent.scn"), "a.scn"));
        assert!(preloader.request("parent.scn"));
        assert_eq!(preloader.pending(), 1);
    }

    #[test]
    fn test_live_hashes_are_not_prefetched() {
        let preloader = preloader(
            &[("root.scn", "dep:a.scn\ndep:b.scn"), ("a.scn", ""), ("b.scn", "")],
            16,
        );
        preloader.mark_live(hash_path("a.scn"));

        assert!(!preloader.request("a.scn"));
        assert!(!preloader.hint(hash_path("other.scn"), "a.scn"));
        preloader.request("root.scn");
        drain(&preloader);
        assert!(!preloader.is_warm(hash_path("a.scn")));
        assert!(preloader.is_warm(hash_path("b.scn")));

        // becoming live drops cached bytes
        preloader.mark_live(hash_path("b.scn"));
        assert!(!preloader.is_warm(hash_path("b.scn")));
        assert_eq!(preloader.warm_count(), 1);

        preloader.mark_released(hash_path("a.scn"));
        assert!(preloader.request("a.scn"));
    }

    #[test]
    fn test_queued_request_skipped_once_live() {
        let preloader = preloader(&[("a.scn", "")], 16);
        preloader.request("a.scn");
        preloader.mark_live(hash_path("a.scn"));

        assert!(!preloader.update(Duration::ZERO));
        assert_eq!(preloader.warm_count(), 0);
        // the walk ended, so the path can be requested again once released
        preloader.mark_released(hash_path("a.scn"));
        assert!(preloader.request("a.scn"));
    }

    #[test]
    fn test_warm_cache_bounded_by_capacity() {
        let preloader = preloader(&[("a.scn", ""), ("b.scn", ""), ("c.scn", "")], 2);
        preloader.request("a.scn");
        preloader.request("b.scn");
        drain(&preloader);
        assert_eq!(preloader.warm_count(), 2);

        assert!(preloader.request("c.scn"));
        drain(&preloader);
        assert_eq!(preloader.warm_count(), 2);
        assert!(!preloader.is_warm(hash_path("c.scn")));
    }

    #[test]
    fn test_invalidate() {
        let preloader = preloader(&[("a.scn", "")], 16);
        preloader.request("a.scn");
        drain(&preloader);

        assert!(preloader.invalidate("a.scn"));
        assert!(!preloader.invalidate("a.scn"));
        assert!(!preloader.is_warm(hash_path("a.scn")));
    }

    #[test]
    fn test_budget_leaves_work_for_next_tick() {
        struct SlowType;

        impl ResourceType for SlowType {
            type Resource = ();

            fn create(&self, _ctx: &mut CreateContext<'_>) -> ResourceResult<()> {
                Ok(())
            }

            fn preload_hint(&self, _ctx: &mut PreloadContext<'_>) {
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        let paths: Vec<String> = (0..10).map(|i| format!("{i}.slow")).collect();
        let mut builder = ArchiveBuilder::new();
        for path in &paths {
            builder.add_path(path, b"", EntryOptions::default()).unwrap();
        }
        let index = ArchiveIndex::from_memory([builder.to_bytes()]).unwrap();
        let sources = Arc::new(ContentSources::new(index, None, None));
        let registry = Arc::new(TypeRegistry::new().with("slow", SlowType));
        let preloader = Preloader::new(sources, registry, 16);

        for path in &paths {
            assert!(preloader.request(path));
        }

        // each request takes at least 5ms, so 12ms covers at most three
        assert!(preloader.update(Duration::from_millis(12)));
        let first_tick = preloader.warm_count();
        assert!((1..=3).contains(&first_tick), "processed {first_tick}");
        assert_eq!(preloader.pending(), 10 - first_tick);

        while preloader.update(Duration::from_millis(12)) {}
        assert_eq!(preloader.warm_count(), 10);
    }

    #[test]
    fn test_take_and_clear() {
        let preloader = preloader(&[("a.scn", "")], 16);
        preloader.request("a.scn");
        drain(&preloader);

        let bytes = preloader.take_warm(hash_path("a.scn"));
        assert_eq!(bytes.as_deref(), Some(&b""[..]));
        assert_eq!(preloader.warm_count(), 0);

        preloader.request("a.scn");
        preloader.clear();
        assert_eq!(preloader.pending(), 0);
    }
}
