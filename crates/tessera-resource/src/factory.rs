//! The resource factory - the single owner of all live resources.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use tessera_core::alloc::HashMap64;
use tessera_core::profiling::profile_function;

use crate::archive::{ArchiveIndex, DecryptFn};
use crate::config::FactoryConfig;
use crate::error::{ResourceError, ResourceResult, ResultCode, programmer_error};
use crate::event::{
    ListenerId, ReloadListener, ReloadNotification, ResourceEvent, ResourceEventBuffer,
};
use crate::handle::ResourceHandle;
use crate::hash::{extension_of, hash_path};
use crate::io::{ContentSources, LooseFiles};
use crate::preloader::Preloader;
use crate::registry::{
    CreateContext, ErasedResourceType, Instance, PreloadContext, TypeRegistry,
};
use crate::state::{Descriptor, DescriptorInfo, ResourceSlot, TableEntry};

struct FactoryShared {
    sources: Arc<ContentSources>,
    registry: Arc<TypeRegistry>,
    config: FactoryConfig,
    /// Live table. The only mutable state shared between callers.
    table: Mutex<HashMap64<TableEntry>>,
    /// Signalled whenever a loading marker or reload flag is cleared.
    table_changed: Condvar,
    preloader: Preloader,
    events: Mutex<ResourceEventBuffer>,
    listeners: RwLock<Vec<(ListenerId, Arc<ReloadListener>)>>,
    next_listener: AtomicU64,
}

/// Loads resources by path and tracks their lifetime.
///
/// Cheap to clone; all clones share one live table.
///
/// # Example
///
/// ```ignore
/// let archive = ArchiveIndex::open(["game.tsra"])?;
/// let types = TypeRegistry::new().with("tex", TextureType::new(device));
/// let factory = Factory::builder(archive).registry(types).build();
///
/// let texture = factory.get("textures/player.tex")?;
/// let again = factory.get("textures/player.tex")?; // same instance
/// assert_eq!(texture.ref_count(), 2);
/// ```
#[derive(Clone)]
pub struct Factory {
    shared: Arc<FactoryShared>,
}

/// Builder for [`Factory`].
pub struct FactoryBuilder {
    archive: ArchiveIndex,
    registry: TypeRegistry,
    config: FactoryConfig,
    decrypt: Option<Arc<DecryptFn>>,
}

impl FactoryBuilder {
    pub fn registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(mut self, config: FactoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Install the hook that decrypts encrypted archive entries.
    pub fn decrypt<F>(mut self, decrypt: F) -> Self
    where
        F: Fn(&mut [u8]) -> ResourceResult<()> + Send + Sync + 'static,
    {
        self.decrypt = Some(Arc::new(decrypt));
        self
    }

    /// Seal the registry and create the factory.
    pub fn build(self) -> Factory {
        let FactoryBuilder {
            archive,
            mut registry,
            config,
            decrypt,
        } = self;

        registry.seal();
        let registry = Arc::new(registry);
        let loose = config.loose_root.as_ref().map(LooseFiles::new);
        let sources = Arc::new(ContentSources::new(archive, loose, decrypt));
        let preloader = Preloader::new(
            sources.clone(),
            registry.clone(),
            config.max_preload_requests,
        );

        tracing::debug!(
            "Resource factory created ({} types, {} archive entries)",
            registry.len(),
            sources.archive().len()
        );

        Factory {
            shared: Arc::new(FactoryShared {
                sources,
                registry,
                config,
                table: Mutex::new(HashMap64::default()),
                table_changed: Condvar::new(),
                preloader,
                events: Mutex::new(ResourceEventBuffer::new()),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }
}

/// What `get` found in the table for a hash.
enum GetLookup {
    Live(Arc<ResourceSlot>),
    LoadingHere,
    LoadingElsewhere,
    Missing,
}

/// What `reload` found in the table for a hash.
enum ReloadLookup {
    Ready(Arc<ResourceSlot>, Arc<dyn ErasedResourceType>),
    Busy,
    ReloadingHere,
    NotSupported,
    Missing,
}

impl Factory {
    pub fn builder(archive: ArchiveIndex) -> FactoryBuilder {
        FactoryBuilder {
            archive,
            registry: TypeRegistry::new(),
            config: FactoryConfig::default(),
            decrypt: None,
        }
    }

    /// A factory with default configuration and no decrypt hook.
    pub fn new(archive: ArchiveIndex, registry: TypeRegistry) -> Self {
        Self::builder(archive).registry(registry).build()
    }

    /// Get a handle to the resource at `path`, creating it on first use.
    ///
    /// Concurrent calls for the same path create the resource once: later
    /// callers wait for the first load and then share its result.
    pub fn get(&self, path: &str) -> ResourceResult<ResourceHandle> {
        profile_function!();
        let extension = extension_of(path).inspect_err(|err| {
            tracing::warn!("Cannot get '{}': {}", path, err);
        })?;
        let ty = self.shared.registry.get(extension).cloned().ok_or_else(|| {
            tracing::warn!("Unknown resource type: .{} ('{}')", extension, path);
            ResourceError::UnknownType {
                extension: extension.to_string(),
            }
        })?;
        let name_hash = hash_path(path);
        let me = thread::current().id();

        let mut table = self.shared.table.lock();
        loop {
            let lookup = match table.get_mut(&name_hash) {
                Some(TableEntry::Live(descriptor)) => {
                    if *descriptor.slot.path != *path {
                        tracing::warn!(
                            "Hash collision: '{}' and '{}' both hash to {:#018x}",
                            descriptor.slot.path,
                            path,
                            name_hash
                        );
                    }
                    descriptor.ref_count += 1;
                    GetLookup::Live(descriptor.slot.clone())
                }
                Some(TableEntry::Loading { thread }) if *thread == me => GetLookup::LoadingHere,
                Some(TableEntry::Loading { .. }) => GetLookup::LoadingElsewhere,
                None => GetLookup::Missing,
            };

            match lookup {
                GetLookup::Live(slot) => return Ok(ResourceHandle::new(self.clone(), slot)),
                GetLookup::LoadingElsewhere => self.shared.table_changed.wait(&mut table),
                GetLookup::LoadingHere => {
                    drop(table);
                    let err = ResourceError::Loop {
                        path: path.to_string(),
                    };
                    return Err(self.load_failed(name_hash, path, err));
                }
                GetLookup::Missing => break,
            }
        }

        if table.len() >= self.shared.config.max_resources {
            drop(table);
            let err = ResourceError::OutOfResources {
                capacity: self.shared.config.max_resources,
            };
            return Err(self.load_failed(name_hash, path, err));
        }
        table.insert(name_hash, TableEntry::Loading { thread: me });
        drop(table);

        let mut guard = LoadingGuard {
            shared: &self.shared,
            name_hash,
            armed: true,
        };

        let path: Arc<str> = Arc::from(path);
        let (instance, byte_size) = match self.load(&*ty, &path, name_hash) {
            Ok(loaded) => loaded,
            Err(err) => {
                drop(guard);
                return Err(self.load_failed(name_hash, &path, err));
            }
        };

        let slot = Arc::new(ResourceSlot::new(name_hash, path.clone(), instance));
        {
            let mut table = self.shared.table.lock();
            table.insert(
                name_hash,
                TableEntry::Live(Descriptor {
                    slot: slot.clone(),
                    ty,
                    extension: Arc::from(extension),
                    byte_size,
                    ref_count: 1,
                    reloading: None,
                }),
            );
            self.shared.preloader.mark_live(name_hash);
            guard.armed = false;
        }
        self.shared.table_changed.notify_all();

        tracing::debug!("Created '{}' ({} bytes)", path, byte_size);
        self.push_event(ResourceEvent::Created { name_hash, path });
        Ok(ResourceHandle::new(self.clone(), slot))
    }

    /// Fetch bytes and run the type's preload hint and create.
    fn load(
        &self,
        ty: &dyn ErasedResourceType,
        path: &str,
        name_hash: u64,
    ) -> ResourceResult<(Instance, u32)> {
        let bytes = self.fetch(path, name_hash)?;

        let mut hints = Vec::new();
        ty.preload_hint(&mut PreloadContext {
            path,
            name_hash,
            bytes: &bytes,
            hints: &mut hints,
        });
        let instance = ty.create_erased(&mut CreateContext {
            factory: self,
            path,
            name_hash,
            bytes: &bytes,
            hints: &mut hints,
        })?;

        self.flush_hints(name_hash, hints);
        Ok((instance, byte_size(&bytes)))
    }

    /// Warm preload cache, then loose files, then archives.
    fn fetch(&self, path: &str, name_hash: u64) -> ResourceResult<Bytes> {
        if let Some(bytes) = self.shared.preloader.take_warm(name_hash) {
            tracing::trace!("'{}' served from the preload cache", path);
            return Ok(bytes);
        }
        self.shared.sources.fetch(path, name_hash)
    }

    /// Queue hinted dependencies that are not live yet.
    fn flush_hints(&self, parent: u64, hints: Vec<Arc<str>>) {
        if hints.is_empty() {
            return;
        }
        let pending: Vec<Arc<str>> = {
            let table = self.shared.table.lock();
            hints
                .into_iter()
                .filter(|child| !table.contains_key(&hash_path(child)))
                .collect()
        };
        for child in pending {
            self.shared.preloader.hint(parent, &child);
        }
    }

    fn load_failed(&self, name_hash: u64, path: &str, err: ResourceError) -> ResourceError {
        match err.code() {
            ResultCode::NotFound => tracing::warn!("Resource not found: {}", path),
            _ => tracing::warn!("Failed to load '{}': {}", path, err),
        }
        self.push_event(ResourceEvent::LoadFailed {
            name_hash,
            path: Arc::from(path),
            code: err.code(),
            error: err.to_string(),
        });
        err
    }

    /// Acquire another reference to an already-live resource.
    pub fn acquire(&self, name_hash: u64) -> Option<ResourceHandle> {
        let mut table = self.shared.table.lock();
        match table.get_mut(&name_hash) {
            Some(TableEntry::Live(descriptor)) => {
                descriptor.ref_count += 1;
                let slot = descriptor.slot.clone();
                drop(table);
                Some(ResourceHandle::new(self.clone(), slot))
            }
            _ => None,
        }
    }

    /// Release a handle. Same as dropping it.
    pub fn release(&self, handle: ResourceHandle) {
        if !Arc::ptr_eq(&handle.factory.shared, &self.shared) {
            programmer_error!(
                "released '{}' through a factory that does not own it",
                handle.path()
            );
        }
        drop(handle);
    }

    pub(crate) fn retain(&self, slot: &Arc<ResourceSlot>) {
        let mut table = self.shared.table.lock();
        match table.get_mut(&slot.name_hash) {
            Some(TableEntry::Live(descriptor)) if Arc::ptr_eq(&descriptor.slot, slot) => {
                descriptor.ref_count += 1;
            }
            _ => {
                drop(table);
                programmer_error!("acquired '{}' which is not live", slot.path);
            }
        }
    }

    pub(crate) fn release_slot(&self, slot: &Arc<ResourceSlot>) {
        let mut table = self.shared.table.lock();
        let remaining = match table.get_mut(&slot.name_hash) {
            Some(TableEntry::Live(descriptor)) if Arc::ptr_eq(&descriptor.slot, slot) => {
                descriptor.ref_count = descriptor.ref_count.saturating_sub(1);
                Some(descriptor.ref_count)
            }
            _ => None,
        };

        match remaining {
            None => {
                drop(table);
                programmer_error!("released '{}' which is not live", slot.path);
            }
            Some(0) => {
                let removed = table.remove(&slot.name_hash);
                self.shared.preloader.mark_released(slot.name_hash);
                drop(table);
                if let Some(TableEntry::Live(descriptor)) = removed {
                    self.destroy(descriptor);
                }
            }
            Some(_) => {}
        }
    }

    /// Run the type's destroy on a descriptor that left the table.
    fn destroy(&self, descriptor: Descriptor) {
        let instance = descriptor.slot.instance();
        descriptor.ty.destroy_erased(&instance);

        tracing::debug!("Destroyed '{}'", descriptor.slot.path);
        self.push_event(ResourceEvent::Destroyed {
            name_hash: descriptor.slot.name_hash,
            path: descriptor.slot.path.clone(),
        });
    }

    /// Recreate a live resource from fresh bytes.
    ///
    /// On success every handle observes the new instance and the version is
    /// bumped. On failure the previous instance stays live and unchanged.
    pub fn reload(&self, path: &str) -> ResourceResult<()> {
        profile_function!();
        let name_hash = hash_path(path);

        match self.reload_inner(path, name_hash) {
            Ok(version) => {
                tracing::info!("{} was successfully reloaded", path);
                let path: Arc<str> = Arc::from(path);
                self.push_event(ResourceEvent::Reloaded {
                    name_hash,
                    path: path.clone(),
                    version,
                });
                self.notify_listeners(&ReloadNotification {
                    name_hash,
                    path,
                    version,
                });
                Ok(())
            }
            Err(err) => {
                match err.code() {
                    ResultCode::NotSupported => {
                        tracing::warn!("{} can not be reloaded: {}", path, err)
                    }
                    ResultCode::NotFound => tracing::warn!("{} could not be reloaded: {}", path, err),
                    _ => tracing::error!("{} could not be reloaded: {}", path, err),
                }
                self.push_event(ResourceEvent::ReloadFailed {
                    name_hash,
                    path: Arc::from(path),
                    code: err.code(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn reload_inner(&self, path: &str, name_hash: u64) -> ResourceResult<u32> {
        if !self.shared.config.reload_support {
            return Err(ResourceError::NotSupported {
                reason: "reload support is disabled".to_string(),
            });
        }
        let me = thread::current().id();

        let mut table = self.shared.table.lock();
        let (slot, ty) = loop {
            let lookup = match table.get_mut(&name_hash) {
                None => ReloadLookup::Missing,
                Some(TableEntry::Loading { thread }) if *thread == me => {
                    ReloadLookup::ReloadingHere
                }
                Some(TableEntry::Loading { .. }) => ReloadLookup::Busy,
                Some(TableEntry::Live(descriptor)) => {
                    let reloading = descriptor.reloading;
                    match reloading {
                        Some(thread) if thread == me => ReloadLookup::ReloadingHere,
                        Some(_) => ReloadLookup::Busy,
                        None if !descriptor.ty.supports_recreate() => ReloadLookup::NotSupported,
                        None => {
                            descriptor.reloading = Some(me);
                            descriptor.ref_count += 1;
                            ReloadLookup::Ready(descriptor.slot.clone(), descriptor.ty.clone())
                        }
                    }
                }
            };

            match lookup {
                ReloadLookup::Ready(slot, ty) => break (slot, ty),
                ReloadLookup::Busy => self.shared.table_changed.wait(&mut table),
                ReloadLookup::ReloadingHere => {
                    return Err(ResourceError::Loop {
                        path: path.to_string(),
                    });
                }
                ReloadLookup::NotSupported => {
                    return Err(ResourceError::NotSupported {
                        reason: format!("'{}' has no recreate function", path),
                    });
                }
                ReloadLookup::Missing => {
                    drop(table);
                    tracing::warn!(
                        "{} could not be reloaded since it was never loaded before",
                        path
                    );
                    return Err(ResourceError::NotFound {
                        path: path.to_string(),
                    });
                }
            }
        };
        drop(table);

        // Dropped in reverse order: the flag is cleared before the pin is released.
        let _pin = ResourceHandle::new(self.clone(), slot.clone());
        let _guard = ReloadGuard {
            shared: &self.shared,
            name_hash,
        };

        self.shared.preloader.discard_warm(name_hash);
        let bytes = self.shared.sources.fetch(path, name_hash)?;
        let current = slot.instance();

        let mut hints = Vec::new();
        let replacement = ty.recreate_erased(
            &current,
            &mut CreateContext {
                factory: self,
                path,
                name_hash,
                bytes: &bytes,
                hints: &mut hints,
            },
        )?;

        let version = {
            let mut table = self.shared.table.lock();
            *slot.instance.write() = replacement;
            if let Some(TableEntry::Live(descriptor)) = table.get_mut(&name_hash) {
                descriptor.byte_size = byte_size(&bytes);
            }
            slot.version.increment()
        };

        ty.destroy_erased(&current);
        self.flush_hints(name_hash, hints);
        Ok(version)
    }

    /// Raw bytes of any resource path, without creating anything.
    pub fn get_raw(&self, path: &str) -> ResourceResult<Bytes> {
        if path.is_empty() {
            return Err(ResourceError::InvalidPath {
                path: path.to_string(),
            });
        }
        self.shared.sources.fetch(path, hash_path(path))
    }

    /// Snapshot of the descriptor for a live path.
    pub fn descriptor(&self, path: &str) -> Option<DescriptorInfo> {
        self.descriptor_by_hash(hash_path(path))
    }

    pub fn descriptor_by_hash(&self, name_hash: u64) -> Option<DescriptorInfo> {
        match self.shared.table.lock().get(&name_hash) {
            Some(TableEntry::Live(descriptor)) => Some(descriptor.info()),
            _ => None,
        }
    }

    /// Reference count of a live resource, 0 if it is not live.
    pub fn ref_count(&self, name_hash: u64) -> u32 {
        match self.shared.table.lock().get(&name_hash) {
            Some(TableEntry::Live(descriptor)) => descriptor.ref_count,
            _ => 0,
        }
    }

    pub fn is_live(&self, name_hash: u64) -> bool {
        matches!(
            self.shared.table.lock().get(&name_hash),
            Some(TableEntry::Live(_))
        )
    }

    /// Number of live resources.
    pub fn live_count(&self) -> usize {
        self.shared
            .table
            .lock()
            .values()
            .filter(|entry| matches!(entry, TableEntry::Live(_)))
            .count()
    }

    /// Replace the mounted archives. Live resources are not affected.
    pub fn mount(&self, archive: ArchiveIndex) {
        let entries = archive.len();
        let old = self.shared.sources.mount(archive);
        self.shared.preloader.clear();
        tracing::debug!(
            "Mounted {} archive entries (replacing {})",
            entries,
            old.len()
        );
    }

    /// The currently mounted archives.
    pub fn archive(&self) -> Arc<ArchiveIndex> {
        self.shared.sources.archive()
    }

    pub fn loose_files(&self) -> Option<&LooseFiles> {
        self.shared.sources.loose()
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.shared.registry
    }

    pub fn preloader(&self) -> &Preloader {
        &self.shared.preloader
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.shared.config
    }

    /// Call `listener` after every successful reload.
    pub fn add_reload_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ReloadNotification) + Send + Sync + 'static,
    {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        self.shared.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` if no listener with this id was registered.
    pub fn remove_reload_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn notify_listeners(&self, notification: &ReloadNotification) {
        let listeners: Vec<Arc<ReloadListener>> = self
            .shared
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(notification);
        }
    }

    fn push_event(&self, event: ResourceEvent) {
        if self.shared.config.record_events {
            self.shared.events.lock().push(event);
        }
    }

    /// Take all events since the last drain, oldest first.
    pub fn drain_events(&self) -> Vec<ResourceEvent> {
        self.shared.events.lock().take()
    }
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("live", &self.live_count())
            .field("registry", &self.shared.registry)
            .field("preloader", &self.shared.preloader)
            .finish()
    }
}

impl Drop for FactoryShared {
    fn drop(&mut self) {
        let table = std::mem::take(self.table.get_mut());
        for entry in table.into_values() {
            if let TableEntry::Live(descriptor) = entry {
                tracing::warn!(
                    "'{}' still had {} references when the factory was dropped",
                    descriptor.slot.path,
                    descriptor.ref_count
                );
                let instance = descriptor.slot.instance();
                descriptor.ty.destroy_erased(&instance);
            }
        }
    }
}

/// Clears a loading marker if the load does not complete.
struct LoadingGuard<'a> {
    shared: &'a FactoryShared,
    name_hash: u64,
    armed: bool,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut table = self.shared.table.lock();
            if matches!(table.get(&self.name_hash), Some(TableEntry::Loading { .. })) {
                table.remove(&self.name_hash);
            }
        }
        self.shared.table_changed.notify_all();
    }
}

/// Clears the reloading flag when a reload ends, however it ends.
struct ReloadGuard<'a> {
    shared: &'a FactoryShared,
    name_hash: u64,
}

impl Drop for ReloadGuard<'_> {
    fn drop(&mut self) {
        {
            let mut table = self.shared.table.lock();
            if let Some(TableEntry::Live(descriptor)) = table.get_mut(&self.name_hash) {
                descriptor.reloading = None;
            }
        }
        self.shared.table_changed.notify_all();
    }
}

fn byte_size(bytes: &[u8]) -> u32 {
    u32::try_from(bytes.len()).unwrap_or(u32::MAX)
}
