//! Resource handles - counted references to live resources.
//!
//! A handle is one unit of a resource's reference count. Cloning a handle
//! acquires another reference, dropping it releases one, and the final drop
//! destroys the resource through its type.

use std::any::Any;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::factory::Factory;
use crate::registry::Instance;
use crate::state::ResourceSlot;

/// A counted reference to a live resource.
///
/// # Example
///
/// ```ignore
/// let texture = factory.get("textures/player.tex")?;
///
/// // Always the current instance, also after a reload
/// if let Some(tex) = texture.get::<Texture>() {
///     // Use tex...
/// }
///
/// drop(texture); // destroys the texture if this was the last handle
/// ```
pub struct ResourceHandle {
    pub(crate) factory: Factory,
    pub(crate) slot: Arc<ResourceSlot>,
}

impl ResourceHandle {
    /// Wrap a slot whose reference has already been counted.
    pub(crate) fn new(factory: Factory, slot: Arc<ResourceSlot>) -> Self {
        Self { factory, slot }
    }

    pub fn name_hash(&self) -> u64 {
        self.slot.name_hash
    }

    /// The path the resource was first requested with.
    pub fn path(&self) -> &str {
        &self.slot.path
    }

    pub fn extension(&self) -> &str {
        crate::hash::extension_of(&self.slot.path).unwrap_or_default()
    }

    /// Number of successful reloads so far.
    pub fn version(&self) -> u32 {
        self.slot.version.get()
    }

    /// Current reference count, this handle included.
    pub fn ref_count(&self) -> u32 {
        self.factory.ref_count(self.slot.name_hash)
    }

    /// The current instance, type-erased.
    pub fn instance(&self) -> Instance {
        self.slot.instance()
    }

    /// The current instance as `T`, or `None` if the resource is not a `T`.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.slot.instance().downcast::<T>().ok()
    }

    /// Whether the resource is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.slot.instance.read().is::<T>()
    }

    /// The factory that owns this resource.
    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Release this reference explicitly. Same as dropping it.
    pub fn release(self) {
        drop(self);
    }
}

impl Clone for ResourceHandle {
    fn clone(&self) -> Self {
        self.factory.retain(&self.slot);
        Self {
            factory: self.factory.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        self.factory.release_slot(&self.slot);
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl Eq for ResourceHandle {}

impl Hash for ResourceHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.slot.name_hash.hash(state);
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("path", &self.path())
            .field("name_hash", &format_args!("{:#018x}", self.slot.name_hash))
            .field("version", &self.version())
            .finish()
    }
}

/// A handle that remembers the version it last saw.
///
/// Useful for systems that need to react to reloads without subscribing to
/// events.
///
/// # Example
///
/// ```ignore
/// let mut tracked = TrackedHandle::new(factory.get("shaders/sprite.shd")?);
///
/// // Each frame
/// if tracked.check_changed() {
///     // Rebuild pipelines...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TrackedHandle {
    handle: ResourceHandle,
    seen_version: Option<u32>,
}

impl TrackedHandle {
    /// Track changes from the handle's current version on.
    pub fn new(handle: ResourceHandle) -> Self {
        let seen_version = Some(handle.version());
        Self {
            handle,
            seen_version,
        }
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn into_handle(self) -> ResourceHandle {
        self.handle
    }

    /// Get the last seen version.
    pub fn seen_version(&self) -> Option<u32> {
        self.seen_version
    }

    /// Returns `true` if the resource was reloaded since the last check,
    /// and records the current version as seen.
    pub fn check_changed(&mut self) -> bool {
        let current = self.handle.version();
        if self.seen_version.is_none_or(|seen| current > seen) {
            self.seen_version = Some(current);
            true
        } else {
            false
        }
    }

    /// Forget the seen version, so the next check returns `true`.
    pub fn reset(&mut self) {
        self.seen_version = None;
    }
}

impl std::ops::Deref for TrackedHandle {
    type Target = ResourceHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}
