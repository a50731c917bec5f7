//! Per-resource bookkeeping kept in the factory's live table.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::ThreadId;

use parking_lot::RwLock;

use crate::registry::{ErasedResourceType, Instance};

/// Version tracker for change detection.
///
/// Starts at 0 and increments on every successful recreate.
#[derive(Debug, Default)]
pub struct ResourceVersion {
    value: AtomicU32,
}

impl ResourceVersion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current version number.
    pub fn get(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Increment the version and return the new value.
    pub fn increment(&self) -> u32 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// The part of a live resource that handles point at.
///
/// The instance is swapped in place on reload, so handles always observe the
/// current one.
pub(crate) struct ResourceSlot {
    pub name_hash: u64,
    pub path: Arc<str>,
    pub instance: RwLock<Instance>,
    pub version: ResourceVersion,
}

impl ResourceSlot {
    pub fn new(name_hash: u64, path: Arc<str>, instance: Instance) -> Self {
        Self {
            name_hash,
            path,
            instance: RwLock::new(instance),
            version: ResourceVersion::new(),
        }
    }

    pub fn instance(&self) -> Instance {
        self.instance.read().clone()
    }
}

/// The factory's record for one live resource.
pub(crate) struct Descriptor {
    pub slot: Arc<ResourceSlot>,
    pub ty: Arc<dyn ErasedResourceType>,
    pub extension: Arc<str>,
    pub byte_size: u32,
    pub ref_count: u32,
    /// The thread running a reload of this resource, if any.
    pub reloading: Option<ThreadId>,
}

impl Descriptor {
    pub fn info(&self) -> DescriptorInfo {
        DescriptorInfo {
            name_hash: self.slot.name_hash,
            path: self.slot.path.clone(),
            extension: self.extension.clone(),
            type_name: self.ty.type_name(),
            byte_size: self.byte_size,
            ref_count: self.ref_count,
            version: self.slot.version.get(),
        }
    }
}

/// State of one name hash in the live table.
pub(crate) enum TableEntry {
    /// A thread is fetching and creating the resource.
    Loading { thread: ThreadId },
    Live(Descriptor),
}

/// Snapshot of a live resource's descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorInfo {
    pub name_hash: u64,
    pub path: Arc<str>,
    pub extension: Arc<str>,
    pub type_name: &'static str,
    /// Length of the bytes the current instance was created from.
    pub byte_size: u32,
    pub ref_count: u32,
    pub version: u32,
}
