//! Resource lifecycle events.

use std::sync::Arc;

use crate::error::ResultCode;

/// Events emitted by the factory, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    /// A resource was created (first load completed).
    Created { name_hash: u64, path: Arc<str> },

    /// A live resource was recreated from new bytes.
    Reloaded {
        name_hash: u64,
        path: Arc<str>,
        /// The new version of the resource.
        version: u32,
    },

    /// The last handle was released and the resource destroyed.
    Destroyed { name_hash: u64, path: Arc<str> },

    /// A `get` failed. Nothing was created.
    LoadFailed {
        name_hash: u64,
        path: Arc<str>,
        code: ResultCode,
        /// Error message.
        error: String,
    },

    /// A `reload` failed. The previous instance is still live.
    ReloadFailed {
        name_hash: u64,
        path: Arc<str>,
        code: ResultCode,
        error: String,
    },
}

impl ResourceEvent {
    pub fn name_hash(&self) -> u64 {
        match self {
            ResourceEvent::Created { name_hash, .. }
            | ResourceEvent::Reloaded { name_hash, .. }
            | ResourceEvent::Destroyed { name_hash, .. }
            | ResourceEvent::LoadFailed { name_hash, .. }
            | ResourceEvent::ReloadFailed { name_hash, .. } => *name_hash,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            ResourceEvent::Created { path, .. }
            | ResourceEvent::Reloaded { path, .. }
            | ResourceEvent::Destroyed { path, .. }
            | ResourceEvent::LoadFailed { path, .. }
            | ResourceEvent::ReloadFailed { path, .. } => path,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ResourceEvent::Created { .. })
    }

    pub fn is_reloaded(&self) -> bool {
        matches!(self, ResourceEvent::Reloaded { .. })
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, ResourceEvent::Destroyed { .. })
    }

    /// Check if this is a load or reload failure.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            ResourceEvent::LoadFailed { .. } | ResourceEvent::ReloadFailed { .. }
        )
    }
}

/// A buffer of resource events that can be drained each frame.
#[derive(Debug, Default)]
pub struct ResourceEventBuffer {
    events: Vec<ResourceEvent>,
}

impl ResourceEventBuffer {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, event: ResourceEvent) {
        self.events.push(event);
    }

    /// Take all buffered events, oldest first.
    pub fn take(&mut self) -> Vec<ResourceEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceEvent> {
        self.events.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Payload passed to reload listeners after a successful reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadNotification {
    pub name_hash: u64,
    pub path: Arc<str>,
    pub version: u32,
}

/// Identifies a registered reload listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Callback invoked after each successful reload.
pub type ReloadListener = dyn Fn(&ReloadNotification) + Send + Sync;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_order() {
        let path: Arc<str> = Arc::from("a.tex");
        let mut buffer = ResourceEventBuffer::new();
        buffer.push(ResourceEvent::Created {
            name_hash: 1,
            path: path.clone(),
        });
        buffer.push(ResourceEvent::Destroyed { name_hash: 1, path });

        assert_eq!(buffer.len(), 2);
        let events = buffer.take();
        assert!(events[0].is_created());
        assert!(events[1].is_destroyed());
        assert_eq!(events[1].path(), "a.tex");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_failure_kinds() {
        let event = ResourceEvent::ReloadFailed {
            name_hash: 2,
            path: Arc::from("b.tex"),
            code: ResultCode::NotSupported,
            error: "nope".to_string(),
        };
        assert!(event.is_failed());
        assert!(!event.is_reloaded());
        assert_eq!(event.name_hash(), 2);
    }
}
