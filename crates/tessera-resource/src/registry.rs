//! Resource types and the extension registry.

use std::any::{Any, TypeId};
use std::sync::Arc;

use bytes::Bytes;
use tessera_core::alloc::HashMap;

use crate::error::{ResourceError, ResourceResult, programmer_error};
use crate::factory::Factory;

/// A live resource instance, type-erased.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Context handed to [`ResourceType::create`] and [`ResourceType::recreate`].
pub struct CreateContext<'a> {
    pub(crate) factory: &'a Factory,
    pub(crate) path: &'a str,
    pub(crate) name_hash: u64,
    pub(crate) bytes: &'a Bytes,
    pub(crate) hints: &'a mut Vec<Arc<str>>,
}

impl<'a> CreateContext<'a> {
    /// The resource path being created.
    pub fn path(&self) -> &str {
        self.path
    }

    pub fn name_hash(&self) -> u64 {
        self.name_hash
    }

    /// The raw payload.
    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    /// The payload as a shared buffer, for types that keep it around.
    pub fn shared_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// Declare `child` as a dependency worth prefetching.
    pub fn hint(&mut self, child: impl AsRef<str>) {
        self.hints.push(Arc::from(child.as_ref()));
    }

    /// The factory, for resolving dependencies synchronously.
    pub fn factory(&self) -> &'a Factory {
        self.factory
    }
}

/// Context handed to [`ResourceType::preload_hint`].
pub struct PreloadContext<'a> {
    pub(crate) path: &'a str,
    pub(crate) name_hash: u64,
    pub(crate) bytes: &'a [u8],
    pub(crate) hints: &'a mut Vec<Arc<str>>,
}

impl PreloadContext<'_> {
    pub fn path(&self) -> &str {
        self.path
    }

    pub fn name_hash(&self) -> u64 {
        self.name_hash
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    /// Declare `child` as a dependency worth prefetching.
    pub fn hint(&mut self, child: impl AsRef<str>) {
        self.hints.push(Arc::from(child.as_ref()));
    }
}

/// A kind of resource, selected by file extension.
///
/// The implementing value is the per-type context: it is registered once and
/// shared by every resource of this kind. Only `create` is required.
///
/// # Example
///
/// ```ignore
/// struct TextType;
///
/// impl ResourceType for TextType {
///     type Resource = String;
///
///     fn create(&self, ctx: &mut CreateContext<'_>) -> ResourceResult<String> {
///         String::from_utf8(ctx.bytes().to_vec())
///             .map_err(|e| ResourceError::decode(ctx.path(), e))
///     }
/// }
/// ```
pub trait ResourceType: Send + Sync + 'static {
    /// The value produced by `create`.
    type Resource: Send + Sync + 'static;

    /// Build a resource from its bytes.
    fn create(&self, ctx: &mut CreateContext<'_>) -> ResourceResult<Self::Resource>;

    /// Called once when the last handle is released, or after a reload
    /// replaced this instance.
    fn destroy(&self, _resource: &Self::Resource) {}

    /// Whether `recreate` is implemented. Reloads of types returning `false`
    /// fail with `NotSupported`.
    fn supports_recreate(&self) -> bool {
        false
    }

    /// Build a replacement for `current` from new bytes.
    ///
    /// On error the current instance stays live and untouched.
    fn recreate(
        &self,
        _current: &Self::Resource,
        ctx: &mut CreateContext<'_>,
    ) -> ResourceResult<Self::Resource> {
        Err(ResourceError::NotSupported {
            reason: format!("'{}' cannot be recreated", ctx.path()),
        })
    }

    /// Inspect bytes ahead of `create` and hint dependencies to prefetch.
    fn preload_hint(&self, _ctx: &mut PreloadContext<'_>) {}

    /// Human-readable name for diagnostics.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self::Resource>()
    }
}

/// Object-safe form of [`ResourceType`].
pub(crate) trait ErasedResourceType: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn resource_type_id(&self) -> TypeId;
    fn create_erased(&self, ctx: &mut CreateContext<'_>) -> ResourceResult<Instance>;
    fn destroy_erased(&self, instance: &Instance);
    fn supports_recreate(&self) -> bool;
    fn recreate_erased(
        &self,
        current: &Instance,
        ctx: &mut CreateContext<'_>,
    ) -> ResourceResult<Instance>;
    fn preload_hint(&self, ctx: &mut PreloadContext<'_>);
}

impl<T: ResourceType> ErasedResourceType for T {
    fn type_name(&self) -> &'static str {
        ResourceType::type_name(self)
    }

    fn resource_type_id(&self) -> TypeId {
        TypeId::of::<T::Resource>()
    }

    fn create_erased(&self, ctx: &mut CreateContext<'_>) -> ResourceResult<Instance> {
        let resource = self.create(ctx)?;
        Ok(Arc::new(resource))
    }

    fn destroy_erased(&self, instance: &Instance) {
        match instance.as_ref().downcast_ref::<T::Resource>() {
            Some(resource) => self.destroy(resource),
            None => programmer_error!(
                "destroy called with an instance that is not a {}",
                ResourceType::type_name(self)
            ),
        }
    }

    fn supports_recreate(&self) -> bool {
        ResourceType::supports_recreate(self)
    }

    fn recreate_erased(
        &self,
        current: &Instance,
        ctx: &mut CreateContext<'_>,
    ) -> ResourceResult<Instance> {
        let current = current
            .as_ref()
            .downcast_ref::<T::Resource>()
            .ok_or(ResourceError::TypeMismatch {
                expected: ResourceType::type_name(self),
            })?;
        let resource = self.recreate(current, ctx)?;
        Ok(Arc::new(resource))
    }

    fn preload_hint(&self, ctx: &mut PreloadContext<'_>) {
        ResourceType::preload_hint(self, ctx)
    }
}

/// Maps file extensions to resource types.
///
/// Filled at startup, then sealed when handed to a factory.
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<dyn ErasedResourceType>>,
    sealed: bool,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type for an extension (without the dot).
    ///
    /// Registering after sealing, an empty or dotted extension, or an
    /// extension that is already taken are programmer errors.
    pub fn register<T: ResourceType>(&mut self, extension: &str, ty: T) -> &mut Self {
        if self.sealed {
            programmer_error!("type registry is sealed, cannot register .{}", extension);
            return self;
        }
        if extension.is_empty() || extension.contains('.') {
            programmer_error!("invalid resource extension '{}'", extension);
            return self;
        }
        if self.types.contains_key(extension) {
            programmer_error!("resource type for .{} is already registered", extension);
            return self;
        }

        tracing::trace!(
            "Registered resource type {} for .{}",
            ResourceType::type_name(&ty),
            extension
        );
        self.types.insert(extension.to_string(), Arc::new(ty));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<T: ResourceType>(mut self, extension: &str, ty: T) -> Self {
        self.register(extension, ty);
        self
    }

    pub(crate) fn get(&self, extension: &str) -> Option<&Arc<dyn ErasedResourceType>> {
        self.types.get(extension)
    }

    pub fn contains(&self, extension: &str) -> bool {
        self.types.contains_key(extension)
    }

    /// Name of the resource type registered for an extension.
    pub fn type_name(&self, extension: &str) -> Option<&'static str> {
        self.types.get(extension).map(|ty| ty.type_name())
    }

    /// Whether the extension produces resources of type `R`.
    pub fn produces<R: 'static>(&self, extension: &str) -> bool {
        self.types
            .get(extension)
            .is_some_and(|ty| ty.resource_type_id() == TypeId::of::<R>())
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("extensions", &self.types.keys().collect::<Vec<_>>())
            .field("sealed", &self.sealed)
            .finish()
    }
}
