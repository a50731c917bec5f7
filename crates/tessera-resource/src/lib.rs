//! Tessera Resource - archive-backed resource management.
//!
//! Resources are addressed by path, identified by the 64-bit hash of that
//! path, and created by the [`ResourceType`] registered for the path's
//! extension. The [`Factory`] owns every live resource and hands out counted
//! [`ResourceHandle`]s.
//!
//! ```ignore
//! use tessera_resource::prelude::*;
//!
//! let archive = ArchiveIndex::open(["content.tsra"])?;
//! let types = TypeRegistry::new().with("txt", TextType);
//! let factory = Factory::new(archive, types);
//!
//! let readme = factory.get("docs/readme.txt")?;
//! let text = readme.get::<String>().unwrap();
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod event;
pub mod factory;
pub mod handle;
pub mod hash;
pub mod hot_reload;
pub mod io;
pub mod preloader;
pub mod registry;
pub mod state;

pub use archive::{ArchiveBuilder, ArchiveEntry, ArchiveIndex, DecryptFn, EncryptFn, EntryOptions};
pub use config::FactoryConfig;
pub use error::{ResourceError, ResourceResult, ResultCode};
pub use event::{ListenerId, ReloadNotification, ResourceEvent};
pub use factory::{Factory, FactoryBuilder};
pub use handle::{ResourceHandle, TrackedHandle};
pub use hash::{extension_of, hash_path};
pub use hot_reload::{HotReloader, ReloadReport};
pub use io::LooseFiles;
pub use preloader::{PreloadRequest, Preloader};
pub use registry::{CreateContext, Instance, PreloadContext, ResourceType, TypeRegistry};
pub use state::{DescriptorInfo, ResourceVersion};

#[cfg(feature = "hot-reload")]
pub use hot_reload::FileWatcher;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        ArchiveIndex, CreateContext, Factory, FactoryConfig, HotReloader, PreloadContext,
        ResourceError, ResourceEvent, ResourceHandle, ResourceResult, ResourceType,
        TrackedHandle, TypeRegistry,
    };

    #[cfg(feature = "hot-reload")]
    pub use crate::FileWatcher;
}
