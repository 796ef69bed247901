//! Platform collaborators for the worker.
//!
//! The worker never touches a filesystem, cache, network or compiler
//! directly. Each capability is a trait object injected at construction time,
//! so the same pipeline runs inside a browser service worker, inside the
//! native host and inside tests.
//!
//! In-memory implementations live next to each trait. They back the test
//! suite and the parts of the native host that have no on-disk counterpart
//! (project records and response caches).

pub mod bundler;
pub mod cache;
pub mod fs;
pub mod net;
pub mod store;

pub use bundler::{
    BundleInput, Bundler, BundlerFailure, BundlerOutput, MetaOutput, Metafile, OutputFile,
};
pub use cache::{Cache, CacheStorage, MemoryCache, MemoryCacheStorage};
pub use fs::{
    AccessMode, DirEntry, DirectoryHandle, EntryKind, FsError, FsResult, MemoryFs, Permission,
    ProjectFs, join_path, normalize_path,
};
pub use net::{NetError, Network};
pub use store::{MemoryProjectStore, ProjectStore};
