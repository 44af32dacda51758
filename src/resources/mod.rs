//! Resource management for the render core.
//!
//! Reference-counted caching of textures, buffers and other loadable assets
//! with a GPU byte budget, bounded concurrent loading and periodic GC.

mod admission;
mod cache;
mod gc;
mod lru;
mod resource;

pub use admission::{AdmissionPermit, LoadAdmission};
pub use cache::{CacheConfig, CacheError, CacheStats, ResourceCache};
pub use gc::spawn_gc;
pub use lru::LruQueue;
pub use resource::{LoadError, Resource, ResourceId, ResourceKind, ResourceState};
