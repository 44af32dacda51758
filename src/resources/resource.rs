//! Resource identity, kinds, lifecycle states and the loader capability trait.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identifier for a cached resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&ResourceId> for ResourceId {
    fn from(value: &ResourceId) -> Self {
        value.clone()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a resource is. Textures and buffers live in GPU memory and count
/// against the GPU budget; everything else is host-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Texture,
    Buffer,
    Shader,
    Geometry,
    Font,
}

impl ResourceKind {
    pub fn is_gpu_resident(&self) -> bool {
        matches!(self, Self::Texture | Self::Buffer)
    }
}

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    Loading,
    Loaded,
    Error,
    Disposed,
}

/// Errors a resource load can end with.
///
/// Cloneable so one failed in-flight load can be handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Decode failure: {0}")]
    Decode(String),

    #[error("Load aborted: {0}")]
    Aborted(String),

    #[error("Resource cache is shut down")]
    ShutDown,
}

impl LoadError {
    /// Returns true if a later `acquire` may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::ShutDown)
    }
}

/// A loadable resource as produced by a caller-supplied factory.
///
/// `byte_size` must be known before `load` runs: the cache makes its budget
/// decision up front.
#[async_trait]
pub trait Resource: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn byte_size(&self) -> u64;

    async fn load(&self) -> Result<(), LoadError>;

    /// Release backing storage. Called exactly once per loaded or failed
    /// resource.
    fn dispose(&self);
}
