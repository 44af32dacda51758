//! GPU memory management for the render core.
//!
//! Provides the first-fit free-list allocator that places GPU-resident
//! resources inside a fixed byte budget.

pub mod allocator;

pub use allocator::{AllocatorStats, FreeListAllocator, GpuAllocator, MemoryBlock};
