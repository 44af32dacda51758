// Copyright 2024-2026 render-core Contributors
// Licensed under the Apache License, Version 2.0

//! GPU allocator trait and the first-fit free-list implementation.
//!
//! The allocator hands out byte ranges inside a fixed budget. It never fails
//! loudly: exhaustion is reported as `None` and the caller decides whether to
//! evict and retry.

use std::collections::HashMap;

use serde::Serialize;

use crate::resources::ResourceId;

/// A contiguous byte range in the GPU address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryBlock {
    pub offset: u64,
    pub size: u64,
}

impl MemoryBlock {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// One past the last byte of the block.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Point-in-time view of allocator occupancy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllocatorStats {
    pub budget: u64,
    pub allocated: u64,
    pub free: u64,
    pub free_blocks: usize,
    pub largest_free_block: u64,
    pub fragmentation_ratio: f64,
    pub live_allocations: usize,
}

/// Trait abstracting GPU memory placement.
///
/// All mutation takes `&mut self`: implementations are single-writer and the
/// owner serializes access (the resource cache keeps its allocator behind
/// its own state lock).
pub trait GpuAllocator: Send {
    fn allocate(&mut self, id: &ResourceId, size: u64) -> Option<MemoryBlock>;
    fn deallocate(&mut self, id: &ResourceId, size: u64);
    fn has_enough_memory(&self, size: u64) -> bool;
    fn fragmentation_ratio(&self) -> f64;
    /// Hard reset to a new budget. Every live allocation is dropped.
    fn update_budget(&mut self, budget: u64);
    fn stats(&self) -> AllocatorStats;
}

/// First-fit allocator over a sorted free list.
///
/// Free blocks are kept in offset order and never overlap; after every
/// `deallocate` no two free blocks are adjacent.
#[derive(Debug)]
pub struct FreeListAllocator {
    budget: u64,
    free: Vec<MemoryBlock>,
    allocations: HashMap<ResourceId, MemoryBlock>,
}

impl FreeListAllocator {
    pub fn new(budget: u64) -> Self {
        let mut allocator = Self {
            budget: 0,
            free: Vec::new(),
            allocations: HashMap::new(),
        };
        allocator.reset(budget);
        allocator
    }

    /// Offset of a live allocation.
    pub fn offset_of(&self, id: &ResourceId) -> Option<u64> {
        self.allocations.get(id).map(|b| b.offset)
    }

    /// Free blocks in offset order.
    pub fn free_blocks(&self) -> &[MemoryBlock] {
        &self.free
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocations.values().map(|b| b.size).sum()
    }

    pub fn free_bytes(&self) -> u64 {
        self.free.iter().map(|b| b.size).sum()
    }

    /// Count of live allocations, useful for leak detection.
    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    fn largest_free_block(&self) -> u64 {
        self.free.iter().map(|b| b.size).max().unwrap_or(0)
    }

    fn reset(&mut self, budget: u64) {
        self.budget = budget;
        self.allocations.clear();
        self.free.clear();
        if budget > 0 {
            self.free.push(MemoryBlock::new(0, budget));
        }
    }

    /// Insert a freed range in offset order and merge it with its neighbours.
    fn insert_free(&mut self, block: MemoryBlock) {
        let index = self.free.partition_point(|b| b.offset < block.offset);
        self.free.insert(index, block);

        // Right neighbour first so `index` stays valid for the left merge.
        if index + 1 < self.free.len() && self.free[index].end() == self.free[index + 1].offset {
            let right = self.free.remove(index + 1);
            self.free[index].size += right.size;
        }
        if index > 0 && self.free[index - 1].end() == self.free[index].offset {
            let current = self.free.remove(index);
            self.free[index - 1].size += current.size;
        }

        self.coalesce();
    }

    /// Full pass merging any adjacent free blocks left over.
    fn coalesce(&mut self) {
        let mut merged: Vec<MemoryBlock> = Vec::with_capacity(self.free.len());
        for block in self.free.drain(..) {
            match merged.last_mut() {
                Some(last) if last.end() == block.offset => last.size += block.size,
                _ => merged.push(block),
            }
        }
        self.free = merged;
    }
}

impl GpuAllocator for FreeListAllocator {
    fn allocate(&mut self, id: &ResourceId, size: u64) -> Option<MemoryBlock> {
        if size == 0 {
            return None;
        }
        if self.allocations.contains_key(id) {
            tracing::warn!(resource = %id, "allocation requested for an id that is already placed");
            return None;
        }

        let index = self.free.iter().position(|b| b.size >= size)?;
        let offset = self.free[index].offset;
        if self.free[index].size == size {
            self.free.remove(index);
        } else {
            let block = &mut self.free[index];
            block.offset += size;
            block.size -= size;
        }

        let block = MemoryBlock::new(offset, size);
        self.allocations.insert(id.clone(), block);
        Some(block)
    }

    fn deallocate(&mut self, id: &ResourceId, size: u64) {
        let Some(block) = self.allocations.remove(id) else {
            tracing::warn!(resource = %id, "deallocate of unknown or already freed id");
            return;
        };
        if block.size != size {
            // The recorded size is authoritative; freeing anything else would
            // overlap a neighbouring allocation.
            tracing::warn!(
                resource = %id,
                recorded = block.size,
                supplied = size,
                "deallocate size mismatch",
            );
        }
        self.insert_free(block);
    }

    fn has_enough_memory(&self, size: u64) -> bool {
        self.free.iter().any(|b| b.size >= size)
    }

    fn fragmentation_ratio(&self) -> f64 {
        if self.free.len() <= 1 {
            return 0.0;
        }
        let total = self.free_bytes();
        if total == 0 {
            return 0.0;
        }
        1.0 - self.largest_free_block() as f64 / total as f64
    }

    fn update_budget(&mut self, budget: u64) {
        let dropped = self.allocations.len();
        self.reset(budget);
        tracing::info!(budget, dropped, "allocator budget reset");
    }

    fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            budget: self.budget,
            allocated: self.allocated_bytes(),
            free: self.free_bytes(),
            free_blocks: self.free.len(),
            largest_free_block: self.largest_free_block(),
            fragmentation_ratio: self.fragmentation_ratio(),
            live_allocations: self.allocations.len(),
        }
    }
}

#[cfg(test)]
#[path = "allocator_tests.rs"]
mod tests;
