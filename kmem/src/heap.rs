//! Block allocator over the heap and swap arenas.
//!
//! Requests are served first-fit from the free list, then by bumping the heap cursor
//! and, once the heap is exhausted, by bumping the swap cursor. Freed blocks go to the
//! front of the free list and are split on reuse when the remainder can hold another
//! block.

use log::{debug, warn};

use bare_metal::{Alignable, PhysAddr, PhysAddrRange};

use crate::arena::Arena;
use crate::block::{self, Guard, Header, Origin, ALIGN, HEADER_SIZE, MIN_SPLIT};
use crate::framebuffer::FramebufferLock;
use crate::task::{BlockHandle, SavedBlock, TaskId, TaskRecord, TaskTable};
use crate::AllocError;

/// Byte pattern written over freed payloads in diagnostic mode.
pub const POISON: u32 = 0xDEAD_BEEF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Anywhere,
    HeapOnly,
}

impl Placement {
    fn accepts(self, origin: Origin) -> bool {
        self == Placement::Anywhere || origin == Origin::Heap
    }
}

/// Statistics about the managed regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    pub heap_capacity: usize,
    pub heap_used: usize,
    pub swap_capacity: usize,
    pub swap_used: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
}

pub struct Allocator {
    heap: Arena,
    swap: Arena,
    /// Absolute address of the first free block header, 0 if the list is empty.
    free_head: u64,
    poison: bool,
    tasks: TaskTable,
    framebuffer: FramebufferLock,
}

impl Allocator {
    /// Create an allocator with an empty heap. `init` provides the heap.
    pub fn new(swap: Arena, framebuffer: PhysAddrRange) -> Allocator {
        Allocator {
            heap: Arena::empty(),
            swap,
            free_head: 0,
            poison: false,
            tasks: TaskTable::new(),
            framebuffer: FramebufferLock::new(framebuffer),
        }
    }

    /// Start over with `heap` as the primary region. Rewinds the swap region and forgets
    /// all free blocks, tasks and framebuffer owners.
    pub fn init(&mut self, heap: Arena) {
        debug!("heap at {}, swap at {}", heap.range(), self.swap.range());
        self.heap = heap;
        self.swap.reset();
        self.free_head = 0;
        self.tasks = TaskTable::new();
        self.framebuffer.reset();
    }

    /// Overwrite freed payloads with `POISON`.
    pub fn set_poisoning(&mut self, enabled: bool) {
        self.poison = enabled;
    }

    pub fn allocate(&mut self, size: usize) -> Result<PhysAddr, AllocError> {
        self.allocate_in(size, Placement::Anywhere)
    }

    fn allocate_in(&mut self, size: usize, placement: Placement) -> Result<PhysAddr, AllocError> {
        let oom = AllocError::OutOfMemory { requested: size };
        let payload = size.checked_align_up(ALIGN).ok_or(oom)?.max(ALIGN);
        let total = payload
            .checked_add(HEADER_SIZE)
            .filter(|&t| t <= u32::MAX as usize)
            .ok_or(oom)?;

        let (origin, offset, block_total) = match self.take_free(total, placement) {
            Some(reused) => reused,
            None => match self.heap.bump(total) {
                Some(offset) => (Origin::Heap, offset, total),
                None if placement == Placement::Anywhere => match self.swap.bump(total) {
                    Some(offset) => (Origin::Swap, offset, total),
                    None => {
                        warn!("allocation of {} bytes failed, heap and swap exhausted", size);
                        return Err(oom);
                    }
                },
                None => return Err(oom),
            },
        };

        let arena = self.arena_mut(origin);
        block::write(arena, offset, block_total, payload, Guard::Active, origin);
        Ok(arena.base() + offset + HEADER_SIZE)
    }

    /// Release a block. `size`, if given, must not exceed the size the block was allocated with.
    ///
    /// Panics on pointers that were never handed out by this allocator and on blocks
    /// that are not live.
    pub fn free(&mut self, addr: PhysAddr, size: Option<usize>) {
        let (origin, offset) = match self.locate_payload(addr) {
            Some(found) => found,
            None => panic!("free outside managed region: {:p}", addr),
        };
        let header = Header::read(self.arena(origin), offset)
            .filter(|h| h.guard == Some(Guard::Active) && h.is_plausible(self.arena(origin), offset));
        let header = match header {
            Some(h) => h,
            None => panic!("use-after-free or corrupt block at {:p}", addr),
        };
        if let Some(size) = size {
            if size > header.payload {
                panic!("free of {} bytes exceeds the {} byte block at {:p}", size, header.payload, addr);
            }
        }

        let poison = self.poison;
        let arena = self.arena_mut(origin);
        if poison {
            let pattern = POISON.to_le_bytes();
            for (i, byte) in arena.bytes_mut(offset + HEADER_SIZE, header.total - HEADER_SIZE).iter_mut().enumerate() {
                *byte = pattern[i % pattern.len()];
            }
        }
        block::set_payload(arena, offset, header.total - HEADER_SIZE);
        block::set_guard(arena, offset, Guard::Freed);
        self.push_free(origin, offset);
    }

    /// Bytes that can still be handed out: unused heap and swap plus everything on the free list.
    ///
    /// Panics if the free list is corrupt.
    pub fn remaining_capacity(&self) -> usize {
        match self.try_remaining_capacity() {
            Some(remaining) => remaining,
            None => panic!("corrupt free list"),
        }
    }

    /// Like `remaining_capacity`, but `None` instead of a panic on a corrupt free list.
    pub fn try_remaining_capacity(&self) -> Option<usize> {
        let (_, free_bytes) = self.free_list_usage()?;
        Some(self.heap.remaining() + self.swap.remaining() + free_bytes)
    }

    /// Combined size of both regions.
    pub fn total_capacity(&self) -> usize {
        self.heap.capacity() + self.swap.capacity()
    }

    /// Memory taken by the live block at `addr` including its header, if there is one.
    pub fn block_footprint(&self, addr: PhysAddr) -> Option<usize> {
        self.live_block(addr).map(|(_, _, h)| h.total)
    }

    /// Payload of the live block at `addr`, as large as it was requested.
    pub fn payload(&self, addr: PhysAddr) -> Option<&[u8]> {
        let (origin, offset, h) = self.live_block(addr)?;
        Some(self.arena(origin).bytes(offset + HEADER_SIZE, h.payload))
    }

    pub fn payload_mut(&mut self, addr: PhysAddr) -> Option<&mut [u8]> {
        let (origin, offset, h) = self.live_block(addr)?;
        Some(self.arena_mut(origin).bytes_mut(offset + HEADER_SIZE, h.payload))
    }

    pub fn heap_range(&self) -> PhysAddrRange {
        self.heap.range()
    }

    pub fn swap_range(&self) -> PhysAddrRange {
        self.swap.range()
    }

    pub fn stats(&self) -> AllocatorStats {
        let (free_blocks, free_bytes) = self.free_list_usage().unwrap_or((0, 0));
        AllocatorStats {
            heap_capacity: self.heap.capacity(),
            heap_used: self.heap.used(),
            swap_capacity: self.swap.capacity(),
            swap_used: self.swap.used(),
            free_blocks,
            free_bytes,
        }
    }

    // tasks

    /// Register a task, `None` when all task slots are taken.
    pub fn register_task(&mut self, priority: u8) -> Option<TaskId> {
        let id = self.tasks.register(priority);
        if id.is_none() {
            warn!("task table full, cannot register task with priority {}", priority);
        }
        id
    }

    /// Allocate from the heap region on behalf of a task.
    pub fn allocate_for_task(&mut self, id: TaskId, size: usize) -> Result<PhysAddr, AllocError> {
        let addr = self.allocate_in(size, Placement::HeapOnly)?;
        match self.tasks.get_mut(id) {
            Some(task) => {
                task.charge(addr, size.align_up(ALIGN));
                Ok(addr)
            }
            None => {
                self.free(addr, None);
                Err(AllocError::TaskNotFound(id))
            }
        }
    }

    /// Bytes requested on behalf of `id`, each request rounded up to the block alignment.
    pub fn task_usage(&self, id: TaskId) -> usize {
        self.tasks.get(id).map_or(0, |t| t.used())
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskRecord> {
        self.tasks.get(id)
    }

    /// Copy `data` into memory owned by the task and remember it under a new handle.
    pub fn save_block(&mut self, id: TaskId, data: &[u8]) -> Result<BlockHandle, AllocError> {
        let task = self.tasks.get(id).ok_or(AllocError::TaskNotFound(id))?;
        if task.free_handle().is_none() {
            return Err(AllocError::TooManySavedBlocks(id));
        }
        let addr = self.allocate_for_task(id, data.len())?;
        if let Some(payload) = self.payload_mut(addr) {
            payload[..data.len()].copy_from_slice(data);
        }
        let saved = SavedBlock { addr, size: data.len() };
        self.tasks
            .get_mut(id)
            .and_then(|t| t.save(saved))
            .ok_or(AllocError::TooManySavedBlocks(id))
    }

    /// Bytes saved under `handle`, `None` for unknown tasks or handles.
    pub fn retrieve_block(&self, id: TaskId, handle: BlockHandle) -> Option<&[u8]> {
        let saved = self.tasks.get(id)?.saved(handle)?;
        self.payload(saved.addr).map(|p| &p[..saved.size])
    }

    // framebuffer

    pub fn framebuffer(&self) -> &FramebufferLock {
        &self.framebuffer
    }

    pub fn lock_region(&mut self, owner: &'static str) -> Option<PhysAddr> {
        self.framebuffer.lock(owner)
    }

    pub fn unlock_region(&mut self, owner: &'static str) {
        self.framebuffer.unlock(owner)
    }

    pub fn window(&self, owner: &str, offset: usize, length: usize) -> PhysAddr {
        self.framebuffer.window(owner, offset, length)
    }

    // free list plumbing

    fn arena(&self, origin: Origin) -> &Arena {
        match origin {
            Origin::Heap => &self.heap,
            Origin::Swap => &self.swap,
        }
    }

    fn arena_mut(&mut self, origin: Origin) -> &mut Arena {
        match origin {
            Origin::Heap => &mut self.heap,
            Origin::Swap => &mut self.swap,
        }
    }

    fn header_addr(&self, origin: Origin, offset: usize) -> u64 {
        (self.arena(origin).base().0 + offset) as u64
    }

    /// Region and header offset of an address inside one of the arenas.
    fn locate(&self, addr: PhysAddr) -> Option<(Origin, usize)> {
        if let Some(offset) = self.heap.offset_of(addr) {
            Some((Origin::Heap, offset))
        } else {
            self.swap.offset_of(addr).map(|offset| (Origin::Swap, offset))
        }
    }

    /// Header offset of the block whose payload would start at `addr`.
    fn locate_payload(&self, addr: PhysAddr) -> Option<(Origin, usize)> {
        let (origin, offset) = self.locate(addr)?;
        if offset < HEADER_SIZE || !(offset - HEADER_SIZE).is_aligned(ALIGN) {
            panic!("use-after-free or corrupt block at {:p}", addr);
        }
        Some((origin, offset - HEADER_SIZE))
    }

    fn live_block(&self, addr: PhysAddr) -> Option<(Origin, usize, Header)> {
        let (origin, offset) = self.locate(addr)?;
        let offset = offset.checked_sub(HEADER_SIZE)?;
        let arena = self.arena(origin);
        Header::read(arena, offset)
            .filter(|h| h.guard == Some(Guard::Active) && h.is_plausible(arena, offset))
            .map(|h| (origin, offset, h))
    }

    /// Decode the free block whose header lives at the absolute address `link`.
    fn free_block(&self, link: u64) -> Option<(Origin, usize, Header)> {
        let (origin, offset) = self.locate(PhysAddr(usize::try_from(link).ok()?))?;
        let arena = self.arena(origin);
        Header::read(arena, offset)
            .filter(|h| h.guard == Some(Guard::Freed) && h.is_plausible(arena, offset))
            .map(|h| (origin, offset, h))
    }

    /// Upper bound for the number of blocks, used to detect cycles in the free list.
    fn max_blocks(&self) -> usize {
        (self.heap.used() + self.swap.used()) / MIN_SPLIT
    }

    /// Number and combined size of free blocks, `None` if the list is corrupt.
    fn free_list_usage(&self) -> Option<(usize, usize)> {
        let (mut count, mut bytes) = (0, 0);
        let mut link = self.free_head;
        while link != 0 {
            let (_, _, header) = self.free_block(link)?;
            count += 1;
            if count > self.max_blocks() {
                return None;
            }
            bytes += header.total;
            link = header.next;
        }
        Some((count, bytes))
    }

    fn push_free(&mut self, origin: Origin, offset: usize) {
        let head = self.free_head;
        block::set_next(self.arena_mut(origin), offset, head);
        self.free_head = self.header_addr(origin, offset);
    }

    fn set_link(&mut self, prev: Option<(Origin, usize)>, next: u64) {
        match prev {
            None => self.free_head = next,
            Some((origin, offset)) => block::set_next(self.arena_mut(origin), offset, next),
        }
    }

    /// Unlink the first free block of at least `total` bytes, splitting off the remainder.
    fn take_free(&mut self, total: usize, placement: Placement) -> Option<(Origin, usize, usize)> {
        let mut prev = None;
        let mut link = self.free_head;
        let mut visited = 0;
        while link != 0 {
            let (origin, offset, header) = match self.free_block(link) {
                Some(found) => found,
                None => panic!("corrupt free list at {:#x}", link),
            };
            visited += 1;
            if visited > self.max_blocks() {
                panic!("corrupt free list: cycle through {:#x}", link);
            }

            if header.total >= total && placement.accepts(origin) {
                self.set_link(prev, header.next);
                let remainder = header.total - total;
                if remainder >= MIN_SPLIT {
                    let rest = offset + total;
                    let arena = self.arena_mut(origin);
                    block::write(arena, rest, remainder, remainder - HEADER_SIZE, Guard::Freed, origin);
                    block::set_total(arena, offset, total);
                    self.push_free(origin, rest);
                    return Some((origin, offset, total));
                }
                return Some((origin, offset, header.total));
            }
            prev = Some((origin, offset));
            link = header.next;
        }
        None
    }
}
