//! Per-task accounting ("ballooning") on top of the shared heap.

use bare_metal::PhysAddr;

/// Number of tasks that can be registered at the same time.
pub const MAX_TASKS: usize = 16;
/// Number of saved blocks each task can hold.
pub const MAX_SAVED_BLOCKS: usize = 16;

/// Task identifier. Ids are handed out in increasing order starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

/// Index of a saved block within its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedBlock {
    pub addr: PhysAddr,
    pub size: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct TaskRecord {
    id: TaskId,
    priority: u8,
    base: Option<PhysAddr>,
    used: usize,
    saved: [Option<SavedBlock>; MAX_SAVED_BLOCKS],
}

impl TaskRecord {
    fn new(id: TaskId, priority: u8) -> TaskRecord {
        TaskRecord {
            id,
            priority,
            base: None,
            used: 0,
            saved: [None; MAX_SAVED_BLOCKS],
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Address of the first allocation made for the task.
    pub fn base(&self) -> Option<PhysAddr> {
        self.base
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub(crate) fn charge(&mut self, addr: PhysAddr, bytes: usize) {
        self.base.get_or_insert(addr);
        self.used += bytes;
    }

    pub(crate) fn free_handle(&self) -> Option<BlockHandle> {
        self.saved.iter().position(Option::is_none).map(BlockHandle)
    }

    pub(crate) fn save(&mut self, block: SavedBlock) -> Option<BlockHandle> {
        let handle = self.free_handle()?;
        self.saved[handle.0] = Some(block);
        Some(handle)
    }

    pub fn saved(&self, handle: BlockHandle) -> Option<SavedBlock> {
        self.saved.get(handle.0).copied().flatten()
    }
}

pub(crate) struct TaskTable {
    records: [Option<TaskRecord>; MAX_TASKS],
    next_id: u32,
}

impl TaskTable {
    pub fn new() -> TaskTable {
        TaskTable {
            records: [None; MAX_TASKS],
            next_id: 1,
        }
    }

    pub fn register(&mut self, priority: u8) -> Option<TaskId> {
        let slot = self.records.iter_mut().find(|r| r.is_none())?;
        let id = TaskId(self.next_id);
        self.next_id += 1;
        *slot = Some(TaskRecord::new(id, priority));
        Some(id)
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskRecord> {
        self.records.iter().flatten().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskRecord> {
        self.records.iter_mut().flatten().find(|r| r.id == id)
    }
}
