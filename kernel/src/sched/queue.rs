//! The fixed-size ready queue.
//!
//! Slot 0 is the running task. Rotation pops the head and appends it at
//! the first free slot, so occupied slots stay contiguous from the front;
//! ties break by insertion order, which makes scheduling FIFO among
//! enabled tasks.

use crate::arch::x86::context::Context;
use crate::process::pcb::Pid;
use crate::process::MAX_TASKS;

/// Queue capacity: one slot per possible task.
pub const QUEUE_CAPACITY: usize = MAX_TASKS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Runnable,
    Running,
    /// A shell with a live child; skipped by rotation via `enabled`.
    Asleep,
}

/// One scheduled task.
#[derive(Debug, Clone, Copy)]
pub struct QueueEntry {
    pub pid: Pid,
    /// Kernel stack pointers as of the last preemption.
    pub ctx: Context,
    pub state: TaskState,
    /// Disabled entries keep their slot but never win rotation.
    pub enabled: bool,
}

impl QueueEntry {
    pub const fn running(pid: Pid) -> Self {
        Self {
            pid,
            ctx: Context::empty(),
            state: TaskState::Running,
            enabled: true,
        }
    }
}

/// Fixed-arity task queue.
pub struct TaskQueue {
    slots: [Option<QueueEntry>; QUEUE_CAPACITY],
}

impl TaskQueue {
    pub const fn new() -> Self {
        Self {
            slots: [None; QUEUE_CAPACITY],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots[0].is_none()
    }

    pub fn slot(&self, index: usize) -> Option<&QueueEntry> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn head(&self) -> Option<&QueueEntry> {
        self.slots[0].as_ref()
    }

    pub fn head_mut(&mut self) -> Option<&mut QueueEntry> {
        self.slots[0].as_mut()
    }

    fn entry_mut(&mut self, pid: Pid) -> Option<&mut QueueEntry> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|entry| entry.pid == pid)
    }

    /// Pointer to an entry's context slot, for the switch stubs.
    pub fn ctx_ptr_of(&mut self, pid: Pid) -> Option<*mut Context> {
        self.entry_mut(pid)
            .map(|entry| core::ptr::addr_of_mut!(entry.ctx))
    }

    /// Pointer to the head entry's context slot.
    pub fn head_ctx_ptr(&mut self) -> Option<*mut Context> {
        self.slots[0]
            .as_mut()
            .map(|entry| core::ptr::addr_of_mut!(entry.ctx))
    }

    /// Append at the first free slot.
    pub fn push_tail(&mut self, entry: QueueEntry) -> bool {
        for slot in self.slots.iter_mut() {
            if slot.is_none() {
                *slot = Some(entry);
                return true;
            }
        }
        false
    }

    /// Remove `pid`'s entry, closing the gap.
    pub fn remove(&mut self, pid: Pid) -> Option<QueueEntry> {
        let index = self
            .slots
            .iter()
            .position(|s| s.map(|e| e.pid) == Some(pid))?;
        let entry = self.slots[index].take();
        for i in index..QUEUE_CAPACITY - 1 {
            self.slots[i] = self.slots[i + 1];
        }
        self.slots[QUEUE_CAPACITY - 1] = None;
        entry
    }

    /// Head to tail, everything else forward by one.
    pub fn rotate(&mut self) {
        if self.len() < 2 {
            return;
        }
        if let Some(head) = self.slots[0].take() {
            for i in 0..QUEUE_CAPACITY - 1 {
                self.slots[i] = self.slots[i + 1];
            }
            self.slots[QUEUE_CAPACITY - 1] = None;
            self.push_tail(head);
        }
    }

    /// Rotate until the head is enabled. If nothing is enabled the head is
    /// kept as-is; at least one shell is always enabled in steady state.
    pub fn rotate_until_enabled(&mut self) {
        if !self.slots.iter().flatten().any(|e| e.enabled) {
            return;
        }
        while let Some(head) = self.head() {
            if head.enabled {
                break;
            }
            self.rotate();
        }
    }

    /// One scheduling step: the head goes to the tail unconditionally, then
    /// rotation continues past disabled entries. Returns false (queue
    /// untouched) when no entry is enabled, so the current head keeps the
    /// CPU.
    pub fn advance(&mut self) -> bool {
        if !self.slots.iter().flatten().any(|e| e.enabled) {
            return false;
        }
        self.rotate();
        self.rotate_until_enabled();
        true
    }

    /// Put a freshly spawned task at the front. The displaced head moves
    /// to the tail, put to sleep when it is the spawning parent.
    pub fn install_front(&mut self, child: QueueEntry, sleep_old_head: bool) {
        if let Some(mut old) = self.slots[0] {
            if sleep_old_head {
                old.enabled = false;
                old.state = TaskState::Asleep;
            } else {
                old.state = TaskState::Runnable;
            }
            // Slot 0 is still occupied, so this lands behind everything.
            self.push_tail(old);
        }
        self.slots[0] = Some(child);
    }

    /// Halt path: drop the head (the exiting child) and put `pid` (the
    /// parent) there, runnable and running again.
    pub fn promote_to_front(&mut self, pid: Pid) {
        let mut entry = self.remove(pid).unwrap_or(QueueEntry::running(pid));
        entry.enabled = true;
        entry.state = TaskState::Running;
        self.slots[0] = Some(entry);
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_of(pids: &[Pid]) -> TaskQueue {
        let mut q = TaskQueue::new();
        for &pid in pids {
            q.push_tail(QueueEntry::running(pid));
        }
        q
    }

    fn order(q: &TaskQueue) -> std::vec::Vec<Pid> {
        (0..QUEUE_CAPACITY).filter_map(|i| q.slot(i).map(|e| e.pid)).collect()
    }

    #[test]
    fn rotation_cycles_strictly_in_order() {
        let mut q = queue_of(&[0, 1, 2]);
        let mut seen = std::vec::Vec::new();
        for _ in 0..6 {
            seen.push(q.head().unwrap().pid);
            q.rotate();
        }
        assert_eq!(seen, [0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn rotation_skips_disabled_entries() {
        let mut q = queue_of(&[0, 1, 2]);
        q.entry_mut(1).unwrap().enabled = false;
        q.rotate(); // head -> 1 (disabled)
        q.rotate_until_enabled();
        assert_eq!(q.head().unwrap().pid, 2);
    }

    #[test]
    fn all_disabled_keeps_current_head() {
        let mut q = queue_of(&[0, 1]);
        q.entry_mut(0).unwrap().enabled = false;
        q.entry_mut(1).unwrap().enabled = false;
        assert!(!q.advance());
        assert_eq!(q.head().unwrap().pid, 0);
    }

    #[test]
    fn advance_cycles_three_shells_strictly_in_order() {
        let mut q = queue_of(&[0, 1, 2]);
        let mut heads = std::vec::Vec::new();
        for _ in 0..6 {
            assert!(q.advance());
            heads.push(q.head().unwrap().pid);
        }
        assert_eq!(heads, [1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn advance_skips_a_sleeping_parent() {
        let mut q = queue_of(&[0, 1, 2]);
        q.entry_mut(1).unwrap().enabled = false;
        assert!(q.advance());
        assert_eq!(q.head().unwrap().pid, 2);
        assert!(q.advance());
        assert_eq!(q.head().unwrap().pid, 0);
    }

    #[test]
    fn advance_with_one_enabled_task_comes_back_to_it() {
        let mut q = queue_of(&[3, 1, 2]);
        q.entry_mut(1).unwrap().enabled = false;
        q.entry_mut(2).unwrap().enabled = false;
        assert!(q.advance());
        assert_eq!(q.head().unwrap().pid, 3);
    }

    #[test]
    fn install_front_displaces_and_sleeps_parent() {
        let mut q = queue_of(&[0, 1, 2]);
        q.install_front(QueueEntry::running(3), true);
        assert_eq!(order(&q), [3, 1, 2, 0]);
        let parent = q.slot(3).unwrap();
        assert!(!parent.enabled);
        assert_eq!(parent.state, TaskState::Asleep);
    }

    #[test]
    fn install_front_keeps_sibling_enabled_for_bootstrap() {
        let mut q = queue_of(&[0]);
        q.install_front(QueueEntry::running(1), false);
        assert_eq!(order(&q), [1, 0]);
        let sibling = q.slot(1).unwrap();
        assert!(sibling.enabled);
        assert_eq!(sibling.state, TaskState::Runnable);
        // Exactly one entry is running between ticks.
        assert_eq!(q.head().unwrap().state, TaskState::Running);
    }

    #[test]
    fn promote_to_front_replaces_exited_child() {
        let mut q = queue_of(&[0, 1]);
        // pid 3 spawned by pid 0: parent asleep at tail, child in front.
        q.install_front(QueueEntry::running(3), true);
        assert_eq!(order(&q), [3, 1, 0]);
        // Child halts: parent back in front, child gone, no duplicates.
        q.promote_to_front(0);
        assert_eq!(order(&q), [0, 1]);
        let head = q.head().unwrap();
        assert!(head.enabled);
        assert_eq!(head.state, TaskState::Running);
    }

    #[test]
    fn remove_closes_the_gap() {
        let mut q = queue_of(&[0, 1, 2]);
        assert!(q.remove(1).is_some());
        assert_eq!(order(&q), [0, 2]);
        assert!(q.remove(5).is_none());
    }

    #[test]
    fn empty_queue_observed_through_slot_2() {
        let q = queue_of(&[0, 1]);
        assert!(q.slot(2).is_none());
        let q = queue_of(&[0, 1, 2]);
        assert!(q.slot(2).is_some());
    }
}
