//! Paging and address-space management.
//!
//! Virtual layout, fixed for the life of the machine:
//!
//! * 0-4 MiB: small-page identity map, kernel-only. Page 0 is absent so
//!   null dereferences fault; the video page at 0xB8000 is present and
//!   uncached.
//! * 4-8 MiB: one 4 MiB large page for the kernel image and the per-task
//!   kernel stacks.
//! * PDE 30 (120 MiB): the user-video table; entry `pid` is that task's
//!   4 KiB window onto video memory, present only after `vidmap`.
//! * PDE 32 (128 MiB): the user window. Each task's directory maps it to a
//!   distinct physical 4 MiB region at `KERNEL_END + pid * 4 MiB`; the
//!   entry's present bit doubles as process-slot occupancy.
//!
//! Every task directory shares the kernel entries, so a CR3 switch changes
//! only what the user window and user-video page resolve to.

use bitflags::bitflags;
use spin::Mutex;

use crate::arch::x86::interrupts::without_interrupts;
use crate::error::{KernelError, KernelResult};
use crate::process::MAX_TASKS;

pub const PAGE_SIZE: usize = 4096;
pub const LARGE_PAGE_SIZE: usize = 0x40_0000;

/// Physical (and virtual) base of the kernel large page.
pub const KERNEL_BASE: u32 = 0x0040_0000;
/// End of the kernel large page; user frames are allocated from here up.
pub const KERNEL_END: u32 = 0x0080_0000;
/// Text-mode video memory.
pub const VIDEO_PHYS: u32 = 0x000B_8000;

/// Directory index of the per-task user window (128 MiB).
pub const USER_PDE_INDEX: usize = 32;
/// Virtual base of the user window.
pub const USER_VIRT_BASE: u32 = 0x0800_0000;
/// The user window is one large page.
pub const USER_WINDOW_SIZE: u32 = LARGE_PAGE_SIZE as u32;

/// Directory index of the user-video table (120 MiB).
pub const VIDMAP_PDE_INDEX: usize = 30;
/// Virtual base of the per-task user-video windows.
pub const VIDMAP_VIRT_BASE: u32 = 0x0780_0000;

/// Reserved 4 KiB frames right above the video page that back the
/// user-video window of tasks on off-screen terminals.
pub const OFFSCREEN_FRAMES: usize = 3;

const ADDR_MASK: u32 = 0xFFFF_F000;

bitflags! {
    /// Page directory / page table entry bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE = 1 << 4;
        const ACCESSED = 1 << 5;
        const LARGE = 1 << 7;
        const GLOBAL = 1 << 8;
    }
}

/// Kernel large page: present, writable, uncached, global.
const KERNEL_PDE: u32 = EntryFlags::PRESENT.bits()
    | EntryFlags::WRITABLE.bits()
    | EntryFlags::NO_CACHE.bits()
    | EntryFlags::LARGE.bits()
    | EntryFlags::GLOBAL.bits();

/// User window large page, minus the present bit (set on allocation).
const USER_PDE: u32 = EntryFlags::WRITABLE.bits()
    | EntryFlags::USER.bits()
    | EntryFlags::NO_CACHE.bits()
    | EntryFlags::LARGE.bits();

/// The low identity-mapped table; kernel-only, so user code cannot reach
/// video memory except through its vidmap window.
const LOW_TABLE_PDE: u32 = EntryFlags::PRESENT.bits() | EntryFlags::WRITABLE.bits();

/// The vidmap table's directory entry must be user-reachable.
const VIDMAP_TABLE_PDE: u32 =
    EntryFlags::PRESENT.bits() | EntryFlags::WRITABLE.bits() | EntryFlags::USER.bits();

/// A task's user-visible video page in the vidmap table. Not global:
/// unmapping relies on the CR3 reload flushing it.
const VIDEO_PTE: u32 =
    EntryFlags::PRESENT.bits() | EntryFlags::WRITABLE.bits() | EntryFlags::USER.bits();

/// The identity-mapped video frame: memory-mapped I/O, so uncached.
const VIDEO_LOW_PTE: u32 = EntryFlags::PRESENT.bits()
    | EntryFlags::WRITABLE.bits()
    | EntryFlags::NO_CACHE.bits()
    | EntryFlags::GLOBAL.bits();

/// Ordinary identity-mapped low page.
const IDENTITY_PTE: u32 =
    EntryFlags::PRESENT.bits() | EntryFlags::WRITABLE.bits() | EntryFlags::GLOBAL.bits();

/// An unmapped user-video slot.
const VIDMAP_IDLE_PTE: u32 = EntryFlags::WRITABLE.bits() | EntryFlags::USER.bits();

#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [u32; 1024],
}

impl PageTable {
    pub const fn zeroed() -> Self {
        Self { entries: [0; 1024] }
    }
}

#[repr(C, align(4096))]
pub struct PageDirectory {
    pub entries: [u32; 1024],
}

impl PageDirectory {
    pub const fn zeroed() -> Self {
        Self { entries: [0; 1024] }
    }
}

/// All paging structures plus the off-screen frame pool.
struct PagingState {
    master: PageDirectory,
    low_table: PageTable,
    vidmap_table: PageTable,
    task_dirs: [PageDirectory; MAX_TASKS],
    offscreen_used: [bool; OFFSCREEN_FRAMES],
}

/// Physical base of task `pid`'s user window.
pub fn user_window_phys(pid: usize) -> u32 {
    KERNEL_END + pid as u32 * USER_WINDOW_SIZE
}

/// User-virtual address of task `pid`'s video window.
pub fn user_video_virt(pid: usize) -> u32 {
    VIDMAP_VIRT_BASE + (pid * PAGE_SIZE) as u32
}

impl PagingState {
    const fn new() -> Self {
        const DIR: PageDirectory = PageDirectory::zeroed();
        Self {
            master: PageDirectory::zeroed(),
            low_table: PageTable::zeroed(),
            vidmap_table: PageTable::zeroed(),
            task_dirs: [DIR; MAX_TASKS],
            offscreen_used: [false; OFFSCREEN_FRAMES],
        }
    }

    /// Populate every table and directory.
    fn build(&mut self) {
        self.low_table.entries[0] = 0; // null-dereference guard
        for i in 1..1024 {
            let addr = i as u32 * PAGE_SIZE as u32;
            self.low_table.entries[i] = if addr == VIDEO_PHYS {
                addr | VIDEO_LOW_PTE
            } else {
                addr | IDENTITY_PTE
            };
        }
        for entry in self.vidmap_table.entries.iter_mut() {
            *entry = VIDMAP_IDLE_PTE;
        }

        let low =
            (core::ptr::addr_of!(self.low_table) as usize as u32 & ADDR_MASK) | LOW_TABLE_PDE;
        let vidmap = (core::ptr::addr_of!(self.vidmap_table) as usize as u32 & ADDR_MASK)
            | VIDMAP_TABLE_PDE;

        self.master.entries[0] = low;
        self.master.entries[1] = KERNEL_BASE | KERNEL_PDE;

        for (pid, dir) in self.task_dirs.iter_mut().enumerate() {
            dir.entries[0] = low;
            dir.entries[1] = KERNEL_BASE | KERNEL_PDE;
            dir.entries[VIDMAP_PDE_INDEX] = vidmap;
            dir.entries[USER_PDE_INDEX] = user_window_phys(pid) | USER_PDE;
        }
    }

    fn slot_present(&self, pid: usize) -> bool {
        self.task_dirs[pid].entries[USER_PDE_INDEX] & EntryFlags::PRESENT.bits() != 0
    }

    /// Claim the first directory whose user window is absent.
    fn allocate_slot(&mut self) -> Option<usize> {
        for pid in 0..MAX_TASKS {
            if !self.slot_present(pid) {
                self.task_dirs[pid].entries[USER_PDE_INDEX] |= EntryFlags::PRESENT.bits();
                return Some(pid);
            }
        }
        None
    }

    fn release_slot(&mut self, pid: usize) {
        self.task_dirs[pid].entries[USER_PDE_INDEX] &= !EntryFlags::PRESENT.bits();
    }

    fn dir_address(&self, pid: usize) -> u32 {
        core::ptr::addr_of!(self.task_dirs[pid]) as usize as u32 & ADDR_MASK
    }
}

static PAGING: Mutex<PagingState> = Mutex::new(PagingState::new());

#[cfg(target_arch = "x86")]
unsafe fn load_cr3(addr: u32) {
    // SAFETY: caller passes the physical address of a fully built page
    // directory whose kernel entries cover the executing code and stack.
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) addr & ADDR_MASK, options(nostack, preserves_flags));
    }
}

#[cfg(not(target_arch = "x86"))]
unsafe fn load_cr3(_addr: u32) {}

#[cfg(target_arch = "x86")]
fn flush_tlb() {
    // SAFETY: rewriting CR3 with its own value only flushes the TLB.
    unsafe {
        core::arch::asm!(
            "mov {tmp}, cr3",
            "mov cr3, {tmp}",
            tmp = out(reg) _,
            options(nostack, preserves_flags)
        );
    }
}

#[cfg(not(target_arch = "x86"))]
fn flush_tlb() {}

#[cfg(target_arch = "x86")]
unsafe fn enable_paging(master: u32) {
    // SAFETY: the one-way door. PSE first so the kernel large page decodes
    // (plus PGE so kernel translations survive CR3 switches), then the
    // directory base, then CR0.PG. The master directory identity maps the
    // executing code, so the instruction after paging turns on fetches
    // from the same physical location.
    unsafe {
        core::arch::asm!(
            "mov {tmp}, cr4",
            "or {tmp}, 0x90",
            "mov cr4, {tmp}",
            tmp = out(reg) _,
            options(nostack)
        );
        load_cr3(master);
        core::arch::asm!(
            "mov {tmp}, cr0",
            "or {tmp}, 0x80000000",
            "mov cr0, {tmp}",
            tmp = out(reg) _,
            options(nostack)
        );
    }
}

#[cfg(not(target_arch = "x86"))]
unsafe fn enable_paging(_master: u32) {}

/// Build the master address space and turn paging on.
///
/// Fails only when the CPU lacks PSE, which is fatal to the caller.
pub fn init() -> KernelResult<()> {
    if !crate::arch::x86::has_pse() {
        return Err(KernelError::Io);
    }
    without_interrupts(|| {
        let mut st = PAGING.lock();
        st.build();
        let master = core::ptr::addr_of!(st.master) as usize as u32;
        // SAFETY: tables are fully built and identity-cover the kernel.
        unsafe { enable_paging(master) };
    });
    log::info!(
        "paging on: kernel large page at {:#x}, {} user slots",
        KERNEL_BASE,
        MAX_TASKS
    );
    Ok(())
}

/// Claim a free process slot and switch to its address space.
pub fn new_address_space() -> KernelResult<usize> {
    without_interrupts(|| {
        let mut st = PAGING.lock();
        let pid = st.allocate_slot().ok_or(KernelError::NoFreeSlot)?;
        // SAFETY: the directory was built at init and stays alive forever.
        unsafe { load_cr3(st.dir_address(pid)) };
        Ok(pid)
    })
}

/// Drop a slot without touching CR3 (load-failure cleanup).
pub fn release_slot(pid: usize) {
    without_interrupts(|| PAGING.lock().release_slot(pid));
}

/// Switch to `parent`'s address space and free `current`'s slot.
pub fn return_to_parent(current: usize, parent: usize) {
    without_interrupts(|| {
        let mut st = PAGING.lock();
        // SAFETY: parent's directory is built and its user window present.
        unsafe { load_cr3(st.dir_address(parent)) };
        st.release_slot(current);
    });
}

/// Scheduler path: switch to `pid`'s address space. The slot must already
/// be occupied.
pub fn switch_to(pid: usize) {
    without_interrupts(|| {
        let st = PAGING.lock();
        // SAFETY: as above; the scheduler only switches to live slots.
        unsafe { load_cr3(st.dir_address(pid)) };
    });
}

/// Point task `pid`'s user-video window at `backing` (the live video page
/// or an off-screen frame) and flush the TLB.
pub fn map_user_video(pid: usize, backing: u32) {
    without_interrupts(|| {
        let mut st = PAGING.lock();
        st.vidmap_table.entries[pid] = (backing & ADDR_MASK) | VIDEO_PTE;
        flush_tlb();
    });
}

/// Tear down task `pid`'s user-video window.
pub fn unmap_user_video(pid: usize) {
    without_interrupts(|| {
        let mut st = PAGING.lock();
        st.vidmap_table.entries[pid] = VIDMAP_IDLE_PTE;
        flush_tlb();
    });
}

/// Grab one of the reserved off-screen video backing frames.
pub fn alloc_offscreen_video() -> KernelResult<u32> {
    without_interrupts(|| {
        let mut st = PAGING.lock();
        for (i, used) in st.offscreen_used.iter_mut().enumerate() {
            if !*used {
                *used = true;
                return Ok(VIDEO_PHYS + ((i + 1) * PAGE_SIZE) as u32);
            }
        }
        Err(KernelError::NoFreeSlot)
    })
}

/// Return an off-screen frame to the pool.
pub fn release_offscreen_video(frame: u32) {
    without_interrupts(|| {
        let mut st = PAGING.lock();
        let index = (frame.wrapping_sub(VIDEO_PHYS) as usize) / PAGE_SIZE;
        if (1..=OFFSCREEN_FRAMES).contains(&index) {
            st.offscreen_used[index - 1] = false;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;

    fn built() -> Box<PagingState> {
        let mut st = Box::new(PagingState::new());
        st.build();
        st
    }

    #[test]
    fn null_page_is_absent_and_video_is_kernel_only() {
        let st = built();
        assert_eq!(st.low_table.entries[0], 0);
        let video = st.low_table.entries[(VIDEO_PHYS as usize) / PAGE_SIZE];
        assert_eq!(video & ADDR_MASK, VIDEO_PHYS);
        assert_eq!(video & 0xFFF, VIDEO_LOW_PTE);
        // Direct user stores to 0xB8000 must fault; vidmap is the only way.
        assert_eq!(video & EntryFlags::USER.bits(), 0);
        let plain = st.low_table.entries[1];
        assert_eq!(plain & ADDR_MASK, PAGE_SIZE as u32);
        assert_eq!(plain & 0xFFF, IDENTITY_PTE);
    }

    #[test]
    fn vidmap_table_is_user_reachable_but_idle_entries_absent() {
        let st = built();
        let pde = st.task_dirs[0].entries[VIDMAP_PDE_INDEX];
        assert_eq!(pde & 0xFFF, VIDMAP_TABLE_PDE);
        for entry in st.vidmap_table.entries.iter() {
            assert_eq!(entry & EntryFlags::PRESENT.bits(), 0);
        }
    }

    #[test]
    fn task_directories_share_kernel_entries() {
        let st = built();
        for dir in &st.task_dirs {
            assert_eq!(dir.entries[1], KERNEL_BASE | KERNEL_PDE);
            assert_eq!(dir.entries[0], st.master.entries[0]);
        }
    }

    #[test]
    fn user_windows_are_disjoint_per_slot() {
        let st = built();
        for a in 0..MAX_TASKS {
            let base = st.task_dirs[a].entries[USER_PDE_INDEX] & ADDR_MASK;
            assert_eq!(base, user_window_phys(a));
            for b in 0..MAX_TASKS {
                if a != b {
                    assert_ne!(base, st.task_dirs[b].entries[USER_PDE_INDEX] & ADDR_MASK);
                }
            }
        }
    }

    #[test]
    fn slots_allocate_first_free_and_exhaust() {
        let mut st = built();
        for expect in 0..MAX_TASKS {
            assert_eq!(st.allocate_slot(), Some(expect));
        }
        assert_eq!(st.allocate_slot(), None);
        st.release_slot(2);
        assert!(!st.slot_present(2));
        assert_eq!(st.allocate_slot(), Some(2));
    }

    #[test]
    fn present_bit_cycles_on_release() {
        let mut st = built();
        let pid = st.allocate_slot().unwrap();
        assert!(st.slot_present(pid));
        st.release_slot(pid);
        assert!(!st.slot_present(pid));
        // The rest of the entry survives for the next tenant.
        assert_eq!(
            st.task_dirs[pid].entries[USER_PDE_INDEX] & ADDR_MASK,
            user_window_phys(pid)
        );
    }

    #[test]
    fn offscreen_frames_sit_above_the_video_page() {
        let mut st = PagingState::new();
        let mut frames = [0u32; OFFSCREEN_FRAMES];
        for (i, frame) in frames.iter_mut().enumerate() {
            let mut got = None;
            for (slot, used) in st.offscreen_used.iter_mut().enumerate() {
                if !*used {
                    *used = true;
                    got = Some(VIDEO_PHYS + ((slot + 1) * PAGE_SIZE) as u32);
                    break;
                }
            }
            *frame = got.unwrap();
            assert_eq!(*frame, VIDEO_PHYS + ((i + 1) * PAGE_SIZE) as u32);
        }
        assert!(st.offscreen_used.iter().all(|&u| u));
    }
}
