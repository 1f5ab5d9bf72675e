//! Segment selector constants and the task-state segment.
//!
//! The GDT itself is installed by the boot shim; its TSS descriptor must
//! point at [`tss_address`]. At runtime the kernel touches exactly one TSS
//! field: `esp0`, retargeted at every task switch so ring-3 -> ring-0
//! transitions land on the incoming task's kernel stack.

/// Kernel code segment selector.
pub const KERNEL_CS: u32 = 0x10;
/// Kernel data segment selector.
pub const KERNEL_DS: u32 = 0x18;
/// User code segment selector (RPL 3).
pub const USER_CS: u32 = 0x23;
/// User data segment selector (RPL 3).
pub const USER_DS: u32 = 0x2B;

/// The 32-bit TSS layout. Only `esp0`/`ss0` are ever meaningful here; the
/// rest exists so the hardware finds a full-sized segment.
#[repr(C, packed)]
struct TaskStateSegment {
    prev_task_link: u32,
    esp0: u32,
    ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt_selector: u32,
    trap_iomap: u32,
}

static mut TSS: TaskStateSegment = TaskStateSegment {
    prev_task_link: 0,
    esp0: 0,
    ss0: KERNEL_DS,
    esp1: 0,
    ss1: 0,
    esp2: 0,
    ss2: 0,
    cr3: 0,
    eip: 0,
    eflags: 0,
    eax: 0,
    ecx: 0,
    edx: 0,
    ebx: 0,
    esp: 0,
    ebp: 0,
    esi: 0,
    edi: 0,
    es: 0,
    cs: 0,
    ss: 0,
    ds: 0,
    fs: 0,
    gs: 0,
    ldt_selector: 0,
    trap_iomap: 0,
};

/// Address of the TSS, for the boot shim's GDT descriptor.
pub fn tss_address() -> usize {
    // SAFETY: only the address is taken, never a reference.
    unsafe { core::ptr::addr_of!(TSS) as usize }
}

/// Point the TSS ring-0 stack at `top`.
///
/// Called by `execute`, `halt` and the scheduler tick, always with
/// interrupts disabled.
pub fn set_kernel_stack(top: u32) {
    // SAFETY: single CPU, callers hold interrupts disabled, and the CPU only
    // reads esp0 during a privilege transition, which cannot overlap a
    // kernel-mode store.
    unsafe {
        let esp0 = core::ptr::addr_of_mut!(TSS.esp0);
        core::ptr::write_volatile(esp0, top);
    }
}
