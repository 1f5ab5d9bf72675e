//! Kernel stack switching.
//!
//! A suspended task is exactly a `{esp, ebp}` pair: everything else it needs
//! is already on its own kernel stack (interrupted-frame registers, the IRQ
//! or trap frame, locals). Three stubs move the CPU between such records:
//!
//! * [`switch`] is the scheduler path: park the outgoing task at the call
//!   site, continue as the incoming one at *its* parked call site.
//! * [`save`] / [`resume`] are the `execute`/`halt` pairing: `save` parks
//!   the parent inside `execute` and returns 0; when the child halts,
//!   `resume` reenters the parent at that same call site with a nonzero
//!   value.
//! * [`enter_user`] builds the five-word iret frame and drops to ring 3.
//!
//! All three resume points look identical to the compiler (a function call
//! returning), so no register state beyond esp/ebp needs saving: the cdecl
//! ABI makes the caller treat eax/ecx/edx as clobbered anyway.

/// Saved kernel stack pointers of a suspended task.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub esp: u32,
    pub ebp: u32,
}

impl Context {
    pub const fn empty() -> Self {
        Self { esp: 0, ebp: 0 }
    }
}

/// Park the current task in `save` and continue as the one parked in `load`.
///
/// Returns (with an unspecified nonzero value in eax) when something later
/// switches back into `save`.
///
/// # Safety
/// `save` must stay valid until this task runs again; `load` must hold
/// pointers captured by a previous [`switch`] or [`save`] on a live kernel
/// stack. Interrupts must be disabled across the call.
#[cfg(target_arch = "x86")]
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_save: *mut Context, _load: *const Context) {
    core::arch::naked_asm!(
        "mov eax, [esp + 4]",
        "mov ecx, [esp + 8]",
        "mov [eax], esp",
        "mov [eax + 4], ebp",
        "mov esp, [ecx]",
        "mov ebp, [ecx + 4]",
        "mov eax, 1",
        "ret",
    )
}

/// Record the current kernel stack in `ctx`.
///
/// Returns 0 on the recording pass; returns the value handed to [`resume`]
/// (always nonzero) when reentered.
///
/// # Safety
/// The stack frame containing the call must remain untouched until the
/// matching [`resume`] or [`switch`] into `ctx`.
#[cfg(target_arch = "x86")]
#[unsafe(naked)]
pub unsafe extern "C" fn save(_ctx: *mut Context) -> u32 {
    core::arch::naked_asm!(
        "mov eax, [esp + 4]",
        "mov [eax], esp",
        "mov [eax + 4], ebp",
        "xor eax, eax",
        "ret",
    )
}

/// Abandon the current stack and reenter the task parked in `ctx`, making
/// its [`save`] call return `val`.
///
/// # Safety
/// `ctx` must have been filled by [`save`] on a still-intact kernel stack.
/// `val` must be nonzero or the reentered task cannot tell it was resumed.
/// Interrupts must be disabled across the call.
#[cfg(target_arch = "x86")]
#[unsafe(naked)]
pub unsafe extern "C" fn resume(_ctx: *const Context, _val: u32) -> ! {
    core::arch::naked_asm!(
        "mov eax, [esp + 4]",
        "mov ecx, [esp + 8]",
        "mov esp, [eax]",
        "mov ebp, [eax + 4]",
        "mov eax, ecx",
        "ret",
    )
}

/// Transition to ring 3 at `entry` with the user stack at `user_esp`.
///
/// Pushes user SS:ESP, EFLAGS with IF set, user CS:EIP, loads the user data
/// segments and executes `iretd`. Never returns.
///
/// # Safety
/// The user window must be mapped in the current address space and `entry`
/// must point at loaded code inside it.
#[cfg(target_arch = "x86")]
#[unsafe(naked)]
pub unsafe extern "C" fn enter_user(_entry: u32, _user_esp: u32) -> ! {
    core::arch::naked_asm!(
        "mov ecx, [esp + 4]",
        "mov edx, [esp + 8]",
        "mov ax, {uds}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "push {uds}",
        "push edx",
        "pushfd",
        "pop eax",
        "or eax, 0x200",
        "push eax",
        "push {ucs}",
        "push ecx",
        "iretd",
        uds = const super::gdt::USER_DS,
        ucs = const super::gdt::USER_CS,
    )
}

// Host stubs: the process and scheduler logic compiles (and is partially
// unit tested) on the build host, where these paths are never taken.

#[cfg(not(target_arch = "x86"))]
#[allow(clippy::missing_safety_doc)]
pub unsafe fn switch(_save: *mut Context, _load: *const Context) {}

#[cfg(not(target_arch = "x86"))]
#[allow(clippy::missing_safety_doc)]
pub unsafe fn save(_ctx: *mut Context) -> u32 {
    0
}

#[cfg(not(target_arch = "x86"))]
#[allow(clippy::missing_safety_doc)]
pub unsafe fn resume(_ctx: *const Context, _val: u32) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(not(target_arch = "x86"))]
#[allow(clippy::missing_safety_doc)]
pub unsafe fn enter_user(_entry: u32, _user_esp: u32) -> ! {
    loop {
        core::hint::spin_loop();
    }
}
