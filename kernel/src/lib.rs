//! Borealis kernel.
//!
//! A small preemptive multitasking kernel for single-CPU 32-bit x86
//! protected mode: per-task paged address spaces over a shared frame pool,
//! a six-slot process table behind an `int 0x80` system-call surface, a
//! 100 Hz round-robin scheduler, three virtual terminals with a
//! line-disciplined PS/2 keyboard pipeline, and a read-only block file
//! system that backs program loading.
//!
//! The crate builds two ways: as a `staticlib` linked under the multiboot
//! boot shim (which owns the GDT, the TSS descriptor and the entry jump
//! into [`kernel_main`]), and as a host `rlib` whose hardware-independent
//! subsystems run under the standard test harness.

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
mod print;

pub mod arch;
pub mod console;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod logger;
pub mod mm;
pub mod process;
pub mod sched;
pub mod syscall;

/// Kernel entry point.
///
/// The boot shim calls this with interrupts and paging off, the kernel
/// image in the 4-8 MiB region, and the file-system image loaded as a
/// boot module at `fs_image_addr` (below the 8 MiB boundary, so it stays
/// reachable once paging is on).
#[cfg(target_arch = "x86")]
#[no_mangle]
pub extern "C" fn kernel_main(fs_image_addr: u32, fs_image_len: u32) -> ! {
    logger::init();
    log::info!("borealis {} booting", env!("CARGO_PKG_VERSION"));

    arch::x86::idt::init();
    drivers::pic::init();
    if mm::paging::init().is_err() {
        panic!("CPU lacks PSE; cannot build the address space");
    }

    console::init();
    drivers::keyboard::init();
    drivers::rtc::init();

    // SAFETY: the shim guarantees the module stays resident and unaliased
    // at this address for the life of the kernel.
    let image = unsafe {
        core::slice::from_raw_parts(fs_image_addr as usize as *const u8, fs_image_len as usize)
    };
    if fs::bind(image).is_err() {
        panic!("unusable file system image at {:#010x}", fs_image_addr);
    }

    println!("borealis kernel ready");

    // Preemption starts here; the first three ticks spawn the shells.
    drivers::pit::init();
    arch::x86::interrupts::enable();
    loop {
        arch::halt();
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    arch::x86::interrupts::disable();
    log::error!("kernel panic: {}", info);
    #[cfg(target_arch = "x86")]
    println!("KERNEL PANIC: {}", info);
    loop {
        arch::halt();
    }
}
