//! Interrupt descriptor table.
//!
//! Seventeen CPU exception vectors (0-16) and the sixteen remapped hardware
//! IRQ vectors (0x20-0x2F) are ring-0 interrupt gates; the system-call
//! vector 0x80 is a DPL-3 trap gate so user code may raise it (and so the
//! interrupt flag survives into the handler). A gate's present bit is
//! published only after the rest of its descriptor bytes are written.
//!
//! Exception handlers report a diagnostic and halt the CPU; there is no
//! recovery path. The page-fault handler additionally reports CR2. Vector 15
//! returns normally; the self-test battery raises it on purpose.

use core::arch::asm;

use super::gdt;
use super::interrupts::without_interrupts;

const IDT_ENTRIES: usize = 256;
const GATE_TYPE_INTERRUPT: u8 = 0x0E;
const GATE_TYPE_TRAP: u8 = 0x0F;
const GATE_PRESENT: u8 = 0x80;

/// System-call vector.
pub const SYSCALL_VECTOR: usize = 0x80;
/// First hardware IRQ vector after remapping.
pub const IRQ_BASE: usize = 0x20;

#[derive(Clone, Copy)]
#[repr(C)]
struct GateDescriptor {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl GateDescriptor {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }
}

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

static mut IDT: [GateDescriptor; IDT_ENTRIES] = [GateDescriptor::missing(); IDT_ENTRIES];

/// Write one gate. The descriptor lands with present=0 first; the present
/// bit is stored with a second volatile write once the rest is in place.
fn install_gate(vector: usize, handler: extern "C" fn(), gate_type: u8, dpl: u8) {
    let offset = handler as usize as u32;
    let attr = gate_type | (dpl << 5);
    let desc = GateDescriptor {
        offset_low: (offset & 0xFFFF) as u16,
        selector: gdt::KERNEL_CS as u16,
        zero: 0,
        type_attr: attr,
        offset_high: (offset >> 16) as u16,
    };
    // SAFETY: callers run with interrupts disabled; the two volatile stores
    // give the CPU either a non-present gate or a fully written one.
    unsafe {
        let slot = core::ptr::addr_of_mut!(IDT[vector]);
        core::ptr::write_volatile(slot, desc);
        let type_attr = core::ptr::addr_of_mut!((*slot).type_attr);
        core::ptr::write_volatile(type_attr, attr | GATE_PRESENT);
    }
}

/// Register a ring-0 interrupt gate (hardware IRQ path).
pub fn register_interrupt(vector: usize, stub: extern "C" fn()) {
    without_interrupts(|| install_gate(vector, stub, GATE_TYPE_INTERRUPT, 0));
}

/// Register a trap gate reachable from privilege level `dpl`.
pub fn register_trap(vector: usize, stub: extern "C" fn(), dpl: u8) {
    without_interrupts(|| install_gate(vector, stub, GATE_TYPE_TRAP, dpl));
}

fn load() {
    // SAFETY: only the table's address is taken; the pointer structure
    // describes a static table that lives for the rest of the kernel's
    // life.
    unsafe {
        let ptr = DescriptorTablePointer {
            limit: (core::mem::size_of::<[GateDescriptor; IDT_ENTRIES]>() - 1) as u16,
            base: core::ptr::addr_of!(IDT) as u32,
        };
        asm!(
            "lidt [{}]",
            in(reg) core::ptr::addr_of!(ptr),
            options(readonly, nostack, preserves_flags)
        );
    }
}

fn read_cr2() -> u32 {
    let addr: u32;
    // SAFETY: reading CR2 has no side effects.
    unsafe {
        asm!("mov {}, cr2", out(reg) addr, options(nomem, nostack, preserves_flags));
    }
    addr
}

/// Uniform ISR wrapper: save the integer register file, clear the direction
/// flag for the Rust handler, restore and iret.
macro_rules! isr_entry {
    ($stub:ident, $handler:path) => {
        #[unsafe(naked)]
        pub extern "C" fn $stub() {
            core::arch::naked_asm!(
                "pushad",
                "cld",
                "call {handler}",
                "popad",
                "iretd",
                handler = sym $handler,
            )
        }
    };
}
pub(crate) use isr_entry;

macro_rules! fatal_exception {
    ($stub:ident, $handler:ident, $msg:expr) => {
        extern "C" fn $handler() {
            super::interrupts::disable();
            log::error!("fatal exception: {}", $msg);
            crate::println!("EXCEPTION: {}", $msg);
            loop {
                core::hint::spin_loop();
            }
        }
        isr_entry!($stub, $handler);
    };
}

fatal_exception!(divide_error_stub, divide_error, "divide error");
fatal_exception!(debug_stub, debug_trap, "debug trap");
fatal_exception!(nmi_stub, nmi, "non-maskable interrupt");
fatal_exception!(breakpoint_stub, breakpoint, "breakpoint");
fatal_exception!(overflow_stub, overflow, "overflow");
fatal_exception!(bound_range_stub, bound_range, "bound range exceeded");
fatal_exception!(invalid_opcode_stub, invalid_opcode, "invalid opcode");
fatal_exception!(no_device_stub, no_device, "device not available");
fatal_exception!(double_fault_stub, double_fault, "double fault");
fatal_exception!(coproc_overrun_stub, coproc_overrun, "coprocessor overrun");
fatal_exception!(invalid_tss_stub, invalid_tss, "invalid TSS");
fatal_exception!(no_segment_stub, no_segment, "segment not present");
fatal_exception!(stack_fault_stub, stack_fault, "stack-segment fault");
fatal_exception!(protection_stub, protection, "general protection fault");
fatal_exception!(fpu_error_stub, fpu_error, "x87 floating-point error");

extern "C" fn page_fault() {
    super::interrupts::disable();
    let addr = read_cr2();
    log::error!("fatal exception: page fault at {:#010x}", addr);
    crate::println!("EXCEPTION: page fault");
    crate::println!("faulting address: {:#010x}", addr);
    loop {
        core::hint::spin_loop();
    }
}
isr_entry!(page_fault_stub, page_fault);

/// Vector 15 is repurposed as the assertion vector; unlike every other
/// exception it returns, so a test raising it keeps running.
extern "C" fn assertion() {
    log::warn!("assertion vector raised");
    crate::println!("ASSERTION FAILED");
}
isr_entry!(assertion_stub, assertion);

/// Any IRQ that fires without a driver having claimed its vector.
extern "C" fn unexpected_irq() {
    super::interrupts::disable();
    log::error!("unclaimed hardware interrupt");
    crate::println!("UNHANDLED HARDWARE INTERRUPT");
    loop {
        core::hint::spin_loop();
    }
}
isr_entry!(unexpected_irq_stub, unexpected_irq);

/// System-call trampoline: eax carries the call number, ebx/ecx/edx the
/// arguments. Everything except the accumulator is preserved; the
/// dispatcher's return value rides back to user mode in eax.
#[unsafe(naked)]
extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        "push ebp",
        "push edi",
        "push esi",
        "push ebx",
        "push ecx",
        "push edx",
        "cld",
        "push edx",
        "push ecx",
        "push ebx",
        "push eax",
        "call {dispatch}",
        "add esp, 16",
        "pop edx",
        "pop ecx",
        "pop ebx",
        "pop esi",
        "pop edi",
        "pop ebp",
        "iretd",
        dispatch = sym crate::syscall::syscall_dispatch,
    )
}

/// Install the exception vectors, default IRQ gates and the syscall gate,
/// then point IDTR at the table.
pub fn init() {
    let exceptions: [extern "C" fn(); 17] = [
        divide_error_stub,
        debug_stub,
        nmi_stub,
        breakpoint_stub,
        overflow_stub,
        bound_range_stub,
        invalid_opcode_stub,
        no_device_stub,
        double_fault_stub,
        coproc_overrun_stub,
        invalid_tss_stub,
        no_segment_stub,
        stack_fault_stub,
        protection_stub,
        page_fault_stub,
        assertion_stub,
        fpu_error_stub,
    ];
    without_interrupts(|| {
        for (vector, stub) in exceptions.iter().enumerate() {
            install_gate(vector, *stub, GATE_TYPE_INTERRUPT, 0);
        }
        for vector in IRQ_BASE..IRQ_BASE + 16 {
            install_gate(vector, unexpected_irq_stub, GATE_TYPE_INTERRUPT, 0);
        }
        install_gate(SYSCALL_VECTOR, syscall_entry, GATE_TYPE_TRAP, 3);
        load();
    });
    log::info!("interrupt table loaded; syscall gate at {:#x}", SYSCALL_VECTOR);
}
