// x86 trap and interrupt constants.

use bitflags::bitflags;

// Processor-defined:
pub const T_DIVIDE: usize = 0; // divide error
pub const T_DEBUG: usize = 1; // debug exception
pub const T_NMI: usize = 2; // non-maskable interrupt
pub const T_BRKPT: usize = 3; // breakpoint
pub const T_OFLOW: usize = 4; // overflow
pub const T_BOUND: usize = 5; // bounds check
pub const T_ILLOP: usize = 6; // illegal opcode
pub const T_DEVICE: usize = 7; // device not available
pub const T_DBLFLT: usize = 8; // double fault
                               // #define T_COPROC      9      // reserved (not used since 486)
pub const T_TSS: usize = 10; // invalid task switch segment
pub const T_SEGNP: usize = 11; // segment not present
pub const T_STACK: usize = 12; // stack exception
pub const T_GPFLT: usize = 13; // general protection fault
pub const T_PGFLT: usize = 14; // page fault
pub const T_RES: usize = 15; // reserved
pub const T_FPERR: usize = 16; // floating point error
pub const T_ALIGN: usize = 17; // aligment check
pub const T_MCHK: usize = 18; // machine check
pub const T_SIMDERR: usize = 19; // SIMD floating point error

// These are arbitrarily chosen, but with care not to overlap
// processor defined exceptions or interrupt vectors.
pub const T_SYSCALL: usize = 48; // system call

pub const IRQ_OFFSET: usize = 32; // IRQ 0 corresponds to int IRQ_OFFSET

// Hardware IRQ numbers. We receive these as (IRQ_OFFSET+IRQ_WHATEVER)
pub const IRQ_TIMER: usize = 0;
pub const IRQ_KBD: usize = 1;
pub const IRQ_SERIAL: usize = 4;
pub const IRQ_SPURIOUS: usize = 7;
pub const IRQ_CLOCK: usize = 8; // real-time clock

bitflags! {
    // Page fault error code bits pushed by the processor.
    pub struct FaultErr: u32 {
        const PR = 0x1; // protection violation (else page not present)
        const WR = 0x2; // caused by a write
        const U = 0x4; // fault occurred in user mode
    }
}

const EXCNAMES: [&str; 20] = [
    "Divide error",
    "Debug",
    "Non-Maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "BOUND Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack Fault",
    "General Protection",
    "Page Fault",
    "(unknown trap)",
    "x87 FPU Floating-Point Error",
    "Alignment Check",
    "Machine-Check",
    "SIMD Floating-Point Exception",
];

pub fn trapname(trapno: usize) -> &'static str {
    if let Some(name) = EXCNAMES.get(trapno) {
        return name;
    }
    if trapno == T_SYSCALL {
        return "System call";
    }
    if (IRQ_OFFSET..IRQ_OFFSET + 16).contains(&trapno) {
        return "Hardware Interrupt";
    }
    "(unknown trap)"
}
