// Routines to let the trap code use special x86 instructions,
// and the register layouts the trap entry stubs build.

#[cfg(target_arch = "x86")]
use core::arch::asm;

use crate::mmu::Pseudodesc;

// The privileged instructions the trap path executes. The kernel binds
// these to the real processor; tests record them instead.
pub trait Machine {
    fn cld(&self);
    fn read_eflags(&self) -> u32;
    fn rcr2(&self) -> u32;
    fn ltr(&self, sel: u16);
    fn lidt(&self, pd: &Pseudodesc);
    // Index of the executing CPU, below NCPU.
    fn cpunum(&self) -> usize;
}

#[cfg(target_arch = "x86")]
#[inline]
pub unsafe fn cld() {
    asm!("cld", options(nomem, nostack));
}

#[cfg(target_arch = "x86")]
#[inline]
pub unsafe fn read_eflags() -> u32 {
    let eflags: u32;
    asm!("pushfd", "pop {}", out(reg) eflags, options(preserves_flags));
    eflags
}

#[cfg(target_arch = "x86")]
#[inline]
pub unsafe fn rcr2() -> u32 {
    let val: u32;
    asm!("mov {}, cr2", out(reg) val, options(nomem, nostack, preserves_flags));
    val
}

#[cfg(target_arch = "x86")]
#[inline]
pub unsafe fn ltr(sel: u16) {
    asm!("ltr {0:x}", in(reg) sel, options(nostack, preserves_flags));
}

#[cfg(target_arch = "x86")]
#[inline]
pub unsafe fn lidt(pd: &Pseudodesc) {
    asm!("lidt [{}]", in(reg) pd as *const Pseudodesc, options(readonly, nostack, preserves_flags));
}

#[cfg(target_arch = "x86")]
#[inline]
pub unsafe fn hlt() {
    asm!("hlt", options(nomem, nostack));
}

// Registers as pushed by pushal
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct PushRegs {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub oesp: u32, // useless & ignored
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

// Layout of the trap frame built on the stack by the
// hardware and by trapentry.S, and passed to trap().
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Trapframe {
    pub regs: PushRegs,
    pub es: u16,
    pub padding1: u16,
    pub ds: u16,
    pub padding2: u16,
    pub trapno: u32,

    // below here defined by x86 hardware
    pub err: u32,
    pub eip: u32,
    pub cs: u16,
    pub padding3: u16,
    pub eflags: u32,

    // below here only when crossing rings, such as from user to kernel
    pub esp: u32,
    pub ss: u16,
    pub padding4: u16,
}

impl Trapframe {
    // The low two bits of the saved %cs are the privilege level the
    // trap interrupted.
    pub fn from_kernel(&self) -> bool {
        self.cs & 3 == 0
    }
}

// Frame pushed on the user exception stack for a page fault upcall.
// The user-level upcall stub reads it with fixed offsets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct UTrapframe {
    // information about the fault
    pub fault_va: u32, // va for T_PGFLT, 0 otherwise
    pub err: u32,
    // trap-time return state
    pub regs: PushRegs,
    pub eip: u32,
    pub eflags: u32,
    // the trap-time stack to return to
    pub esp: u32,
}

impl UTrapframe {
    pub fn as_bytes(&self) -> &[u8] {
        // Plain u32 fields, no padding.
        unsafe {
            core::slice::from_raw_parts(
                self as *const UTrapframe as *const u8,
                core::mem::size_of::<UTrapframe>(),
            )
        }
    }
}
