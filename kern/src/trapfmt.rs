// Printing of saved trap frames for the console.

use core::fmt::{self, Write};
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::traps::{trapname, FaultErr, T_PGFLT};
use crate::x86::{Machine, PushRegs, Trapframe};

// The last frame trap() dispatched. Only compared against, never
// dereferenced: print_trapframe uses it to tell a frame that just
// trapped (so %cr2 still means something) from an old saved one.
pub struct LastTf(AtomicPtr<Trapframe>);

impl LastTf {
    pub const fn new() -> LastTf {
        LastTf(AtomicPtr::new(ptr::null_mut()))
    }

    pub fn set(&self, tf: &Trapframe) {
        self.0
            .store(tf as *const Trapframe as *mut Trapframe, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(ptr::null_mut(), Ordering::Release);
    }

    pub fn is_clear(&self) -> bool {
        self.0.load(Ordering::Acquire).is_null()
    }

    pub fn is(&self, tf: &Trapframe) -> bool {
        ptr::eq(self.0.load(Ordering::Acquire), tf)
    }
}

impl Default for LastTf {
    fn default() -> Self {
        Self::new()
    }
}

// cr2 is printed only for page faults, and only when the caller knows
// the register still belongs to this frame.
pub fn print_trapframe<W: Write>(w: &mut W, tf: &Trapframe, cr2: Option<u32>) -> fmt::Result {
    writeln!(w, "TRAP frame at {:p}", tf)?;
    print_regs(w, &tf.regs)?;
    writeln!(w, "  es   0x----{:04x}", tf.es)?;
    writeln!(w, "  ds   0x----{:04x}", tf.ds)?;
    writeln!(w, "  trap 0x{:08x} {}", tf.trapno, trapname(tf.trapno as usize))?;
    let pgflt = tf.trapno as usize == T_PGFLT;
    if let (true, Some(cr2)) = (pgflt, cr2) {
        writeln!(w, "  cr2  0x{:08x}", cr2)?;
    }
    write!(w, "  err  0x{:08x}", tf.err)?;
    // Page faults get the error code spelled out.
    if pgflt {
        let err = FaultErr::from_bits_truncate(tf.err);
        writeln!(
            w,
            " [{}, {}, {}]",
            if err.contains(FaultErr::U) { "user" } else { "kernel" },
            if err.contains(FaultErr::WR) { "write" } else { "read" },
            if err.contains(FaultErr::PR) { "protection" } else { "not-present" },
        )?;
    } else {
        writeln!(w)?;
    }
    writeln!(w, "  eip  0x{:08x}", tf.eip)?;
    writeln!(w, "  cs   0x----{:04x}", tf.cs)?;
    writeln!(w, "  flag 0x{:08x}", tf.eflags)?;
    writeln!(w, "  esp  0x{:08x}", tf.esp)?;
    writeln!(w, "  ss   0x----{:04x}", tf.ss)
}

pub fn print_regs<W: Write>(w: &mut W, regs: &PushRegs) -> fmt::Result {
    writeln!(w, "  edi  0x{:08x}", regs.edi)?;
    writeln!(w, "  esi  0x{:08x}", regs.esi)?;
    writeln!(w, "  ebp  0x{:08x}", regs.ebp)?;
    writeln!(w, "  oesp 0x{:08x}", regs.oesp)?;
    writeln!(w, "  ebx  0x{:08x}", regs.ebx)?;
    writeln!(w, "  edx  0x{:08x}", regs.edx)?;
    writeln!(w, "  ecx  0x{:08x}", regs.ecx)?;
    writeln!(w, "  eax  0x{:08x}", regs.eax)
}

// print_trapframe, reading %cr2 if tf is the frame being handled.
pub fn print_current<W: Write, M: Machine>(w: &mut W, hw: &M, last: &LastTf, tf: &Trapframe) {
    let cr2 = if last.is(tf) { Some(hw.rcr2()) } else { None };
    let _ = print_trapframe(w, tf, cr2);
}
