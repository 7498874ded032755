// Trap setup and the path every trap takes through the kernel.

use core::fmt::{self, Write};
use core::mem::size_of;

use log::{debug, info};
use spin::Mutex;

use crate::console::{cprint, PanicLatch};
use crate::env::{EnvStatus, EnvTable};
use crate::memlayout::percpu_kstacktop;
use crate::mmu::*;
use crate::param::{NCPU, VSYS_GETTIME};
use crate::pgfault::{page_fault_handler, UserMem};
use crate::trapfmt::{print_current, LastTf};
use crate::traps::*;
use crate::x86::{Machine, Trapframe};

// Number of GDT entries: the fixed segments, then one TSS per CPU.
pub const NSEGS: usize = (GD_TSS0 >> 3) as usize + NCPU;

// Entry stub addresses from trapentry.S, indexed by trap number.
pub type Vectors = [u32; 256];

// Interrupt descriptor table (shared by all CPUs).
#[repr(C, align(8))]
pub struct Idt {
    gates: [Gatedesc; 256],
}

// Vectors bound at boot and the privilege needed to raise them with int.
const BOOT_GATES: [(usize, u8); 21] = [
    (T_DIVIDE, 0),
    (T_DEBUG, 0),
    (T_NMI, 0),
    (T_BRKPT, DPL_USER),
    (T_OFLOW, 0),
    (T_BOUND, 0),
    (T_ILLOP, 0),
    (T_DEVICE, 0),
    (T_DBLFLT, 0),
    (T_TSS, 0),
    (T_SEGNP, 0),
    (T_STACK, 0),
    (T_GPFLT, 0),
    (T_PGFLT, 0),
    (T_FPERR, 0),
    (T_ALIGN, 0),
    (T_MCHK, 0),
    (T_SIMDERR, 0),
    (T_SYSCALL, DPL_USER),
    (IRQ_OFFSET + IRQ_KBD, 0),
    (IRQ_OFFSET + IRQ_SERIAL, 0),
];

impl Idt {
    pub const fn new() -> Idt {
        Idt {
            gates: [Gatedesc::zero(); 256],
        }
    }

    pub fn gate(&self, trapno: usize) -> &Gatedesc {
        &self.gates[trapno]
    }

    // Every gate is an interrupt gate, so FL_IF is clear on entry to trap().
    pub fn build(&mut self, vectors: &Vectors) {
        for &(trapno, dpl) in BOOT_GATES.iter() {
            self.gates[trapno].setgate(false, GD_KT, vectors[trapno], dpl);
        }
    }

    pub fn set_clock(&mut self, entry: u32) {
        self.gates[IRQ_OFFSET + IRQ_CLOCK].setgate(false, GD_KT, entry, 0);
    }

    pub fn pseudodesc(&self) -> Pseudodesc {
        Pseudodesc {
            pd_lim: (size_of::<[Gatedesc; 256]>() - 1) as u16,
            pd_base: self.gates.as_ptr() as usize as u32,
        }
    }
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

static IDT: Mutex<Idt> = Mutex::new(Idt::new());

#[allow(clippy::declare_interior_mutable_const)]
const TS_INIT: Mutex<Taskstate> = Mutex::new(Taskstate::zero());
static TS: [Mutex<Taskstate>; NCPU] = [TS_INIT; NCPU];

pub static LAST_TF: LastTf = LastTf::new();

pub fn trap_init<M: Machine>(hw: &M, vectors: &Vectors, gdt: &mut [Segdesc]) {
    IDT.lock().build(vectors);
    // Per-CPU setup
    trap_init_percpu(hw, gdt);
}

// Initialize and load the per-CPU TSS and IDT
pub fn trap_init_percpu<M: Machine>(hw: &M, gdt: &mut [Segdesc]) {
    let i = hw.cpunum();
    let mut ts = TS[i].lock();
    let idt = IDT.lock();
    load_percpu(hw, i, &mut ts, gdt, &idt);
}

// Setup a TSS so that we get the right stack when we trap to the kernel,
// put it in CPU i's GDT slot, and load the TSS selector and the IDT.
// Rewriting the descriptor also clears its busy bit, so ltr can be
// repeated on the same CPU.
pub fn load_percpu<M: Machine>(
    hw: &M,
    i: usize,
    ts: &mut Taskstate,
    gdt: &mut [Segdesc],
    idt: &Idt,
) {
    ts.esp0 = percpu_kstacktop(i);
    ts.ss0 = GD_KD;
    ts.iomb = size_of::<Taskstate>() as u16;

    let sel = GD_TSS0 + ((i as u16) << 3);
    let sd = &mut gdt[(sel >> 3) as usize];
    *sd = SEG16(
        STS_T32A,
        ts as *mut Taskstate as usize as u32,
        size_of::<Taskstate>() as u32,
        0,
    );
    sd.set_s(0);

    hw.ltr(sel);
    hw.lidt(&idt.pseudodesc());
}

pub fn clock_idt_init<M: Machine>(hw: &M, entry: u32) {
    let mut idt = IDT.lock();
    idt.set_clock(entry);
    hw.lidt(&idt.pseudodesc());
}

// Errors that stop the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapError {
    InterruptsEnabled,
    NoCurrentEnv,
    KernelPageFault { va: u32, eip: u32 },
    UnhandledKernelTrap { trapno: u32 },
}

impl fmt::Display for TrapError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrapError::InterruptsEnabled => write!(f, "trap: interrupts enabled on entry"),
            TrapError::NoCurrentEnv => write!(f, "trap: no current environment"),
            TrapError::KernelPageFault { va, eip } => {
                write!(f, "page fault in kernel mode: va {:08x} ip {:08x}", va, eip)
            }
            TrapError::UnhandledKernelTrap { trapno } => write!(
                f,
                "unhandled trap in kernel: {} ({})",
                trapno,
                trapname(*trapno as usize)
            ),
        }
    }
}

// What the CPU does once trap() is finished with the current environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Resume,
    Yield,
    Halt,
}

// Outcome of one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    // Handled; trap() decides from the environment's status.
    Done,
    Resume,
    Yield,
}

pub trait Syscall {
    fn syscall(&mut self, num: u32, a1: u32, a2: u32, a3: u32, a4: u32, a5: u32) -> i32;
}

pub trait Devices {
    fn kbd_intr(&mut self);
    fn serial_intr(&mut self);
    // Acknowledges the RTC interrupt; returns status register C.
    fn rtc_check_status(&mut self) -> u8;
    fn pic_send_eoi(&mut self, irq: u8);
    fn gettime(&mut self) -> i32;
    // Store into the vsyscall page shared read-only with user space.
    fn vsys_write(&mut self, slot: usize, val: i32);
}

pub trait Monitor {
    fn monitor(&mut self, tf: &mut Trapframe);
}

// Everything outside this crate the trap path calls, plus the console.
pub trait Services: Syscall + Devices + Monitor + UserMem + Write {}

impl<T: Syscall + Devices + Monitor + UserMem + Write> Services for T {}

pub struct Trap<'a, M, E, S> {
    pub hw: &'a M,
    pub envs: &'a mut E,
    pub sys: &'a mut S,
    pub panicked: &'a PanicLatch,
    pub last_tf: &'a LastTf,
}

fn curtf<E: EnvTable>(envs: &mut E) -> Result<&mut Trapframe, TrapError> {
    envs.curenv()
        .map(|e| &mut e.env_tf)
        .ok_or(TrapError::NoCurrentEnv)
}

impl<'a, M: Machine, E: EnvTable, S: Services> Trap<'a, M, E, S> {
    pub fn trap(&mut self, tf: &Trapframe) -> Result<Disposition, TrapError> {
        // User code may leave DF set.
        self.hw.cld();

        // Another CPU has panicked.
        if self.panicked.is_set() {
            return Ok(Disposition::Halt);
        }

        // All gates are interrupt gates, so IF must be clear here.
        if self.hw.read_eflags() & FL_IF != 0 {
            return Err(TrapError::InterruptsEnabled);
        }

        debug!("Incoming TRAP frame at {:p}", tf);

        let env = self.envs.curenv().ok_or(TrapError::NoCurrentEnv)?;

        // Reclaim a zombie before touching its frame.
        if env.env_status == EnvStatus::Dying {
            info!("[{}] freeing dying env", env.env_id);
            self.last_tf.clear();
            self.envs.free_curenv();
            return Ok(Disposition::Yield);
        }

        // Resuming restarts from env_tf; the stack copy is dead after this.
        env.env_tf = *tf;
        self.last_tf.set(&env.env_tf);

        match self.trap_dispatch()? {
            Dispatch::Resume => return Ok(Disposition::Resume),
            Dispatch::Yield => return Ok(Disposition::Yield),
            Dispatch::Done => {}
        }

        // No handler chose; go back to the environment if it can still run.
        match self.envs.curenv() {
            Some(env) if env.env_status == EnvStatus::Running => Ok(Disposition::Resume),
            _ => Ok(Disposition::Yield),
        }
    }

    // Handle the trap saved in the current environment's env_tf.
    pub fn trap_dispatch(&mut self) -> Result<Dispatch, TrapError> {
        let trapno = curtf(&mut *self.envs)?.trapno as usize;

        if trapno == T_SYSCALL {
            let tf = curtf(&mut *self.envs)?;
            let r = tf.regs;
            tf.regs.eax = self.sys.syscall(r.eax, r.edx, r.ecx, r.ebx, r.edi, r.esi) as u32;
            return Ok(Dispatch::Done);
        }

        if trapno == T_BRKPT {
            self.sys.monitor(curtf(&mut *self.envs)?);
            return Ok(Dispatch::Done);
        }

        if trapno == T_PGFLT {
            return page_fault_handler(self.hw, &mut *self.envs, &mut *self.sys, self.last_tf);
        }

        // Line noise. Report it and carry on.
        if trapno == IRQ_OFFSET + IRQ_SPURIOUS {
            let tf = curtf(&mut *self.envs)?;
            cprint(
                &mut *self.sys,
                format_args!("Spurious interrupt on irq {}\n", IRQ_SPURIOUS),
            );
            print_current(&mut *self.sys, self.hw, self.last_tf, tf);
            return Ok(Dispatch::Done);
        }

        // RTC tick: acknowledge, publish the time, reschedule.
        if trapno == IRQ_OFFSET + IRQ_CLOCK {
            self.sys.rtc_check_status();
            self.sys.pic_send_eoi(IRQ_CLOCK as u8);
            let now = self.sys.gettime();
            self.sys.vsys_write(VSYS_GETTIME, now);
            return Ok(Dispatch::Yield);
        }

        if trapno == IRQ_OFFSET + IRQ_KBD {
            self.sys.kbd_intr();
            return Ok(Dispatch::Done);
        }

        if trapno == IRQ_OFFSET + IRQ_SERIAL {
            self.sys.serial_intr();
            return Ok(Dispatch::Done);
        }

        // Nobody claimed it.
        let tf = curtf(&mut *self.envs)?;
        print_current(&mut *self.sys, self.hw, self.last_tf, tf);
        if tf.from_kernel() {
            return Err(TrapError::UnhandledKernelTrap { trapno: tf.trapno });
        }
        info!("destroying env after unhandled trap {}", trapno);
        self.envs.destroy_curenv();
        Ok(Dispatch::Done)
    }
}
