// The part of the environment (user process) record the trap code
// touches, and the environment manager operations it calls.

use core::fmt;

use crate::mmu::{FL_IF, GD_UD, GD_UT};
use crate::memlayout::USTACKTOP;
use crate::x86::Trapframe;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct EnvId(pub i32);

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum EnvStatus {
    Free = 0,
    Dying,
    Runnable,
    Running,
    NotRunnable,
}

// Field order follows the environment manager's record; pointers are
// 32-bit on the kernel target and kept as plain words here.
#[derive(Clone, Debug)]
#[repr(C)]
pub struct Env {
    pub env_tf: Trapframe,         // Saved registers
    pub env_link: u32,             // Next free Env
    pub env_id: EnvId,             // Unique environment identifier
    pub env_parent_id: EnvId,      // env_id of this env's parent
    pub env_type: u32,             // Indicates special system environments
    pub env_status: EnvStatus,     // Status of the environment
    pub env_runs: u32,             // Number of times environment has run
    pub env_cpunum: i32,           // The CPU that the env is running on
    pub env_pgdir: u32,            // Kernel virtual address of page dir
    pub env_pgfault_upcall: u32,   // Page fault upcall entry point, 0 if none
}

impl Env {
    // A freshly set up user environment: user segments, interrupts on,
    // stack at USTACKTOP.
    pub fn new(id: EnvId) -> Env {
        let mut tf = Trapframe::default();
        tf.ds = GD_UD | 3;
        tf.es = GD_UD | 3;
        tf.ss = GD_UD | 3;
        tf.cs = GD_UT | 3;
        tf.esp = USTACKTOP;
        tf.eflags = FL_IF;
        Env {
            env_tf: tf,
            env_link: 0,
            env_id: id,
            env_parent_id: EnvId(0),
            env_type: 0,
            env_status: EnvStatus::Runnable,
            env_runs: 0,
            env_cpunum: -1,
            env_pgdir: 0,
            env_pgfault_upcall: 0,
        }
    }

    pub fn pgfault_upcall(&self) -> Option<u32> {
        match self.env_pgfault_upcall {
            0 => None,
            va => Some(va),
        }
    }
}

// Environment manager operations on the environment current on this CPU.
pub trait EnvTable {
    fn curenv(&mut self) -> Option<&mut Env>;

    // env_free the current environment and leave this CPU without one.
    fn free_curenv(&mut self);

    // env_destroy the current environment. It stays current (marked
    // dying) until the next trap reclaims it.
    fn destroy_curenv(&mut self);
}
