// User page faults: hand the fault to the environment's upcall on its
// exception stack, or destroy the environment.
//
// Exception stack while upcalls nest (grows down from UXSTACKTOP):
//
//     UXSTACKTOP ->  +-------------------+
//                    | UTrapframe (1st)  |
//                    +-------------------+  <- esp of the 1st upcall
//                    | scratch word      |
//                    | UTrapframe (2nd)  |
//                    +-------------------+  <- esp of the 2nd upcall
//                    :                   :
//  UXSTACKTOP-PGSIZE +-------------------+
//
// The scratch word lets the upcall's return stub push the trap-time eip
// before it switches stacks.

use core::fmt::{self, Write};
use core::mem::size_of;

use log::warn;

use crate::console::cprint;
use crate::env::{EnvId, EnvTable};
use crate::memlayout::UXSTACKTOP;
use crate::mmu::{PteFlags, PGSIZE};
use crate::trap::{Dispatch, TrapError};
use crate::trapfmt::{print_current, LastTf};
use crate::x86::{Machine, Trapframe, UTrapframe};

const UTF_SIZE: u32 = size_of::<UTrapframe>() as u32;

// User memory access on behalf of an environment.
pub trait UserMem {
    // Check that env may access [va, va+len) with permissions perm | PTE_P.
    fn user_mem_check(
        &mut self,
        env: EnvId,
        va: u32,
        len: u32,
        perm: PteFlags,
    ) -> Result<(), UserMemError>;

    // Copy src into env's address space at va.
    fn copy_out(&mut self, env: EnvId, va: u32, src: &[u8]) -> Result<(), UserMemError>;
}

// va is the first address the environment cannot access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserMemError {
    pub va: u32,
}

impl fmt::Display for UserMemError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "user memory check failed at va {:08x}", self.va)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpcallError {
    // No room left on the exception stack for another frame.
    StackOverflow { esp: u32 },
    Unwritable(UserMemError),
}

impl From<UserMemError> for UpcallError {
    fn from(e: UserMemError) -> Self {
        UpcallError::Unwritable(e)
    }
}

impl fmt::Display for UpcallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UpcallError::StackOverflow { esp } => {
                write!(f, "exception stack overflow (esp {:08x})", esp)
            }
            UpcallError::Unwritable(e) => write!(f, "{}", e),
        }
    }
}

// Where the next UTrapframe goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExFrame {
    pub utf: u32,
    // Set when the fault happened on the exception stack itself.
    pub scratch: Option<u32>,
}

pub fn exstack_frame(esp: u32) -> Result<ExFrame, UpcallError> {
    let bottom = UXSTACKTOP - PGSIZE;
    let nested = (bottom..UXSTACKTOP).contains(&esp);
    let top = if nested { esp - 4 } else { UXSTACKTOP };
    match top.checked_sub(UTF_SIZE) {
        Some(utf) if utf >= bottom => Ok(ExFrame {
            utf,
            scratch: if nested { Some(top) } else { None },
        }),
        _ => Err(UpcallError::StackOverflow { esp }),
    }
}

// Push a UTrapframe for the fault and point tf at the upcall.
// tf is left alone unless the push succeeds.
fn push_upcall<S: UserMem>(
    sys: &mut S,
    env: EnvId,
    tf: &mut Trapframe,
    fault_va: u32,
    upcall: u32,
) -> Result<(), UpcallError> {
    let perm = PteFlags::W | PteFlags::U;
    let frame = exstack_frame(tf.esp)?;
    if let Some(scratch) = frame.scratch {
        sys.user_mem_check(env, scratch, 4, perm)?;
    }
    sys.user_mem_check(env, frame.utf, UTF_SIZE, perm)?;

    let utf = UTrapframe {
        fault_va,
        err: tf.err,
        regs: tf.regs,
        eip: tf.eip,
        eflags: tf.eflags,
        esp: tf.esp,
    };
    sys.copy_out(env, frame.utf, utf.as_bytes())?;

    tf.esp = frame.utf;
    tf.eip = upcall;
    Ok(())
}

// Runs on the current environment's saved frame, with the faulting
// address taken from %cr2.
pub fn page_fault_handler<M, E, S>(
    hw: &M,
    envs: &mut E,
    sys: &mut S,
    last_tf: &LastTf,
) -> Result<Dispatch, TrapError>
where
    M: Machine,
    E: EnvTable,
    S: UserMem + Write,
{
    let fault_va = hw.rcr2();
    let env = envs.curenv().ok_or(TrapError::NoCurrentEnv)?;
    let id = env.env_id;
    let upcall = env.pgfault_upcall();
    let tf = &mut env.env_tf;

    if tf.from_kernel() {
        print_current(sys, hw, last_tf, tf);
        return Err(TrapError::KernelPageFault {
            va: fault_va,
            eip: tf.eip,
        });
    }

    if let Some(upcall) = upcall {
        match push_upcall(sys, id, tf, fault_va, upcall) {
            Ok(()) => return Ok(Dispatch::Resume),
            Err(e) => warn!("[{}] page fault upcall: {}", id, e),
        }
    }

    cprint(
        &mut *sys,
        format_args!("[{}] user fault va {:08x} ip {:08x}\n", id, fault_va, tf.eip),
    );
    print_current(sys, hw, last_tf, tf);
    envs.destroy_curenv();
    Ok(Dispatch::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvStatus;
    use crate::mmu::GD_KT;
    use crate::trap::Disposition;
    use crate::mock::*;
    use crate::traps::T_PGFLT;

    const UPCALL: u32 = 0x0080_0100;
    const FAULT_VA: u32 = 0xdead_b000;
    const XBOTTOM: u32 = UXSTACKTOP - PGSIZE;

    fn with_upcall() -> Fixture {
        let mut t = Fixture::running();
        t.envs.cur.as_mut().unwrap().env_pgfault_upcall = UPCALL;
        t.sys.writable.push(XBOTTOM..UXSTACKTOP);
        t.hw.cr2.set(FAULT_VA);
        t
    }

    fn pgflt(esp: u32) -> Trapframe {
        let mut tf = user_tf(T_PGFLT);
        tf.esp = esp;
        tf.err = 0x6;
        tf.eip = 0x0080_0abc;
        tf.regs.eax = 0x1111;
        tf
    }

    #[test]
    fn frame_positions() {
        assert_eq!(
            exstack_frame(0xeebf_dfd0),
            Ok(ExFrame {
                utf: UXSTACKTOP - 52,
                scratch: None,
            })
        );
        assert_eq!(
            exstack_frame(UXSTACKTOP - 52),
            Ok(ExFrame {
                utf: UXSTACKTOP - 52 - 4 - 52,
                scratch: Some(UXSTACKTOP - 56),
            })
        );
        // esp == UXSTACKTOP is not on the exception stack.
        assert_eq!(exstack_frame(UXSTACKTOP).unwrap().scratch, None);
        assert_eq!(
            exstack_frame(XBOTTOM + 40),
            Err(UpcallError::StackOverflow { esp: XBOTTOM + 40 })
        );
        assert_eq!(exstack_frame(XBOTTOM + 56).unwrap().utf, XBOTTOM);
    }

    #[test]
    fn upcall_from_user_stack() {
        let mut t = with_upcall();
        let tf = pgflt(0xeebf_dfd0);
        assert_eq!(t.trap(&tf), Ok(Disposition::Resume));

        let utf = t.sys.read_utf(UXSTACKTOP - 52);
        assert_eq!(utf.fault_va, FAULT_VA);
        assert_eq!(utf.err, 0x6);
        assert_eq!(utf.regs, tf.regs);
        assert_eq!(utf.eip, 0x0080_0abc);
        assert_eq!(utf.eflags, tf.eflags);
        assert_eq!(utf.esp, 0xeebf_dfd0);

        let saved = t.env().env_tf;
        assert_eq!(saved.esp, UXSTACKTOP - 52);
        assert_eq!(saved.eip, UPCALL);
        assert_eq!(saved.regs, tf.regs);
        assert!(t.envs.destroyed.is_empty());
        assert!(t.sys.out.is_empty());
    }

    #[test]
    fn nested_upcall_leaves_scratch_word() {
        let mut t = with_upcall();
        let esp = UXSTACKTOP - 52;
        assert_eq!(t.trap(&pgflt(esp)), Ok(Disposition::Resume));
        let at = esp - 4 - 52;
        assert_eq!(t.env().env_tf.esp, at);
        assert_eq!(t.sys.read_utf(at).esp, esp);
        assert_eq!(
            t.sys.calls,
            vec![
                Call::MemCheck(esp - 4, 4),
                Call::MemCheck(at, 52),
                Call::CopyOut(at, 52),
            ]
        );
    }

    #[test]
    fn nested_scratch_unwritable_destroys() {
        let mut t = with_upcall();
        let esp = UXSTACKTOP - 52;
        // The frame below the scratch word is writable, the word is not.
        t.sys.writable = vec![XBOTTOM..esp - 4];
        let tf = pgflt(esp);
        assert_eq!(t.trap(&tf), Ok(Disposition::Yield));
        assert_eq!(t.sys.calls, vec![Call::MemCheck(esp - 4, 4)]);
        assert_eq!(t.envs.destroyed.len(), 1);
        assert!(t.sys.mem.is_empty());
        assert_eq!(t.env().env_tf, tf);
    }

    #[test]
    fn exception_stack_overflow_destroys() {
        let mut t = with_upcall();
        let tf = pgflt(XBOTTOM + 20);
        assert_eq!(t.trap(&tf), Ok(Disposition::Yield));
        assert_eq!(t.envs.destroyed.len(), 1);
        assert!(t.sys.mem.is_empty());
        assert_eq!(t.env().env_tf.eip, tf.eip);
        assert_eq!(t.env().env_tf.esp, tf.esp);
    }

    #[test]
    fn unmapped_exception_stack_destroys() {
        let mut t = with_upcall();
        t.sys.writable.clear();
        let tf = pgflt(0xeebf_dfd0);
        assert_eq!(t.trap(&tf), Ok(Disposition::Yield));
        assert_eq!(t.envs.destroyed.len(), 1);
        assert!(t.sys.mem.is_empty());
        assert_eq!(t.env().env_tf, tf);
        assert!(t
            .sys
            .out
            .starts_with("[00001000] user fault va deadb000 ip 00800abc\n"));
    }

    #[test]
    fn no_upcall_destroys() {
        let mut t = Fixture::running();
        t.hw.cr2.set(0x10);
        t.sys.writable.push(XBOTTOM..UXSTACKTOP);
        assert_eq!(t.trap(&pgflt(0xeebf_dfd0)), Ok(Disposition::Yield));
        assert_eq!(t.envs.destroyed.len(), 1);
        assert_eq!(t.env().env_status, EnvStatus::Dying);
        assert!(t.sys.calls.is_empty());
        let out = &t.sys.out;
        assert!(out.starts_with("[00001000] user fault va 00000010 ip 00800abc\nTRAP frame at "));
        // The frame just trapped, so cr2 is shown.
        assert!(out.contains("  cr2  0x00000010\n"));
        assert!(out.contains("  err  0x00000006 [user, write, not-present]\n"));
    }

    #[test]
    fn kernel_fault_is_fatal() {
        let mut t = with_upcall();
        let mut tf = pgflt(0xf011_0000);
        tf.cs = GD_KT;
        assert_eq!(
            t.trap(&tf),
            Err(TrapError::KernelPageFault {
                va: FAULT_VA,
                eip: 0x0080_0abc
            })
        );
        assert!(t.envs.destroyed.is_empty());
        assert!(t.sys.mem.is_empty());
    }
}
