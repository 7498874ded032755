// Binding of the trap code to the rest of the kernel: the symbols the
// entry stubs and the kernel's C side link against.

use core::fmt::{self, Write};
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::console::{init_logging, Console, PANICKED};
use crate::env::{Env, EnvId, EnvTable};
use crate::mmu::{Pseudodesc, PteFlags, Segdesc};
use crate::param::{NCPU, NVSYSCALLS};
use crate::pgfault::{UserMem, UserMemError};
use crate::trap::{self, Devices, Disposition, Monitor, Syscall, Trap, Vectors, LAST_TF, NSEGS};
use crate::trapfmt;
use crate::x86::{self, Machine, PushRegs, Trapframe};

mod ffi {
    use super::*;

    extern "C" {
        pub fn syscall(num: u32, a1: u32, a2: u32, a3: u32, a4: u32, a5: u32) -> i32;
        pub fn sched_yield() -> !;
        pub fn env_run(e: *mut Env) -> !;
        pub fn env_destroy(e: *mut Env);
        pub fn env_free(e: *mut Env);
        pub fn user_mem_check(env: *mut Env, va: *const u8, len: usize, perm: i32) -> i32;
        pub fn kbd_intr();
        pub fn serial_intr();
        pub fn rtc_check_status() -> u8;
        pub fn pic_send_eoi(irq: u8);
        pub fn monitor(tf: *mut Trapframe);
        pub fn gettime() -> i32;
        pub fn cpunum() -> i32;
        pub fn clock_thdlr();

        pub static mut vsys: [i32; NVSYSCALLS];
        pub static mut gdt: [Segdesc; NSEGS];
        pub static vectors: Vectors;
    }
}

pub struct Native;

impl Machine for Native {
    fn cld(&self) {
        unsafe { x86::cld() }
    }

    fn read_eflags(&self) -> u32 {
        unsafe { x86::read_eflags() }
    }

    fn rcr2(&self) -> u32 {
        unsafe { x86::rcr2() }
    }

    fn ltr(&self, sel: u16) {
        unsafe { x86::ltr(sel) }
    }

    fn lidt(&self, pd: &Pseudodesc) {
        unsafe { x86::lidt(pd) }
    }

    fn cpunum(&self) -> usize {
        unsafe { ffi::cpunum() as usize }
    }
}

// The environment running on each CPU, null if none.
#[allow(clippy::declare_interior_mutable_const)]
const NO_ENV: AtomicPtr<Env> = AtomicPtr::new(ptr::null_mut());
static CURENV: [AtomicPtr<Env>; NCPU] = [NO_ENV; NCPU];

#[no_mangle]
pub extern "C" fn curenv() -> *mut Env {
    CURENV[Native.cpunum()].load(Ordering::Relaxed)
}

#[no_mangle]
pub extern "C" fn set_curenv(e: *mut Env) {
    CURENV[Native.cpunum()].store(e, Ordering::Relaxed);
}

struct KernEnvs;

impl EnvTable for KernEnvs {
    fn curenv(&mut self) -> Option<&mut Env> {
        unsafe { curenv().as_mut() }
    }

    fn free_curenv(&mut self) {
        let e = curenv();
        if !e.is_null() {
            unsafe { ffi::env_free(e) };
            set_curenv(ptr::null_mut());
        }
    }

    fn destroy_curenv(&mut self) {
        let e = curenv();
        if !e.is_null() {
            unsafe { ffi::env_destroy(e) };
        }
    }
}

struct KernServices;

impl fmt::Write for KernServices {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Console.write_str(s)
    }
}

impl Syscall for KernServices {
    fn syscall(&mut self, num: u32, a1: u32, a2: u32, a3: u32, a4: u32, a5: u32) -> i32 {
        unsafe { ffi::syscall(num, a1, a2, a3, a4, a5) }
    }
}

impl Devices for KernServices {
    fn kbd_intr(&mut self) {
        unsafe { ffi::kbd_intr() }
    }

    fn serial_intr(&mut self) {
        unsafe { ffi::serial_intr() }
    }

    fn rtc_check_status(&mut self) -> u8 {
        unsafe { ffi::rtc_check_status() }
    }

    fn pic_send_eoi(&mut self, irq: u8) {
        unsafe { ffi::pic_send_eoi(irq) }
    }

    fn gettime(&mut self) -> i32 {
        unsafe { ffi::gettime() }
    }

    fn vsys_write(&mut self, slot: usize, val: i32) {
        unsafe { (*ptr::addr_of_mut!(ffi::vsys))[slot] = val };
    }
}

impl Monitor for KernServices {
    fn monitor(&mut self, tf: &mut Trapframe) {
        unsafe { ffi::monitor(tf) }
    }
}

// The user memory of interest is always the current environment's, and
// its page directory is the one loaded.
impl UserMem for KernServices {
    fn user_mem_check(
        &mut self,
        env: EnvId,
        va: u32,
        len: u32,
        perm: PteFlags,
    ) -> Result<(), UserMemError> {
        let e = curenv();
        debug_assert!(!e.is_null() && unsafe { (*e).env_id } == env);
        let r = unsafe { ffi::user_mem_check(e, va as usize as *const u8, len as usize, perm.bits() as i32) };
        if r < 0 {
            return Err(UserMemError { va });
        }
        Ok(())
    }

    fn copy_out(&mut self, env: EnvId, va: u32, src: &[u8]) -> Result<(), UserMemError> {
        self.user_mem_check(env, va, src.len() as u32, PteFlags::W | PteFlags::U)?;
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), va as usize as *mut u8, src.len()) };
        Ok(())
    }
}

#[no_mangle]
pub extern "C" fn trap_init() {
    init_logging();
    unsafe {
        trap::trap_init(
            &Native,
            &*ptr::addr_of!(ffi::vectors),
            &mut *ptr::addr_of_mut!(ffi::gdt),
        )
    };
}

#[no_mangle]
pub extern "C" fn trap_init_percpu() {
    unsafe { trap::trap_init_percpu(&Native, &mut *ptr::addr_of_mut!(ffi::gdt)) };
}

#[no_mangle]
pub extern "C" fn clock_idt_init() {
    trap::clock_idt_init(&Native, ffi::clock_thdlr as usize as u32);
}

#[no_mangle]
pub unsafe extern "C" fn print_trapframe(tf: *const Trapframe) {
    if let Some(tf) = tf.as_ref() {
        trapfmt::print_current(&mut Console, &Native, &LAST_TF, tf);
    }
}

#[no_mangle]
pub unsafe extern "C" fn print_regs(regs: *const PushRegs) {
    if let Some(regs) = regs.as_ref() {
        // Console output cannot fail.
        let _ = trapfmt::print_regs(&mut Console, regs);
    }
}

// Called from trapentry.S with the frame it built on the kernel stack.
#[no_mangle]
pub unsafe extern "C" fn trap(tf: *mut Trapframe) -> ! {
    let mut envs = KernEnvs;
    let mut sys = KernServices;
    let d = Trap {
        hw: &Native,
        envs: &mut envs,
        sys: &mut sys,
        panicked: &PANICKED,
        last_tf: &LAST_TF,
    }
    .trap(&*tf);

    match d {
        Ok(Disposition::Resume) => ffi::env_run(curenv()),
        Ok(Disposition::Yield) => ffi::sched_yield(),
        Ok(Disposition::Halt) => loop {
            x86::hlt();
        },
        Err(e) => panic!("{}", e),
    }
}
