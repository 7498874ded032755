// Recording stand-ins for the processor and the rest of the kernel.

use core::cell::{Cell, RefCell};
use core::fmt;
use core::ops::Range;
use std::collections::BTreeMap;

use crate::console::PanicLatch;
use crate::env::{Env, EnvId, EnvStatus, EnvTable};
use crate::mmu::{Pseudodesc, PteFlags, GD_UD, GD_UT};
use crate::param::NVSYSCALLS;
use crate::pgfault::{UserMem, UserMemError};
use crate::trap::{Devices, Disposition, Monitor, Syscall, Trap, TrapError};
use crate::trapfmt::LastTf;
use crate::x86::{Machine, Trapframe, UTrapframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwOp {
    Cld,
    Ltr(u16),
    Lidt(Pseudodesc),
}

pub struct MockHw {
    pub eflags: Cell<u32>,
    pub cr2: Cell<u32>,
    pub cpu: usize,
    ops: RefCell<Vec<HwOp>>,
}

impl MockHw {
    pub fn new() -> MockHw {
        MockHw {
            eflags: Cell::new(0),
            cr2: Cell::new(0),
            cpu: 0,
            ops: RefCell::new(Vec::new()),
        }
    }

    pub fn ops(&self) -> Vec<HwOp> {
        self.ops.borrow().clone()
    }
}

impl Machine for MockHw {
    fn cld(&self) {
        self.ops.borrow_mut().push(HwOp::Cld);
    }

    fn read_eflags(&self) -> u32 {
        self.eflags.get()
    }

    fn rcr2(&self) -> u32 {
        self.cr2.get()
    }

    fn ltr(&self, sel: u16) {
        self.ops.borrow_mut().push(HwOp::Ltr(sel));
    }

    fn lidt(&self, pd: &Pseudodesc) {
        self.ops.borrow_mut().push(HwOp::Lidt(*pd));
    }

    fn cpunum(&self) -> usize {
        self.cpu
    }
}

#[derive(Default)]
pub struct MockEnvs {
    pub cur: Option<Env>,
    pub freed: Vec<EnvId>,
    pub destroyed: Vec<EnvId>,
}

impl EnvTable for MockEnvs {
    fn curenv(&mut self) -> Option<&mut Env> {
        self.cur.as_mut()
    }

    fn free_curenv(&mut self) {
        if let Some(e) = self.cur.take() {
            self.freed.push(e.env_id);
        }
    }

    fn destroy_curenv(&mut self) {
        if let Some(e) = self.cur.as_mut() {
            e.env_status = EnvStatus::Dying;
            self.destroyed.push(e.env_id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Syscall(u32, u32, u32, u32, u32, u32),
    Monitor(u32),
    Kbd,
    Serial,
    RtcStatus,
    Eoi(u8),
    Gettime,
    MemCheck(u32, u32),
    CopyOut(u32, usize),
}

#[derive(Default)]
pub struct MockSys {
    pub out: String,
    pub calls: Vec<Call>,
    pub syscall_ret: i32,
    pub time: i32,
    pub vsys: [i32; NVSYSCALLS],
    // User-writable address ranges.
    pub writable: Vec<Range<u32>>,
    // Bytes stored by copy_out.
    pub mem: BTreeMap<u32, u8>,
}

impl MockSys {
    pub fn read_utf(&self, va: u32) -> UTrapframe {
        let mut w = [0u32; 13];
        for (i, word) in w.iter_mut().enumerate() {
            let mut b = [0u8; 4];
            for (j, byte) in b.iter_mut().enumerate() {
                *byte = self.mem[&(va + (i * 4 + j) as u32)];
            }
            *word = u32::from_ne_bytes(b);
        }
        let mut utf = UTrapframe {
            fault_va: w[0],
            err: w[1],
            eip: w[10],
            eflags: w[11],
            esp: w[12],
            ..Default::default()
        };
        utf.regs.edi = w[2];
        utf.regs.esi = w[3];
        utf.regs.ebp = w[4];
        utf.regs.oesp = w[5];
        utf.regs.ebx = w[6];
        utf.regs.edx = w[7];
        utf.regs.ecx = w[8];
        utf.regs.eax = w[9];
        utf
    }

    fn writable(&self, va: u32, len: u32) -> Result<(), UserMemError> {
        let end = va.checked_add(len).ok_or(UserMemError { va })?;
        if self
            .writable
            .iter()
            .any(|r| r.start <= va && end <= r.end)
        {
            Ok(())
        } else {
            Err(UserMemError { va })
        }
    }
}

impl fmt::Write for MockSys {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.out.push_str(s);
        Ok(())
    }
}

impl Syscall for MockSys {
    fn syscall(&mut self, num: u32, a1: u32, a2: u32, a3: u32, a4: u32, a5: u32) -> i32 {
        self.calls.push(Call::Syscall(num, a1, a2, a3, a4, a5));
        self.syscall_ret
    }
}

impl Devices for MockSys {
    fn kbd_intr(&mut self) {
        self.calls.push(Call::Kbd);
    }

    fn serial_intr(&mut self) {
        self.calls.push(Call::Serial);
    }

    fn rtc_check_status(&mut self) -> u8 {
        self.calls.push(Call::RtcStatus);
        0
    }

    fn pic_send_eoi(&mut self, irq: u8) {
        self.calls.push(Call::Eoi(irq));
    }

    fn gettime(&mut self) -> i32 {
        self.calls.push(Call::Gettime);
        self.time
    }

    fn vsys_write(&mut self, slot: usize, val: i32) {
        self.vsys[slot] = val;
    }
}

impl Monitor for MockSys {
    fn monitor(&mut self, tf: &mut Trapframe) {
        self.calls.push(Call::Monitor(tf.trapno));
    }
}

impl UserMem for MockSys {
    fn user_mem_check(
        &mut self,
        _env: EnvId,
        va: u32,
        len: u32,
        perm: PteFlags,
    ) -> Result<(), UserMemError> {
        self.calls.push(Call::MemCheck(va, len));
        assert!(perm.contains(PteFlags::W | PteFlags::U));
        self.writable(va, len)
    }

    fn copy_out(&mut self, _env: EnvId, va: u32, src: &[u8]) -> Result<(), UserMemError> {
        self.calls.push(Call::CopyOut(va, src.len()));
        self.writable(va, src.len() as u32)?;
        for (i, b) in src.iter().enumerate() {
            self.mem.insert(va + i as u32, *b);
        }
        Ok(())
    }
}

// A user frame as trapentry.S would hand it over.
pub fn user_tf(trapno: usize) -> Trapframe {
    Trapframe {
        es: GD_UD | 3,
        ds: GD_UD | 3,
        trapno: trapno as u32,
        eip: 0x0080_0020,
        cs: GD_UT | 3,
        eflags: 0x202,
        esp: 0xeebf_dfe0,
        ss: GD_UD | 3,
        ..Default::default()
    }
}

pub struct Fixture {
    pub hw: MockHw,
    pub envs: MockEnvs,
    pub sys: MockSys,
    pub panicked: PanicLatch,
    pub last_tf: LastTf,
}

impl Fixture {
    pub fn new(cur: Option<Env>) -> Fixture {
        Fixture {
            hw: MockHw::new(),
            envs: MockEnvs {
                cur,
                ..Default::default()
            },
            sys: MockSys::default(),
            panicked: PanicLatch::new(),
            last_tf: LastTf::new(),
        }
    }

    // Environment 0x1000, running on this CPU.
    pub fn running() -> Fixture {
        let mut e = Env::new(EnvId(0x1000));
        e.env_status = EnvStatus::Running;
        e.env_cpunum = 0;
        Fixture::new(Some(e))
    }

    pub fn env(&self) -> &Env {
        self.envs.cur.as_ref().expect("no current env")
    }

    pub fn trap(&mut self, tf: &Trapframe) -> Result<Disposition, TrapError> {
        Trap {
            hw: &self.hw,
            envs: &mut self.envs,
            sys: &mut self.sys,
            panicked: &self.panicked,
            last_tf: &self.last_tf,
        }
        .trap(tf)
    }
}
