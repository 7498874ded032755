// This file contains definitions for the
// x86 memory management unit (MMU).

use bitflags::bitflags;

pub const FL_IF: u32 = 0x00000200; // Interrupt Enable

// Global descriptor numbers
pub const GD_KT: u16 = 0x08; // kernel text
pub const GD_KD: u16 = 0x10; // kernel data
pub const GD_UT: u16 = 0x18; // user text
pub const GD_UD: u16 = 0x20; // user data
pub const GD_TSS0: u16 = 0x28; // Task segment selector for CPU 0

pub const DPL_USER: u8 = 0x3; // User DPL

// System segment type bits
pub const STS_T32A: u8 = 0x9; // Available 32-bit TSS
pub const STS_IG32: u8 = 0xE; // 32-bit Interrupt Gate
pub const STS_TG32: u8 = 0xF; // 32-bit Trap Gate

pub const PGSIZE: u32 = 4096; // bytes mapped by a page

bitflags! {
    // Page table/directory entry flags.
    pub struct PteFlags: u32 {
        const W = 0x002; // Writeable
        const U = 0x004; // User
    }
}

// Segment Descriptor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Segdesc {
    pub lim_15_0: u16,  // Low bits of segment limit
    pub base_15_0: u16, // Low bits of segment base address
    pub base_23_16: u8, // Middle bits of segment base address
    pub typ_s_dpl_p: u8,
    //// uint typ : 4;       // Segment type (see STS_ constants)
    //// uint s : 1;          // 0 = system, 1 = application
    //// uint dpl : 2;        // Descriptor Privilege Level
    //// uint p : 1;          // Present
    pub lim_19_16_avl_rsv1_db_g: u8,
    //// uint lim_19_16 : 4;  // High bits of segment limit
    //// uint avl : 1;        // Unused (available for software use)
    //// uint rsv1 : 1;       // Reserved
    //// uint db : 1;         // 0 = 16-bit segment, 1 = 32-bit segment
    //// uint g : 1;          // Granularity: limit scaled by 4K when set
    pub base_31_24: u8, // High bits of segment base address
}

impl Segdesc {
    pub const fn zero() -> Segdesc {
        Segdesc {
            lim_15_0: 0,
            base_15_0: 0,
            base_23_16: 0,
            typ_s_dpl_p: 0,
            lim_19_16_avl_rsv1_db_g: 0,
            base_31_24: 0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    const fn new(
        lim_15_0: u16,
        base_15_0: u16,
        base_23_16: u8,
        typ: u8,
        s: u8,
        dpl: u8,
        p: u8,
        lim_19_16: u8,
        avl: u8,
        rsv1: u8,
        db: u8,
        g: u8,
        base_31_24: u8,
    ) -> Segdesc {
        Segdesc {
            lim_15_0,
            base_15_0,
            base_23_16,
            typ_s_dpl_p: (typ & 0xf) | (s & 1) << 4 | (dpl & 3) << 5 | (p & 1) << 7,
            lim_19_16_avl_rsv1_db_g: (lim_19_16 & 0xf)
                | (avl & 1) << 4
                | (rsv1 & 1) << 5
                | (db & 1) << 6
                | (g & 1) << 7,
            base_31_24,
        }
    }

    pub const fn typ(&self) -> u8 {
        self.typ_s_dpl_p & 0xf
    }

    pub const fn s(&self) -> u8 {
        (self.typ_s_dpl_p >> 4) & 1
    }

    // 0 marks a system descriptor (TSS, LDT, gates).
    pub fn set_s(&mut self, s: u8) {
        self.typ_s_dpl_p = (self.typ_s_dpl_p & !(1 << 4)) | (s & 1) << 4;
    }

    pub const fn base(&self) -> u32 {
        self.base_15_0 as u32 | (self.base_23_16 as u32) << 16 | (self.base_31_24 as u32) << 24
    }

    pub const fn limit(&self) -> u32 {
        self.lim_15_0 as u32 | ((self.lim_19_16_avl_rsv1_db_g & 0xf) as u32) << 16
    }
}

// Byte-granular segment, used for the TSS.
pub const fn SEG16(typ: u8, base: u32, lim: u32, dpl: u8) -> Segdesc {
    Segdesc::new(
        (lim & 0xffff) as u16,
        (base & 0xffff) as u16,
        ((base >> 16) & 0xff) as u8,
        typ,
        1,
        dpl,
        1,
        (lim >> 16) as u8,
        0,
        0,
        1,
        0,
        (base >> 24) as u8,
    )
}

// Task state segment format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Taskstate {
    pub link: u32, // Old ts selector
    pub esp0: u32, // Stack pointers and segment selectors
    pub ss0: u16,  //   after an increase in privilege level
    pub padding1: u16,
    pub esp1: u32,
    pub ss1: u16,
    pub padding2: u16,
    pub esp2: u32,
    pub ss2: u16,
    pub padding3: u16,
    pub cr3: u32,    // Page directory base
    pub eip: u32,    // Saved state from last task switch
    pub eflags: u32,
    pub eax: u32, // More saved state (registers)
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u16, // Even more saved state (segment selectors)
    pub padding4: u16,
    pub cs: u16,
    pub padding5: u16,
    pub ss: u16,
    pub padding6: u16,
    pub ds: u16,
    pub padding7: u16,
    pub fs: u16,
    pub padding8: u16,
    pub gs: u16,
    pub padding9: u16,
    pub ldt: u16,
    pub padding10: u16,
    pub t: u16,    // Trap on task switch
    pub iomb: u16, // I/O map base address
}

impl Taskstate {
    pub const fn zero() -> Taskstate {
        Taskstate {
            link: 0,
            esp0: 0,
            ss0: 0,
            padding1: 0,
            esp1: 0,
            ss1: 0,
            padding2: 0,
            esp2: 0,
            ss2: 0,
            padding3: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            padding4: 0,
            cs: 0,
            padding5: 0,
            ss: 0,
            padding6: 0,
            ds: 0,
            padding7: 0,
            fs: 0,
            padding8: 0,
            gs: 0,
            padding9: 0,
            ldt: 0,
            padding10: 0,
            t: 0,
            iomb: 0,
        }
    }
}

// Gate descriptors for interrupts and traps
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Gatedesc {
    off_15_0: u16, // low 16 bits of offset in segment
    cs: u16,       // code segment selector
    args_rsv1: u8,
    //// args : u5;        // # args, 0 for interrupt/trap gates
    //// rsv1 : u3;        // reserved(should be zero I guess)
    type_s_dpl_p: u8,
    //// type : u4;        // type(STS_{TG,IG32,TG32})
    //// s : u1;           // must be 0 (system)
    //// dpl : u2;         // descriptor(meaning new) privilege level
    //// p : u1;           // Present
    off_31_16: u16, // high bits of offset in segment
}

impl Gatedesc {
    pub const fn zero() -> Gatedesc {
        Gatedesc {
            off_15_0: 0,
            cs: 0,
            args_rsv1: 0,
            type_s_dpl_p: 0,
            off_31_16: 0,
        }
    }

    // Set up a normal interrupt/trap gate descriptor.
    // - istrap: true for a trap (= exception) gate, false for an interrupt gate.
    //   interrupt gate clears FL_IF, trap gate leaves FL_IF alone
    // - sel: Code segment selector for interrupt/trap handler
    // - off: Offset in code segment for interrupt/trap handler
    // - dpl: Descriptor Privilege Level -
    //        the privilege level required for software to invoke
    //        this interrupt/trap gate explicitly using an int instruction.
    pub fn setgate(&mut self, istrap: bool, sel: u16, off: u32, dpl: u8) {
        assert!(dpl < 1 << 2, "setgate: dpl");
        self.off_15_0 = (off & 0xffff) as u16;
        self.cs = sel;
        self.args_rsv1 = 0;
        let typ = if istrap { STS_TG32 } else { STS_IG32 };
        let s = 0;
        let p = 1;
        self.type_s_dpl_p = typ | s << 4 | dpl << 5 | p << 7;
        self.off_31_16 = (off >> 16) as u16;
    }

    pub const fn off(&self) -> u32 {
        self.off_15_0 as u32 | (self.off_31_16 as u32) << 16
    }

    pub const fn sel(&self) -> u16 {
        self.cs
    }

    pub const fn typ(&self) -> u8 {
        self.type_s_dpl_p & 0xf
    }

    pub const fn dpl(&self) -> u8 {
        (self.type_s_dpl_p >> 5) & 3
    }

    pub const fn present(&self) -> bool {
        self.type_s_dpl_p >> 7 != 0
    }
}

// Pseudo-descriptors used for LGDT, LLDT and LIDT instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C, packed)]
pub struct Pseudodesc {
    pub pd_lim: u16,  // Limit
    pub pd_base: u32, // Base address
}
