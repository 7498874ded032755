// Memory layout

use crate::mmu::PGSIZE;
use crate::param::NCPU;

// All physical memory mapped at this address
pub const KERNBASE: u32 = 0xF0000000;

// Kernel stack.
pub const KSTACKTOP: u32 = KERNBASE;
pub const KSTKSIZE: u32 = 8 * PGSIZE; // size of a kernel stack
pub const KSTKGAP: u32 = 8 * PGSIZE; // size of a kernel stack guard

// User read-only virtual page table and environments sit below ULIM;
// everything below UTOP belongs to the user.
pub const UTOP: u32 = 0xEEC00000;
// Top of one-page user exception stack
pub const UXSTACKTOP: u32 = UTOP;
// Next page left invalid to guard against exception stack overflow; then:
// Top of normal user stack
pub const USTACKTOP: u32 = UTOP - 2 * PGSIZE;

// Each CPU gets its own kernel stack below KSTACKTOP, separated by an
// unmapped guard gap.
pub const fn percpu_kstacktop(cpu: usize) -> u32 {
    assert!(cpu < NCPU);
    KSTACKTOP - cpu as u32 * (KSTKSIZE + KSTKGAP)
}
