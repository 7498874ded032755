#![cfg_attr(not(test), no_std)]
#![allow(non_snake_case)]
#![allow(non_upper_case_globals)]

pub mod console;
#[cfg(all(target_arch = "x86", not(test)))]
pub mod entry;
pub mod env;
pub mod memlayout;
pub mod mmu;
pub mod param;
pub mod pgfault;
pub mod trap;
pub mod trapfmt;
pub mod traps;
pub mod x86;

#[cfg(test)]
mod mock;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    console::cpanic(info)
}
