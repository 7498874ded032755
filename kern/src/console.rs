// Console output for the trap code.
// Characters go to the kernel console (screen and serial port);
// the log facade is routed here as well.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::param::TRAP_DEBUG;

#[cfg(all(target_arch = "x86", not(test)))]
extern "C" {
    fn cputchar(c: i32);
}

// Set once some CPU has panicked; every other CPU halts at its next trap.
pub struct PanicLatch(AtomicBool);

impl PanicLatch {
    pub const fn new() -> PanicLatch {
        PanicLatch(AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for PanicLatch {
    fn default() -> Self {
        Self::new()
    }
}

pub static PANICKED: PanicLatch = PanicLatch::new();

pub struct Console;

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        #[cfg(all(target_arch = "x86", not(test)))]
        for c in s.bytes() {
            unsafe { cputchar(c as i32) };
        }
        #[cfg(not(all(target_arch = "x86", not(test))))]
        let _ = s;
        Ok(())
    }
}

// Print to any console writer. Output errors have nowhere to go and are
// dropped here.
pub fn cprint<W: Write>(w: &mut W, args: fmt::Arguments) {
    let _ = w.write_fmt(args);
}

#[macro_export]
macro_rules! cprintf {
    ($($arg:tt)*) => {
        $crate::console::cprint(&mut $crate::console::Console, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! cprintln {
    ($($arg:tt)*) => {
        $crate::console::cprint(
            &mut $crate::console::Console,
            format_args!("{}\n", format_args!($($arg)*)),
        )
    };
}

pub struct KernLogger;

static LOGGER: KernLogger = KernLogger;

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

// One log line: "[LEVEL] message".
pub fn write_record<W: Write>(w: &mut W, level: Level, args: &fmt::Arguments) {
    cprint(w, format_args!("[{}] {}\n", level_tag(level), args));
}

impl Log for KernLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            write_record(&mut Console, record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

// Install the console logger. Only the first call has any effect.
pub fn init_logging() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(if TRAP_DEBUG {
            LevelFilter::Trace
        } else {
            LevelFilter::Info
        });
    }
}

// Panic path: freeze the other CPUs, print, and halt for good.
pub fn cpanic(info: &core::panic::PanicInfo) -> ! {
    PANICKED.set();
    cprintln!("kernel panic: {}", info);
    loop {
        #[cfg(target_arch = "x86")]
        unsafe {
            crate::x86::hlt();
        }
        core::hint::spin_loop();
    }
}
