pub const NCPU: usize = 8; // maximum number of CPUs

// Slots of the vsyscall page shared read-only with user environments.
pub const VSYS_GETTIME: usize = 0;
pub const NVSYSCALLS: usize = 1;

// Log every incoming trap frame.
pub const TRAP_DEBUG: bool = cfg!(feature = "trap-debug");
