//! Fixed scratch-register assignment (spec §4.5). This backend never
//! allocates general-purpose registers; every lowering rule names one of
//! these registers directly, the way
//! `examples/other_examples/7531a88d_myuon-moca__src-jit-compiler_x86_64.rs.rs`
//! names `VM_CTX`/`VSTACK`/`LOCALS`/`TMP0..TMP5`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Low 3 bits, for the modrm/rex.b,x,r encodings.
    pub const fn low_bits(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Whether this register needs the REX.B/R/X extension bit set.
    pub const fn needs_rex_bit(self) -> bool {
        (self as u8) >= 8
    }
}

/// `rdi` — first-argument carrier for ctor/dtor/copy_ctor calls, per the
/// host (System V) ABI.
pub const CTOR_ARG0: Reg = Reg::Rdi;
/// `rsi` — second argument (copy source) for copy_ctor calls.
pub const CTOR_ARG1: Reg = Reg::Rsi;
/// General address/value scratch used while lowering instructions.
pub const SCRATCH_A: Reg = Reg::Rbx;
pub const SCRATCH_B: Reg = Reg::Rcx;
pub const SCRATCH_C: Reg = Reg::Rdx;
/// Caches the callee virtual base pointer around a nested call.
pub const CALLEE_VRBP: Reg = Reg::R10;
/// Caches the caller virtual base pointer around a nested call.
pub const CALLER_VRBP: Reg = Reg::R11;
/// Left operand of a primitive binary operation (integer path).
pub const BINOP_LEFT: Reg = Reg::Rax;
/// Right/second operand of a primitive integer binary operation.
pub const BINOP_RIGHT: Reg = Reg::Rcx;

/// Scalar SSE registers used for floating-point binary operations.
pub mod xmm {
    pub const LEFT: u8 = 1;
    pub const RIGHT: u8 = 2;
}

/// Native frame slot indices (relative to native `rbp`), fixed by the
/// prologue: slot 0 holds the virtual-stack handle passed in, slot 1
/// caches the virtual base pointer read from it at entry.
pub const VSTACK_HANDLE_SLOT: i32 = -8;
pub const VRBP_CACHE_SLOT: i32 = -16;
/// Bytes reserved for the two fixed slots above, before any IR local.
pub const FIXED_SLOTS_SIZE: usize = 16;
