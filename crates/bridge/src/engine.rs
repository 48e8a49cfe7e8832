//! Contract of the recompiling engine consumed by the adapter.
//!
//! The engine itself is an external collaborator. This module defines the shapes it
//! exchanges with the adapter:
//! 1. **Callback traits:** [`UserCallbacks`] for memory, trap and tick accounting and
//!    [`Coprocessor`] for compile-time coprocessor dispatch. The bridges implement these.
//! 2. **Native results:** [`Callback`] and [`CallbackOrAccess`], the engine-side forms that
//!    the flat wire encodings in [`crate::tagged`] decode into.
//! 3. **Lifecycle:** the [`Engine`] trait and the [`UserConfig`] handed to its constructor.
//!
//! Engines are driven through shared references: callbacks run nested inside
//! [`Engine::run`] and may call [`Engine::halt_execution`] on the same instance.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use crate::config::Options;
use crate::wrapper::Jit;

/// Number of address bits covered by one page-table entry.
pub const PAGE_BITS: usize = 12;

/// Size of one guest page in bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_BITS;

/// Number of entries in a full 32-bit page table.
pub const NUM_PAGE_TABLE_ENTRIES: usize = 1 << (32 - PAGE_BITS);

/// Number of addressable coprocessor slots.
pub const NUM_COPROCESSORS: usize = 16;

/// Number of core registers (R0-R15).
pub const NUM_REGS: usize = 16;

/// Number of 32-bit extension (VFP/NEON) register words.
pub const NUM_EXT_REGS: usize = 64;

/// Host pointers for each guest page; a null entry means "not mapped, use the callbacks".
///
/// The table and every page it points to are owned by the caller.
pub type PageTable = [*mut u8; NUM_PAGE_TABLE_ENTRIES];

/// Core register file.
pub type Regs = [u32; NUM_REGS];

/// Extension register file.
pub type ExtRegs = [u32; NUM_EXT_REGS];

/// Exceptional conditions the engine reports through [`UserCallbacks::exception_raised`].
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Exception {
    /// An UNDEFINED instruction was executed, including unsupported coprocessor operations.
    UndefinedInstruction = 0,
    /// An UNPREDICTABLE instruction was executed.
    UnpredictableInstruction = 1,
    /// The instruction could not be decoded.
    DecodeError = 2,
    /// SEV.
    SendEvent = 3,
    /// SEVL.
    SendEventLocal = 4,
    /// WFI.
    WaitForInterrupt = 5,
    /// WFE.
    WaitForEvent = 6,
    /// YIELD.
    Yield = 7,
    /// BKPT.
    Breakpoint = 8,
    /// PLD.
    PreloadData = 9,
    /// PLDW.
    PreloadDataWithIntentToWrite = 10,
    /// PLI.
    PreloadInstruction = 11,
    /// Instruction fetch from a page mapped without execute permission.
    NoExecuteFault = 12,
}

/// Coprocessor register operand (CRd, CRn or CRm).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CoprocReg {
    C0,
    C1,
    C2,
    C3,
    C4,
    C5,
    C6,
    C7,
    C8,
    C9,
    C10,
    C11,
    C12,
    C13,
    C14,
    C15,
}

impl CoprocReg {
    const ALL: [Self; 16] = [
        Self::C0,
        Self::C1,
        Self::C2,
        Self::C3,
        Self::C4,
        Self::C5,
        Self::C6,
        Self::C7,
        Self::C8,
        Self::C9,
        Self::C10,
        Self::C11,
        Self::C12,
        Self::C13,
        Self::C14,
        Self::C15,
    ];

    /// Decodes a 4-bit register field; bits above the low nibble are ignored.
    pub const fn from_bits(bits: u32) -> Self {
        Self::ALL[(bits & 0xF) as usize]
    }

    /// Returns the register number (0-15).
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Function invoked by the engine when it executes a deferred coprocessor operation.
///
/// Receives the wrapper handle that compiled it, the caller's user argument and two
/// operation-specific words. The meaning of the return value depends on the operation.
pub type RawCallbackFn =
    unsafe extern "C" fn(jit: *mut Jit, user_arg: *mut c_void, arg0: u32, arg1: u32) -> u64;

/// A deferred coprocessor operation bound to the wrapper that compiled it.
#[derive(Clone, Copy, Debug)]
pub struct Callback {
    /// Function to invoke at execution time.
    pub function: RawCallbackFn,
    /// Caller context passed back unchanged.
    pub user_arg: *mut c_void,
    /// Handle of the wrapper whose bridge produced this callback.
    pub jit: *mut Jit,
}

impl Callback {
    /// Invokes the callback.
    ///
    /// # Safety
    ///
    /// `function` must be valid to call with `jit` and `user_arg`, and both must still be
    /// live. Engines call this on the thread that is running the wrapper.
    pub unsafe fn call(&self, arg0: u32, arg1: u32) -> u64 {
        // SAFETY: upheld by the caller per the contract above.
        unsafe { (self.function)(self.jit, self.user_arg, arg0, arg1) }
    }
}

/// How the engine should implement a coprocessor transfer.
#[derive(Clone, Copy, Debug)]
pub enum CallbackOrAccess<A> {
    /// The coprocessor does not implement the operation; the engine raises
    /// [`Exception::UndefinedInstruction`].
    Unsupported,
    /// Invoke the callback whenever the instruction executes.
    Callback(Callback),
    /// Read or write the given host location(s) directly.
    Access(A),
}

impl<A> CallbackOrAccess<A> {
    /// Returns `true` for [`CallbackOrAccess::Unsupported`].
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported)
    }
}

/// Compile result for single-word transfers (MCR/MRC).
pub type CallbackOrAccessOneWord = CallbackOrAccess<*mut u32>;

/// Compile result for two-word transfers (MCRR/MRRC); the pair is (low word, high word).
pub type CallbackOrAccessTwoWords = CallbackOrAccess<[*mut u32; 2]>;

/// Callbacks the engine requires from its embedder.
pub trait UserCallbacks {
    /// Reads one byte of guest memory.
    fn memory_read8(&mut self, vaddr: u32) -> u8;
    /// Reads a halfword of guest memory.
    fn memory_read16(&mut self, vaddr: u32) -> u16;
    /// Reads a word of guest memory.
    fn memory_read32(&mut self, vaddr: u32) -> u32;
    /// Reads a doubleword of guest memory.
    fn memory_read64(&mut self, vaddr: u32) -> u64;

    /// Writes one byte of guest memory.
    fn memory_write8(&mut self, vaddr: u32, value: u8);
    /// Writes a halfword of guest memory.
    fn memory_write16(&mut self, vaddr: u32, value: u16);
    /// Writes a word of guest memory.
    fn memory_write32(&mut self, vaddr: u32, value: u32);
    /// Writes a doubleword of guest memory.
    fn memory_write64(&mut self, vaddr: u32, value: u64);

    /// Whether `vaddr` lies in memory the guest can never write. Constant folding of
    /// loads from such memory is allowed.
    fn is_read_only_memory(&mut self, _vaddr: u32) -> bool {
        false
    }

    /// Asks for `num_instructions` starting at `pc` to be interpreted because the engine
    /// cannot translate them.
    fn interpreter_fallback(&mut self, pc: u32, num_instructions: usize);

    /// The guest executed `SVC #swi`.
    fn call_svc(&mut self, swi: u32);

    /// The guest raised `exception` at `pc`.
    fn exception_raised(&mut self, pc: u32, exception: Exception);

    /// Accounts `ticks` executed cycles against the quota.
    fn add_ticks(&mut self, ticks: u64);

    /// Remaining cycle quota; the engine returns from `run` once this reaches zero.
    fn get_ticks_remaining(&mut self) -> u64;
}

/// Compile-time dispatch for one coprocessor slot.
///
/// Invoked while the engine translates a block, not while it executes it.
pub trait Coprocessor {
    /// CDP / CDP2.
    fn compile_internal_operation(
        &mut self,
        two: bool,
        opc1: u32,
        cr_d: CoprocReg,
        cr_n: CoprocReg,
        cr_m: CoprocReg,
        opc2: u32,
    ) -> Option<Callback>;

    /// MCR / MCR2.
    fn compile_send_one_word(
        &mut self,
        two: bool,
        opc1: u32,
        cr_n: CoprocReg,
        cr_m: CoprocReg,
        opc2: u32,
    ) -> CallbackOrAccessOneWord;

    /// MCRR / MCRR2.
    fn compile_send_two_words(&mut self, two: bool, opc: u32, cr_m: CoprocReg)
    -> CallbackOrAccessTwoWords;

    /// MRC / MRC2.
    fn compile_get_one_word(
        &mut self,
        two: bool,
        opc1: u32,
        cr_n: CoprocReg,
        cr_m: CoprocReg,
        opc2: u32,
    ) -> CallbackOrAccessOneWord;

    /// MRRC / MRRC2.
    fn compile_get_two_words(&mut self, two: bool, opc: u32, cr_m: CoprocReg)
    -> CallbackOrAccessTwoWords;

    /// LDC / LDC2. `option` is present for the unindexed addressing form.
    fn compile_load_words(
        &mut self,
        two: bool,
        long_transfer: bool,
        cr_d: CoprocReg,
        option: Option<u8>,
    ) -> Option<Callback>;

    /// STC / STC2. `option` is present for the unindexed addressing form.
    fn compile_store_words(
        &mut self,
        two: bool,
        long_transfer: bool,
        cr_d: CoprocReg,
        option: Option<u8>,
    ) -> Option<Callback>;
}

/// Coprocessor slots as handed to the engine.
pub type CoprocessorSlots = [Option<Box<dyn Coprocessor>>; NUM_COPROCESSORS];

/// Everything the engine needs to be constructed.
pub struct UserConfig {
    /// Memory, trap and tick callbacks.
    pub callbacks: Box<dyn UserCallbacks>,
    /// Fast-path page table; `None` routes every access through `callbacks`.
    pub page_table: Option<NonNull<PageTable>>,
    /// Per-slot coprocessors; `None` means the coprocessor is not implemented.
    pub coprocessors: CoprocessorSlots,
    /// Engine tunables.
    pub options: Options,
}

impl fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots: Vec<usize> = self
            .coprocessors
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|_| i))
            .collect();
        f.debug_struct("UserConfig")
            .field("page_table", &self.page_table)
            .field("coprocessors", &slots)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// A constructed engine instance.
///
/// All methods take `&self`; implementations keep their mutable state behind interior
/// mutability so that [`halt_execution`](Engine::halt_execution) can be called from a
/// callback nested inside [`run`](Engine::run).
pub trait Engine {
    /// Executes guest code until the tick quota is exhausted or a halt is requested.
    fn run(&self);

    /// Requests that `run` return at the next safe boundary.
    fn halt_execution(&self);

    /// Live pointer to the core register file.
    fn regs(&self) -> NonNull<Regs>;

    /// Live pointer to the extension register file.
    fn ext_regs(&self) -> NonNull<ExtRegs>;

    /// Current program status register.
    fn cpsr(&self) -> u32;

    /// Replaces the program status register.
    fn set_cpsr(&self, value: u32);

    /// Current floating-point status and control register.
    fn fpscr(&self) -> u32;

    /// Replaces the floating-point status and control register.
    fn set_fpscr(&self, value: u32);
}
