//! Coprocessor operation bridge.
//!
//! One [`CoprocessorBridge`] serves one populated coprocessor slot. The engine calls it
//! while translating a block to learn how each coprocessor instruction is handled; the
//! bridge forwards to the caller's [`CoprocessorCallbacks`] and decodes the tagged result.
//! The caller's choice between "unsupported", "deferred callback" and "direct access" is
//! passed through untouched.
//!
//! Dropping the bridge calls the table's `destroy` entry exactly once with its own
//! per-coprocessor context. Bridges are owned by the engine, so destruction happens as
//! part of engine teardown, after the last compile call.

use std::ffi::c_void;

use tracing::trace;

use crate::engine::{
    Callback, CallbackOrAccessOneWord, CallbackOrAccessTwoWords, CoprocReg, Coprocessor,
};
use crate::tagged::{
    FfiCallback, FfiCallbackOrAccessOneWord, FfiCallbackOrAccessTwoWords, FfiOption,
};
use crate::wrapper::HandleSlot;

/// CDP / CDP2 compiler.
pub type CompileInternalOperationFn = unsafe extern "C" fn(
    this: *mut c_void,
    two: bool,
    opc1: u32,
    cr_d: CoprocReg,
    cr_n: CoprocReg,
    cr_m: CoprocReg,
    opc2: u32,
) -> FfiCallback;

/// MCR / MCR2 compiler.
pub type CompileSendOneWordFn = unsafe extern "C" fn(
    this: *mut c_void,
    two: bool,
    opc1: u32,
    cr_n: CoprocReg,
    cr_m: CoprocReg,
    opc2: u32,
) -> FfiCallbackOrAccessOneWord;

/// MCRR / MCRR2 compiler.
pub type CompileSendTwoWordsFn = unsafe extern "C" fn(
    this: *mut c_void,
    two: bool,
    opc: u32,
    cr_m: CoprocReg,
) -> FfiCallbackOrAccessTwoWords;

/// MRC / MRC2 compiler.
pub type CompileGetOneWordFn = unsafe extern "C" fn(
    this: *mut c_void,
    two: bool,
    opc1: u32,
    cr_n: CoprocReg,
    cr_m: CoprocReg,
    opc2: u32,
) -> FfiCallbackOrAccessOneWord;

/// MRRC / MRRC2 compiler.
pub type CompileGetTwoWordsFn = unsafe extern "C" fn(
    this: *mut c_void,
    two: bool,
    opc: u32,
    cr_m: CoprocReg,
) -> FfiCallbackOrAccessTwoWords;

/// LDC / LDC2 and STC / STC2 compiler.
pub type CompileTransferWordsFn = unsafe extern "C" fn(
    this: *mut c_void,
    two: bool,
    long_transfer: bool,
    cr_d: CoprocReg,
    option: FfiOption<u8>,
) -> FfiCallback;

/// Releases the per-coprocessor context.
pub type DestroyFn = unsafe extern "C" fn(this: *mut c_void);

/// Flat table for one coprocessor slot.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CoprocessorCallbacks {
    /// Per-coprocessor context, independent from the wrapper's user data.
    pub this: *mut c_void,
    /// See [`CompileInternalOperationFn`].
    pub compile_internal_operation: CompileInternalOperationFn,
    /// See [`CompileSendOneWordFn`].
    pub compile_send_one_word: CompileSendOneWordFn,
    /// See [`CompileSendTwoWordsFn`].
    pub compile_send_two_words: CompileSendTwoWordsFn,
    /// See [`CompileGetOneWordFn`].
    pub compile_get_one_word: CompileGetOneWordFn,
    /// See [`CompileGetTwoWordsFn`].
    pub compile_get_two_words: CompileGetTwoWordsFn,
    /// LDC.
    pub compile_load_words: CompileTransferWordsFn,
    /// STC.
    pub compile_store_words: CompileTransferWordsFn,
    /// Called once with `this` when the slot is torn down.
    pub destroy: DestroyFn,
}

impl CoprocessorCallbacks {
    /// Hands `this` back to the table's `destroy` entry.
    ///
    /// # Safety
    ///
    /// Called at most once per context, after the last compile call on it.
    pub(crate) unsafe fn release(self) {
        // SAFETY: `destroy` accepts the `this` it was paired with.
        unsafe { (self.destroy)(self.this) }
    }
}

/// Implements the engine's [`Coprocessor`] for one slot.
#[derive(Debug)]
pub struct CoprocessorBridge {
    index: usize,
    table: CoprocessorCallbacks,
    jit: HandleSlot,
}

impl CoprocessorBridge {
    /// Wraps `table` for coprocessor `index`. Takes ownership of `table.this`.
    pub const fn new(index: usize, table: CoprocessorCallbacks, jit: HandleSlot) -> Self {
        Self { index, table, jit }
    }

    /// Coprocessor number this bridge serves.
    pub const fn index(&self) -> usize {
        self.index
    }
}

// SAFETY (all forwarding calls below): table entries are caller-supplied `extern "C"`
// functions taking `this`, which stays valid until `destroy` runs in `Drop`.
impl Coprocessor for CoprocessorBridge {
    fn compile_internal_operation(
        &mut self,
        two: bool,
        opc1: u32,
        cr_d: CoprocReg,
        cr_n: CoprocReg,
        cr_m: CoprocReg,
        opc2: u32,
    ) -> Option<Callback> {
        let table = &self.table;
        let raw = unsafe {
            (table.compile_internal_operation)(table.this, two, opc1, cr_d, cr_n, cr_m, opc2)
        };
        raw.decode(self.jit.get())
    }

    fn compile_send_one_word(
        &mut self,
        two: bool,
        opc1: u32,
        cr_n: CoprocReg,
        cr_m: CoprocReg,
        opc2: u32,
    ) -> CallbackOrAccessOneWord {
        let table = &self.table;
        let raw = unsafe { (table.compile_send_one_word)(table.this, two, opc1, cr_n, cr_m, opc2) };
        raw.decode(self.jit.get())
    }

    fn compile_send_two_words(
        &mut self,
        two: bool,
        opc: u32,
        cr_m: CoprocReg,
    ) -> CallbackOrAccessTwoWords {
        let table = &self.table;
        let raw = unsafe { (table.compile_send_two_words)(table.this, two, opc, cr_m) };
        raw.decode(self.jit.get())
    }

    fn compile_get_one_word(
        &mut self,
        two: bool,
        opc1: u32,
        cr_n: CoprocReg,
        cr_m: CoprocReg,
        opc2: u32,
    ) -> CallbackOrAccessOneWord {
        let table = &self.table;
        let raw = unsafe { (table.compile_get_one_word)(table.this, two, opc1, cr_n, cr_m, opc2) };
        raw.decode(self.jit.get())
    }

    fn compile_get_two_words(
        &mut self,
        two: bool,
        opc: u32,
        cr_m: CoprocReg,
    ) -> CallbackOrAccessTwoWords {
        let table = &self.table;
        let raw = unsafe { (table.compile_get_two_words)(table.this, two, opc, cr_m) };
        raw.decode(self.jit.get())
    }

    fn compile_load_words(
        &mut self,
        two: bool,
        long_transfer: bool,
        cr_d: CoprocReg,
        option: Option<u8>,
    ) -> Option<Callback> {
        let table = &self.table;
        let option = option.into();
        let raw =
            unsafe { (table.compile_load_words)(table.this, two, long_transfer, cr_d, option) };
        raw.decode(self.jit.get())
    }

    fn compile_store_words(
        &mut self,
        two: bool,
        long_transfer: bool,
        cr_d: CoprocReg,
        option: Option<u8>,
    ) -> Option<Callback> {
        let table = &self.table;
        let option = option.into();
        let raw =
            unsafe { (table.compile_store_words)(table.this, two, long_transfer, cr_d, option) };
        raw.decode(self.jit.get())
    }
}

impl Drop for CoprocessorBridge {
    fn drop(&mut self) {
        trace!(slot = self.index, "destroying coprocessor");
        // SAFETY: `this` is owned by this bridge and `destroy` runs exactly once, here.
        unsafe { self.table.release() }
    }
}
