//! Memory and exception callback bridge.
//!
//! [`Callbacks`] is the flat table a foreign caller fills in. [`CallbackBridge`] implements
//! the engine's [`UserCallbacks`] by forwarding every call to that table together with
//! the wrapper handle. Forwarding is exact: no buffering, no retries, argument order and
//! widths are preserved.
//!
//! Required entries are plain function pointers; a null entry coming from C is a contract
//! violation. Only `is_read_only_memory` may be null, in which case all memory is
//! reported writable.

use crate::engine::{Exception, UserCallbacks};
use crate::error::{Fatal, fatal};
use crate::wrapper::{HandleSlot, Jit};

/// Reads `T` from guest memory at `vaddr`.
pub type MemoryReadFn<T> = unsafe extern "C" fn(jit: *mut Jit, vaddr: u32) -> T;
/// Writes `value` to guest memory at `vaddr`.
pub type MemoryWriteFn<T> = unsafe extern "C" fn(jit: *mut Jit, vaddr: u32, value: T);
/// Reports whether `vaddr` is read-only.
pub type IsReadOnlyMemoryFn = unsafe extern "C" fn(jit: *mut Jit, vaddr: u32) -> bool;
/// Handles `SVC #swi`.
pub type CallSvcFn = unsafe extern "C" fn(jit: *mut Jit, swi: u32);
/// Handles an exception raised at `pc`.
pub type ExceptionRaisedFn = unsafe extern "C" fn(jit: *mut Jit, pc: u32, exception: Exception);
/// Accounts executed ticks.
pub type AddTicksFn = unsafe extern "C" fn(jit: *mut Jit, ticks: u64);
/// Returns the remaining tick quota.
pub type GetTicksRemainingFn = unsafe extern "C" fn(jit: *mut Jit) -> u64;

/// Flat callback table supplied at construction. Copied into the bridge, never mutated.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Callbacks {
    /// 8-bit read.
    pub read8: MemoryReadFn<u8>,
    /// 16-bit read.
    pub read16: MemoryReadFn<u16>,
    /// 32-bit read.
    pub read32: MemoryReadFn<u32>,
    /// 64-bit read.
    pub read64: MemoryReadFn<u64>,

    /// 8-bit write.
    pub write8: MemoryWriteFn<u8>,
    /// 16-bit write.
    pub write16: MemoryWriteFn<u16>,
    /// 32-bit write.
    pub write32: MemoryWriteFn<u32>,
    /// 64-bit write.
    pub write64: MemoryWriteFn<u64>,

    /// Optional; `None` (a null pointer from C) means nothing is read-only.
    pub is_read_only_memory: Option<IsReadOnlyMemoryFn>,
    /// Supervisor call trap.
    pub call_svc: CallSvcFn,
    /// Exception handler.
    pub exception_raised: ExceptionRaisedFn,
    /// Tick accounting.
    pub add_ticks: AddTicksFn,
    /// Remaining tick quota.
    pub get_ticks_remaining: GetTicksRemainingFn,
}

/// Implements [`UserCallbacks`] on top of a [`Callbacks`] table.
#[derive(Debug)]
pub struct CallbackBridge {
    table: Callbacks,
    jit: HandleSlot,
}

impl CallbackBridge {
    /// Creates a bridge over `table` that reports the handle bound into `jit`.
    pub const fn new(table: Callbacks, jit: HandleSlot) -> Self {
        Self { table, jit }
    }
}

// SAFETY (all forwarding calls below): the table entries are caller-supplied `extern "C"`
// functions that accept the wrapper handle; the handle slot is bound before the engine
// can run, and `HandleSlot::get` aborts otherwise.
impl UserCallbacks for CallbackBridge {
    fn memory_read8(&mut self, vaddr: u32) -> u8 {
        unsafe { (self.table.read8)(self.jit.get(), vaddr) }
    }

    fn memory_read16(&mut self, vaddr: u32) -> u16 {
        unsafe { (self.table.read16)(self.jit.get(), vaddr) }
    }

    fn memory_read32(&mut self, vaddr: u32) -> u32 {
        unsafe { (self.table.read32)(self.jit.get(), vaddr) }
    }

    fn memory_read64(&mut self, vaddr: u32) -> u64 {
        unsafe { (self.table.read64)(self.jit.get(), vaddr) }
    }

    fn memory_write8(&mut self, vaddr: u32, value: u8) {
        unsafe { (self.table.write8)(self.jit.get(), vaddr, value) }
    }

    fn memory_write16(&mut self, vaddr: u32, value: u16) {
        unsafe { (self.table.write16)(self.jit.get(), vaddr, value) }
    }

    fn memory_write32(&mut self, vaddr: u32, value: u32) {
        unsafe { (self.table.write32)(self.jit.get(), vaddr, value) }
    }

    fn memory_write64(&mut self, vaddr: u32, value: u64) {
        unsafe { (self.table.write64)(self.jit.get(), vaddr, value) }
    }

    fn is_read_only_memory(&mut self, vaddr: u32) -> bool {
        match self.table.is_read_only_memory {
            Some(is_read_only) => unsafe { is_read_only(self.jit.get(), vaddr) },
            None => false,
        }
    }

    fn interpreter_fallback(&mut self, pc: u32, num_instructions: usize) {
        fatal(Fatal::InterpreterFallback {
            pc,
            num_instructions,
        })
    }

    fn call_svc(&mut self, swi: u32) {
        unsafe { (self.table.call_svc)(self.jit.get(), swi) }
    }

    fn exception_raised(&mut self, pc: u32, exception: Exception) {
        unsafe { (self.table.exception_raised)(self.jit.get(), pc, exception) }
    }

    fn add_ticks(&mut self, ticks: u64) {
        unsafe { (self.table.add_ticks)(self.jit.get(), ticks) }
    }

    fn get_ticks_remaining(&mut self) -> u64 {
        unsafe { (self.table.get_ticks_remaining)(self.jit.get()) }
    }
}
