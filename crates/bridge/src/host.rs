//! Caller-side helpers for Rust hosts.
//!
//! Foreign callers fill in the flat tables by hand. A Rust caller can instead implement
//! [`HostCallbacks`] or [`HostCoprocessor`] and let this module generate the `extern "C"`
//! trampolines:
//! 1. **Memory and traps:** [`Callbacks::for_host`] recovers the host from the wrapper's
//!    user data on every call.
//! 2. **Coprocessors:** [`CoprocessorCallbacks::from_host`] boxes the implementation as the
//!    per-coprocessor context and installs a destructor that drops it.
//! 3. **Deferred operations:** [`RawCallback::for_handler`] turns a [`CallbackHandler`] and
//!    its context into a callback the engine invokes at execution time.

use std::ffi::c_void;

use crate::callbacks::Callbacks;
use crate::coprocessor::CoprocessorCallbacks;
use crate::engine::{CoprocReg, Exception};
use crate::tagged::{
    FfiCallback, FfiCallbackOrAccess, FfiCallbackOrAccessOneWord, FfiCallbackOrAccessTwoWords,
    FfiOption, RawCallback,
};
use crate::wrapper::{Jit, JitWrapper};

/// Fixed-width value moved between guest memory and the engine.
pub trait Primitive: Copy + Default {
    /// Width in bytes.
    const SIZE: usize;

    /// Decodes a little-endian value from the first `SIZE` bytes of `bytes`.
    fn read_le(bytes: &[u8]) -> Self;

    /// Encodes `self` little-endian into the first `SIZE` bytes of `bytes`.
    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! impl_primitive {
    ($($ty:ty),*) => {
        $(
            impl Primitive for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_le_bytes(buf)
                }

                fn write_le(self, bytes: &mut [u8]) {
                    bytes[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_primitive!(u8, u16, u32, u64);

/// Memory, trap and tick handling implemented in Rust.
///
/// The host object is the wrapper's user data: build the wrapper with a pointer to `Self`
/// and the table from [`Callbacks::for_host::<Self>()`](Callbacks::for_host).
pub trait HostCallbacks {
    /// Reads `T` from guest memory.
    fn read<T: Primitive>(&mut self, vaddr: u32) -> T;

    /// Writes `T` to guest memory.
    fn write<T: Primitive>(&mut self, vaddr: u32, value: T);

    /// Whether `vaddr` is read-only. Everything is writable by default.
    fn is_read_only_memory(&mut self, _vaddr: u32) -> bool {
        false
    }

    /// `SVC #swi`. `jit` may be used to inspect registers or halt.
    fn call_svc(&mut self, jit: &JitWrapper, swi: u32);

    /// An exception was raised at `pc`. `jit` may be used to inspect registers or halt.
    fn exception_raised(&mut self, jit: &JitWrapper, pc: u32, exception: Exception);

    /// Accounts executed ticks.
    fn add_ticks(&mut self, ticks: u64);

    /// Remaining tick quota.
    fn get_ticks_remaining(&mut self) -> u64;
}

/// # Safety
///
/// `jit` must be a live wrapper whose user data points to an `H` that is not otherwise
/// borrowed for the duration of the call.
unsafe fn host<'a, H>(jit: *mut Jit) -> &'a mut H {
    unsafe { &mut *JitWrapper::from_handle(jit).user_data().cast::<H>() }
}

unsafe extern "C" fn read_trampoline<H: HostCallbacks, T: Primitive>(
    jit: *mut Jit,
    vaddr: u32,
) -> T {
    unsafe { host::<H>(jit) }.read(vaddr)
}

unsafe extern "C" fn write_trampoline<H: HostCallbacks, T: Primitive>(
    jit: *mut Jit,
    vaddr: u32,
    value: T,
) {
    unsafe { host::<H>(jit) }.write(vaddr, value);
}

unsafe extern "C" fn is_read_only_trampoline<H: HostCallbacks>(
    jit: *mut Jit,
    vaddr: u32,
) -> bool {
    unsafe { host::<H>(jit) }.is_read_only_memory(vaddr)
}

unsafe extern "C" fn call_svc_trampoline<H: HostCallbacks>(jit: *mut Jit, swi: u32) {
    let wrapper = unsafe { JitWrapper::from_handle(jit) };
    unsafe { host::<H>(jit) }.call_svc(wrapper, swi);
}

unsafe extern "C" fn exception_raised_trampoline<H: HostCallbacks>(
    jit: *mut Jit,
    pc: u32,
    exception: Exception,
) {
    let wrapper = unsafe { JitWrapper::from_handle(jit) };
    unsafe { host::<H>(jit) }.exception_raised(wrapper, pc, exception);
}

unsafe extern "C" fn add_ticks_trampoline<H: HostCallbacks>(jit: *mut Jit, ticks: u64) {
    unsafe { host::<H>(jit) }.add_ticks(ticks);
}

unsafe extern "C" fn get_ticks_remaining_trampoline<H: HostCallbacks>(jit: *mut Jit) -> u64 {
    unsafe { host::<H>(jit) }.get_ticks_remaining()
}

impl Callbacks {
    /// Builds a table that forwards every entry to the `H` stored as the wrapper's user data.
    pub fn for_host<H: HostCallbacks>() -> Self {
        Self {
            read8: read_trampoline::<H, u8>,
            read16: read_trampoline::<H, u16>,
            read32: read_trampoline::<H, u32>,
            read64: read_trampoline::<H, u64>,
            write8: write_trampoline::<H, u8>,
            write16: write_trampoline::<H, u16>,
            write32: write_trampoline::<H, u32>,
            write64: write_trampoline::<H, u64>,
            is_read_only_memory: Some(is_read_only_trampoline::<H>),
            call_svc: call_svc_trampoline::<H>,
            exception_raised: exception_raised_trampoline::<H>,
            add_ticks: add_ticks_trampoline::<H>,
            get_ticks_remaining: get_ticks_remaining_trampoline::<H>,
        }
    }
}

/// Coprocessor implemented in Rust. Every operation is unsupported unless overridden.
#[allow(unused_variables)]
pub trait HostCoprocessor {
    /// CDP / CDP2.
    fn compile_internal_operation(
        &self,
        two: bool,
        opc1: u32,
        cr_d: CoprocReg,
        cr_n: CoprocReg,
        cr_m: CoprocReg,
        opc2: u32,
    ) -> FfiCallback {
        FfiCallback::None
    }

    /// MCR / MCR2.
    fn compile_send_one_word(
        &self,
        two: bool,
        opc1: u32,
        cr_n: CoprocReg,
        cr_m: CoprocReg,
        opc2: u32,
    ) -> FfiCallbackOrAccessOneWord {
        FfiCallbackOrAccess::None
    }

    /// MCRR / MCRR2.
    fn compile_send_two_words(
        &self,
        two: bool,
        opc: u32,
        cr_m: CoprocReg,
    ) -> FfiCallbackOrAccessTwoWords {
        FfiCallbackOrAccess::None
    }

    /// MRC / MRC2.
    fn compile_get_one_word(
        &self,
        two: bool,
        opc1: u32,
        cr_n: CoprocReg,
        cr_m: CoprocReg,
        opc2: u32,
    ) -> FfiCallbackOrAccessOneWord {
        FfiCallbackOrAccess::None
    }

    /// MRRC / MRRC2.
    fn compile_get_two_words(
        &self,
        two: bool,
        opc: u32,
        cr_m: CoprocReg,
    ) -> FfiCallbackOrAccessTwoWords {
        FfiCallbackOrAccess::None
    }

    /// LDC / LDC2.
    fn compile_load_words(
        &self,
        two: bool,
        long_transfer: bool,
        cr_d: CoprocReg,
        option: Option<u8>,
    ) -> FfiCallback {
        FfiCallback::None
    }

    /// STC / STC2.
    fn compile_store_words(
        &self,
        two: bool,
        long_transfer: bool,
        cr_d: CoprocReg,
        option: Option<u8>,
    ) -> FfiCallback {
        FfiCallback::None
    }
}

// SAFETY (all coprocessor trampolines): `this` is the `Box<T>` leaked by `from_host`,
// alive until `destroy_trampoline` runs.
unsafe extern "C" fn internal_operation_trampoline<T: HostCoprocessor>(
    this: *mut c_void,
    two: bool,
    opc1: u32,
    cr_d: CoprocReg,
    cr_n: CoprocReg,
    cr_m: CoprocReg,
    opc2: u32,
) -> FfiCallback {
    unsafe { &*this.cast::<T>() }.compile_internal_operation(two, opc1, cr_d, cr_n, cr_m, opc2)
}

unsafe extern "C" fn send_one_word_trampoline<T: HostCoprocessor>(
    this: *mut c_void,
    two: bool,
    opc1: u32,
    cr_n: CoprocReg,
    cr_m: CoprocReg,
    opc2: u32,
) -> FfiCallbackOrAccessOneWord {
    unsafe { &*this.cast::<T>() }.compile_send_one_word(two, opc1, cr_n, cr_m, opc2)
}

unsafe extern "C" fn send_two_words_trampoline<T: HostCoprocessor>(
    this: *mut c_void,
    two: bool,
    opc: u32,
    cr_m: CoprocReg,
) -> FfiCallbackOrAccessTwoWords {
    unsafe { &*this.cast::<T>() }.compile_send_two_words(two, opc, cr_m)
}

unsafe extern "C" fn get_one_word_trampoline<T: HostCoprocessor>(
    this: *mut c_void,
    two: bool,
    opc1: u32,
    cr_n: CoprocReg,
    cr_m: CoprocReg,
    opc2: u32,
) -> FfiCallbackOrAccessOneWord {
    unsafe { &*this.cast::<T>() }.compile_get_one_word(two, opc1, cr_n, cr_m, opc2)
}

unsafe extern "C" fn get_two_words_trampoline<T: HostCoprocessor>(
    this: *mut c_void,
    two: bool,
    opc: u32,
    cr_m: CoprocReg,
) -> FfiCallbackOrAccessTwoWords {
    unsafe { &*this.cast::<T>() }.compile_get_two_words(two, opc, cr_m)
}

unsafe extern "C" fn load_words_trampoline<T: HostCoprocessor>(
    this: *mut c_void,
    two: bool,
    long_transfer: bool,
    cr_d: CoprocReg,
    option: FfiOption<u8>,
) -> FfiCallback {
    let option = option.into_option();
    unsafe { &*this.cast::<T>() }.compile_load_words(two, long_transfer, cr_d, option)
}

unsafe extern "C" fn store_words_trampoline<T: HostCoprocessor>(
    this: *mut c_void,
    two: bool,
    long_transfer: bool,
    cr_d: CoprocReg,
    option: FfiOption<u8>,
) -> FfiCallback {
    let option = option.into_option();
    unsafe { &*this.cast::<T>() }.compile_store_words(two, long_transfer, cr_d, option)
}

unsafe extern "C" fn destroy_trampoline<T: HostCoprocessor>(this: *mut c_void) {
    drop(unsafe { Box::from_raw(this.cast::<T>()) });
}

impl CoprocessorCallbacks {
    /// Builds a table around `coproc`. The box is released by the table's `destroy` entry.
    pub fn from_host<T: HostCoprocessor + 'static>(coproc: Box<T>) -> Self {
        Self {
            this: Box::into_raw(coproc).cast(),
            compile_internal_operation: internal_operation_trampoline::<T>,
            compile_send_one_word: send_one_word_trampoline::<T>,
            compile_send_two_words: send_two_words_trampoline::<T>,
            compile_get_one_word: get_one_word_trampoline::<T>,
            compile_get_two_words: get_two_words_trampoline::<T>,
            compile_load_words: load_words_trampoline::<T>,
            compile_store_words: store_words_trampoline::<T>,
            destroy: destroy_trampoline::<T>,
        }
    }
}

/// Execution-time handler for a deferred coprocessor operation.
pub trait CallbackHandler<C> {
    /// Handles one execution of the compiled instruction.
    fn handle(jit: &JitWrapper, context: &C, arg0: u32, arg1: u32) -> u64;
}

unsafe extern "C" fn handler_trampoline<C, H: CallbackHandler<C>>(
    jit: *mut Jit,
    user_arg: *mut c_void,
    arg0: u32,
    arg1: u32,
) -> u64 {
    // SAFETY: `user_arg` is the `&C` captured by `for_handler` or `for_handler_unchecked`,
    // alive for as long as compiled code can run.
    let context = unsafe { &*user_arg.cast_const().cast::<C>() };
    H::handle(unsafe { JitWrapper::from_handle(jit) }, context, arg0, arg1)
}

impl RawCallback {
    /// Builds a deferred callback that runs `H::handle` with `context`.
    ///
    /// Compiled code may run for as long as the wrapper lives, so `context` must be
    /// `'static`. A borrowed context is rejected:
    ///
    /// ```compile_fail
    /// use a32jit_bridge::{CallbackHandler, JitWrapper, RawCallback};
    ///
    /// struct Scale;
    ///
    /// impl CallbackHandler<u64> for Scale {
    ///     fn handle(_jit: &JitWrapper, context: &u64, arg0: u32, _arg1: u32) -> u64 {
    ///         context * u64::from(arg0)
    ///     }
    /// }
    ///
    /// let callback = {
    ///     let factor = 3u64;
    ///     RawCallback::for_handler::<u64, Scale>(&factor)
    /// };
    /// ```
    pub fn for_handler<C: 'static, H: CallbackHandler<C>>(context: &'static C) -> Self {
        // SAFETY: a `'static` context outlives every wrapper.
        unsafe { Self::for_handler_unchecked::<C, H>(context) }
    }

    /// Like [`for_handler`](Self::for_handler), for a context with a shorter lifetime.
    ///
    /// # Safety
    ///
    /// `context` must outlive every wrapper that may execute code compiled with the
    /// returned callback.
    pub unsafe fn for_handler_unchecked<C, H: CallbackHandler<C>>(context: &C) -> Self {
        Self::new(handler_trampoline::<C, H>, std::ptr::from_ref(context).cast_mut().cast())
    }
}
