//! C ABI surface.
//!
//! Every function takes the [`Jit`] handle returned by the constructor. The adapter trusts
//! its caller: a null or dangling handle, or a null required table entry, is undefined
//! behaviour rather than a reported error.
//!
//! The constructor depends on the concrete engine and is generated in the crate that
//! links one, with [`export_engine!`](crate::export_engine):
//!
//! ```ignore
//! a32jit_bridge::export_engine!(my_engine::Jit::new);
//! ```
//!
//! which emits
//!
//! ```c
//! Jit *a32jit_new(void *user_data, const Callbacks *callbacks,
//!                 PageTable *page_table,                     /* nullable */
//!                 const FfiOption_CoprocessorCallbacks (*coprocessors)[16]); /* nullable */
//! ```

use std::ffi::c_void;
use std::ptr::NonNull;

use crate::callbacks::Callbacks;
use crate::coprocessor::CoprocessorCallbacks;
use crate::engine::{Engine, NUM_COPROCESSORS, PageTable, UserConfig};
use crate::error::{EngineError, Fatal, fatal};
use crate::tagged::FfiOption;
use crate::wrapper::{Jit, JitWrapper, OwnedWrapper};

/// Coprocessor tables as passed by C callers.
pub type CoprocessorTables = [FfiOption<CoprocessorCallbacks>; NUM_COPROCESSORS];

/// Shared body of the generated `a32jit_new`.
///
/// Copies the callback table, takes ownership of every populated coprocessor slot and
/// builds the wrapper. Engine construction failure takes the fatal path.
///
/// # Safety
///
/// `callbacks` must point to a fully populated table. `page_table`, if non-null, must
/// outlive the returned handle. `coprocessors`, if non-null, must point to 16 entries.
pub unsafe fn construct<E, F>(
    user_data: *mut c_void,
    callbacks: *const Callbacks,
    page_table: *mut PageTable,
    coprocessors: *const CoprocessorTables,
    build: F,
) -> *mut Jit
where
    E: Engine + 'static,
    F: FnOnce(UserConfig) -> Result<E, EngineError>,
{
    // SAFETY: required non-null per the contract above.
    let callbacks = unsafe { *callbacks };
    let tables = if coprocessors.is_null() {
        [None; NUM_COPROCESSORS]
    } else {
        // SAFETY: non-null tables point to 16 entries.
        unsafe { *coprocessors }.map(FfiOption::into_option)
    };

    let built = JitWrapper::builder(user_data, callbacks)
        .page_table(NonNull::new(page_table))
        .coprocessors(tables)
        .build(build);
    match built {
        Ok(wrapper) => wrapper.into_raw(),
        Err(err) => {
            tracing::error!(%err, "a32jit_new");
            fatal(Fatal::ConstructionFailed)
        }
    }
}

/// Destroys the wrapper, its engine and every attached coprocessor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn a32jit_delete(jit: *mut Jit) {
    // SAFETY: `jit` came from `a32jit_new` and is not used afterwards.
    drop(unsafe { OwnedWrapper::from_raw(jit) });
}

/// Returns the opaque context given to the constructor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn a32jit_get_userdata(jit: *mut Jit) -> *mut c_void {
    unsafe { JitWrapper::from_handle(jit) }.user_data()
}

/// Runs until the engine stops. Re-entering from a callback is fatal.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn a32jit_run(jit: *mut Jit) {
    if unsafe { JitWrapper::from_handle(jit) }.run().is_err() {
        fatal(Fatal::ReentrantRun);
    }
}

/// Requests a halt at the next safe boundary. Callable from callbacks.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn a32jit_halt(jit: *mut Jit) {
    unsafe { JitWrapper::from_handle(jit) }.halt();
}

/// Pointer to the 16 core registers.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn a32jit_regs(jit: *mut Jit) -> *mut u32 {
    unsafe { JitWrapper::from_handle(jit) }.regs().as_ptr().cast()
}

/// Pointer to the 64 extension register words.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn a32jit_extregs(jit: *mut Jit) -> *mut u32 {
    unsafe { JitWrapper::from_handle(jit) }.ext_regs().as_ptr().cast()
}

/// Current CPSR.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn a32jit_cpsr(jit: *mut Jit) -> u32 {
    unsafe { JitWrapper::from_handle(jit) }.cpsr()
}

/// Replaces the CPSR.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn a32jit_set_cpsr(jit: *mut Jit, cpsr: u32) {
    unsafe { JitWrapper::from_handle(jit) }.set_cpsr(cpsr);
}

/// Current FPSCR.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn a32jit_fpscr(jit: *mut Jit) -> u32 {
    unsafe { JitWrapper::from_handle(jit) }.fpscr()
}

/// Replaces the FPSCR.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn a32jit_set_fpscr(jit: *mut Jit, fpscr: u32) {
    unsafe { JitWrapper::from_handle(jit) }.set_fpscr(fpscr);
}

/// Emits the `a32jit_new` constructor for a concrete engine.
///
/// `$build` is any expression usable as
/// `FnOnce(UserConfig) -> Result<E, EngineError>` with `E: Engine + 'static`.
#[macro_export]
macro_rules! export_engine {
    ($build:expr) => {
        /// Constructs a wrapper; see `a32jit_bridge::ffi::construct`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn a32jit_new(
            user_data: *mut ::std::ffi::c_void,
            callbacks: *const $crate::callbacks::Callbacks,
            page_table: *mut $crate::engine::PageTable,
            coprocessors: *const $crate::ffi::CoprocessorTables,
        ) -> *mut $crate::wrapper::Jit {
            // SAFETY: forwarded verbatim from the C caller.
            unsafe {
                $crate::ffi::construct(user_data, callbacks, page_table, coprocessors, $build)
            }
        }
    };
}
