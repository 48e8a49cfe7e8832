//! Engine lifecycle wrapper.
//!
//! A [`JitWrapper`] aggregates the caller's opaque context with one engine instance. Its
//! address is the [`Jit`] handle given to the caller and threaded through every callback,
//! so the wrapper never moves once constructed.
//!
//! Construction is two-phase. The bridges must exist before the engine (they are part of
//! its configuration) but callbacks must report the wrapper, which only exists after the
//! engine. Every bridge therefore shares a [`HandleSlot`] that is bound to the wrapper
//! address right after allocation and before any operation that can fire a callback.

use std::cell::Cell;
use std::ffi::c_void;
use std::marker::{PhantomData, PhantomPinned};
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::rc::Rc;

use tracing::debug;

use crate::callbacks::{CallbackBridge, Callbacks};
use crate::config::Options;
use crate::coprocessor::{CoprocessorBridge, CoprocessorCallbacks};
use crate::engine::{Coprocessor, Engine, ExtRegs, NUM_COPROCESSORS, PageTable, Regs, UserConfig};
use crate::error::{EngineError, Error, Fatal, Result, fatal};

/// Opaque handle to a wrapper, as seen by foreign callers.
#[repr(C)]
#[derive(Debug)]
pub struct Jit {
    _opaque: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// Lifecycle state of a wrapper.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Constructed, never run.
    Constructed,
    /// Inside [`JitWrapper::run`].
    Running,
    /// `run` has returned at least once.
    Halted,
}

/// Back-reference from the bridges to the wrapper they serve.
///
/// Created empty, cloned into every bridge, bound exactly once.
#[derive(Clone, Debug)]
pub struct HandleSlot(Rc<Cell<*mut Jit>>);

impl Default for HandleSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleSlot {
    /// Creates an unbound slot.
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(ptr::null_mut())))
    }

    /// Binds the slot to `jit`.
    ///
    /// Must be called once, before the engine can invoke any callback.
    pub fn bind(&self, jit: *mut Jit) {
        debug_assert!(self.0.get().is_null(), "handle slot bound twice");
        self.0.set(jit);
    }

    /// Whether [`bind`](Self::bind) has been called.
    pub fn is_bound(&self) -> bool {
        !self.0.get().is_null()
    }

    /// Returns the bound handle. Takes the fatal path if the slot is still unbound.
    #[inline]
    pub fn get(&self) -> *mut Jit {
        let jit = self.0.get();
        if jit.is_null() {
            fatal(Fatal::UnboundHandle);
        }
        jit
    }
}

/// The caller's context plus the engine instance it drives.
pub struct JitWrapper {
    user_data: *mut c_void,
    state: Cell<RunState>,
    engine: Box<dyn Engine>,
}

impl std::fmt::Debug for JitWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitWrapper")
            .field("user_data", &self.user_data)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl JitWrapper {
    /// Starts building a wrapper around `callbacks`, passing `user_data` through unchanged.
    pub fn builder(user_data: *mut c_void, callbacks: Callbacks) -> JitBuilder {
        JitBuilder::new(user_data, callbacks)
    }

    /// Reborrows the wrapper behind a handle.
    ///
    /// # Safety
    ///
    /// `jit` must come from [`OwnedWrapper::as_handle`] or [`OwnedWrapper::into_raw`] and the
    /// wrapper must not have been destroyed.
    pub const unsafe fn from_handle<'a>(jit: *mut Jit) -> &'a Self {
        // SAFETY: the handle is the address of a live, never-moved `JitWrapper`.
        unsafe { &*jit.cast::<Self>() }
    }

    /// The opaque context supplied at construction, unchanged.
    pub const fn user_data(&self) -> *mut c_void {
        self.user_data
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state.get()
    }

    /// Runs the engine on the calling thread until it stops.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] when called from inside one of this wrapper's own
    /// callbacks. No other error is reported.
    pub fn run(&self) -> Result<()> {
        if self.state.get() == RunState::Running {
            return Err(Error::AlreadyRunning);
        }
        self.state.set(RunState::Running);
        debug!(user_data = ?self.user_data, "engine run");
        self.engine.run();
        self.state.set(RunState::Halted);
        debug!(user_data = ?self.user_data, "engine returned");
        Ok(())
    }

    /// Asks the running engine to stop at its next safe boundary.
    ///
    /// Safe to call from inside a callback.
    pub fn halt(&self) {
        self.engine.halt_execution();
    }

    /// Live pointer to the core register file.
    ///
    /// Valid while the wrapper is alive. Must not be dereferenced while the engine is
    /// executing guest code.
    pub fn regs(&self) -> NonNull<Regs> {
        self.engine.regs()
    }

    /// Live pointer to the extension register file, under the same rules as [`regs`](Self::regs).
    pub fn ext_regs(&self) -> NonNull<ExtRegs> {
        self.engine.ext_regs()
    }

    /// Current program status register.
    pub fn cpsr(&self) -> u32 {
        self.engine.cpsr()
    }

    /// Replaces the program status register.
    pub fn set_cpsr(&self, value: u32) {
        self.engine.set_cpsr(value);
    }

    /// Current floating-point status and control register.
    pub fn fpscr(&self) -> u32 {
        self.engine.fpscr()
    }

    /// Replaces the floating-point status and control register.
    pub fn set_fpscr(&self, value: u32) {
        self.engine.set_fpscr(value);
    }
}

impl Drop for JitWrapper {
    fn drop(&mut self) {
        debug!(user_data = ?self.user_data, "destroying engine instance");
    }
}

/// Collects the construction inputs of a [`JitWrapper`].
#[derive(Debug)]
pub struct JitBuilder {
    user_data: *mut c_void,
    callbacks: Callbacks,
    page_table: Option<NonNull<PageTable>>,
    coprocessors: [Option<CoprocessorCallbacks>; NUM_COPROCESSORS],
    options: Options,
}

impl JitBuilder {
    fn new(user_data: *mut c_void, callbacks: Callbacks) -> Self {
        Self {
            user_data,
            callbacks,
            page_table: None,
            coprocessors: [None; NUM_COPROCESSORS],
            options: Options::default(),
        }
    }

    /// Uses `page_table` for fast-path memory access. The table stays caller-owned.
    pub const fn page_table(mut self, page_table: Option<NonNull<PageTable>>) -> Self {
        self.page_table = page_table;
        self
    }

    /// Installs a coprocessor table in `slot`.
    ///
    /// Ownership of `table.this` moves to the builder. `table.destroy` is called on it
    /// exactly once, whether the table ends up in an engine, is replaced by a later table
    /// for the same slot, or is still held when the builder is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCoprocessorSlot`] if `slot` is not in 0-15. `table` and
    /// every table already held are destroyed before returning.
    pub fn coprocessor(mut self, slot: usize, table: CoprocessorCallbacks) -> Result<Self> {
        let Some(entry) = self.coprocessors.get_mut(slot) else {
            // SAFETY: `table` was handed over to the builder and is dropped here, unused.
            unsafe { table.release() };
            return Err(Error::InvalidCoprocessorSlot(slot));
        };
        if let Some(previous) = entry.replace(table) {
            debug!(slot, "replacing coprocessor table");
            // SAFETY: `previous` was owned by the builder and is no longer reachable.
            unsafe { previous.release() };
        }
        Ok(self)
    }

    /// Replaces every coprocessor slot at once, destroying the tables held so far.
    pub fn coprocessors(
        mut self,
        tables: [Option<CoprocessorCallbacks>; NUM_COPROCESSORS],
    ) -> Self {
        self.release_coprocessors();
        self.coprocessors = tables;
        self
    }

    /// Engine options forwarded unchanged.
    pub const fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Builds the bridges, constructs the engine with `construct`, allocates the wrapper
    /// and binds the bridges' back-reference to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineConstruction`] if `construct` fails. The coprocessor tables
    /// have been destroyed by then.
    pub fn build<E, F>(mut self, construct: F) -> Result<OwnedWrapper>
    where
        E: Engine + 'static,
        F: FnOnce(UserConfig) -> std::result::Result<E, EngineError>,
    {
        let slot = HandleSlot::new();

        let tables = std::mem::replace(&mut self.coprocessors, [None; NUM_COPROCESSORS]);
        let mut coprocessors: [Option<Box<dyn Coprocessor>>; NUM_COPROCESSORS] = Default::default();
        let mut installed = 0usize;
        for (index, table) in tables.into_iter().enumerate() {
            if let Some(table) = table {
                let bridge = CoprocessorBridge::new(index, table, slot.clone());
                coprocessors[index] = Some(Box::new(bridge));
                installed += 1;
            }
        }

        let config = UserConfig {
            callbacks: Box::new(CallbackBridge::new(self.callbacks, slot.clone())),
            page_table: self.page_table,
            coprocessors,
            options: std::mem::take(&mut self.options),
        };
        debug!(
            coprocessors = installed,
            page_table = config.page_table.is_some(),
            "constructing engine instance"
        );

        let engine = construct(config)?;
        let wrapper = Box::new(JitWrapper {
            user_data: self.user_data,
            state: Cell::new(RunState::Constructed),
            engine: Box::new(engine),
        });
        let raw = NonNull::from(Box::leak(wrapper));
        slot.bind(raw.as_ptr().cast());
        Ok(OwnedWrapper { ptr: raw })
    }

    fn release_coprocessors(&mut self) {
        for (slot, table) in self.coprocessors.iter_mut().enumerate() {
            if let Some(table) = table.take() {
                debug!(slot, "releasing unbuilt coprocessor table");
                // SAFETY: taken out of the builder, so released exactly once.
                unsafe { table.release() };
            }
        }
    }
}

impl Drop for JitBuilder {
    fn drop(&mut self) {
        self.release_coprocessors();
    }
}

/// Owning pointer to a heap-pinned [`JitWrapper`].
///
/// Dropping it destroys the engine, which in turn destroys every coprocessor bridge.
#[derive(Debug)]
pub struct OwnedWrapper {
    ptr: NonNull<JitWrapper>,
}

impl OwnedWrapper {
    /// Handle to pass across the boundary. Stays owned by `self`.
    pub const fn as_handle(&self) -> *mut Jit {
        self.ptr.as_ptr().cast()
    }

    /// Releases ownership to a foreign caller.
    pub const fn into_raw(self) -> *mut Jit {
        let jit = self.as_handle();
        std::mem::forget(self);
        jit
    }

    /// Retakes ownership of a handle produced by [`into_raw`](Self::into_raw).
    ///
    /// # Safety
    ///
    /// `jit` must come from `into_raw`, and must not be used again once the returned value
    /// is dropped.
    pub const unsafe fn from_raw(jit: *mut Jit) -> Self {
        Self {
            // SAFETY: `into_raw` never yields null.
            ptr: unsafe { NonNull::new_unchecked(jit.cast()) },
        }
    }
}

impl Deref for OwnedWrapper {
    type Target = JitWrapper;

    fn deref(&self) -> &JitWrapper {
        // SAFETY: `ptr` came from `Box::leak` and is only freed in `drop`.
        unsafe { self.ptr.as_ref() }
    }
}

impl Drop for OwnedWrapper {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `Box::leak` and this is the unique owner.
        drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    }
}
