//! # Coprocessor Bridge Tests
//!
//! Compile-time decoding through `CoprocessorBridge`, execution of the decoded results by
//! the mock engine, and teardown of per-slot contexts.

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::ptr::NonNull;
use std::rc::Rc;

use a32jit_bridge::config::Options;
use a32jit_bridge::coprocessor::CoprocessorBridge;
use a32jit_bridge::engine::{CallbackOrAccess, CoprocReg, Coprocessor, Exception, NUM_COPROCESSORS};
use a32jit_bridge::error::Error;
use a32jit_bridge::host::{CallbackHandler, HostCoprocessor};
use a32jit_bridge::tagged::{
    FfiCallback, FfiCallbackOrAccess, FfiCallbackOrAccessOneWord, FfiCallbackOrAccessTwoWords,
    RawCallback,
};
use a32jit_bridge::wrapper::{HandleSlot, Jit, JitWrapper};
use a32jit_bridge::{Callbacks, CoprocessorCallbacks};
use mockall::predicate::eq;

use crate::common::asm::{self, UDF};
use crate::common::harness::{TestContext, TestHost};
use crate::common::mocks::MockCoproc;

fn handle() -> *mut Jit {
    NonNull::<Jit>::dangling().as_ptr()
}

fn bridge_for(coproc: MockCoproc) -> CoprocessorBridge {
    let slot = HandleSlot::new();
    slot.bind(handle());
    CoprocessorBridge::new(5, CoprocessorCallbacks::from_host(Box::new(coproc)), slot)
}

unsafe extern "C" fn noop(_jit: *mut Jit, _user_arg: *mut c_void, _arg0: u32, _arg1: u32) -> u64 {
    0
}

#[test]
fn test_unsupported_maps_to_absent_for_every_operation() {
    let mut coproc = MockCoproc::new();
    let _ = coproc
        .expect_compile_internal_operation()
        .returning(|_, _, _, _, _, _| FfiCallback::None);
    let _ = coproc
        .expect_compile_send_one_word()
        .returning(|_, _, _, _, _| FfiCallbackOrAccess::None);
    let _ = coproc
        .expect_compile_get_one_word()
        .returning(|_, _, _, _, _| FfiCallbackOrAccess::None);
    let _ = coproc
        .expect_compile_send_two_words()
        .returning(|_, _, _| FfiCallbackOrAccess::None);
    let _ = coproc
        .expect_compile_get_two_words()
        .returning(|_, _, _| FfiCallbackOrAccess::None);
    let _ = coproc.expect_compile_load_words().returning(|_, _, _, _| FfiCallback::None);
    let _ = coproc.expect_compile_store_words().returning(|_, _, _, _| FfiCallback::None);

    let mut bridge = bridge_for(coproc);
    let c0 = CoprocReg::C0;
    assert!(bridge.compile_internal_operation(false, 0, c0, c0, c0, 0).is_none());
    assert!(bridge.compile_send_one_word(false, 0, c0, c0, 0).is_unsupported());
    assert!(bridge.compile_get_one_word(false, 0, c0, c0, 0).is_unsupported());
    assert!(bridge.compile_send_two_words(false, 0, c0).is_unsupported());
    assert!(bridge.compile_get_two_words(false, 0, c0).is_unsupported());
    assert!(bridge.compile_load_words(false, false, c0, None).is_none());
    assert!(bridge.compile_store_words(false, false, c0, None).is_none());
}

#[test]
fn test_arguments_forwarded_unchanged() {
    let mut coproc = MockCoproc::new();
    let _ = coproc
        .expect_compile_internal_operation()
        .with(
            eq(true),
            eq(0xA),
            eq(CoprocReg::C2),
            eq(CoprocReg::C3),
            eq(CoprocReg::C4),
            eq(5),
        )
        .times(1)
        .returning(|_, _, _, _, _, _| FfiCallback::None);
    let _ = coproc
        .expect_compile_get_two_words()
        .with(eq(false), eq(3), eq(CoprocReg::C15))
        .times(1)
        .returning(|_, _, _| FfiCallbackOrAccess::None);
    let _ = coproc
        .expect_compile_load_words()
        .with(eq(false), eq(true), eq(CoprocReg::C1), eq(Some(0x2A)))
        .times(1)
        .returning(|_, _, _, _| FfiCallback::None);

    let mut bridge = bridge_for(coproc);
    let (c2, c3, c4) = (CoprocReg::C2, CoprocReg::C3, CoprocReg::C4);
    let _ = bridge.compile_internal_operation(true, 0xA, c2, c3, c4, 5);
    let _ = bridge.compile_get_two_words(false, 3, CoprocReg::C15);
    let _ = bridge.compile_load_words(false, true, CoprocReg::C1, Some(0x2A));
}

#[test]
fn test_three_way_results_preserved() {
    let mut words = [0u32; 3];
    let single = std::ptr::addr_of_mut!(words[0]);
    let pair = [std::ptr::addr_of_mut!(words[1]), std::ptr::addr_of_mut!(words[2])];
    let user_arg = 0xC0FFEEusize as *mut c_void;

    let mut coproc = MockCoproc::new();
    let _ = coproc
        .expect_compile_send_one_word()
        .returning_st(move |_, _, _, _, _| FfiCallbackOrAccess::Access(single));
    let callback = RawCallback::new(noop, user_arg);
    let _ = coproc
        .expect_compile_get_one_word()
        .returning_st(move |_, _, _, _, _| FfiCallbackOrAccess::Callback(callback));
    let _ = coproc
        .expect_compile_send_two_words()
        .returning_st(move |_, _, _| FfiCallbackOrAccess::Access(pair));
    let _ = coproc
        .expect_compile_get_two_words()
        .returning_st(move |_, _, _| FfiCallbackOrAccess::Callback(callback));

    let mut bridge = bridge_for(coproc);
    let c0 = CoprocReg::C0;

    match bridge.compile_send_one_word(false, 0, c0, c0, 0) {
        CallbackOrAccess::Access(word) => assert_eq!(word, single),
        other => panic!("expected direct access, got {other:?}"),
    }
    match bridge.compile_get_one_word(false, 0, c0, c0, 0) {
        CallbackOrAccess::Callback(callback) => {
            assert_eq!(callback.user_arg, user_arg);
            assert_eq!(callback.jit, handle());
        }
        other => panic!("expected callback, got {other:?}"),
    }
    match bridge.compile_send_two_words(false, 0, c0) {
        CallbackOrAccess::Access(words) => assert_eq!(words, pair),
        other => panic!("expected direct access, got {other:?}"),
    }
    match bridge.compile_get_two_words(false, 0, c0) {
        CallbackOrAccess::Callback(callback) => assert_eq!(callback.user_arg, user_arg),
        other => panic!("expected callback, got {other:?}"),
    }
}

/// Coprocessor with no operations that logs its own id when its context is destroyed.
struct Tracked {
    id: usize,
    log: Rc<RefCell<Vec<usize>>>,
}

impl HostCoprocessor for Tracked {}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.log.borrow_mut().push(self.id);
    }
}

fn tracked(id: usize, log: &Rc<RefCell<Vec<usize>>>) -> CoprocessorCallbacks {
    CoprocessorCallbacks::from_host(Box::new(Tracked {
        id,
        log: Rc::clone(log),
    }))
}

#[test]
fn test_bridge_destroys_its_own_context() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let slot = HandleSlot::new();
    let bridges: Vec<CoprocessorBridge> = [4, 9, 1]
        .into_iter()
        .map(|id| CoprocessorBridge::new(id, tracked(id, &log), slot.clone()))
        .collect();

    assert!(log.borrow().is_empty());
    for bridge in bridges.into_iter().rev() {
        let index = bridge.index();
        drop(bridge);
        assert_eq!(log.borrow().last(), Some(&index));
    }
    assert_eq!(*log.borrow(), vec![1, 9, 4]);
}

#[test]
fn test_teardown_destroys_each_slot_once() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let ctx = TestContext::with(TestHost::default(), |builder| {
        builder
            .coprocessor(15, tracked(15, &log))?
            .coprocessor(0, tracked(0, &log))?
            .coprocessor(7, tracked(7, &log))
    });
    assert!(log.borrow().is_empty());

    drop(ctx);
    let mut destroyed = log.borrow().clone();
    destroyed.sort_unstable();
    assert_eq!(destroyed, vec![0, 7, 15]);
}

#[test]
fn test_failed_construction_destroys_coprocessors() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let big_endian = Options {
        always_little_endian: false,
        ..Options::default()
    };
    let result = TestContext::try_with(TestHost::default(), |builder| {
        Ok(builder.coprocessor(2, tracked(2, &log))?.options(big_endian))
    });

    assert!(matches!(result, Err(Error::EngineConstruction(_))));
    assert_eq!(*log.borrow(), vec![2]);
}

#[test]
fn test_out_of_range_slot_rejected_and_destroyed() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let result = TestContext::try_with(TestHost::default(), |builder| {
        builder
            .coprocessor(0, tracked(0, &log))?
            .coprocessor(NUM_COPROCESSORS, tracked(16, &log))
    });

    assert!(matches!(result, Err(Error::InvalidCoprocessorSlot(16))));
    assert_eq!(*log.borrow(), vec![16, 0], "slot 0 must not be overwritten by slot 16");
}

#[test]
fn test_replaced_table_destroyed_immediately() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let ctx = TestContext::with(TestHost::default(), |builder| {
        let builder = builder.coprocessor(3, tracked(3, &log))?;
        assert!(log.borrow().is_empty());
        builder.coprocessor(3, tracked(33, &log))
    });
    assert_eq!(*log.borrow(), vec![3]);

    drop(ctx);
    assert_eq!(*log.borrow(), vec![3, 33]);
}

#[test]
fn test_unbuilt_builder_destroys_held_tables() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let callbacks = Callbacks::for_host::<TestHost>();
    let builder = JitWrapper::builder(std::ptr::null_mut(), callbacks)
        .coprocessor(1, tracked(1, &log))
        .expect("slot 1 is valid");

    let mut tables = [None; NUM_COPROCESSORS];
    tables[2] = Some(tracked(2, &log));
    let builder = builder.coprocessors(tables);
    assert_eq!(*log.borrow(), vec![1], "replacing every slot destroys the held table");

    drop(builder);
    assert_eq!(*log.borrow(), vec![1, 2]);
}

/// Per-test state reached from the deferred callback through its user argument.
struct Recorder {
    calls: Cell<u32>,
    last_args: Cell<(u32, u32)>,
    user_data: Cell<*mut c_void>,
    value: u64,
}

impl Recorder {
    fn returning(value: u64) -> Self {
        Self {
            calls: Cell::new(0),
            last_args: Cell::new((0, 0)),
            user_data: Cell::new(std::ptr::null_mut()),
            value,
        }
    }
}

struct Record;

impl CallbackHandler<Recorder> for Record {
    fn handle(jit: &JitWrapper, context: &Recorder, arg0: u32, arg1: u32) -> u64 {
        context.calls.set(context.calls.get() + 1);
        context.last_args.set((arg0, arg1));
        context.user_data.set(jit.user_data());
        context.value
    }
}

/// Coprocessor that defers every supported operation to one callback, or grants direct
/// access to a single word for MCR/MRC.
struct Deferred {
    callback: RawCallback,
    word: *mut u32,
    options: Rc<RefCell<Vec<Option<u8>>>>,
}

impl HostCoprocessor for Deferred {
    fn compile_internal_operation(
        &self,
        _two: bool,
        _opc1: u32,
        _cr_d: CoprocReg,
        _cr_n: CoprocReg,
        _cr_m: CoprocReg,
        _opc2: u32,
    ) -> FfiCallback {
        FfiCallback::Some(self.callback)
    }

    fn compile_send_one_word(
        &self,
        _two: bool,
        _opc1: u32,
        _cr_n: CoprocReg,
        _cr_m: CoprocReg,
        _opc2: u32,
    ) -> FfiCallbackOrAccessOneWord {
        FfiCallbackOrAccess::Access(self.word)
    }

    fn compile_get_one_word(
        &self,
        _two: bool,
        _opc1: u32,
        _cr_n: CoprocReg,
        _cr_m: CoprocReg,
        _opc2: u32,
    ) -> FfiCallbackOrAccessOneWord {
        FfiCallbackOrAccess::Access(self.word)
    }

    fn compile_send_two_words(
        &self,
        _two: bool,
        _opc: u32,
        _cr_m: CoprocReg,
    ) -> FfiCallbackOrAccessTwoWords {
        FfiCallbackOrAccess::Callback(self.callback)
    }

    fn compile_get_two_words(
        &self,
        _two: bool,
        _opc: u32,
        _cr_m: CoprocReg,
    ) -> FfiCallbackOrAccessTwoWords {
        FfiCallbackOrAccess::Callback(self.callback)
    }

    fn compile_store_words(
        &self,
        _two: bool,
        _long_transfer: bool,
        _cr_d: CoprocReg,
        option: Option<u8>,
    ) -> FfiCallback {
        self.options.borrow_mut().push(option);
        FfiCallback::Some(self.callback)
    }
}

type OptionLog = Rc<RefCell<Vec<Option<u8>>>>;

/// Every caller declares `recorder` before the returned context, so it outlives the wrapper.
fn deferred_context(recorder: &Recorder, word: &mut u32) -> (TestContext, OptionLog) {
    let options = Rc::new(RefCell::new(Vec::new()));
    // SAFETY: `recorder` outlives the wrapper, see above.
    let callback = unsafe { RawCallback::for_handler_unchecked::<Recorder, Record>(recorder) };
    let coproc = Deferred {
        callback,
        word: std::ptr::from_mut(word),
        options: Rc::clone(&options),
    };
    let mut host = TestHost::default();
    host.halt_on_exception = true;
    let ctx = TestContext::with(host, |builder| {
        builder.coprocessor(5, CoprocessorCallbacks::from_host(Box::new(coproc)))
    });
    (ctx, options)
}

#[test]
fn test_deferred_callback_runs_with_wrapper_handle() {
    let recorder = Recorder::returning(0);
    let mut word = 0;
    let (mut ctx, _) = deferred_context(&recorder, &mut word);
    let program = [asm::cdp(5, 1, 2, 3, 4, 5), asm::two(asm::cdp(5, 0, 0, 0, 0, 0)), UDF];
    ctx.host_mut().load_program(0, &program);

    ctx.run().expect("run");

    assert_eq!(recorder.calls.get(), 2);
    assert_eq!(recorder.user_data.get(), ctx.host_ptr());
    assert_eq!(ctx.host().exceptions, vec![(8, Exception::UndefinedInstruction)]);
}

#[test]
fn test_direct_access_and_two_word_callbacks_execute() {
    let recorder = Recorder::returning(0x1111_2222_3333_4444);
    let mut word = 0;
    let (mut ctx, _) = deferred_context(&recorder, &mut word);
    ctx.set_reg(1, 0xCAFE);
    ctx.set_reg(5, 0x5555);
    ctx.set_reg(6, 0x6666);
    ctx.host_mut().load_program(
        0,
        &[
            asm::mcr(5, 0, 1, 1, 0, 0),
            asm::mrc(5, 0, 2, 1, 0, 0),
            asm::mcrr(5, 0, 5, 6, 0),
            asm::mrrc(5, 0, 3, 4, 0),
            UDF,
        ],
    );

    ctx.run().expect("run");

    let regs = ctx.regs();
    assert_eq!(word, 0xCAFE);
    assert_eq!(regs[2], 0xCAFE);
    assert_eq!(regs[3], 0x3333_4444);
    assert_eq!(regs[4], 0x1111_2222);
    assert_eq!(recorder.calls.get(), 2);
    assert_eq!(recorder.last_args.get(), (0, 0));
    assert_eq!(ctx.host().exceptions, vec![(16, Exception::UndefinedInstruction)]);
}

#[test]
fn test_send_two_words_passes_both_registers() {
    let recorder = Recorder::returning(0);
    let mut word = 0;
    let (mut ctx, _) = deferred_context(&recorder, &mut word);
    ctx.set_reg(5, 0x5555);
    ctx.set_reg(6, 0x6666);
    ctx.host_mut().load_program(0, &[asm::mcrr(5, 0, 5, 6, 0), UDF]);

    ctx.run().expect("run");

    assert_eq!(recorder.last_args.get(), (0x5555, 0x6666));
}

#[test]
fn test_transfer_option_only_for_unindexed_form() {
    let recorder = Recorder::returning(0);
    let mut word = 0;
    let (mut ctx, options) = deferred_context(&recorder, &mut word);
    ctx.set_reg(7, 0x4000);
    ctx.host_mut().load_program(
        0,
        &[
            asm::stc(5, 1, 7, 0x2A, false, true),
            asm::stc(5, 1, 7, 0x2A, true, false),
            UDF,
        ],
    );

    ctx.run().expect("run");

    assert_eq!(*options.borrow(), vec![Some(0x2A), None]);
    assert_eq!(recorder.last_args.get(), (0x4000, 0));
}

#[test]
fn test_unsupported_operations_raise_undefined_instruction() {
    let recorder = Recorder::returning(0);
    let mut word = 0;
    let (mut ctx, _) = deferred_context(&recorder, &mut word);
    // LDC is not implemented by `Deferred`; coprocessor 6 is not installed at all.
    ctx.host_mut().load_program(0, &[asm::ldc(5, 0, 0, 0, false, false)]);
    ctx.run().expect("run");
    ctx.host_mut().load_program(0, &[asm::cdp(6, 0, 0, 0, 0, 0)]);
    ctx.run().expect("run");

    assert_eq!(
        ctx.host().exceptions,
        vec![(0, Exception::UndefinedInstruction), (0, Exception::UndefinedInstruction)]
    );
    assert_eq!(recorder.calls.get(), 0);
}
