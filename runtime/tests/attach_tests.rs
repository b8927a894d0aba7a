//! End-to-end attach tests against hand-written hook-points shaped exactly
//! like the rewriter's generated output: the atomic slot, the loader-style
//! prologue in the hooked functions, and the descriptor functions feeding
//! a sorted hook table.

use std::any::TypeId;
use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once, OnceLock};

use hookbuild_rt::{
    DescriptorFn, Epilog, HookDescriptor, HookError, InstrumentationDescriptor, Prolog0, Prolog2,
};

type ConcatProlog = Prolog2<String, String, String>;
type BumpProlog = Prolog0<usize>;

static CONCAT_SLOT: AtomicPtr<ConcatProlog> = AtomicPtr::new(std::ptr::null_mut());
static BUMP_SLOT: AtomicPtr<BumpProlog> = AtomicPtr::new(std::ptr::null_mut());
static BUMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Mirror of the generated instrumentation prologue for
/// `fn concat(a: String, b: String) -> String`.
fn hooked_concat(a: String, b: String) -> String {
    let _hook_epilog = {
        let _prolog = CONCAT_SLOT.load(Ordering::Acquire);
        if _prolog.is_null() {
            None
        } else {
            let (_epilog, _abort) = (unsafe { &*_prolog })(&a, &b);
            if let Some(_abort) = _abort {
                let _result0 = _abort;
                if let Some(_epilog) = _epilog {
                    _epilog(&_result0);
                }
                return _result0;
            }
            _epilog
        }
    };
    let _result0 = (move || {
        let mut out = a;
        out.push_str(&b);
        out
    })();
    if let Some(_epilog) = _hook_epilog {
        _epilog(&_result0);
    }
    _result0
}

fn hooked_bump() -> usize {
    let _hook_epilog = {
        let _prolog = BUMP_SLOT.load(Ordering::Acquire);
        if _prolog.is_null() {
            None
        } else {
            let (_epilog, _abort) = (unsafe { &*_prolog })();
            if let Some(_abort) = _abort {
                let _result0 = _abort;
                if let Some(_epilog) = _epilog {
                    _epilog(&_result0);
                }
                return _result0;
            }
            _epilog
        }
    };
    let _result0 = (move || BUMP_COUNTER.fetch_add(1, Ordering::SeqCst) + 1)();
    if let Some(_epilog) = _hook_epilog {
        _epilog(&_result0);
    }
    _result0
}

extern "C" fn descriptor_concat(hd: *mut HookDescriptor) {
    unsafe {
        *hd = HookDescriptor {
            symbol: "demo::text::concat",
            func: hooked_concat as fn(String, String) -> String as *const () as *mut c_void,
            prolog_var: &CONCAT_SLOT as *const _ as *mut c_void,
            prolog_type_id: TypeId::of::<ConcatProlog>(),
            prolog_type_name:
                "Box<dyn Fn(&String, &String) -> (Option<Box<dyn FnOnce(&String) + Send>>, Option<String>) + Send + Sync>",
        };
    }
}

extern "C" fn descriptor_bump(hd: *mut HookDescriptor) {
    unsafe {
        *hd = HookDescriptor {
            symbol: "demo::text::bump",
            func: hooked_bump as fn() -> usize as *const () as *mut c_void,
            prolog_var: &BUMP_SLOT as *const _ as *mut c_void,
            prolog_type_id: TypeId::of::<BumpProlog>(),
            prolog_type_name:
                "Box<dyn Fn() -> (Option<Box<dyn FnOnce(&usize) + Send>>, Option<usize>) + Send + Sync>",
        };
    }
}

// Sorted by normalized symbol, the order the table generator emits.
static TABLE: [DescriptorFn; 2] = [descriptor_bump, descriptor_concat];
static DESC: InstrumentationDescriptor = InstrumentationDescriptor {
    version: hookbuild_rt::ABI_VERSION,
    hook_table: &TABLE,
};

fn register() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        hookbuild_rt::_instrumentation_descriptor_register(
            &DESC as *const InstrumentationDescriptor as *const c_void,
        );
    });
}

/// Tests install and remove prologs on shared process-wide slots; hold
/// this across any test that touches them.
fn lock_hook_tests() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

fn detach_all() {
    CONCAT_SLOT.store(std::ptr::null_mut(), Ordering::Release);
    BUMP_SLOT.store(std::ptr::null_mut(), Ordering::Release);
}

#[test]
fn test_health_checks_version() {
    register();
    hookbuild_rt::health(hookbuild_rt::ABI_VERSION).unwrap();
    match hookbuild_rt::health("9.9.9") {
        Err(HookError::VersionMismatch { built, expected }) => {
            assert_eq!(built, hookbuild_rt::ABI_VERSION);
            assert_eq!(expected, "9.9.9");
        }
        other => panic!("expected version mismatch, got {other:?}"),
    }
}

#[test]
fn test_find_hits_and_misses() {
    register();
    let hook = hookbuild_rt::find("demo::text::concat").unwrap().unwrap();
    assert_eq!(hook.symbol(), "demo::text::concat");
    assert!(hook.prolog_type_name().contains("FnOnce(&String)"));
    assert!(hookbuild_rt::find("demo::text::absent").unwrap().is_none());
    // Found again through the warm index.
    assert!(hookbuild_rt::find("demo::text::concat").unwrap().is_some());
}

#[test]
fn test_attach_rejects_wrong_type_without_touching_slot() {
    let _guard = lock_hook_tests();
    register();
    detach_all();
    let hook = hookbuild_rt::find("demo::text::concat").unwrap().unwrap();

    match hook.attach(Some(Box::new(42i32))) {
        Err(HookError::PrologTypeMismatch { symbol, expected }) => {
            assert_eq!(symbol, "demo::text::concat");
            assert!(expected.contains("Fn(&String, &String)"));
        }
        other => panic!("expected type mismatch, got {other:?}"),
    }
    // A closure that was not boxed as the exact prolog type is rejected
    // too.
    let wrong = |_: &String, _: &String| -> (Option<Epilog<String>>, Option<String>) {
        (None, None)
    };
    assert!(hook.attach(Some(Box::new(wrong))).is_err());

    assert!(CONCAT_SLOT.load(Ordering::Acquire).is_null());
    assert_eq!(hooked_concat("a".into(), "b".into()), "ab");
}

#[test]
fn test_attach_observe_and_detach() {
    let _guard = lock_hook_tests();
    register();
    detach_all();

    let observed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&observed);
    let prolog: ConcatProlog = Box::new(move |a: &String, b: &String| {
        seen.lock().unwrap().push(format!("args {a}+{b}"));
        let epilog_seen = Arc::clone(&seen);
        let epilog: Epilog<String> = Box::new(move |r: &String| {
            epilog_seen.lock().unwrap().push(format!("result {r}"));
        });
        (Some(epilog), None)
    });

    hookbuild_rt::do_hook("demo::text::concat", Box::new(prolog)).unwrap();
    assert_eq!(hooked_concat("hook".into(), "build".into()), "hookbuild");
    {
        let log = observed.lock().unwrap();
        assert_eq!(log.as_slice(), ["args hook+build", "result hookbuild"]);
    }

    // Detach restores the fast path.
    hookbuild_rt::undo_hook("demo::text::concat").unwrap();
    assert!(CONCAT_SLOT.load(Ordering::Acquire).is_null());
    assert_eq!(hooked_concat("x".into(), "y".into()), "xy");
    assert_eq!(observed.lock().unwrap().len(), 2);
}

#[test]
fn test_abort_short_circuits_the_body() {
    let _guard = lock_hook_tests();
    register();
    detach_all();

    let prolog: BumpProlog = Box::new(|| (None, Some(99)));
    hookbuild_rt::do_hook("demo::text::bump", Box::new(prolog)).unwrap();

    let before = BUMP_COUNTER.load(Ordering::SeqCst);
    assert_eq!(hooked_bump(), 99);
    assert_eq!(BUMP_COUNTER.load(Ordering::SeqCst), before, "body must not run");

    hookbuild_rt::undo_hook("demo::text::bump").unwrap();
    assert_eq!(hooked_bump(), before + 1);
}

#[test]
fn test_epilog_observes_abort_value() {
    let _guard = lock_hook_tests();
    register();
    detach_all();

    let seen: Arc<Mutex<Option<usize>>> = Arc::new(Mutex::new(None));
    let inner = Arc::clone(&seen);
    let prolog: BumpProlog = Box::new(move || {
        let epilog_seen = Arc::clone(&inner);
        let epilog: Epilog<usize> = Box::new(move |r: &usize| {
            *epilog_seen.lock().unwrap() = Some(*r);
        });
        (Some(epilog), Some(7))
    });
    hookbuild_rt::do_hook("demo::text::bump", Box::new(prolog)).unwrap();
    assert_eq!(hooked_bump(), 7);
    assert_eq!(*seen.lock().unwrap(), Some(7));
    hookbuild_rt::undo_hook("demo::text::bump").unwrap();
}

#[test]
fn test_stateful_closure_prolog() {
    let _guard = lock_hook_tests();
    register();
    detach_all();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let prolog: ConcatProlog = Box::new(move |_: &String, _: &String| {
        counter.fetch_add(1, Ordering::SeqCst);
        (None, None)
    });
    hookbuild_rt::do_hook("demo::text::concat", Box::new(prolog)).unwrap();

    assert_eq!(hooked_concat("a".into(), "b".into()), "ab");
    assert_eq!(hooked_concat("c".into(), "d".into()), "cd");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    hookbuild_rt::undo_hook("demo::text::concat").unwrap();
}

#[test]
fn test_do_hook_unknown_symbol() {
    register();
    match hookbuild_rt::do_hook("demo::text::absent", Box::new(())) {
        Err(HookError::NotFound(symbol)) => assert_eq!(symbol, "demo::text::absent"),
        other => panic!("expected not-found, got {other:?}"),
    }
}
