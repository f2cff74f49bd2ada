//! Integration tests for calling into the embedded interpreter.
//!
//! Every test shares the one process-wide interpreter and its error channel,
//! so tests take a serial lock to keep their errors apart. Nothing here stops
//! the interpreter; see `lifecycle.rs` for that.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{const_mutex, Mutex, MutexGuard};
use pretty_assertions::assert_eq;
use pyhost_bridge::{
    live_handles, module, token_stats, Bridge, BridgeError, ErrorKind, Mapping, Value,
};
use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use pyo3::types::PyCFunction;
use tempfile::TempDir;

static SERIAL: Mutex<()> = const_mutex(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock()
}

/// Write `name.py` into a fresh directory and put it on the search path.
fn module_dir(bridge: &Bridge, name: &str, source: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    write_module(dir.path(), name, source);
    assert!(bridge.add_module_path(dir.path()));
    dir
}

fn write_module(dir: &Path, name: &str, source: &str) {
    fs::write(dir.join(format!("{}.py", name)), source).unwrap();
}

/// Bind a native function as `module_name.name`.
fn install<F>(bridge: &Bridge, module_name: &str, name: &str, make: F)
where
    F: for<'py> FnOnce(Python<'py>) -> PyResult<Bound<'py, PyCFunction>>,
{
    bridge
        .with_context(|ctx| {
            let py = ctx.py();
            let function = make(py).map_err(|err| BridgeError::raised(py, &err))?;
            module::import(ctx, module_name)?
                .handle()
                .setattr(name, function)
                .map_err(|err| BridgeError::raised(py, &err))
        })
        .unwrap();
}

static CALLBACK_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Called from embedded code; calls back into the bridge.
#[pyfunction]
fn host_square(x: i64) -> PyResult<i64> {
    CALLBACK_DEPTH.store(token_stats().current_depth, Ordering::SeqCst);

    Bridge::new()
        .try_call("interop_reentry", "square", &[Value::Integer(x)])
        .map_err(|err| PyRuntimeError::new_err(err.to_string()))?
        .as_integer()
        .ok_or_else(|| PyRuntimeError::new_err("square returned a non-integer"))
}

static SLOW_STARTED: AtomicBool = AtomicBool::new(false);

#[pyfunction]
fn mark_started() {
    SLOW_STARTED.store(true, Ordering::SeqCst);
}

#[test]
fn test_call_square() {
    let _serial = serial();
    let bridge = Bridge::new();
    let _dir = module_dir(&bridge, "interop_square", "def square(x):\n    return x * x\n");

    let result = bridge.call("interop_square", "square", &[Value::Integer(7)]);
    assert_eq!(result, Value::Integer(49));
}

#[test]
fn test_call_with_nested_arguments() {
    let _serial = serial();
    let bridge = Bridge::new();
    let _dir = module_dir(
        &bridge,
        "interop_nested",
        "def describe(m):\n    return {'keys': sorted(m.keys()), 'count': len(m), 'none': None}\n",
    );

    let mut arg = Mapping::new();
    arg.insert("b", Value::from(vec![1, 2]));
    arg.insert("a", 1.5);

    let result = bridge.call("interop_nested", "describe", &[Value::from(arg)]);

    let mut expected = Mapping::new();
    expected.insert("keys", Value::from(vec!["a", "b"]));
    expected.insert("count", 2);
    expected.insert("none", Value::Nil);
    assert_eq!(result, Value::from(expected));
}

#[test]
fn test_missing_module_reports_once() {
    let _serial = serial();
    let bridge = Bridge::new();
    bridge.clear_error();

    let result = bridge.call("interop_missing_module", "f", &[]);
    assert!(result.is_nil());

    let message = bridge.last_error();
    assert!(message.contains("interop_missing_module"), "got: {}", message);
    assert_eq!(bridge.last_error(), "");
}

#[test]
fn test_import_failure_kind() {
    let _serial = serial();
    let bridge = Bridge::new();

    assert!(!bridge.import("interop_no_such_module"));
    let report = bridge.last_error_report().unwrap();
    assert_eq!(report.kind, ErrorKind::Import);
    assert_eq!(report.exception_type.as_deref(), Some("ModuleNotFoundError"));

    assert!(bridge.import("json"));
}

#[test]
fn test_set_then_get_variable() {
    let _serial = serial();
    let bridge = Bridge::new();
    let _dir = module_dir(&bridge, "interop_vars", "existing = 'hello'\n");

    assert_eq!(bridge.get_variable("interop_vars", "existing"), Value::from("hello"));

    assert!(bridge.set_variable("interop_vars", "x", 42));
    assert_eq!(bridge.get_variable("interop_vars", "x"), Value::Integer(42));
}

#[test]
fn test_get_missing_variable() {
    let _serial = serial();
    let bridge = Bridge::new();
    let _dir = module_dir(&bridge, "interop_novar", "present = 1\n");

    assert!(bridge.get_variable("interop_novar", "absent").is_nil());
    let report = bridge.last_error_report().unwrap();
    assert_eq!(report.kind, ErrorKind::Attribute);
    assert!(report.message.contains("absent"));
}

#[test]
fn test_reload_picks_up_new_source() {
    let _serial = serial();
    let bridge = Bridge::new();
    let dir = TempDir::new().unwrap();
    write_module(dir.path(), "interop_reload", "VALUE = 1\n");
    assert!(bridge.add_module_path(dir.path()));

    assert_eq!(bridge.get_variable("interop_reload", "VALUE"), Value::Integer(1));

    // Different length, so any cached bytecode is stale
    write_module(dir.path(), "interop_reload", "VALUE = 22  # changed\n");
    assert!(bridge.reload("interop_reload"));
    assert_eq!(bridge.get_variable("interop_reload", "VALUE"), Value::Integer(22));
}

#[test]
fn test_reload_never_imported_runs_once() {
    let _serial = serial();
    let bridge = Bridge::new();
    let _dir = module_dir(
        &bridge,
        "interop_reload_fresh",
        "import sys\nsys._interop_fresh_runs = getattr(sys, '_interop_fresh_runs', 0) + 1\n",
    );

    assert!(bridge.reload("interop_reload_fresh"));
    assert_eq!(
        bridge.evaluate("__import__('sys')._interop_fresh_runs"),
        Value::Integer(1)
    );
}

#[test]
fn test_reload_missing_module_fails() {
    let _serial = serial();
    let bridge = Bridge::new();

    assert!(!bridge.reload("interop_reload_nowhere"));
    assert_eq!(bridge.last_error_report().unwrap().kind, ErrorKind::Import);
}

#[test]
fn test_call_non_callable() {
    let _serial = serial();
    let bridge = Bridge::new();
    let _dir = module_dir(&bridge, "interop_notfn", "NOT_FN = 5\n");

    assert!(bridge.call("interop_notfn", "NOT_FN", &[]).is_nil());
    let report = bridge.last_error_report().unwrap();
    assert_eq!(report.kind, ErrorKind::Call);
    assert!(report.message.contains("interop_notfn.NOT_FN"));
}

#[test]
fn test_call_raises() {
    let _serial = serial();
    let bridge = Bridge::new();
    let _dir = module_dir(
        &bridge,
        "interop_boom",
        "def boom():\n    raise ValueError('kaboom')\n",
    );

    assert!(bridge.call("interop_boom", "boom", &[]).is_nil());
    let report = bridge.last_error_report().unwrap();
    assert_eq!(report.kind, ErrorKind::Call);
    assert_eq!(report.message, "kaboom");
    assert_eq!(report.exception_type.as_deref(), Some("ValueError"));
    assert!(report.traceback.is_some());

    let err = bridge.try_call("interop_boom", "boom", &[]).unwrap_err();
    assert_eq!(err.message(), "kaboom");
}

#[test]
fn test_out_of_range_return() {
    let _serial = serial();
    let bridge = Bridge::new();
    let _dir = module_dir(&bridge, "interop_big", "def big():\n    return 2 ** 63\n");

    let err = bridge.try_call("interop_big", "big", &[]).unwrap_err();
    assert!(err.is_conversion_error());
    assert!(err.message().contains("9223372036854775808"));
}

#[test]
fn test_failed_argument_conversion_releases_references() {
    let _serial = serial();
    let bridge = Bridge::new();
    let _dir = module_dir(&bridge, "interop_leak", "def take(*args):\n    return len(args)\n");
    assert!(bridge.execute("import sys"));

    let mut bad_key = Mapping::new();
    bad_key.insert(Value::from(vec![1]), 1);
    let args = [Value::Integer(1), Value::from("x"), Value::from(bad_key)];

    // Warm up so the module is resident before counting
    assert_eq!(bridge.call("interop_leak", "take", &args[..2]), Value::Integer(2));

    let refcount = "sys.getrefcount(sys.modules['interop_leak'])";
    let before_refs = bridge.evaluate(refcount);
    let before_handles = live_handles();

    for _ in 0..10 {
        let err = bridge.try_call("interop_leak", "take", &args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conversion);
    }

    assert_eq!(live_handles(), before_handles);
    assert_eq!(bridge.evaluate(refcount), before_refs);
    assert!(!token_stats().is_held);
}

#[test]
fn test_embedded_code_calls_back_into_bridge() {
    let _serial = serial();
    let bridge = Bridge::new();
    bridge.clear_error();
    let _dir = module_dir(
        &bridge,
        "interop_reentry",
        "def square(x):\n    return x * x\n\ndef outer(x):\n    return host_square(x) + 1\n",
    );
    install(&bridge, "interop_reentry", "host_square", |py| {
        wrap_pyfunction!(host_square, py)
    });

    let result = bridge.call("interop_reentry", "outer", &[Value::Integer(6)]);
    assert_eq!(result, Value::Integer(37));
    assert_eq!(bridge.last_error(), "");

    // The callback ran inside the outer call's hold on the token
    assert_eq!(CALLBACK_DEPTH.load(Ordering::SeqCst), 1);
    assert_eq!(token_stats().current_depth, 0);
}

#[test]
fn test_threads_do_not_interleave() {
    let _serial = serial();
    let bridge = Bridge::new();
    let _dir = module_dir(
        &bridge,
        "interop_serial",
        "import time\n\nlog = []\n\ndef work(tag):\n    log.append(['enter', tag])\n    \
         time.sleep(0.005)\n    log.append(['exit', tag])\n    return tag\n",
    );
    assert!(bridge.import("interop_serial"));

    std::thread::scope(|scope| {
        for tag in ["left", "right"] {
            scope.spawn(move || {
                let bridge = Bridge::new();
                for _ in 0..10 {
                    let result = bridge
                        .try_call("interop_serial", "work", &[Value::from(tag)])
                        .unwrap();
                    assert_eq!(result, Value::from(tag));
                    assert_eq!(token_stats().current_depth, 0);
                }
            });
        }
    });

    // `time.sleep` lets go of the GIL, so only the token keeps calls apart
    let log = bridge.get_variable("interop_serial", "log");
    let entries = log.as_sequence().unwrap();
    assert_eq!(entries.len(), 40);
    for pair in entries.chunks(2) {
        let tag = pair[0].as_sequence().unwrap()[1].clone();
        assert_eq!(pair[0], Value::from(vec![Value::from("enter"), tag.clone()]));
        assert_eq!(pair[1], Value::from(vec![Value::from("exit"), tag]));
    }
}

#[test]
fn test_error_channel_keeps_latest_failure() {
    let _serial = serial();
    let bridge = Bridge::new();
    let _dir = module_dir(
        &bridge,
        "interop_order",
        "import time\n\ndef fail_slow():\n    mark_started()\n    time.sleep(0.2)\n    \
         raise RuntimeError('slow failure')\n",
    );
    install(&bridge, "interop_order", "mark_started", |py| {
        wrap_pyfunction!(mark_started, py)
    });
    bridge.clear_error();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            assert!(Bridge::new().call("interop_order", "fail_slow", &[]).is_nil());
        });
        scope.spawn(|| {
            while !SLOW_STARTED.load(Ordering::SeqCst) {
                std::thread::yield_now();
            }
            // Waits for the slow call to finish, then fails after it
            assert!(!Bridge::new().import("interop_order_missing"));
        });
    });

    assert!(bridge.last_error().contains("interop_order_missing"));
}

#[test]
fn test_execute_and_evaluate() {
    let _serial = serial();
    let bridge = Bridge::new();

    assert!(bridge.execute("interop_total = 40 + 2"));
    assert_eq!(bridge.evaluate("interop_total"), Value::Integer(42));

    let expected = Value::from(vec![Value::Bool(true), Value::Real(2.5), Value::from("x")]);
    assert_eq!(bridge.evaluate("[True, 2.5, 'x']"), expected);
}

#[test]
fn test_execute_failures() {
    let _serial = serial();
    let bridge = Bridge::new();

    assert!(!bridge.execute("def broken(:"));
    let report = bridge.last_error_report().unwrap();
    assert_eq!(report.kind, ErrorKind::Raised);
    assert_eq!(report.exception_type.as_deref(), Some("SyntaxError"));

    assert!(!bridge.execute("raise KeyError('gone')"));
    assert_eq!(bridge.last_error(), "'gone'");

    let err = bridge.try_evaluate("'a\0b'").unwrap_err();
    assert!(err.is_conversion_error());
}

#[test]
fn test_list_modules() {
    let _serial = serial();
    let bridge = Bridge::new();

    let modules = bridge.list_modules();
    assert!(modules.iter().any(|name| name == "sys"));
    assert!(modules.iter().any(|name| name == "builtins"));
}

#[test]
fn test_success_keeps_pending_error() {
    let _serial = serial();
    let bridge = Bridge::new();

    assert!(!bridge.import("interop_absent_for_pending"));
    assert!(bridge.execute("pass"));

    assert!(bridge.last_error().contains("interop_absent_for_pending"));
}

#[test]
fn test_clear_error() {
    let _serial = serial();
    let bridge = Bridge::new();

    assert!(!bridge.import("interop_absent_for_clear"));
    bridge.clear_error();
    assert_eq!(bridge.last_error(), "");
    assert!(bridge.last_error_report().is_none());
}

#[test]
fn test_unsupported_return_is_nil() {
    let _serial = serial();
    let bridge = Bridge::new();
    bridge.clear_error();

    assert_eq!(bridge.evaluate("(1, 2)"), Value::Nil);
    assert_eq!(bridge.evaluate("object()"), Value::Nil);
    assert_eq!(bridge.last_error(), "");
}
