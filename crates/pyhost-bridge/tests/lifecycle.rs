//! Start/stop behavior of the process-wide interpreter.
//!
//! Kept to a single test in its own binary: stopping the interpreter would
//! break any test running alongside it.

use std::fs;

use pretty_assertions::assert_eq;
use pyhost_bridge::{Bridge, BridgeConfig, ErrorKind, Value};
use tempfile::TempDir;

#[test]
fn test_lifecycle_transitions() {
    let configured = TempDir::new().unwrap();
    fs::write(
        configured.path().join("lifecycle_counted.py"),
        "import sys\nsys._lifecycle_runs = getattr(sys, '_lifecycle_runs', 0) + 1\n",
    )
    .unwrap();

    let config = BridgeConfig::new()
        .without_lazy_start()
        .with_module_path(configured.path());
    let bridge = Bridge::with_config(config);

    // Stop before any start is a no-op
    bridge.stop();
    assert!(!bridge.is_live());

    // Without lazy start, nothing runs until start()
    assert_eq!(bridge.evaluate("1"), Value::Nil);
    assert_eq!(bridge.last_error(), "Python interpreter not initialized");

    bridge.start().unwrap();
    bridge.start().unwrap();
    assert!(bridge.is_live());
    assert_eq!(bridge.evaluate("1 + 1"), Value::Integer(2));

    // Leave state behind: a global, a configured module, an ad hoc path
    assert!(bridge.execute("restart_marker = 41"));
    assert!(bridge.import("lifecycle_counted"));

    let adhoc = TempDir::new().unwrap();
    fs::write(adhoc.path().join("lifecycle_adhoc.py"), "VALUE = 1\n").unwrap();
    assert!(bridge.add_module_path(adhoc.path()));
    assert!(bridge.import("lifecycle_adhoc"));

    bridge.stop();
    bridge.stop();
    assert!(!bridge.is_live());

    assert!(!bridge.execute("x = 1"));
    assert_eq!(bridge.last_error_report().unwrap().kind, ErrorKind::NotInitialized);
    assert!(bridge.list_modules().is_empty());
    assert!(!bridge.import("sys"));
    assert!(bridge
        .try_call("math", "sqrt", &[Value::Integer(4)])
        .unwrap_err()
        .is_not_initialized());

    // A lazy bridge does not bring a stopped interpreter back
    let lazy = Bridge::new();
    assert!(lazy.evaluate("1").is_nil());
    assert_eq!(lazy.last_error_report().unwrap().kind, ErrorKind::NotInitialized);

    // Restart begins from what start() first saw
    bridge.start().unwrap();
    assert_eq!(bridge.evaluate("restart_marker"), Value::Nil);
    let report = bridge.last_error_report().unwrap();
    assert_eq!(report.kind, ErrorKind::Raised);
    assert_eq!(report.exception_type.as_deref(), Some("NameError"));

    assert!(bridge.import("lifecycle_counted"));
    assert_eq!(
        bridge.evaluate("__import__('sys')._lifecycle_runs"),
        Value::Integer(2)
    );
    assert!(!bridge.import("lifecycle_adhoc"));
    assert_eq!(bridge.last_error_report().unwrap().kind, ErrorKind::Import);

    assert_eq!(bridge.call("math", "sqrt", &[Value::Integer(49)]), Value::Real(7.0));
    bridge.stop();

    {
        let _session = bridge.session().unwrap();
        assert!(bridge.is_live());
        assert!(bridge.execute("session_value = 3"));
        assert_eq!(bridge.evaluate("session_value"), Value::Integer(3));
    }
    assert!(!bridge.is_live());
    assert_eq!(bridge.evaluate("session_value"), Value::Nil);
    assert_eq!(bridge.last_error_report().unwrap().kind, ErrorKind::NotInitialized);
}
