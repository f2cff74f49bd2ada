//! # Pyhost Bridge
//!
//! Embedding bridge for driving an in-process Python interpreter from a
//! host application.
//!
//! ## Overview
//!
//! The bridge lets the host:
//! - Start and stop the embedded interpreter
//! - Import and reload modules
//! - Call functions with marshalled arguments
//! - Read and write module-level variables
//! - Run source text in a global execution context
//! - Recover from interpreter-side failures and read them back as text
//!
//! ## Design Goals
//!
//! 1. **Balanced references**: every interpreter object is held through a
//!    scope-bound handle, released on every exit path
//! 2. **No host faults**: a bad call returns a sentinel, never panics
//! 3. **Serialized access**: one logical stream of execution at a time,
//!    reentrant for callbacks on the same thread
//! 4. **Deterministic conversion**: fixed probe order, range-checked
//!    integers, cycles rejected
//!
//! ## Example
//!
//! ```no_run
//! use pyhost_bridge::{Bridge, Value};
//!
//! let bridge = Bridge::new();
//! bridge.start().expect("interpreter");
//!
//! let root = bridge.call("math", "sqrt", &[Value::Integer(49)]);
//! assert_eq!(root, Value::Real(7.0));
//!
//! if bridge.call("missing", "f", &[]).is_nil() {
//!     eprintln!("call failed: {}", bridge.last_error());
//! }
//! ```
//!
//! ## Module Structure
//!
//! - [`value`]: Host value model
//! - [`marshal`]: Value <-> interpreter object conversion
//! - [`lifecycle`]: Process-wide interpreter state
//! - [`module`]: Module resolution and attribute access
//! - [`call`]: Function invocation and source execution
//! - [`channel`]: Last-error slot
//! - [`gil`]: Exclusivity token
//! - [`handle`]: Scope-bound object handles
//! - [`config`]: Bridge configuration
//! - [`error`]: Error types

pub mod bridge;
pub mod call;
pub mod channel;
pub mod config;
pub mod error;
pub mod gil;
pub mod handle;
pub mod lifecycle;
pub mod marshal;
pub mod module;
pub mod value;

// Re-export main types for convenience
pub use bridge::Bridge;
pub use config::{BridgeConfig, Fidelity};
pub use error::{BridgeError, BridgeResult, ConversionError, ErrorKind, ErrorReport, PyException};
pub use gil::{token_stats, ExclusivityToken, TokenState, TokenStats};
pub use handle::{live_handles, Handle};
pub use lifecycle::{Context, Interpreter, Session};
pub use marshal::Marshaller;
pub use module::ModuleRef;
pub use value::{Mapping, Value};
