//! Host-facing bridge.
//!
//! Two flavors of every operation:
//!
//! - `try_*` returns a `BridgeResult` and leaves the error channel alone
//! - the plain form never fails: it returns a sentinel (`Nil`, `false`, an
//!   empty list) and parks the failure in the error channel, to be read
//!   with [`Bridge::last_error`] before the next operation overwrites it
//!
//! A legitimate `Nil` result and a failed call look the same through the
//! plain form; only the error channel tells them apart.

use std::path::Path;
use std::sync::Arc;

use crate::call;
use crate::config::BridgeConfig;
use crate::error::{BridgeResult, ErrorReport};
use crate::lifecycle::{Context, Interpreter, Session};
use crate::module;
use crate::value::Value;

/// Handle to the process-wide embedded interpreter.
///
/// Cheap to create and clone; all bridges share one interpreter.
#[derive(Debug, Clone)]
pub struct Bridge {
    interpreter: &'static Interpreter,
    config: Arc<BridgeConfig>,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    /// Create a bridge with the default configuration.
    ///
    /// The interpreter starts on first use unless started explicitly.
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    /// Create a bridge whose `start()` and lazy start use `config`.
    pub fn with_config(config: BridgeConfig) -> Self {
        Self {
            interpreter: Interpreter::global(),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the interpreter. A no-op if it is already live.
    pub fn start(&self) -> BridgeResult<()> {
        self.interpreter.start((*self.config).clone())
    }

    /// Start the interpreter and stop it when the returned session drops.
    pub fn session(&self) -> BridgeResult<Session> {
        Session::begin(self.interpreter, (*self.config).clone())
    }

    /// Stop the interpreter. Every later operation fails with
    /// `NotInitialized` until `start()` is called again.
    pub fn stop(&self) {
        self.interpreter.stop();
    }

    pub fn is_live(&self) -> bool {
        self.interpreter.is_live()
    }

    /// Run `f` against the live interpreter.
    pub fn with_context<F, R>(&self, f: F) -> BridgeResult<R>
    where
        F: for<'py> FnOnce(&Context<'py>) -> BridgeResult<R>,
    {
        self.interpreter.enter(Some(&self.config), f)
    }

    // ========================================================================
    // Result-returning operations
    // ========================================================================

    /// Call `module.function(*args)`.
    pub fn try_call(&self, module: &str, function: &str, args: &[Value]) -> BridgeResult<Value> {
        self.with_context(|ctx| call::call(ctx, module, function, args))
    }

    /// Import a module by dotted name.
    pub fn try_import(&self, module: &str) -> BridgeResult<()> {
        self.with_context(|ctx| module::import(ctx, module).map(drop))
    }

    /// Run statements in the global execution context.
    pub fn try_execute(&self, code: &str) -> BridgeResult<()> {
        self.with_context(|ctx| call::execute(ctx, code))
    }

    /// Evaluate an expression in the global execution context.
    pub fn try_evaluate(&self, expr: &str) -> BridgeResult<Value> {
        self.with_context(|ctx| call::evaluate(ctx, expr))
    }

    /// Read a module-level variable.
    pub fn try_get_variable(&self, module: &str, name: &str) -> BridgeResult<Value> {
        self.with_context(|ctx| module::import(ctx, module)?.get_attribute(ctx, name))
    }

    /// Write a module-level variable.
    pub fn try_set_variable(&self, module: &str, name: &str, value: &Value) -> BridgeResult<()> {
        self.with_context(|ctx| module::import(ctx, module)?.set_attribute(ctx, name, value))
    }

    /// Re-execute a module's top level, importing it if it never was.
    pub fn try_reload(&self, module: &str) -> BridgeResult<()> {
        self.with_context(|ctx| module::reload(ctx, module))
    }

    /// Names of every resident module.
    pub fn try_list_modules(&self) -> BridgeResult<Vec<String>> {
        self.with_context(module::list_loaded)
    }

    /// Prepend a directory to the module search path.
    pub fn try_add_module_path(&self, path: impl AsRef<Path>) -> BridgeResult<()> {
        self.with_context(|ctx| module::add_module_path(ctx, path.as_ref()))
    }

    // ========================================================================
    // Sentinel operations
    // ========================================================================

    /// Call `module.function(*args)`.
    ///
    /// # Returns
    /// The converted result, or `Nil` on failure (see [`Bridge::last_error`])
    pub fn call(&self, module: &str, function: &str, args: &[Value]) -> Value {
        self.recording(|ctx| call::call(ctx, module, function, args)).unwrap_or_default()
    }

    /// Import a module. Returns `false` on failure.
    pub fn import(&self, module: &str) -> bool {
        self.recording(|ctx| module::import(ctx, module).map(drop)).is_some()
    }

    /// Run statements in the global execution context.
    ///
    /// Compile and runtime errors return `false`.
    pub fn execute(&self, code: &str) -> bool {
        self.recording(|ctx| call::execute(ctx, code)).is_some()
    }

    /// Evaluate an expression. Returns `Nil` on failure.
    pub fn evaluate(&self, expr: &str) -> Value {
        self.recording(|ctx| call::evaluate(ctx, expr)).unwrap_or_default()
    }

    /// Read a module-level variable. Returns `Nil` on failure.
    pub fn get_variable(&self, module: &str, name: &str) -> Value {
        self.recording(|ctx| module::import(ctx, module)?.get_attribute(ctx, name))
            .unwrap_or_default()
    }

    /// Write a module-level variable. Returns `false` on failure.
    pub fn set_variable(&self, module: &str, name: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        self.recording(|ctx| module::import(ctx, module)?.set_attribute(ctx, name, &value))
            .is_some()
    }

    /// Reload a module. Returns `false` on failure.
    pub fn reload(&self, module: &str) -> bool {
        self.recording(|ctx| module::reload(ctx, module)).is_some()
    }

    /// Names of every resident module; empty on failure.
    pub fn list_modules(&self) -> Vec<String> {
        self.recording(module::list_loaded).unwrap_or_default()
    }

    /// Prepend a directory to the module search path. Returns `false` on failure.
    pub fn add_module_path(&self, path: impl AsRef<Path>) -> bool {
        self.recording(|ctx| module::add_module_path(ctx, path.as_ref())).is_some()
    }

    // ========================================================================
    // Error channel
    // ========================================================================

    /// Fetch and consume the last failure as one line of text.
    ///
    /// Empty when nothing is pending.
    pub fn last_error(&self) -> String {
        self.interpreter
            .take_error()
            .map(|err| err.message())
            .unwrap_or_default()
    }

    /// Fetch and consume the last failure with its kind, exception type and
    /// traceback.
    pub fn last_error_report(&self) -> Option<ErrorReport> {
        self.interpreter
            .take_error()
            .map(|err| ErrorReport::from(&err))
    }

    /// Discard any pending failure.
    pub fn clear_error(&self) {
        self.interpreter.clear_error();
    }

    fn recording<F, R>(&self, f: F) -> Option<R>
    where
        F: for<'py> FnOnce(&Context<'py>) -> BridgeResult<R>,
    {
        self.interpreter.enter_recording(Some(&self.config), f)
    }
}
