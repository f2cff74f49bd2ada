//! Function Invoker
//!
//! Calls module-level functions with marshalled arguments, and runs source
//! text in the global execution context.
//!
//! Arguments are converted left to right into handles. If any conversion
//! fails, the prefix already built is dropped before the error returns, so
//! a failed call leaves no references behind.

use std::ffi::CString;

use pyo3::prelude::*;
use pyo3::types::PyTuple;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult, ConversionError};
use crate::handle::Handle;
use crate::lifecycle::Context;
use crate::module;
use crate::value::Value;

/// Call `module.function(*args)` and convert the result.
pub fn call(ctx: &Context<'_>, module: &str, function: &str, args: &[Value]) -> BridgeResult<Value> {
    let py = ctx.py();
    let target = format!("{}.{}", module, function);
    debug!(callee = %target, args = args.len(), "calling");

    let resolved = module::import(ctx, module)?;
    let callee = resolved.attribute(function)?;
    if !callee.is_callable() {
        return Err(BridgeError::not_callable(target, callee.type_name()));
    }

    let marshaller = ctx.marshaller();
    let mut natives = Vec::with_capacity(args.len());
    for (index, arg) in args.iter().enumerate() {
        let native = marshaller.to_native(py, arg).inspect_err(|err| {
            debug!(callee = %target, index, error = %err, "argument conversion failed");
        })?;
        natives.push(native);
    }

    let arguments = PyTuple::new(py, natives.iter().map(|native| native.as_any()))
        .map(Handle::new)
        .map_err(|err| ConversionError::native(py, &err))?;

    let result = callee
        .call1(arguments.to_bound())
        .map(Handle::new)
        .map_err(|err| BridgeError::call(py, &target, &err))?;

    Ok(marshaller.to_host(&result)?)
}

/// Run statements in the global execution context.
pub fn execute(ctx: &Context<'_>, code: &str) -> BridgeResult<()> {
    let py = ctx.py();
    let source = source_text(code)?;
    debug!(bytes = code.len(), "executing source");

    py.run(&source, Some(ctx.globals()), Some(ctx.globals()))
        .map_err(|err| BridgeError::raised(py, &err))
}

/// Evaluate one expression in the global execution context.
pub fn evaluate(ctx: &Context<'_>, expr: &str) -> BridgeResult<Value> {
    let py = ctx.py();
    let source = source_text(expr)?;

    let result = py
        .eval(&source, Some(ctx.globals()), None)
        .map(Handle::new)
        .map_err(|err| BridgeError::raised(py, &err))?;

    Ok(ctx.marshaller().to_host(&result)?)
}

fn source_text(code: &str) -> BridgeResult<CString> {
    CString::new(code)
        .map_err(|err| ConversionError::invalid_text(format!("source text: {}", err)).into())
}
