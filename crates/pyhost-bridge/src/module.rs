//! Module & Attribute Accessor
//!
//! Modules are resolved by name on every operation and never cached by the
//! bridge; the interpreter's own module registry owns them. A [`ModuleRef`]
//! is a transient handle that lives only as long as the operation using it.

use pyo3::prelude::*;
use pyo3::types::PyModule;
use tracing::{debug, trace};

use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crate::lifecycle::{prepend_module_path, Context};
use crate::value::Value;

/// A module resolved through the import machinery.
#[derive(Debug)]
pub struct ModuleRef<'py> {
    name: String,
    handle: Handle<'py, PyModule>,
}

impl<'py> ModuleRef<'py> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &Handle<'py, PyModule> {
        &self.handle
    }

    /// Look up an attribute without converting it.
    pub fn attribute(&self, attribute: &str) -> BridgeResult<Handle<'py>> {
        self.handle
            .getattr(attribute)
            .map(Handle::new)
            .map_err(|err| BridgeError::attribute(self.handle.py(), &self.name, attribute, &err))
    }

    /// Read an attribute as a host value.
    pub fn get_attribute(&self, ctx: &Context<'py>, attribute: &str) -> BridgeResult<Value> {
        let obj = self.attribute(attribute)?;
        Ok(ctx.marshaller().to_host(&obj)?)
    }

    /// Convert `value` and bind it to `attribute` on the module.
    pub fn set_attribute(
        &self,
        ctx: &Context<'py>,
        attribute: &str,
        value: &Value,
    ) -> BridgeResult<()> {
        let native = ctx.marshaller().to_native(ctx.py(), value)?;
        self.handle
            .setattr(attribute, native.as_any())
            .map_err(|err| BridgeError::attribute(ctx.py(), &self.name, attribute, &err))
    }
}

/// Resolve a module by dotted name, importing it if needed.
pub fn import<'py>(ctx: &Context<'py>, name: &str) -> BridgeResult<ModuleRef<'py>> {
    trace!(module = name, "resolving module");
    let module = PyModule::import(ctx.py(), name)
        .map_err(|err| BridgeError::import(ctx.py(), name, &err))?;

    Ok(ModuleRef {
        name: name.to_string(),
        handle: Handle::new(module),
    })
}

/// Whether a module is already in the interpreter's registry.
pub fn is_loaded(ctx: &Context<'_>, name: &str) -> BridgeResult<bool> {
    let py = ctx.py();
    sys_modules(py)
        .and_then(|modules| modules.contains(name))
        .map_err(|err| BridgeError::raised(py, &err))
}

/// Re-execute a module's top level in place.
///
/// A module that was never imported is imported instead, which runs its top
/// level exactly once.
pub fn reload(ctx: &Context<'_>, name: &str) -> BridgeResult<()> {
    let py = ctx.py();

    if !is_loaded(ctx, name)? {
        debug!(module = name, "reload of a module never imported; importing");
        import(ctx, name)?;
        return Ok(());
    }

    let module = import(ctx, name)?;
    let importlib = PyModule::import(py, "importlib")
        .map(Handle::new)
        .map_err(|err| BridgeError::raised(py, &err))?;
    let _reloaded = importlib
        .call_method1("reload", (module.handle().to_bound(),))
        .map(Handle::new)
        .map_err(|err| BridgeError::import(py, name, &err))?;

    debug!(module = name, "module reloaded");
    Ok(())
}

/// Names of every module currently in the interpreter's registry.
///
/// Order is whatever the registry yields.
pub fn list_loaded(ctx: &Context<'_>) -> BridgeResult<Vec<String>> {
    let py = ctx.py();

    let collect = || -> PyResult<Vec<String>> {
        // Snapshot, so iteration is immune to imports triggered elsewhere
        let snapshot = Handle::new(sys_modules(py)?.call_method0("copy")?);
        let mut names = Vec::new();
        for key in snapshot.try_iter()? {
            let key = Handle::new(key?);
            match key.extract::<String>() {
                Ok(name) => names.push(name),
                Err(_) => trace!(key = ?key, "skipping non-text module key"),
            }
        }
        Ok(names)
    };

    collect().map_err(|err| BridgeError::raised(py, &err))
}

/// Prepend a directory to the module search path at runtime.
pub fn add_module_path(ctx: &Context<'_>, path: &std::path::Path) -> BridgeResult<()> {
    let py = ctx.py();
    prepend_module_path(py, path).map_err(|err| BridgeError::raised(py, &err))
}

fn sys_modules(py: Python<'_>) -> PyResult<Bound<'_, PyAny>> {
    PyModule::import(py, "sys")?.getattr("modules")
}
