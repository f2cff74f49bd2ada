//! Interpreter Lifecycle Manager
//!
//! Owns the process-wide interpreter state: the exclusivity token, the
//! global execution context (`__main__`'s namespace), the active
//! configuration and the error channel.
//!
//! ## States
//!
//! ```text
//! Uninitialized --start--> Live --stop--> Stopped
//!                            ^               |
//!                            +-----start-----+
//! ```
//!
//! Every other component reaches interpreter state through a [`Context`]
//! handed out by [`Interpreter::enter`], which fails with
//! `NotInitialized` unless the state is `Live`.
//!
//! `stop()` is a logical teardown. The CPython runtime itself stays
//! initialized for the life of the process because it cannot be brought
//! back once finalized. What a session changed is rolled back instead:
//!
//! - `__main__`'s namespace returns to what it held at `start()`
//! - `sys.path` returns to what it held before the configured paths went in
//! - modules imported during the session leave `sys.modules`, so the next
//!   import runs their top level again
//!
//! Objects that escaped into surviving modules (attributes set on `sys`,
//! references held by native extensions) outlive the session.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use tracing::{debug, info, trace, warn};

use crate::channel::ErrorChannel;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult, ErrorKind, PyException};
use crate::gil::{ExclusivityToken, TokenGuard};
use crate::marshal::Marshaller;

/// The process-wide interpreter.
#[derive(Debug)]
pub struct Interpreter {
    token: ExclusivityToken,
    state: Mutex<RuntimeState>,
    errors: ErrorChannel,
}

#[derive(Debug)]
enum RuntimeState {
    Uninitialized,
    Live(MainContext),
    Stopped,
}

/// What the bridge holds while live.
#[derive(Debug)]
struct MainContext {
    globals: Py<PyDict>,
    config: Arc<BridgeConfig>,
    baseline: Baseline,
}

/// Interpreter state captured at `start()` and restored by `stop()`.
#[derive(Debug)]
struct Baseline {
    globals: Py<PyDict>,
    sys_path: Py<PyList>,
    modules: HashSet<String>,
}

impl Baseline {
    /// Snapshot `globals` and the module registry. `sys_path` is taken by
    /// the caller before it adds the configured paths.
    fn capture(
        py: Python<'_>,
        globals: &Bound<'_, PyDict>,
        sys_path: Py<PyList>,
    ) -> PyResult<Self> {
        let modules = sys_modules(py)?
            .keys()
            .iter()
            .filter_map(|key| key.extract::<String>().ok())
            .collect();

        Ok(Self {
            globals: globals.copy()?.unbind(),
            sys_path,
            modules,
        })
    }

    fn restore(&self, py: Python<'_>, globals: &Bound<'_, PyDict>) -> PyResult<()> {
        globals.clear();
        globals.update(self.globals.bind(py).as_mapping())?;

        let sys_path = PyModule::import(py, "sys")?.getattr("path")?;
        sys_path.call_method0("clear")?;
        sys_path.call_method1("extend", (self.sys_path.bind(py),))?;

        let modules = sys_modules(py)?;
        let mut dropped = 0usize;
        for key in modules.keys() {
            let Ok(name) = key.extract::<String>() else {
                continue;
            };
            if !self.modules.contains(&name) {
                trace!(module = %name, "dropping session module");
                modules.del_item(key)?;
                dropped += 1;
            }
        }
        debug!(dropped, "session modules dropped");

        PyModule::import(py, "importlib")?.call_method0("invalidate_caches")?;
        Ok(())
    }
}

fn sys_modules(py: Python<'_>) -> PyResult<Bound<'_, PyDict>> {
    Ok(PyModule::import(py, "sys")?
        .getattr("modules")?
        .cast_into::<PyDict>()?)
}

impl Interpreter {
    /// The single interpreter of this process.
    pub fn global() -> &'static Interpreter {
        static INTERPRETER: OnceLock<Interpreter> = OnceLock::new();
        INTERPRETER.get_or_init(|| Interpreter {
            token: ExclusivityToken::new(),
            state: Mutex::new(RuntimeState::Uninitialized),
            errors: ErrorChannel::new(),
        })
    }

    pub fn token(&self) -> &ExclusivityToken {
        &self.token
    }

    pub fn errors(&self) -> &ErrorChannel {
        &self.errors
    }

    pub fn is_live(&self) -> bool {
        matches!(*self.state.lock(), RuntimeState::Live(_))
    }

    /// Bring the interpreter up. A no-op if it is already live.
    pub fn start(&self, config: BridgeConfig) -> BridgeResult<()> {
        let _token = self.token.acquire();

        if self.is_live() {
            debug!("interpreter already live");
            return Ok(());
        }

        Python::initialize();
        let main = Python::attach(|py| -> BridgeResult<MainContext> {
            let setup = || -> PyResult<(Py<PyDict>, Baseline)> {
                let globals = PyModule::import(py, "__main__")?.dict();
                let sys_path = PyModule::import(py, "sys")?
                    .getattr("path")?
                    .cast_into::<PyList>()?;
                let original_path = PyList::new(py, sys_path.iter())?.unbind();

                for path in config.module_paths.iter().rev() {
                    prepend_module_path(py, path)?;
                }

                let baseline = Baseline::capture(py, &globals, original_path)?;
                Ok((globals.unbind(), baseline))
            };

            let (globals, baseline) = setup().map_err(|err| BridgeError::raised(py, &err))?;
            Ok(MainContext {
                globals,
                config: Arc::new(config),
                baseline,
            })
        })?;

        info!(
            module_paths = main.config.module_paths.len(),
            fidelity = ?main.config.fidelity,
            "interpreter started"
        );
        *self.state.lock() = RuntimeState::Live(main);
        Ok(())
    }

    /// Tear the bridge down. Safe to call in any state.
    pub fn stop(&self) {
        let _token = self.token.acquire();

        let main = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, RuntimeState::Stopped) {
                RuntimeState::Live(main) => main,
                other => {
                    *state = other;
                    return;
                }
            }
        };

        self.errors.clear();
        Python::attach(|py| {
            // Anything the interpreter still has raised belongs to the old session
            let _ = PyErr::take(py);

            if let Err(err) = main.baseline.restore(py, main.globals.bind(py)) {
                warn!(error = %PyException::from_py_err(py, &err), "session state not fully reset");
            }
            drop(main);
        });
        info!("interpreter stopped");
    }

    /// Run `f` with a live context, holding the token throughout.
    ///
    /// With `lazy` set and the interpreter never started, it is started
    /// first with that configuration (if it allows lazy start).
    pub fn enter<F, R>(&self, lazy: Option<&BridgeConfig>, f: F) -> BridgeResult<R>
    where
        F: for<'py> FnOnce(&Context<'py>) -> BridgeResult<R>,
    {
        let _token = self.acquire_for_operation();
        self.enter_held(lazy, f)
    }

    /// Like [`Interpreter::enter`], but a failure is parked in the error
    /// channel before the token is released, so the channel always holds
    /// the failure of the operation that finished last.
    pub fn enter_recording<F, R>(&self, lazy: Option<&BridgeConfig>, f: F) -> Option<R>
    where
        F: for<'py> FnOnce(&Context<'py>) -> BridgeResult<R>,
    {
        let _token = self.acquire_for_operation();
        self.enter_held(lazy, f)
            .map_err(|err| self.errors.record(err))
            .ok()
    }

    fn acquire_for_operation(&self) -> TokenGuard<'_> {
        let token = self.token.acquire();
        if token.is_nested() {
            trace!("reentrant bridge operation");
        }
        token
    }

    /// Body of [`Interpreter::enter`]; the caller holds the token.
    fn enter_held<F, R>(&self, lazy: Option<&BridgeConfig>, f: F) -> BridgeResult<R>
    where
        F: for<'py> FnOnce(&Context<'py>) -> BridgeResult<R>,
    {
        if let Some(config) = lazy.filter(|config| config.lazy_start) {
            if matches!(*self.state.lock(), RuntimeState::Uninitialized) {
                debug!("starting interpreter on first use");
                self.start(config.clone())?;
            }
        }

        if !self.is_live() {
            warn!("bridge operation on an interpreter that is not live");
            return Err(BridgeError::NotInitialized);
        }

        Python::attach(|py| {
            let ctx = {
                let state = self.state.lock();
                match &*state {
                    RuntimeState::Live(main) => Context {
                        py,
                        globals: main.globals.bind(py).clone(),
                        config: Arc::clone(&main.config),
                    },
                    _ => return Err(BridgeError::NotInitialized),
                }
            };
            f(&ctx)
        })
    }

    /// Fetch and consume the most recent failure.
    ///
    /// The bridge's own slot wins; otherwise a condition still raised on the
    /// interpreter side is taken. Both are cleared either way.
    pub fn take_error(&self) -> Option<BridgeError> {
        let _token = self.token.acquire();
        let recorded = self.errors.take();

        if !self.is_live() {
            return recorded;
        }

        let pending = Python::attach(|py| {
            PyErr::take(py).map(|err| match ErrorKind::of_py_err(py, &err) {
                ErrorKind::Import => BridgeError::import(py, "<unknown>", &err),
                _ => BridgeError::raised(py, &err),
            })
        });
        recorded.or(pending)
    }

    /// Discard any pending failure without reporting it.
    pub fn clear_error(&self) {
        let _token = self.token.acquire();
        self.errors.clear();

        if self.is_live() {
            Python::attach(|py| {
                let _ = PyErr::take(py);
            });
        }
    }
}

/// Prepend a directory to `sys.path` unless already present.
pub(crate) fn prepend_module_path(py: Python<'_>, path: &Path) -> PyResult<()> {
    let entry = path.as_os_str().into_pyobject(py)?;
    let sys_path = PyModule::import(py, "sys")?.getattr("path")?;

    if !sys_path.contains(&entry)? {
        sys_path.call_method1("insert", (0, entry))?;
        debug!(path = %path.display(), "module path added");
    }

    PyModule::import(py, "importlib")?.call_method0("invalidate_caches")?;
    Ok(())
}

// ============================================================================
// Context - borrowed capability to a live interpreter
// ============================================================================

/// Proof that the interpreter is live and the token is held.
///
/// Only [`Interpreter::enter`] creates one, and it cannot outlive the
/// closure it is passed to.
pub struct Context<'py> {
    py: Python<'py>,
    globals: Bound<'py, PyDict>,
    config: Arc<BridgeConfig>,
}

impl<'py> Context<'py> {
    pub fn py(&self) -> Python<'py> {
        self.py
    }

    /// The global execution context used by `execute`/`evaluate`.
    pub fn globals(&self) -> &Bound<'py, PyDict> {
        &self.globals
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn marshaller(&self) -> Marshaller {
        Marshaller::from_config(&self.config)
    }
}

/// Keeps the interpreter live for a scope; stops it when dropped.
#[derive(Debug)]
pub struct Session {
    interpreter: &'static Interpreter,
}

impl Session {
    /// Start the interpreter and tie its teardown to the returned value.
    pub fn begin(interpreter: &'static Interpreter, config: BridgeConfig) -> BridgeResult<Self> {
        interpreter.start(config)?;
        Ok(Self { interpreter })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.interpreter.stop();
    }
}
