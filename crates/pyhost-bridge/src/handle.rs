//! Scope-bound native handles.
//!
//! Every interpreter object the bridge touches is held through a [`Handle`]:
//! one strong reference taken when the handle is made, released exactly once
//! when it drops, on every exit path. Handles are tied to the `'py` token
//! lifetime, so none can escape the operation that created it.
//!
//! The live count is per thread. Handles cannot cross threads, so the count
//! on one thread is exact regardless of what other threads are doing.

use std::cell::Cell;
use std::fmt;
use std::ops::Deref;

use pyo3::prelude::*;

thread_local! {
    /// Handles alive on this thread
    static LIVE_HANDLES: Cell<usize> = const { Cell::new(0) };
}

/// Number of handles currently alive on this thread.
pub fn live_handles() -> usize {
    LIVE_HANDLES.with(|live| live.get())
}

/// Owned, counted reference to an interpreter object.
pub struct Handle<'py, T = PyAny> {
    obj: Bound<'py, T>,
}

impl<'py, T> Handle<'py, T> {
    /// Take ownership of a strong reference.
    pub fn new(obj: Bound<'py, T>) -> Self {
        LIVE_HANDLES.with(|live| live.set(live.get() + 1));
        Self { obj }
    }

    /// Borrow the object, typed.
    pub fn as_bound(&self) -> &Bound<'py, T> {
        &self.obj
    }

    /// Borrow the object as `PyAny`.
    pub fn as_any(&self) -> &Bound<'py, PyAny> {
        self.obj.as_any()
    }

    /// Hand out a second strong reference, leaving this handle in place.
    ///
    /// The returned reference is outside the bridge's accounting; use it
    /// only to give the object to the interpreter.
    pub fn to_bound(&self) -> Bound<'py, T> {
        self.obj.clone()
    }

    /// Re-type as a `PyAny` handle.
    pub fn into_any(self) -> Handle<'py> {
        Handle::new(self.obj.clone().into_any())
    }

    /// Identity of the underlying object.
    pub fn id(&self) -> usize {
        self.obj.as_ptr() as usize
    }

    /// Name of the object's native type.
    pub fn type_name(&self) -> String {
        type_name_of(self.obj.as_any())
    }
}

impl<'py, T> Deref for Handle<'py, T> {
    type Target = Bound<'py, T>;

    fn deref(&self) -> &Self::Target {
        &self.obj
    }
}

impl<T> Drop for Handle<'_, T> {
    fn drop(&mut self) {
        LIVE_HANDLES.with(|live| live.set(live.get().saturating_sub(1)));
    }
}

impl<T> fmt::Debug for Handle<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}@{:#x})", self.type_name(), self.id())
    }
}

/// Native type name of any object, `"<unknown>"` if it cannot be read.
pub fn type_name_of(obj: &Bound<'_, PyAny>) -> String {
    obj.get_type()
        .name()
        .map(|name| name.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string())
}
