//! Value Marshaller
//!
//! Converts between host [`Value`]s and interpreter objects.
//!
//! ## Conversion Matrix
//!
//! | Value      | Native   |
//! |------------|----------|
//! | `Nil`      | `None`   |
//! | `Bool`     | `bool`   |
//! | `Integer`  | `int`    |
//! | `Real`     | `float`  |
//! | `Text`     | `str`    |
//! | `Sequence` | `list`   |
//! | `Mapping`  | `dict`   |
//!
//! ## Native Probe Order
//!
//! `bool` is a subclass of `int` in the interpreter, so it is probed first.
//! The full order is `None`, `bool`, `int`, `float`, `str`, `list`, `dict`.
//! Anything else is unsupported: `Nil` under [`Fidelity::Lossy`], an error
//! under [`Fidelity::Strict`].
//!
//! Out-of-range integers, undecodable text and self-referencing containers
//! are errors under either fidelity.
//!
//! Every intermediate object is held through a [`Handle`], so a failure
//! halfway through a large container releases everything built so far.

use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyFloat, PyInt, PyList, PyString};
use smol_str::SmolStr;
use tracing::trace;

use crate::config::{BridgeConfig, Fidelity};
use crate::error::ConversionError;
use crate::handle::{type_name_of, Handle};
use crate::value::{Mapping, Value};

type ConversionResult<T> = Result<T, ConversionError>;

/// Converts values across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marshaller {
    fidelity: Fidelity,
    max_depth: usize,
}

impl Default for Marshaller {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

impl Marshaller {
    pub fn new(fidelity: Fidelity, max_depth: usize) -> Self {
        Self {
            fidelity,
            max_depth,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.fidelity, config.max_depth)
    }

    pub fn fidelity(&self) -> Fidelity {
        self.fidelity
    }

    // ========================================================================
    // Host -> Native
    // ========================================================================

    /// Build the native form of a value.
    pub fn to_native<'py>(&self, py: Python<'py>, value: &Value) -> ConversionResult<Handle<'py>> {
        self.native(py, value, 0)
    }

    fn native<'py>(
        &self,
        py: Python<'py>,
        value: &Value,
        depth: usize,
    ) -> ConversionResult<Handle<'py>> {
        if depth > self.max_depth {
            return Err(ConversionError::DepthExceeded {
                limit: self.max_depth,
            });
        }

        let handle = match value {
            Value::Nil => Handle::new(py.None().into_bound(py)),
            Value::Bool(b) => Handle::new(PyBool::new(py, *b).to_owned().into_any()),
            Value::Integer(n) => {
                let int = (*n).into_pyobject(py).unwrap_or_else(|never| match never {});
                Handle::new(int.into_any())
            }
            Value::Real(f) => Handle::new(PyFloat::new(py, *f).into_any()),
            Value::Text(s) => Handle::new(PyString::new(py, s.as_str()).into_any()),
            Value::Sequence(items) => self.native_list(py, items, depth)?.into_any(),
            Value::Mapping(map) => self.native_dict(py, map, depth)?.into_any(),
        };

        Ok(handle)
    }

    fn native_list<'py>(
        &self,
        py: Python<'py>,
        items: &[Value],
        depth: usize,
    ) -> ConversionResult<Handle<'py, PyList>> {
        let list = Handle::new(PyList::empty(py));

        for item in items {
            let element = self.native(py, item, depth + 1)?;
            list.append(element.as_any())
                .map_err(|err| ConversionError::native(py, &err))?;
        }

        Ok(list)
    }

    fn native_dict<'py>(
        &self,
        py: Python<'py>,
        map: &Mapping,
        depth: usize,
    ) -> ConversionResult<Handle<'py, PyDict>> {
        let dict = Handle::new(PyDict::new(py));

        for (key, value) in map.iter() {
            let key = self.native(py, key, depth + 1)?;
            if key.hash().is_err() {
                return Err(ConversionError::unhashable_key(key.type_name()));
            }

            let value = self.native(py, value, depth + 1)?;
            dict.set_item(key.as_any(), value.as_any())
                .map_err(|err| ConversionError::native(py, &err))?;
        }

        Ok(dict)
    }

    // ========================================================================
    // Native -> Host
    // ========================================================================

    /// Read a native object back as a host value, at this marshaller's fidelity.
    pub fn to_host(&self, obj: &Bound<'_, PyAny>) -> ConversionResult<Value> {
        HostWalk::new(self.fidelity, self.max_depth).value(obj, 0)
    }

    /// Read a native object back, rejecting types with no host counterpart.
    pub fn to_host_strict(&self, obj: &Bound<'_, PyAny>) -> ConversionResult<Value> {
        HostWalk::new(Fidelity::Strict, self.max_depth).value(obj, 0)
    }
}

/// State for one native -> host conversion.
struct HostWalk {
    fidelity: Fidelity,
    max_depth: usize,
    /// Containers on the current path, by identity
    active: Vec<usize>,
}

impl HostWalk {
    fn new(fidelity: Fidelity, max_depth: usize) -> Self {
        Self {
            fidelity,
            max_depth,
            active: Vec::new(),
        }
    }

    fn value(&mut self, obj: &Bound<'_, PyAny>, depth: usize) -> ConversionResult<Value> {
        if depth > self.max_depth {
            return Err(ConversionError::DepthExceeded {
                limit: self.max_depth,
            });
        }

        if obj.is_none() {
            return Ok(Value::Nil);
        }

        if let Ok(b) = obj.cast::<PyBool>() {
            return Ok(Value::Bool(b.is_true()));
        }

        if obj.is_instance_of::<PyInt>() {
            return obj
                .extract::<i64>()
                .map(Value::Integer)
                .map_err(|_| ConversionError::integer_overflow(render_int(obj)));
        }

        if let Ok(f) = obj.cast::<PyFloat>() {
            return Ok(Value::Real(f.value()));
        }

        if let Ok(s) = obj.cast::<PyString>() {
            return s
                .to_str()
                .map(|text| Value::Text(SmolStr::new(text)))
                .map_err(|err| {
                    ConversionError::invalid_text(err.value(obj.py()).to_string())
                });
        }

        if let Ok(list) = obj.cast::<PyList>() {
            return self.list(list, depth);
        }

        if let Ok(dict) = obj.cast::<PyDict>() {
            return self.dict(dict, depth);
        }

        self.unsupported(obj)
    }

    fn list(&mut self, list: &Bound<'_, PyList>, depth: usize) -> ConversionResult<Value> {
        self.enter(list.as_any())?;

        let mut items = Vec::with_capacity(list.len());
        for item in list.iter() {
            let item = Handle::new(item);
            items.push(self.value(&item, depth + 1)?);
        }

        self.active.pop();
        Ok(Value::Sequence(items))
    }

    fn dict(&mut self, dict: &Bound<'_, PyDict>, depth: usize) -> ConversionResult<Value> {
        self.enter(dict.as_any())?;

        let mut map = Mapping::with_capacity(dict.len());
        for (key, value) in dict.iter() {
            let key = Handle::new(key);
            let value = Handle::new(value);
            map.insert(self.value(&key, depth + 1)?, self.value(&value, depth + 1)?);
        }

        self.active.pop();
        Ok(Value::Mapping(map))
    }

    /// Push a container onto the current path, failing if it is already there.
    fn enter(&mut self, container: &Bound<'_, PyAny>) -> ConversionResult<()> {
        let id = container.as_ptr() as usize;
        if self.active.contains(&id) {
            return Err(ConversionError::cycle(type_name_of(container)));
        }
        self.active.push(id);
        Ok(())
    }

    fn unsupported(&self, obj: &Bound<'_, PyAny>) -> ConversionResult<Value> {
        let type_name = type_name_of(obj);
        match self.fidelity {
            Fidelity::Lossy => {
                trace!(type_name = %type_name, "unsupported native type read as nil");
                Ok(Value::Nil)
            }
            Fidelity::Strict => Err(ConversionError::unsupported(type_name)),
        }
    }
}

/// Decimal rendering of a native integer for diagnostics.
fn render_int(obj: &Bound<'_, PyAny>) -> String {
    obj.str()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<integer>".to_string())
}
