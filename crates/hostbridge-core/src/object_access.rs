//! Structured access to plain host objects.
//!
//! [`ObjectReader`] pulls typed fields out of an object with precise errors:
//! an absent field is `MissingProperty`, a present field of the wrong type is
//! `PropertyTypeMismatch`, and nested failures carry the dotted path.
//! [`ObjectBuilder`] is the reverse.

use crate::context::ExecutionContext;
use crate::convert::{FromHost, ToHost};
use crate::error::{BridgeResult, ConversionError};
use crate::handle::ValueHandle;

/// Typed field reader over a host object.
#[derive(Debug, Clone, Copy)]
pub struct ObjectReader<'cx> {
    cx: &'cx ExecutionContext,
    object: ValueHandle,
}

impl<'cx> ObjectReader<'cx> {
    /// Fails with `TypeMismatch` unless `object` is an object or function.
    pub fn new(cx: &'cx ExecutionContext, object: ValueHandle) -> BridgeResult<Self> {
        let ty = cx.value_type(object)?;
        if !ty.is_object_like() {
            return Err(ConversionError::type_mismatch("object", ty.name()).into());
        }
        Ok(Self { cx, object })
    }

    pub fn handle(&self) -> ValueHandle {
        self.object
    }

    pub fn context(&self) -> &'cx ExecutionContext {
        self.cx
    }

    /// The raw property value; `undefined` if absent.
    pub fn raw(&self, name: &str) -> BridgeResult<ValueHandle> {
        self.cx.get(self.object, name)
    }

    /// Whether the property is present and not `undefined`.
    pub fn has(&self, name: &str) -> BridgeResult<bool> {
        let value = self.raw(name)?;
        Ok(!self.cx.value(value)?.is_undefined())
    }

    /// A field that must be present.
    pub fn required<T: FromHost>(&self, name: &str) -> BridgeResult<T> {
        let value = self.raw(name)?;
        if self.cx.value(value)?.is_undefined() {
            return Err(ConversionError::MissingProperty {
                name: name.to_string(),
            }
            .into());
        }
        T::from_host(self.cx, value).map_err(|err| err.at_property(name))
    }

    /// A field where `undefined` and `null` both mean absent.
    pub fn optional<T: FromHost>(&self, name: &str) -> BridgeResult<Option<T>> {
        let value = self.raw(name)?;
        if self.cx.value(value)?.is_nullish() {
            return Ok(None);
        }
        T::from_host(self.cx, value)
            .map(Some)
            .map_err(|err| err.at_property(name))
    }

    /// A field falling back to `default` when absent.
    pub fn optional_or<T: FromHost>(&self, name: &str, default: T) -> BridgeResult<T> {
        Ok(self.optional(name)?.unwrap_or(default))
    }

    /// A nested object field, read with its own reader.
    pub fn nested<T>(
        &self,
        name: &str,
        read: impl FnOnce(&ObjectReader<'cx>) -> BridgeResult<T>,
    ) -> BridgeResult<T> {
        let value = self.raw(name)?;
        let ty = self.cx.value_type(value)?;
        if ty == crate::ValueType::Undefined {
            return Err(ConversionError::MissingProperty {
                name: name.to_string(),
            }
            .into());
        }
        ObjectReader::new(self.cx, value)
            .and_then(|reader| read(&reader))
            .map_err(|err| err.at_property(name))
    }
}

/// Builds a plain host object field by field.
#[derive(Debug)]
pub struct ObjectBuilder<'cx> {
    cx: &'cx ExecutionContext,
    object: ValueHandle,
}

impl<'cx> ObjectBuilder<'cx> {
    pub fn new(cx: &'cx ExecutionContext) -> BridgeResult<Self> {
        Ok(Self {
            cx,
            object: cx.object()?,
        })
    }

    pub fn field<V: ToHost + ?Sized>(self, name: &str, value: &V) -> BridgeResult<Self> {
        self.cx.set_converted(self.object, name, value)?;
        Ok(self)
    }

    /// Set `name` only when `value` is present; absent keys are omitted.
    pub fn optional_field<V: ToHost>(self, name: &str, value: Option<&V>) -> BridgeResult<Self> {
        match value {
            Some(value) => self.field(name, value),
            None => Ok(self),
        }
    }

    pub fn finish(self) -> ValueHandle {
        self.object
    }
}

impl ExecutionContext {
    /// Shorthand for [`ObjectReader::new`].
    pub fn reader(&self, object: ValueHandle) -> BridgeResult<ObjectReader<'_>> {
        ObjectReader::new(self, object)
    }
}
