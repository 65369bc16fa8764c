//! The execution context: the only way to touch host values.
//!
//! Entering an [`Environment`](crate::Environment) pushes it onto a
//! thread-local stack of active contexts and opens a handle scope. All host
//! operations go through [`ExecutionContext`], which validates handles
//! against the live scope stack before reading them.

use std::cell::RefCell;
use std::rc::Rc;

use crate::convert::ToHost;
use crate::env::{EnvId, EnvInner, GcStats};
use crate::error::{BridgeError, BridgeResult, ConversionError, HostException};
use crate::handle::{Persistent, ValueHandle};
use crate::host::object::{
    FunctionData, HostObject, ObjectKind, Property, PropertyFlags, PropertyKey, PropertyValue,
};
use crate::host::{script, HostValue, ObjectId, SymbolId, ValueType, number_to_string};
use crate::name::{NameKey, SymbolKey};
use crate::native_fn::{CallContext, NativeFn};
use crate::EnvironmentConfig;

/// Prototype chains longer than this are treated as cyclic.
const MAX_PROTOTYPE_DEPTH: usize = 10_000;

/// Arrays are stored densely; growing one past this many elements fails.
pub const MAX_ARRAY_LENGTH: usize = 1 << 24;

fn array_exhausted() -> BridgeError {
    BridgeError::ResourceExhausted {
        resource: "array elements",
        limit: MAX_ARRAY_LENGTH,
    }
}

fn dense_length(len: usize) -> BridgeResult<usize> {
    if len > MAX_ARRAY_LENGTH {
        return Err(array_exhausted());
    }
    Ok(len)
}

thread_local! {
    static ACTIVE: RefCell<Vec<Rc<EnvInner>>> = const { RefCell::new(Vec::new()) };
}

/// Pops the active-context stack when an entry ends, however it ends.
struct ActiveFrame {
    env: Rc<EnvInner>,
}

impl ActiveFrame {
    fn push(env: &Rc<EnvInner>) -> Self {
        if ACTIVE.try_with(|stack| stack.borrow_mut().push(env.clone())).is_err() {
            tracing::warn!(env = ?env.id, "thread is shutting down; context not made current");
        }
        env.entry_depth.set(env.entry_depth.get() + 1);
        Self { env: env.clone() }
    }
}

impl Drop for ActiveFrame {
    fn drop(&mut self) {
        let popped = ACTIVE.try_with(|stack| stack.borrow_mut().pop()).ok().flatten();
        if !popped.is_some_and(|env| Rc::ptr_eq(&env, &self.env)) {
            tracing::warn!(env = ?self.env.id, "active context stack out of order on exit");
        }
        self.env
            .entry_depth
            .set(self.env.entry_depth.get().saturating_sub(1));
    }
}

/// Closes a handle scope on drop.
struct ScopeGuard<'a> {
    env: &'a EnvInner,
    generation: u64,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        match self.env.scopes.try_borrow_mut() {
            Ok(mut scopes) => scopes.pop(self.generation),
            Err(_) => tracing::warn!(generation = self.generation, "scope stack borrowed on close; scope left open"),
        }
        tracing::trace!(generation = self.generation, "scope closed");
    }
}

pub(crate) fn enter<R>(
    env: &Rc<EnvInner>,
    f: impl FnOnce(&ExecutionContext) -> BridgeResult<R>,
) -> BridgeResult<R> {
    env.check_live()?;
    let result = {
        let _frame = ActiveFrame::push(env);
        let cx = ExecutionContext { env: env.clone() };
        cx.scope(f)
    };

    if env.entry_depth.get() == 0
        && let Some(threshold) = env.config.gc_threshold()
        && env.heap.borrow().allocated_since_gc() >= threshold
    {
        env.collect();
    }
    result
}

/// Resolution of one step along a prototype chain.
enum Lookup {
    Value(HostValue),
    Getter(Option<ObjectId>),
    Next(Option<ObjectId>),
}

enum Assign {
    Own,
    Setter(Option<ObjectId>),
    ReadOnly,
    Next(Option<ObjectId>),
}

/// Handle to the active environment.
///
/// Cheap to clone. Not `Send`: contexts are confined to the environment's
/// thread.
#[derive(Clone)]
pub struct ExecutionContext {
    pub(crate) env: Rc<EnvInner>,
}

impl ExecutionContext {
    /// The innermost active context on this thread.
    pub fn current() -> BridgeResult<Self> {
        let env = ACTIVE
            .try_with(|stack| stack.borrow().last().cloned())
            .ok()
            .flatten()
            .ok_or(BridgeError::NoActiveContext)?;
        env.check_thread()?;
        Ok(Self { env })
    }

    pub fn environment_id(&self) -> EnvId {
        self.env.id
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.env.config
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    /// Run `f` in a nested handle scope. Handles created inside are stale
    /// once it returns.
    pub fn scope<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let generation = self.env.scopes.borrow_mut().push();
        tracing::trace!(generation, "scope opened");
        let _guard = ScopeGuard {
            env: &self.env,
            generation,
        };
        f(self)
    }

    /// Like [`scope`](Self::scope), but the returned handle is re-issued in
    /// the enclosing scope.
    pub fn escape(
        &self,
        f: impl FnOnce(&Self) -> BridgeResult<ValueHandle>,
    ) -> BridgeResult<ValueHandle> {
        let value = self.scope(|inner| {
            let handle = f(inner)?;
            inner.value(handle)
        })?;
        self.alloc(value)
    }

    pub fn scope_depth(&self) -> usize {
        self.env.scopes.borrow().depth()
    }

    pub(crate) fn alloc(&self, value: HostValue) -> BridgeResult<ValueHandle> {
        let (generation, index) = self
            .env
            .scopes
            .borrow_mut()
            .alloc(value)
            .ok_or(BridgeError::NoActiveContext)?;
        Ok(ValueHandle::new(self.env.id, generation, index))
    }

    /// The value behind `handle`, validated against the live scope stack.
    pub fn value(&self, handle: ValueHandle) -> BridgeResult<HostValue> {
        if handle.env() != self.env.id {
            return Err(BridgeError::ForeignHandle);
        }
        self.env
            .scopes
            .borrow()
            .read(handle.scope(), handle.index())
            .cloned()
            .ok_or(BridgeError::StaleHandle)
    }

    /// Root the value so it survives this scope.
    pub fn persist(&self, handle: ValueHandle) -> BridgeResult<Persistent> {
        let value = self.value(handle)?;
        let root = self.env.roots.borrow_mut().add(value);
        Ok(Persistent::new(Rc::downgrade(&self.env), self.env.id, root))
    }

    fn object_id(&self, handle: ValueHandle) -> BridgeResult<ObjectId> {
        match self.value(handle)? {
            HostValue::Object(id) => Ok(id),
            other => Err(ConversionError::type_mismatch("object", self.type_of(&other).name()).into()),
        }
    }

    fn allocate(&self, object: HostObject) -> BridgeResult<ObjectId> {
        self.env.heap.borrow_mut().allocate(object)
    }

    // ========================================================================
    // Creation
    // ========================================================================

    pub fn undefined(&self) -> BridgeResult<ValueHandle> {
        self.alloc(HostValue::Undefined)
    }

    pub fn null(&self) -> BridgeResult<ValueHandle> {
        self.alloc(HostValue::Null)
    }

    pub fn boolean(&self, value: bool) -> BridgeResult<ValueHandle> {
        self.alloc(HostValue::Bool(value))
    }

    pub fn number(&self, value: f64) -> BridgeResult<ValueHandle> {
        self.alloc(HostValue::Number(value))
    }

    pub fn string(&self, value: &str) -> BridgeResult<ValueHandle> {
        self.alloc(HostValue::string(value))
    }

    /// A fresh, unregistered symbol.
    pub fn symbol(&self, description: Option<&str>) -> BridgeResult<ValueHandle> {
        let id = self.env.symbols.borrow_mut().create(description);
        self.alloc(HostValue::Symbol(id))
    }

    /// The registry symbol for `key` (`Symbol.for` semantics).
    pub fn symbol_for(&self, key: &str) -> BridgeResult<ValueHandle> {
        let id = self.env.symbols.borrow_mut().for_key(key);
        self.alloc(HostValue::Symbol(id))
    }

    /// Registry key of a symbol, `None` for unregistered symbols.
    pub fn symbol_key_for(&self, symbol: ValueHandle) -> BridgeResult<Option<String>> {
        let id = self.symbol_id(symbol)?;
        Ok(self.env.symbols.borrow().key_for(id).map(|key| key.to_string()))
    }

    pub fn symbol_description(&self, symbol: ValueHandle) -> BridgeResult<Option<String>> {
        let id = self.symbol_id(symbol)?;
        Ok(self.env.symbols.borrow().description(id).map(|d| d.to_string()))
    }

    fn symbol_id(&self, handle: ValueHandle) -> BridgeResult<SymbolId> {
        match self.value(handle)? {
            HostValue::Symbol(id) => Ok(id),
            other => Err(ConversionError::type_mismatch("symbol", self.type_of(&other).name()).into()),
        }
    }

    pub fn object(&self) -> BridgeResult<ValueHandle> {
        let id = self.allocate(HostObject::ordinary())?;
        self.alloc(HostValue::Object(id))
    }

    /// An ordinary object whose prototype is `prototype`.
    pub fn object_with_prototype(&self, prototype: Option<ValueHandle>) -> BridgeResult<ValueHandle> {
        let prototype = prototype.map(|p| self.object_id(p)).transpose()?;
        let id = self.allocate(HostObject::new(ObjectKind::Ordinary, prototype))?;
        self.alloc(HostValue::Object(id))
    }

    pub fn array(&self, elements: &[ValueHandle]) -> BridgeResult<ValueHandle> {
        let values = elements
            .iter()
            .map(|handle| self.value(*handle))
            .collect::<BridgeResult<Vec<_>>>()?;
        let id = self.allocate(HostObject::new(ObjectKind::Array(values), None))?;
        self.alloc(HostValue::Object(id))
    }

    /// A callable function object. Applying `new` to it fails.
    pub fn function(&self, name: &str, native: NativeFn) -> BridgeResult<ValueHandle> {
        self.make_function(name, native, false)
    }

    /// A function usable with `new`, with a fresh `prototype` object whose
    /// `constructor` points back at it.
    pub fn constructor(&self, name: &str, native: NativeFn) -> BridgeResult<ValueHandle> {
        let ctor = self.make_function(name, native, true)?;
        let prototype = self.object()?;
        self.define_value(prototype, "constructor", ctor, PropertyFlags::HIDDEN)?;
        self.define_value(ctor, "prototype", prototype, PropertyFlags::WRITABLE)?;
        Ok(ctor)
    }

    fn make_function(&self, name: &str, native: NativeFn, constructor: bool) -> BridgeResult<ValueHandle> {
        let mut object = HostObject::new(
            ObjectKind::Function(FunctionData {
                name: Rc::from(name),
                native,
                constructor,
            }),
            None,
        );
        object.define(
            "name".into(),
            Property::data(HostValue::string(name), PropertyFlags::CONFIGURABLE),
        );
        let id = self.allocate(object)?;
        self.alloc(HostValue::Object(id))
    }

    /// A host `Error` object carrying `name`, `message` and `code`.
    pub fn error(&self, exception: &HostException) -> BridgeResult<ValueHandle> {
        let mut object = HostObject::new(ObjectKind::Error, None);
        object.define(
            "name".into(),
            Property::data(HostValue::string(exception.kind.name()), PropertyFlags::HIDDEN),
        );
        object.define(
            "message".into(),
            Property::data(HostValue::string(&exception.message), PropertyFlags::HIDDEN),
        );
        if let Some(code) = &exception.code {
            object.define(
                "code".into(),
                Property::data(HostValue::string(code), PropertyFlags::DEFAULT),
            );
        }
        let id = self.allocate(object)?;
        self.alloc(HostValue::Object(id))
    }

    /// The error object a host caller observes for `error`.
    pub fn error_object(&self, error: &BridgeError) -> BridgeResult<ValueHandle> {
        self.error(&error.to_exception())
    }

    pub fn global(&self) -> BridgeResult<ValueHandle> {
        self.alloc(HostValue::Object(self.env.global))
    }

    // ========================================================================
    // Type inspection
    // ========================================================================

    pub(crate) fn type_of(&self, value: &HostValue) -> ValueType {
        match value {
            HostValue::Undefined => ValueType::Undefined,
            HostValue::Null => ValueType::Null,
            HostValue::Bool(_) => ValueType::Boolean,
            HostValue::Number(_) => ValueType::Number,
            HostValue::String(_) => ValueType::String,
            HostValue::Symbol(_) => ValueType::Symbol,
            HostValue::Object(id) => match self.env.heap.borrow().get(*id) {
                Ok(object) if object.is_callable() => ValueType::Function,
                _ => ValueType::Object,
            },
        }
    }

    pub fn value_type(&self, handle: ValueHandle) -> BridgeResult<ValueType> {
        let value = self.value(handle)?;
        Ok(self.type_of(&value))
    }

    fn with_object<R>(&self, handle: ValueHandle, f: impl FnOnce(&HostObject) -> R) -> BridgeResult<Option<R>> {
        let HostValue::Object(id) = self.value(handle)? else {
            return Ok(None);
        };
        let heap = self.env.heap.borrow();
        Ok(Some(f(heap.get(id)?)))
    }

    pub fn is_array(&self, handle: ValueHandle) -> BridgeResult<bool> {
        Ok(self
            .with_object(handle, |object| matches!(object.kind, ObjectKind::Array(_)))?
            .unwrap_or(false))
    }

    pub fn is_error(&self, handle: ValueHandle) -> BridgeResult<bool> {
        Ok(self
            .with_object(handle, |object| matches!(object.kind, ObjectKind::Error))?
            .unwrap_or(false))
    }

    pub fn is_callable(&self, handle: ValueHandle) -> BridgeResult<bool> {
        Ok(self.with_object(handle, HostObject::is_callable)?.unwrap_or(false))
    }

    pub fn is_constructor(&self, handle: ValueHandle) -> BridgeResult<bool> {
        Ok(self
            .with_object(handle, |object| {
                matches!(&object.kind, ObjectKind::Function(f) if f.constructor)
            })?
            .unwrap_or(false))
    }

    pub fn is_promise(&self, handle: ValueHandle) -> BridgeResult<bool> {
        Ok(self
            .with_object(handle, |object| matches!(object.kind, ObjectKind::Promise(_)))?
            .unwrap_or(false))
    }

    /// Whether the object carries a native payload.
    pub fn is_wrapped(&self, handle: ValueHandle) -> BridgeResult<bool> {
        Ok(self
            .with_object(handle, |object| matches!(object.kind, ObjectKind::Wrapped(_)))?
            .unwrap_or(false))
    }

    pub fn is_nullish(&self, handle: ValueHandle) -> BridgeResult<bool> {
        Ok(self.value(handle)?.is_nullish())
    }

    pub fn as_bool(&self, handle: ValueHandle) -> BridgeResult<bool> {
        match self.value(handle)? {
            HostValue::Bool(b) => Ok(b),
            other => Err(ConversionError::type_mismatch("boolean", self.type_of(&other).name()).into()),
        }
    }

    pub fn as_number(&self, handle: ValueHandle) -> BridgeResult<f64> {
        match self.value(handle)? {
            HostValue::Number(n) => Ok(n),
            other => Err(ConversionError::type_mismatch("number", self.type_of(&other).name()).into()),
        }
    }

    pub fn as_string(&self, handle: ValueHandle) -> BridgeResult<String> {
        match self.value(handle)? {
            HostValue::String(s) => Ok(s.to_string()),
            other => Err(ConversionError::type_mismatch("string", self.type_of(&other).name()).into()),
        }
    }

    /// Host truthiness of the value.
    pub fn is_truthy(&self, handle: ValueHandle) -> BridgeResult<bool> {
        Ok(self.value(handle)?.is_truthy())
    }

    pub fn array_length(&self, handle: ValueHandle) -> BridgeResult<usize> {
        self.with_object(handle, |object| match &object.kind {
            ObjectKind::Array(elements) => Some(elements.len()),
            _ => None,
        })?
        .flatten()
        .ok_or_else(|| {
            ConversionError::type_mismatch("array", self.value_type(handle).map_or("unknown", |t| t.name()))
                .into()
        })
    }

    /// Declared name of a function object.
    pub fn function_name(&self, handle: ValueHandle) -> BridgeResult<Option<String>> {
        Ok(self
            .with_object(handle, |object| match &object.kind {
                ObjectKind::Function(f) => Some(f.name.to_string()),
                _ => None,
            })?
            .flatten())
    }

    /// Name of the constructor an object was made by, found through
    /// `prototype.constructor.name`.
    pub fn constructor_name(&self, handle: ValueHandle) -> BridgeResult<Option<String>> {
        let Some(prototype) = self
            .with_object(handle, |object| object.prototype)?
            .flatten()
        else {
            return Ok(None);
        };
        let heap = self.env.heap.borrow();
        let ctor = match heap.get(prototype)?.own(&"constructor".into()) {
            Some(Property {
                value: PropertyValue::Data(HostValue::Object(ctor)),
                ..
            }) => *ctor,
            _ => return Ok(None),
        };
        Ok(match &heap.get(ctor)?.kind {
            ObjectKind::Function(f) => Some(f.name.to_string()),
            _ => None,
        })
    }

    /// Short human-readable rendering for diagnostics.
    pub fn describe(&self, handle: ValueHandle) -> BridgeResult<String> {
        let value = self.value(handle)?;
        Ok(self.describe_value(&value))
    }

    pub(crate) fn describe_value(&self, value: &HostValue) -> String {
        match value {
            HostValue::Undefined => "undefined".to_string(),
            HostValue::Null => "null".to_string(),
            HostValue::Bool(b) => b.to_string(),
            HostValue::Number(n) => number_to_string(*n),
            HostValue::String(s) => format!("\"{s}\""),
            HostValue::Symbol(id) => self.describe_symbol(*id),
            HostValue::Object(id) => match self.env.heap.borrow().get(*id).map(|o| &o.kind) {
                Ok(ObjectKind::Function(f)) => f.name.to_string(),
                Ok(ObjectKind::Array(_)) => "array".to_string(),
                _ => "object".to_string(),
            },
        }
    }

    fn describe_symbol(&self, id: SymbolId) -> String {
        match self.env.symbols.borrow().description(id) {
            Some(description) => format!("Symbol({description})"),
            None => "Symbol()".to_string(),
        }
    }

    pub(crate) fn describe_key(&self, key: &PropertyKey) -> String {
        match key {
            PropertyKey::String(s) => s.to_string(),
            PropertyKey::Symbol(id) => self.describe_symbol(*id),
        }
    }

    pub fn strict_equals(&self, a: ValueHandle, b: ValueHandle) -> BridgeResult<bool> {
        Ok(self.value(a)?.strict_equals(&self.value(b)?))
    }

    // ========================================================================
    // Properties
    // ========================================================================

    pub(crate) fn property_key(&self, key: &NameKey) -> BridgeResult<PropertyKey> {
        match key {
            NameKey::String(name) => Ok(PropertyKey::String(name.clone())),
            NameKey::Symbol(symbol) if symbol.env() == self.env.id => Ok(PropertyKey::Symbol(symbol.id())),
            NameKey::Symbol(_) => Err(BridgeError::ForeignHandle),
        }
    }

    pub(crate) fn name_key(&self, key: &PropertyKey) -> NameKey {
        match key {
            PropertyKey::String(name) => NameKey::String(name.clone()),
            PropertyKey::Symbol(id) => NameKey::Symbol(SymbolKey::new(self.env.id, *id)),
        }
    }

    /// `object[key]`, following the prototype chain and invoking getters.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn get(&self, object: ValueHandle, key: impl Into<NameKey>) -> BridgeResult<ValueHandle> {
        let key = self.property_key(&key.into())?;
        let receiver = self.value(object)?;
        let value = self.get_value(&receiver, &key)?;
        self.alloc(value)
    }

    pub fn get_index(&self, object: ValueHandle, index: usize) -> BridgeResult<ValueHandle> {
        self.get(object, NameKey::from(index.to_string()))
    }

    pub(crate) fn get_value(&self, receiver: &HostValue, key: &PropertyKey) -> BridgeResult<HostValue> {
        let start = match receiver {
            HostValue::Object(id) => *id,
            HostValue::Undefined | HostValue::Null => {
                return Err(BridgeError::type_error(format!(
                    "Cannot read properties of {} (reading '{}')",
                    self.describe_value(receiver),
                    self.describe_key(key)
                )));
            }
            HostValue::String(s) if key.is_named("length") => {
                return Ok(HostValue::Number(s.encode_utf16().count() as f64));
            }
            _ => return Ok(HostValue::Undefined),
        };

        let mut current = Some(start);
        let mut depth = 0;
        while let Some(id) = current {
            depth += 1;
            if depth > MAX_PROTOTYPE_DEPTH {
                return Err(BridgeError::type_error("cyclic prototype chain"));
            }
            let lookup = {
                let heap = self.env.heap.borrow();
                let object = heap.get(id)?;
                let element = match &object.kind {
                    ObjectKind::Array(elements) if key.is_named("length") => {
                        Some(HostValue::Number(elements.len() as f64))
                    }
                    ObjectKind::Array(elements) => key
                        .as_index()
                        .and_then(|index| elements.get(index).cloned()),
                    _ => None,
                };
                match (element, object.own(key)) {
                    (Some(value), _) => Lookup::Value(value),
                    (None, Some(Property { value: PropertyValue::Data(value), .. })) => {
                        Lookup::Value(value.clone())
                    }
                    (None, Some(Property { value: PropertyValue::Accessor { getter, .. }, .. })) => {
                        Lookup::Getter(*getter)
                    }
                    (None, None) => Lookup::Next(object.prototype),
                }
            };
            match lookup {
                Lookup::Value(value) => return Ok(value),
                Lookup::Getter(Some(getter)) => {
                    return self.call_value(HostValue::Object(getter), receiver.clone(), Vec::new(), None);
                }
                Lookup::Getter(None) => return Ok(HostValue::Undefined),
                Lookup::Next(next) => current = next,
            }
        }
        Ok(HostValue::Undefined)
    }

    /// `object[key] = value`, invoking setters and honouring read-only
    /// properties along the prototype chain.
    pub fn set(&self, object: ValueHandle, key: impl Into<NameKey>, value: ValueHandle) -> BridgeResult<()> {
        let key = self.property_key(&key.into())?;
        let target = self.value(object)?;
        let value = self.value(value)?;
        self.set_value(&target, key, value)
    }

    /// Convert `value` and assign it to `object[key]`.
    pub fn set_converted<V: ToHost + ?Sized>(
        &self,
        object: ValueHandle,
        key: impl Into<NameKey>,
        value: &V,
    ) -> BridgeResult<()> {
        let value = value.to_host(self)?;
        self.set(object, key, value)
    }

    pub fn set_index(&self, object: ValueHandle, index: usize, value: ValueHandle) -> BridgeResult<()> {
        self.set(object, NameKey::from(index.to_string()), value)
    }

    /// Append to a host array.
    pub fn push(&self, array: ValueHandle, value: ValueHandle) -> BridgeResult<()> {
        let id = self.object_id(array)?;
        let value = self.value(value)?;
        let mut heap = self.env.heap.borrow_mut();
        match &mut heap.get_mut(id)?.kind {
            ObjectKind::Array(elements) => {
                dense_length(elements.len() + 1)?;
                elements.push(value);
                Ok(())
            }
            _ => Err(ConversionError::type_mismatch("array", "object").into()),
        }
    }

    pub(crate) fn set_value(&self, target: &HostValue, key: PropertyKey, value: HostValue) -> BridgeResult<()> {
        let start = match target {
            HostValue::Object(id) => *id,
            _ => {
                return Err(BridgeError::type_error(format!(
                    "Cannot set properties of {} (setting '{}')",
                    self.describe_value(target),
                    self.describe_key(&key)
                )));
            }
        };

        {
            let mut heap = self.env.heap.borrow_mut();
            if let ObjectKind::Array(elements) = &mut heap.get_mut(start)?.kind {
                if key.is_named("length") {
                    let HostValue::Number(n) = value else {
                        return Err(BridgeError::Thrown(HostException::range_error("Invalid array length")));
                    };
                    if n < 0.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
                        return Err(BridgeError::Thrown(HostException::range_error("Invalid array length")));
                    }
                    elements.resize(dense_length(n as usize)?, HostValue::Undefined);
                    return Ok(());
                }
                if let Some(index) = key.as_index() {
                    if index >= elements.len() {
                        let len = index.checked_add(1).ok_or_else(array_exhausted)?;
                        elements.resize(dense_length(len)?, HostValue::Undefined);
                    }
                    elements[index] = value;
                    return Ok(());
                }
            }
        }

        let mut current = Some(start);
        let mut depth = 0;
        while let Some(id) = current {
            depth += 1;
            if depth > MAX_PROTOTYPE_DEPTH {
                return Err(BridgeError::type_error("cyclic prototype chain"));
            }
            let step = {
                let heap = self.env.heap.borrow();
                let object = heap.get(id)?;
                match object.own(&key) {
                    Some(Property { value: PropertyValue::Data(_), flags }) => {
                        if !flags.contains(PropertyFlags::WRITABLE) {
                            Assign::ReadOnly
                        } else {
                            Assign::Own
                        }
                    }
                    Some(Property { value: PropertyValue::Accessor { setter, .. }, .. }) => {
                        Assign::Setter(*setter)
                    }
                    None => Assign::Next(object.prototype),
                }
            };
            match step {
                Assign::Own => break,
                Assign::ReadOnly | Assign::Setter(None) => {
                    return Err(BridgeError::ReadOnlyProperty {
                        name: self.describe_key(&key),
                    });
                }
                Assign::Setter(Some(setter)) => {
                    self.call_value(HostValue::Object(setter), target.clone(), vec![value], None)?;
                    return Ok(());
                }
                Assign::Next(next) => current = next,
            }
        }

        self.env.heap.borrow_mut().get_mut(start)?.assign(key, value);
        Ok(())
    }

    /// Define an own data property with explicit flags.
    pub fn define_value(
        &self,
        object: ValueHandle,
        key: impl Into<NameKey>,
        value: ValueHandle,
        flags: PropertyFlags,
    ) -> BridgeResult<()> {
        let key = self.property_key(&key.into())?;
        let id = self.object_id(object)?;
        let value = self.value(value)?;
        self.env
            .heap
            .borrow_mut()
            .get_mut(id)?
            .define(key, Property::data(value, flags));
        Ok(())
    }

    /// Define an own accessor property. Getter and setter must be functions.
    pub fn define_accessor(
        &self,
        object: ValueHandle,
        key: impl Into<NameKey>,
        getter: Option<ValueHandle>,
        setter: Option<ValueHandle>,
        flags: PropertyFlags,
    ) -> BridgeResult<()> {
        let key = self.property_key(&key.into())?;
        let id = self.object_id(object)?;
        let getter = getter.map(|g| self.function_id(g)).transpose()?;
        let setter = setter.map(|s| self.function_id(s)).transpose()?;
        self.env.heap.borrow_mut().get_mut(id)?.define(
            key,
            Property {
                value: PropertyValue::Accessor { getter, setter },
                flags: flags.difference(PropertyFlags::WRITABLE),
            },
        );
        Ok(())
    }

    fn function_id(&self, handle: ValueHandle) -> BridgeResult<ObjectId> {
        let id = self.object_id(handle)?;
        if self.env.heap.borrow().get(id)?.is_callable() {
            Ok(id)
        } else {
            Err(BridgeError::NotCallable {
                name: self.describe(handle)?,
            })
        }
    }

    /// Whether `key` resolves anywhere on the prototype chain.
    pub fn has(&self, object: ValueHandle, key: impl Into<NameKey>) -> BridgeResult<bool> {
        let key = self.property_key(&key.into())?;
        let mut current = Some(self.object_id(object)?);
        let heap = self.env.heap.borrow();
        let mut depth = 0;
        while let Some(id) = current
            && depth < MAX_PROTOTYPE_DEPTH
        {
            let object = heap.get(id)?;
            if Self::has_own_in(object, &key) {
                return Ok(true);
            }
            current = object.prototype;
            depth += 1;
        }
        Ok(false)
    }

    pub fn has_own(&self, object: ValueHandle, key: impl Into<NameKey>) -> BridgeResult<bool> {
        let key = self.property_key(&key.into())?;
        let id = self.object_id(object)?;
        let heap = self.env.heap.borrow();
        Ok(Self::has_own_in(heap.get(id)?, &key))
    }

    fn has_own_in(object: &HostObject, key: &PropertyKey) -> bool {
        if let ObjectKind::Array(elements) = &object.kind
            && (key.is_named("length") || key.as_index().is_some_and(|i| i < elements.len()))
        {
            return true;
        }
        object.own(key).is_some()
    }

    /// Remove an own property. Returns false for non-configurable ones.
    pub fn delete(&self, object: ValueHandle, key: impl Into<NameKey>) -> BridgeResult<bool> {
        let key = self.property_key(&key.into())?;
        let id = self.object_id(object)?;
        let mut heap = self.env.heap.borrow_mut();
        let object = heap.get_mut(id)?;
        if let ObjectKind::Array(elements) = &mut object.kind
            && let Some(index) = key.as_index()
        {
            if let Some(slot) = elements.get_mut(index) {
                *slot = HostValue::Undefined;
            }
            return Ok(true);
        }
        Ok(object.remove(&key))
    }

    /// Own enumerable string keys: array indices first, then properties in
    /// insertion order.
    pub fn own_keys(&self, object: ValueHandle) -> BridgeResult<Vec<NameKey>> {
        let id = self.object_id(object)?;
        let heap = self.env.heap.borrow();
        let object = heap.get(id)?;
        let mut keys = Vec::new();
        if let ObjectKind::Array(elements) = &object.kind {
            keys.extend((0..elements.len()).map(|i| NameKey::from(i.to_string())));
        }
        keys.extend(
            object
                .properties()
                .iter()
                .filter(|(key, property)| {
                    matches!(key, PropertyKey::String(_)) && property.flags.contains(PropertyFlags::ENUMERABLE)
                })
                .map(|(key, _)| self.name_key(key)),
        );
        Ok(keys)
    }

    /// Every own key including symbols and non-enumerable properties.
    pub fn own_property_keys(&self, object: ValueHandle) -> BridgeResult<Vec<NameKey>> {
        let id = self.object_id(object)?;
        let heap = self.env.heap.borrow();
        Ok(heap
            .get(id)?
            .properties()
            .iter()
            .map(|(key, _)| self.name_key(key))
            .collect())
    }

    pub fn prototype_of(&self, object: ValueHandle) -> BridgeResult<Option<ValueHandle>> {
        let id = self.object_id(object)?;
        let prototype = self.env.heap.borrow().get(id)?.prototype;
        prototype.map(|p| self.alloc(HostValue::Object(p))).transpose()
    }

    pub fn set_prototype(&self, object: ValueHandle, prototype: Option<ValueHandle>) -> BridgeResult<()> {
        let id = self.object_id(object)?;
        let prototype = prototype.map(|p| self.object_id(p)).transpose()?;
        self.env.heap.borrow_mut().get_mut(id)?.prototype = prototype;
        Ok(())
    }

    /// `value instanceof ctor`.
    pub fn instance_of(&self, value: ValueHandle, ctor: ValueHandle) -> BridgeResult<bool> {
        let HostValue::Object(mut id) = self.value(value)? else {
            return Ok(false);
        };
        let prototype = self.get(ctor, "prototype")?;
        let HostValue::Object(target) = self.value(prototype)? else {
            return Ok(false);
        };
        let heap = self.env.heap.borrow();
        for _ in 0..MAX_PROTOTYPE_DEPTH {
            match heap.get(id)?.prototype {
                Some(p) if p == target => return Ok(true),
                Some(p) => id = p,
                None => return Ok(false),
            }
        }
        Ok(false)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call `function` with receiver `this`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call(&self, function: ValueHandle, this: ValueHandle, args: &[ValueHandle]) -> BridgeResult<ValueHandle> {
        let callee = self.value(function)?;
        let this = self.value(this)?;
        let args = self.values(args)?;
        let result = self.call_value(callee, this, args, None)?;
        self.alloc(result)
    }

    /// Call a method looked up on `object`.
    pub fn call_method(
        &self,
        object: ValueHandle,
        key: impl Into<NameKey>,
        args: &[ValueHandle],
    ) -> BridgeResult<ValueHandle> {
        let function = self.get(object, key)?;
        self.call(function, object, args)
    }

    /// `new function(...args)`.
    pub fn construct(&self, function: ValueHandle, args: &[ValueHandle]) -> BridgeResult<ValueHandle> {
        let callee = self.value(function)?;
        let args = self.values(args)?;
        let result = self.construct_value(callee, args)?;
        self.alloc(result)
    }

    fn values(&self, handles: &[ValueHandle]) -> BridgeResult<Vec<HostValue>> {
        handles.iter().map(|h| self.value(*h)).collect()
    }

    pub(crate) fn call_value(
        &self,
        callee: HostValue,
        this: HostValue,
        args: Vec<HostValue>,
        new_target: Option<HostValue>,
    ) -> BridgeResult<HostValue> {
        let native = match &callee {
            HostValue::Object(id) => match &self.env.heap.borrow().get(*id)?.kind {
                ObjectKind::Function(f) => Some(f.native.clone()),
                _ => None,
            },
            _ => None,
        };
        let Some(native) = native else {
            return Err(BridgeError::NotCallable {
                name: self.describe_value(&callee),
            });
        };

        self.scope(|inner| {
            let callee = inner.alloc(callee)?;
            let this = inner.alloc(this)?;
            let args = args
                .into_iter()
                .map(|arg| inner.alloc(arg))
                .collect::<BridgeResult<Vec<_>>>()?;
            let new_target = new_target.map(|t| inner.alloc(t)).transpose()?;
            let mut call = CallContext::new(inner, callee, this, args, new_target);
            native.call(&mut call)?;
            match call.take_return() {
                Some(handle) => inner.value(handle),
                None => Ok(HostValue::Undefined),
            }
        })
    }

    pub(crate) fn construct_value(&self, callee: HostValue, args: Vec<HostValue>) -> BridgeResult<HostValue> {
        let is_constructor = match &callee {
            HostValue::Object(id) => matches!(
                &self.env.heap.borrow().get(*id)?.kind,
                ObjectKind::Function(f) if f.constructor
            ),
            _ => false,
        };
        if !is_constructor {
            return Err(BridgeError::NotConstructor {
                name: self.describe_value(&callee),
            });
        }

        let prototype = self.get_value(&callee, &"prototype".into())?.as_object();
        let instance = self.allocate(HostObject::new(ObjectKind::Ordinary, prototype))?;
        let result = self.call_value(callee.clone(), HostValue::Object(instance), args, Some(callee))?;
        Ok(match result {
            HostValue::Object(_) => result,
            _ => HostValue::Object(instance),
        })
    }

    // ========================================================================
    // Evaluation and collection
    // ========================================================================

    /// Evaluate a host expression and return its value in this scope.
    pub fn run(&self, source: &str) -> BridgeResult<ValueHandle> {
        let value = script::evaluate(self, source)?;
        self.alloc(value)
    }

    /// Run a full mark-sweep cycle now.
    pub fn collect_garbage(&self) -> GcStats {
        self.env.collect()
    }

    pub fn live_objects(&self) -> usize {
        self.env.heap.borrow().live_count()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("env", &self.env.id)
            .field("scope_depth", &self.scope_depth())
            .finish()
    }
}
