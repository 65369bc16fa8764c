//! Adapter between native iterators and the host iteration protocol.
//!
//! A native sequence becomes a host object with `next()` and
//! `[Symbol.iterator]()`. Every `next()` call advances the native iterator
//! exactly once and returns `{ value, done: false }`; once the source is
//! exhausted the iterator is released and every later call returns
//! `{ done: true }` without polling it again.

use std::fmt;

use hostbridge_core::{
    BridgeResult, CallContext, ConversionError, ExecutionContext, FromHost, MemberKey, NameKey, NativeClass,
    ObjectBuilder, ToHost, ValueHandle, Wrap,
};

use crate::builtins::ensure_builtin_classes;
use crate::class_builder::{ClassBuilder, ClassDescriptor};
use crate::function::payload_busy;

type Source = Box<dyn FnMut(&ExecutionContext) -> BridgeResult<Option<ValueHandle>>>;

/// Native state behind a host iterator object.
pub struct NativeIterator {
    source: Option<Source>,
    steps: usize,
}

impl NativeClass for NativeIterator {
    const NAME: &'static str = "NativeIterator";
}

impl NativeIterator {
    pub fn new<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToHost + 'static,
        I::IntoIter: 'static,
    {
        let mut items = items.into_iter();
        Self {
            source: Some(Box::new(move |cx: &ExecutionContext| {
                items.next().map(|item| item.to_host(cx)).transpose()
            })),
            steps: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.source.is_none()
    }

    /// Number of values produced so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Advance the source once.
    pub fn advance(&mut self, cx: &ExecutionContext) -> BridgeResult<IteratorResult> {
        let Some(source) = self.source.as_mut() else {
            return Ok(IteratorResult::done());
        };
        match source(cx)? {
            Some(value) => {
                self.steps += 1;
                Ok(IteratorResult::step(value))
            }
            None => {
                tracing::trace!(steps = self.steps, "native iterator exhausted");
                self.source = None;
                Ok(IteratorResult::done())
            }
        }
    }
}

impl fmt::Debug for NativeIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeIterator")
            .field("done", &self.is_done())
            .field("steps", &self.steps)
            .finish()
    }
}

/// One `next()` result. Absent fields are omitted from the host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IteratorResult {
    pub value: Option<ValueHandle>,
    pub done: Option<bool>,
}

impl IteratorResult {
    pub fn step(value: ValueHandle) -> Self {
        Self {
            value: Some(value),
            done: Some(false),
        }
    }

    pub fn done() -> Self {
        Self {
            value: None,
            done: Some(true),
        }
    }
}

impl ToHost for IteratorResult {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        Ok(ObjectBuilder::new(cx)?
            .optional_field("value", self.value.as_ref())?
            .optional_field("done", self.done.as_ref())?
            .finish())
    }
}

/// A `next()` result read back from the host.
///
/// A missing `done` reads as `false`; `value` is absent when undefined or
/// null.
#[derive(Debug, Clone, PartialEq)]
pub struct IteratorStep<T> {
    pub value: Option<T>,
    pub done: bool,
}

impl<T: FromHost> FromHost for IteratorStep<T> {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        let reader = cx.reader(value)?;
        Ok(Self {
            done: reader.optional_or("done", false)?,
            value: reader.optional("value")?,
        })
    }
}

/// Native sequences that can be handed to the host as iterators.
pub trait HostIterable {
    fn host_iterator(self, cx: &ExecutionContext) -> BridgeResult<ValueHandle>;
}

impl<I> HostIterable for I
where
    I: IntoIterator,
    I::Item: ToHost + 'static,
    I::IntoIter: 'static,
{
    fn host_iterator(self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        ensure_builtin_classes(cx)?;
        Wrap::new(NativeIterator::new(self)).to_host(cx)
    }
}

/// Drain a host iterable through `[Symbol.iterator]()` and `next()`.
///
/// Element conversion stops at the first failure, which carries the
/// element index.
pub fn collect_iterable<T: FromHost>(cx: &ExecutionContext, iterable: ValueHandle) -> BridgeResult<Vec<T>> {
    let method = cx.get(iterable, NameKey::iterator(cx))?;
    if !cx.is_callable(method)? {
        return Err(ConversionError::type_mismatch("iterable", cx.value_type(iterable)?.name()).into());
    }
    let iterator = cx.call(method, iterable, &[])?;
    let next = cx.get(iterator, "next")?;

    // Steps run in the caller's scope so collected handles stay valid.
    let mut items = Vec::new();
    loop {
        let result = cx.call(next, iterator, &[])?;
        let reader = cx.reader(result)?;
        if reader.optional_or("done", false)? {
            return Ok(items);
        }
        let value = reader.raw("value")?;
        let item = T::from_host(cx, value).map_err(|err| err.at_element(items.len()))?;
        items.push(item);
    }
}

/// Host class descriptor for [`NativeIterator`].
pub(crate) fn iterator_class() -> ClassDescriptor<NativeIterator> {
    ClassBuilder::<NativeIterator>::new()
        .method_raw("next", |call: &mut CallContext<'_>| {
            let payload = call.this_payload::<NativeIterator>()?;
            let result = payload
                .try_borrow_mut()
                .map_err(|_| payload_busy::<NativeIterator>())?
                .advance(call.context())?;
            call.set_return_value(&result)
        })
        .method_raw(MemberKey::iterator(), |call: &mut CallContext<'_>| {
            call.this_payload::<NativeIterator>()?;
            let this = call.this();
            call.set_return(this);
            Ok(())
        })
        .build()
}
