//! Native function storage and the per-call context.
//!
//! Every host→native call runs inside a fresh handle scope. The
//! [`CallContext`] hands the callee its receiver and arguments as handles in
//! that scope; the value passed to [`CallContext::set_return`] is escaped to
//! the caller's scope when the call returns.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::class::NativeClass;
use crate::context::ExecutionContext;
use crate::convert::{FromHost, ToHost};
use crate::error::BridgeResult;
use crate::handle::ValueHandle;

/// Type-erased native function.
///
/// The callable is shared through `Rc`: functions are confined to their
/// environment's thread, and cloning a `NativeFn` out of the heap before
/// calling it lets the callee re-enter the heap freely.
#[derive(Clone)]
pub struct NativeFn {
    inner: Rc<dyn NativeCallable>,
}

impl NativeFn {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut CallContext<'_>) -> BridgeResult<()> + 'static,
    {
        Self { inner: Rc::new(f) }
    }

    /// Wrap any [`NativeCallable`] implementation.
    pub fn from_callable<C: NativeCallable + 'static>(callable: C) -> Self {
        Self {
            inner: Rc::new(callable),
        }
    }

    pub fn call(&self, call: &mut CallContext<'_>) -> BridgeResult<()> {
        self.inner.call(call)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn").finish_non_exhaustive()
    }
}

/// Anything the host can call.
pub trait NativeCallable {
    fn call(&self, call: &mut CallContext<'_>) -> BridgeResult<()>;
}

impl<F> NativeCallable for F
where
    F: Fn(&mut CallContext<'_>) -> BridgeResult<()>,
{
    fn call(&self, call: &mut CallContext<'_>) -> BridgeResult<()> {
        (self)(call)
    }
}

/// Receiver, arguments and return slot of one native call.
pub struct CallContext<'cx> {
    cx: &'cx ExecutionContext,
    callee: ValueHandle,
    this: ValueHandle,
    args: Vec<ValueHandle>,
    new_target: Option<ValueHandle>,
    return_value: Option<ValueHandle>,
}

impl<'cx> CallContext<'cx> {
    pub(crate) fn new(
        cx: &'cx ExecutionContext,
        callee: ValueHandle,
        this: ValueHandle,
        args: Vec<ValueHandle>,
        new_target: Option<ValueHandle>,
    ) -> Self {
        Self {
            cx,
            callee,
            this,
            args,
            new_target,
            return_value: None,
        }
    }

    /// The context the call runs in.
    pub fn context(&self) -> &'cx ExecutionContext {
        self.cx
    }

    /// The function object being called.
    pub fn callee(&self) -> ValueHandle {
        self.callee
    }

    /// The receiver. `undefined` for plain calls.
    pub fn this(&self) -> ValueHandle {
        self.this
    }

    /// The constructor `new` was applied to, if this is a construct call.
    pub fn new_target(&self) -> Option<ValueHandle> {
        self.new_target
    }

    pub fn is_construct_call(&self) -> bool {
        self.new_target.is_some()
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn args(&self) -> &[ValueHandle] {
        &self.args
    }

    /// Raw argument `index`; missing arguments read as `undefined`.
    pub fn arg_handle(&self, index: usize) -> BridgeResult<ValueHandle> {
        match self.args.get(index) {
            Some(handle) => Ok(*handle),
            None => self.cx.undefined(),
        }
    }

    /// Convert argument `index`. Failures carry the argument position.
    pub fn arg<T: FromHost>(&self, index: usize) -> BridgeResult<T> {
        let handle = self.arg_handle(index)?;
        T::from_host(self.cx, handle).map_err(|err| err.at_argument(index))
    }

    /// Shared access to the native payload behind `this`.
    pub fn this_payload<T: NativeClass>(&self) -> BridgeResult<Rc<RefCell<T>>> {
        self.cx.payload::<T>(self.this)
    }

    pub fn set_return(&mut self, value: ValueHandle) {
        self.return_value = Some(value);
    }

    /// Convert `value` and make it the return value.
    pub fn set_return_value<V: ToHost + ?Sized>(&mut self, value: &V) -> BridgeResult<()> {
        let handle = value.to_host(self.cx)?;
        self.return_value = Some(handle);
        Ok(())
    }

    pub(crate) fn take_return(&mut self) -> Option<ValueHandle> {
        self.return_value.take()
    }
}

impl fmt::Debug for CallContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("this", &self.this)
            .field("args", &self.args)
            .field("construct", &self.new_target.is_some())
            .finish()
    }
}
