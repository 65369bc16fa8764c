//! Typed adapters from Rust closures to native host functions.
//!
//! A closure taking `FromHost` arguments is turned into a [`NativeFn`] that
//! converts each argument from the call, runs the closure and converts the
//! result back with `ToHost`. Argument conversion failures carry their
//! position.
//!
//! ```ignore
//! module.function("add", |a: f64, b: f64| -> BridgeResult<f64> { Ok(a + b) });
//! module.function_async("fetch", |id: u32| async move { lookup(id).await });
//! ```

use std::cell::RefCell;
use std::future::Future;

use hostbridge_core::{BridgeError, BridgeResult, CallContext, FromHost, NativeClass, NativeFn, ToHost};

/// A closure callable with arguments converted from a native call.
///
/// `Args` is the tuple of argument types and `Out` the closure's return
/// type; both are inferred from the closure signature.
pub trait HostFn<Args, Out>: 'static {
    fn invoke(&self, call: &CallContext<'_>) -> BridgeResult<Out>;
}

/// A closure taking a shared payload borrow followed by converted arguments.
pub trait HostMethod<T, Args, Out>: 'static {
    fn invoke(&self, this: &RefCell<T>, call: &CallContext<'_>) -> BridgeResult<Out>;
}

/// A closure taking an exclusive payload borrow followed by converted
/// arguments.
pub trait HostMethodMut<T, Args, Out>: 'static {
    fn invoke(&self, this: &RefCell<T>, call: &CallContext<'_>) -> BridgeResult<Out>;
}

pub(crate) fn payload_busy<T: NativeClass>() -> BridgeError {
    BridgeError::PayloadBusy {
        class: T::NAME.to_string(),
    }
}

macro_rules! impl_host_fn {
    ($($arg:ident => $index:tt),*) => {
        impl<F, Out, $($arg,)*> HostFn<($($arg,)*), Out> for F
        where
            F: Fn($($arg),*) -> Out + 'static,
            $($arg: FromHost,)*
        {
            #[allow(non_snake_case, unused_variables)]
            fn invoke(&self, call: &CallContext<'_>) -> BridgeResult<Out> {
                $(let $arg = call.arg::<$arg>($index)?;)*
                Ok((self)($($arg),*))
            }
        }

        impl<T, F, Out, $($arg,)*> HostMethod<T, ($($arg,)*), Out> for F
        where
            T: NativeClass,
            F: Fn(&T, $($arg),*) -> Out + 'static,
            $($arg: FromHost,)*
        {
            #[allow(non_snake_case, unused_variables)]
            fn invoke(&self, this: &RefCell<T>, call: &CallContext<'_>) -> BridgeResult<Out> {
                $(let $arg = call.arg::<$arg>($index)?;)*
                let this = this.try_borrow().map_err(|_| payload_busy::<T>())?;
                Ok((self)(&*this, $($arg),*))
            }
        }

        impl<T, F, Out, $($arg,)*> HostMethodMut<T, ($($arg,)*), Out> for F
        where
            T: NativeClass,
            F: Fn(&mut T, $($arg),*) -> Out + 'static,
            $($arg: FromHost,)*
        {
            #[allow(non_snake_case, unused_variables)]
            fn invoke(&self, this: &RefCell<T>, call: &CallContext<'_>) -> BridgeResult<Out> {
                $(let $arg = call.arg::<$arg>($index)?;)*
                let mut this = this.try_borrow_mut().map_err(|_| payload_busy::<T>())?;
                Ok((self)(&mut *this, $($arg),*))
            }
        }
    };
}

impl_host_fn!();
impl_host_fn!(A0 => 0);
impl_host_fn!(A0 => 0, A1 => 1);
impl_host_fn!(A0 => 0, A1 => 1, A2 => 2);
impl_host_fn!(A0 => 0, A1 => 1, A2 => 2, A3 => 3);

/// A native function returning the converted result of `f`.
pub fn native_fn<F, Args, R>(f: F) -> NativeFn
where
    F: HostFn<Args, BridgeResult<R>>,
    R: ToHost,
{
    NativeFn::new(move |call: &mut CallContext<'_>| {
        let result = f.invoke(call)??;
        call.set_return_value(&result)
    })
}

/// A native function returning a promise settled by the future `f` yields.
///
/// Like a host `async` function it never throws synchronously: argument
/// conversion failures reject the returned promise.
pub fn native_async_fn<F, Args, Fut, R>(f: F) -> NativeFn
where
    F: HostFn<Args, Fut>,
    Fut: Future<Output = BridgeResult<R>> + 'static,
    R: ToHost + 'static,
{
    NativeFn::new(move |call: &mut CallContext<'_>| {
        let cx = call.context();
        let promise = match f.invoke(call) {
            Ok(future) => cx.promise_from_future(future)?,
            Err(err) => {
                let (deferred, promise) = cx.deferred()?;
                deferred.reject(&err)?;
                promise
            }
        };
        call.set_return(promise);
        Ok(())
    })
}
