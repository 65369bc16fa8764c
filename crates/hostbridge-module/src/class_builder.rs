//! ClassBuilder for exposing native Rust types as host classes.
//!
//! ClassBuilder provides a fluent API that collects a constructor,
//! accessor properties, methods, static methods, an inspection hook and a
//! finalizer into a [`ClassDescriptor`]. Registering the descriptor in an
//! environment creates the host constructor and prototype and binds them to
//! the native type.
//!
//! # Example
//!
//! ```ignore
//! module.class::<Rectangle>()
//!     .constructor(|width: f64, height: f64| -> BridgeResult<Rectangle> {
//!         Ok(Rectangle::new(width, height))
//!     })
//!     .property_rw("width", |r: &Rectangle| r.width, |r: &mut Rectangle, w: f64| r.set_width(w))
//!     .method("area", |r: &Rectangle| -> BridgeResult<f64> { Ok(r.area()) })
//!     .inspect_fields(&["width", "height"])
//!     .build();
//! ```
//!
//! Accessors live on the prototype and are not enumerable; methods are
//! non-enumerable data properties; static methods live on the constructor.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use hostbridge_core::{
    BridgeError, BridgeResult, CallContext, ClassState, ExecutionContext, FromHost, Instance, MemberKey, NameKey,
    NativeClass, NativeFn, PropertyFlags, ToHost, ValueHandle,
};

use crate::function::{HostFn, HostMethod, HostMethodMut, native_fn, payload_busy};
use crate::inspect::Inspector;
use crate::module::Module;

/// Something that can bind a class into an environment.
///
/// Implemented by [`ClassDescriptor`]; modules keep their classes as trait
/// objects so descriptors of different native types can share a table.
pub trait ClassRegistration {
    fn class_name(&self) -> &'static str;

    /// Create and bind the class, returning its constructor.
    fn register(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle>;
}

#[derive(Clone)]
enum Member {
    Accessor {
        key: MemberKey,
        getter: NativeFn,
        setter: Option<NativeFn>,
    },
    Method {
        key: MemberKey,
        function: NativeFn,
    },
}

/// A complete, environment-independent description of a host class.
pub struct ClassDescriptor<T: NativeClass> {
    constructor: Option<NativeFn>,
    members: Vec<Member>,
    statics: Vec<(MemberKey, NativeFn)>,
    inspect: Option<NativeFn>,
    finalize: Option<Rc<dyn Fn(&mut T)>>,
}

impl<T: NativeClass> Clone for ClassDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            constructor: self.constructor.clone(),
            members: self.members.clone(),
            statics: self.statics.clone(),
            inspect: self.inspect.clone(),
            finalize: self.finalize.clone(),
        }
    }
}

impl<T: NativeClass> fmt::Debug for ClassDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &T::NAME)
            .field("constructible", &self.constructor.is_some())
            .field("members", &self.members.len())
            .field("statics", &self.statics.len())
            .finish()
    }
}

impl<T: NativeClass> ClassDescriptor<T> {
    /// Bind the class in the context's environment and return its
    /// constructor. A type registers once per environment.
    pub fn register(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        if cx.class_state::<T>() == ClassState::Registered {
            return Err(BridgeError::AlreadyRegistered {
                class: T::NAME.to_string(),
            });
        }

        cx.escape(|cx: &ExecutionContext| {
            let ctor = cx.constructor(T::NAME, self.host_constructor())?;
            let prototype = cx.get(ctor, "prototype")?;

            for member in &self.members {
                match member {
                    Member::Accessor { key, getter, setter } => {
                        let getter = cx.function(&format!("get {key}"), getter.clone())?;
                        let setter = setter
                            .as_ref()
                            .map(|setter| cx.function(&format!("set {key}"), setter.clone()))
                            .transpose()?;
                        cx.define_accessor(
                            prototype,
                            key.resolve(cx)?,
                            Some(getter),
                            setter,
                            PropertyFlags::CONFIGURABLE,
                        )?;
                    }
                    Member::Method { key, function } => {
                        let function = cx.function(&key.to_string(), function.clone())?;
                        cx.define_value(prototype, key.resolve(cx)?, function, PropertyFlags::HIDDEN)?;
                    }
                }
            }

            for (key, function) in &self.statics {
                let function = cx.function(&key.to_string(), function.clone())?;
                cx.define_value(ctor, key.resolve(cx)?, function, PropertyFlags::HIDDEN)?;
            }

            if let Some(hook) = &self.inspect {
                let hook = cx.function("inspect", hook.clone())?;
                cx.define_value(prototype, NameKey::inspect_custom(cx)?, hook, PropertyFlags::HIDDEN)?;
            }

            cx.register_class::<T>(ctor, prototype, self.finalize.clone())?;
            Ok(ctor)
        })
    }

    fn host_constructor(&self) -> NativeFn {
        let construct = self.constructor.clone();
        NativeFn::new(move |call: &mut CallContext<'_>| {
            if !call.is_construct_call() {
                return Err(BridgeError::type_error(format!(
                    "Class constructor {} cannot be invoked without 'new'",
                    T::NAME
                )));
            }
            match &construct {
                Some(construct) => construct.call(call),
                None => Err(BridgeError::type_error(format!("Illegal constructor: {}", T::NAME))),
            }
        })
    }
}

impl<T: NativeClass> ClassRegistration for ClassDescriptor<T> {
    fn class_name(&self) -> &'static str {
        T::NAME
    }

    fn register(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        ClassDescriptor::register(self, cx)
    }
}

/// Builder for [`ClassDescriptor`].
///
/// Created by [`Module::class`], or detached with [`ClassBuilder::new`].
pub struct ClassBuilder<'m, T: NativeClass> {
    module: Option<&'m mut Module>,
    descriptor: ClassDescriptor<T>,
    _marker: PhantomData<T>,
}

impl<T: NativeClass> ClassBuilder<'static, T> {
    /// A builder not attached to any module.
    pub fn new() -> Self {
        Self::with_module(None)
    }
}

impl<T: NativeClass> Default for ClassBuilder<'static, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'m, T: NativeClass> ClassBuilder<'m, T> {
    pub(crate) fn with_module(module: Option<&'m mut Module>) -> Self {
        Self {
            module,
            descriptor: ClassDescriptor {
                constructor: None,
                members: Vec::new(),
                statics: Vec::new(),
                inspect: None,
                finalize: None,
            },
            _marker: PhantomData,
        }
    }

    /// The native constructor, run for `new Class(...)`.
    ///
    /// Arguments convert through `FromHost`. An error returned by `f`
    /// surfaces as `Construction { class, message }`.
    pub fn constructor<F, Args>(mut self, f: F) -> Self
    where
        F: HostFn<Args, BridgeResult<T>>,
    {
        self.descriptor.constructor = Some(NativeFn::new(move |call: &mut CallContext<'_>| {
            let value = f.invoke(call)?.map_err(|err| match err {
                BridgeError::Construction { .. } => err,
                other => BridgeError::construction(T::NAME, other.to_string()),
            })?;
            call.context()
                .attach_payload(call.this(), Rc::new(RefCell::new(value)))
        }));
        self
    }

    /// A read-only accessor property.
    pub fn property<V, G>(mut self, key: impl Into<MemberKey>, get: G) -> Self
    where
        V: ToHost,
        G: Fn(&T) -> V + 'static,
    {
        self.descriptor.members.push(Member::Accessor {
            key: key.into(),
            getter: getter::<T, V, G>(get),
            setter: None,
        });
        self
    }

    /// A read-write accessor property.
    ///
    /// The incoming value is converted before the payload is borrowed; a
    /// conversion failure leaves the payload untouched and names the
    /// property. `set` may reject the value with an error of its own.
    pub fn property_rw<V, W, G, S>(mut self, key: impl Into<MemberKey>, get: G, set: S) -> Self
    where
        V: ToHost,
        W: FromHost,
        G: Fn(&T) -> V + 'static,
        S: Fn(&mut T, W) -> BridgeResult<()> + 'static,
    {
        let key = key.into();
        let name = key.to_string();
        let setter = NativeFn::new(move |call: &mut CallContext<'_>| {
            let value = W::from_host(call.context(), call.arg_handle(0)?).map_err(|err| err.at_property(&name))?;
            let payload = call.this_payload::<T>()?;
            let mut this = payload.try_borrow_mut().map_err(|_| payload_busy::<T>())?;
            set(&mut *this, value)
        });
        self.descriptor.members.push(Member::Accessor {
            key,
            getter: getter::<T, V, G>(get),
            setter: Some(setter),
        });
        self
    }

    /// A method with shared access to the payload.
    pub fn method<F, Args, R>(self, key: impl Into<MemberKey>, f: F) -> Self
    where
        F: HostMethod<T, Args, BridgeResult<R>>,
        R: ToHost,
    {
        let function = NativeFn::new(move |call: &mut CallContext<'_>| {
            let payload = call.this_payload::<T>()?;
            let result = f.invoke(&payload, call)??;
            call.set_return_value(&result)
        });
        self.push_method(key.into(), function)
    }

    /// A method with exclusive access to the payload.
    pub fn method_mut<F, Args, R>(self, key: impl Into<MemberKey>, f: F) -> Self
    where
        F: HostMethodMut<T, Args, BridgeResult<R>>,
        R: ToHost,
    {
        let function = NativeFn::new(move |call: &mut CallContext<'_>| {
            let payload = call.this_payload::<T>()?;
            let result = f.invoke(&payload, call)??;
            call.set_return_value(&result)
        });
        self.push_method(key.into(), function)
    }

    /// A method with full control over the call.
    pub fn method_raw<F>(self, key: impl Into<MemberKey>, f: F) -> Self
    where
        F: Fn(&mut CallContext<'_>) -> BridgeResult<()> + 'static,
    {
        self.push_method(key.into(), NativeFn::new(f))
    }

    /// A function stored on the constructor.
    pub fn static_method<F, Args, R>(mut self, key: impl Into<MemberKey>, f: F) -> Self
    where
        F: HostFn<Args, BridgeResult<R>>,
        R: ToHost,
    {
        self.descriptor.statics.push((key.into(), native_fn(f)));
        self
    }

    /// Inspect instances as `Name { field: value, ... }`, reading each field
    /// through the host so accessors are honoured.
    pub fn inspect_fields(mut self, fields: &[&str]) -> Self {
        let fields: Vec<String> = fields.iter().map(|field| field.to_string()).collect();
        self.descriptor.inspect = Some(NativeFn::new(move |call: &mut CallContext<'_>| {
            let cx = call.context();
            let inspector = Instance::<Inspector>::from_host(cx, call.arg_handle(0)?)?
                .borrow()?
                .clone();
            let this = call.this();
            let mut parts = Vec::with_capacity(fields.len());
            for field in &fields {
                let value = cx.get(this, field.as_str())?;
                parts.push(format!("{field}: {}", inspector.render(cx, value)?));
            }
            let text = if parts.is_empty() {
                format!("{} {{}}", T::NAME)
            } else {
                format!("{} {{ {} }}", T::NAME, parts.join(", "))
            };
            call.set_return_value(&text)
        }));
        self
    }

    /// Inspect instances with a custom renderer.
    pub fn inspect_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, &Inspector) -> BridgeResult<String> + 'static,
    {
        self.descriptor.inspect = Some(NativeFn::new(move |call: &mut CallContext<'_>| {
            let inspector = Instance::<Inspector>::from_host(call.context(), call.arg_handle(0)?)?
                .borrow()?
                .clone();
            let payload = call.this_payload::<T>()?;
            let text = {
                let this = payload.try_borrow().map_err(|_| payload_busy::<T>())?;
                f(&*this, &inspector)?
            };
            call.set_return_value(&text)
        }));
        self
    }

    /// Runs on the payload when the collector reclaims an instance, before
    /// the payload is dropped.
    pub fn on_finalize<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut T) + 'static,
    {
        self.descriptor.finalize = Some(Rc::new(f));
        self
    }

    /// Finish the class. Attached builders also store it on their module.
    pub fn build(self) -> ClassDescriptor<T> {
        if let Some(module) = self.module {
            module.add_class(Box::new(self.descriptor.clone()));
        }
        self.descriptor
    }

    fn push_method(mut self, key: MemberKey, function: NativeFn) -> Self {
        self.descriptor.members.push(Member::Method { key, function });
        self
    }
}

fn getter<T, V, G>(get: G) -> NativeFn
where
    T: NativeClass,
    V: ToHost,
    G: Fn(&T) -> V + 'static,
{
    NativeFn::new(move |call: &mut CallContext<'_>| {
        let payload = call.this_payload::<T>()?;
        let value = {
            let this = payload.try_borrow().map_err(|_| payload_busy::<T>())?;
            get(&*this)
        };
        call.set_return_value(&value)
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use hostbridge_core::{ConversionError, Environment, EnvironmentConfig, ExceptionKind, HostException, Wrap};

    use crate::inspect::inspect;

    #[derive(Debug)]
    struct Counter {
        count: i32,
        step: i32,
    }

    impl NativeClass for Counter {
        const NAME: &'static str = "Counter";
    }

    fn counter_class() -> ClassDescriptor<Counter> {
        ClassBuilder::<Counter>::new()
            .constructor(|step: i32| -> BridgeResult<Counter> {
                if step == 0 {
                    return Err(BridgeError::failed("step must not be zero"));
                }
                Ok(Counter { count: 0, step })
            })
            .property("count", |c: &Counter| c.count)
            .property_rw("step", |c: &Counter| c.step, |c: &mut Counter, step: i32| {
                c.step = step;
                Ok(())
            })
            .method_mut("tick", |c: &mut Counter| -> BridgeResult<i32> {
                c.count += c.step;
                Ok(c.count)
            })
            .method("plus", |c: &Counter, n: i32| -> BridgeResult<i32> { Ok(c.count + n) })
            .static_method("zero", || -> BridgeResult<Wrap<Counter>> {
                Ok(Wrap::new(Counter { count: 0, step: 1 }))
            })
            .inspect_fields(&["count", "step"])
            .build()
    }

    fn with_counter(f: impl FnOnce(&ExecutionContext, ValueHandle) -> BridgeResult<()>) {
        let env = Environment::new(EnvironmentConfig::default()).unwrap();
        env.enter(|cx: &ExecutionContext| {
            let ctor = counter_class().register(cx)?;
            f(cx, ctor)
        })
        .unwrap();
    }

    // ========================================================================
    // Construction
    // ========================================================================

    #[test]
    fn construct_attaches_payload() {
        with_counter(|cx: &ExecutionContext, ctor: ValueHandle| {
            let step = cx.number(2.0)?;
            let counter = cx.construct(ctor, &[step])?;
            assert_eq!(cx.class_name_of(counter)?, Some("Counter"));
            assert_eq!(cx.payload::<Counter>(counter)?.borrow().step, 2);
            assert_eq!(cx.class_stats::<Counter>().map(|s| s.constructed), Some(1));
            Ok(())
        });
    }

    #[test]
    fn calling_without_new_is_type_error() {
        with_counter(|cx: &ExecutionContext, ctor: ValueHandle| {
            let undefined = cx.undefined()?;
            let err = cx.call(ctor, undefined, &[]).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::Thrown(HostException { kind: ExceptionKind::TypeError, .. })
            ));
            Ok(())
        });
    }

    #[test]
    fn constructor_failure_is_construction_error() {
        with_counter(|cx: &ExecutionContext, ctor: ValueHandle| {
            let zero = cx.number(0.0)?;
            assert!(matches!(
                cx.construct(ctor, &[zero]),
                Err(BridgeError::Construction { ref class, .. }) if class == "Counter"
            ));
            let bad = cx.string("two")?;
            assert!(matches!(
                cx.construct(ctor, &[bad]),
                Err(BridgeError::Conversion(ConversionError::Argument { index: 0, .. }))
            ));
            Ok(())
        });
    }

    #[test]
    fn second_registration_fails() {
        with_counter(|cx: &ExecutionContext, _ctor: ValueHandle| {
            assert!(matches!(
                counter_class().register(cx),
                Err(BridgeError::AlreadyRegistered { ref class }) if class == "Counter"
            ));
            Ok(())
        });
    }

    // ========================================================================
    // Members
    // ========================================================================

    #[test]
    fn accessors_and_methods() {
        with_counter(|cx: &ExecutionContext, ctor: ValueHandle| {
            let step = cx.number(3.0)?;
            let counter = cx.construct(ctor, &[step])?;
            cx.call_method(counter, "tick", &[])?;
            let count = cx.get(counter, "count")?;
            assert_eq!(cx.as_number(count)?, 3.0);

            let ten = cx.number(10.0)?;
            cx.set(counter, "step", ten)?;
            let after = cx.call_method(counter, "tick", &[])?;
            assert_eq!(cx.as_number(after)?, 13.0);

            let one = cx.number(1.0)?;
            let plus = cx.call_method(counter, "plus", &[one])?;
            assert_eq!(cx.as_number(plus)?, 14.0);
            Ok(())
        });
    }

    #[test]
    fn read_only_property_rejects_writes() {
        with_counter(|cx: &ExecutionContext, ctor: ValueHandle| {
            let step = cx.number(1.0)?;
            let counter = cx.construct(ctor, &[step])?;
            let five = cx.number(5.0)?;
            assert!(matches!(
                cx.set(counter, "count", five),
                Err(BridgeError::ReadOnlyProperty { .. })
            ));
            Ok(())
        });
    }

    #[test]
    fn setter_validates_before_mutating() {
        with_counter(|cx: &ExecutionContext, ctor: ValueHandle| {
            let step = cx.number(4.0)?;
            let counter = cx.construct(ctor, &[step])?;
            let bad = cx.string("fast")?;
            let err = cx.set(counter, "step", bad).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::Conversion(ConversionError::PropertyTypeMismatch { ref name, .. }) if name == "step"
            ));
            assert_eq!(cx.payload::<Counter>(counter)?.borrow().step, 4);
            Ok(())
        });
    }

    #[test]
    fn methods_are_not_enumerable() {
        with_counter(|cx: &ExecutionContext, ctor: ValueHandle| {
            let prototype = cx.get(ctor, "prototype")?;
            assert!(cx.own_keys(prototype)?.is_empty());
            assert!(cx.has_own(prototype, "tick")?);
            Ok(())
        });
    }

    #[test]
    fn method_on_foreign_receiver_fails() {
        with_counter(|cx: &ExecutionContext, ctor: ValueHandle| {
            let prototype = cx.get(ctor, "prototype")?;
            let tick = cx.get(prototype, "tick")?;
            let plain = cx.object()?;
            assert!(matches!(cx.call(tick, plain, &[]), Err(BridgeError::InvalidThis { .. })));
            Ok(())
        });
    }

    #[test]
    fn static_method_lives_on_constructor() {
        with_counter(|cx: &ExecutionContext, ctor: ValueHandle| {
            let zero = cx.call_method(ctor, "zero", &[])?;
            assert_eq!(cx.class_name_of(zero)?, Some("Counter"));
            Ok(())
        });
    }

    #[test]
    fn inspect_fields_renders_values() {
        with_counter(|cx: &ExecutionContext, ctor: ValueHandle| {
            let step = cx.number(2.0)?;
            let counter = cx.construct(ctor, &[step])?;
            assert_eq!(inspect(cx, counter)?, "Counter { count: 0, step: 2 }");
            Ok(())
        });
    }

    #[test]
    fn finalizer_runs_once_per_instance() {
        thread_local! {
            static FINALIZED: Cell<usize> = const { Cell::new(0) };
        }

        struct Tracked;
        impl NativeClass for Tracked {
            const NAME: &'static str = "Tracked";
        }

        let env = Environment::new(EnvironmentConfig::default()).unwrap();
        env.enter(|cx: &ExecutionContext| {
            ClassBuilder::<Tracked>::new()
                .constructor(|| -> BridgeResult<Tracked> { Ok(Tracked) })
                .on_finalize(|_: &mut Tracked| FINALIZED.with(|count| count.set(count.get() + 1)))
                .build()
                .register(cx)?;
            cx.scope(|cx: &ExecutionContext| {
                let ctor = cx.class_constructor::<Tracked>()?;
                cx.construct(ctor, &[])?;
                cx.construct(ctor, &[])?;
                Ok::<_, BridgeError>(())
            })
        })
        .unwrap();

        env.collect_garbage().unwrap();
        env.collect_garbage().unwrap();
        assert_eq!(FINALIZED.with(Cell::get), 2);
        env.enter(|cx: &ExecutionContext| {
            let stats = cx.class_stats::<Tracked>().unwrap();
            assert_eq!((stats.constructed, stats.finalized, stats.live()), (2, 2, 0));
            Ok(())
        })
        .unwrap();
    }
}
