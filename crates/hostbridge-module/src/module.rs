//! Module export tables.
//!
//! A [`Module`] is an environment-independent list of exports: plain
//! values, native functions and classes. Loading it into an environment
//! materializes the exports object and binds it on `globalThis[name]`.
//!
//! # Example
//!
//! ```ignore
//! let mut module = Module::new("example");
//! module.export("nums", vec![3.0, 4.0]);
//! module.function("add", |a: f64, b: f64| -> BridgeResult<f64> { Ok(a + b) });
//! module.class::<Rectangle>().property("area", Rectangle::area).build();
//!
//! let exports = env.enter(|cx| module.load(cx))?;
//! ```

use std::fmt;
use std::future::Future;

use hostbridge_core::{
    BridgeResult, CallContext, ExecutionContext, FromHost, NativeClass, NativeFn, ToHost, ValueHandle,
};
use rustc_hash::FxHashMap;

use crate::builtins::ensure_builtin_classes;
use crate::class_builder::{ClassBuilder, ClassRegistration};
use crate::function::{HostFn, native_async_fn, native_fn};

enum Export {
    Value(Box<dyn ToHost>),
    Function(NativeFn),
}

/// A named set of exports ready to be loaded into an environment.
pub struct Module {
    name: String,
    exports: Vec<(String, Export)>,
    index: FxHashMap<String, usize>,
    classes: Vec<Box<dyn ClassRegistration>>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exports: Vec::new(),
            index: FxHashMap::default(),
            classes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Export names in declaration order, classes last.
    pub fn export_names(&self) -> impl Iterator<Item = &str> {
        self.exports
            .iter()
            .map(|(name, _)| name.as_str())
            .chain(self.classes.iter().map(|class| class.class_name()))
    }

    fn insert(&mut self, name: String, export: Export) {
        match self.index.get(&name) {
            Some(&slot) => self.exports[slot].1 = export,
            None => {
                self.index.insert(name.clone(), self.exports.len());
                self.exports.push((name, export));
            }
        }
    }

    /// Export a value, converted when the module loads. A later export with
    /// the same name replaces the earlier one.
    pub fn export<V: ToHost + 'static>(&mut self, name: impl Into<String>, value: V) -> &mut Self {
        self.insert(name.into(), Export::Value(Box::new(value)));
        self
    }

    /// Export a typed native function.
    pub fn function<F, Args, R>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: HostFn<Args, BridgeResult<R>>,
        R: ToHost,
    {
        self.insert(name.into(), Export::Function(native_fn(f)));
        self
    }

    /// Export a function working directly on the call frame.
    pub fn function_raw<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&mut CallContext<'_>) -> BridgeResult<()> + 'static,
    {
        self.insert(name.into(), Export::Function(NativeFn::new(f)));
        self
    }

    /// Export a function returning a promise settled by the future `f`
    /// produces.
    pub fn function_async<F, Args, Fut, R>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: HostFn<Args, Fut>,
        Fut: Future<Output = BridgeResult<R>> + 'static,
        R: ToHost + 'static,
    {
        self.insert(name.into(), Export::Function(native_async_fn(f)));
        self
    }

    /// Start a class exported under `T::NAME`. The class is added when the
    /// builder's `build()` is called.
    pub fn class<T: NativeClass>(&mut self) -> ClassBuilder<'_, T> {
        ClassBuilder::with_module(Some(self))
    }

    pub(crate) fn add_class(&mut self, class: Box<dyn ClassRegistration>) {
        match self
            .classes
            .iter()
            .position(|existing| existing.class_name() == class.class_name())
        {
            Some(slot) => self.classes[slot] = class,
            None => self.classes.push(class),
        }
    }

    /// Materialize the exports in the context's environment.
    ///
    /// Registers every class, builds the exports object, binds it on
    /// `globalThis[name]` and returns it. Loading the same module twice into
    /// one environment fails with `AlreadyRegistered` when it has classes.
    pub fn load(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        let exports = cx.escape(|cx: &ExecutionContext| {
            ensure_builtin_classes(cx)?;
            let exports = cx.object()?;

            for class in &self.classes {
                let ctor = class.register(cx)?;
                cx.set(exports, class.class_name(), ctor)?;
            }

            for (name, export) in &self.exports {
                let value = match export {
                    Export::Value(value) => value.to_host(cx)?,
                    Export::Function(function) => cx.function(name, function.clone())?,
                };
                cx.set(exports, name, value)?;
            }

            let global = cx.global()?;
            cx.set(global, &self.name, exports)?;
            Ok(exports)
        })?;

        tracing::debug!(
            module = %self.name,
            exports = self.exports.len(),
            classes = self.classes.len(),
            "module loaded"
        );
        Ok(exports)
    }

    /// Load the module and read back one export.
    pub fn load_export<T: FromHost>(&self, cx: &ExecutionContext, name: &str) -> BridgeResult<T> {
        let exports = self.load(cx)?;
        cx.reader(exports)?.required(name)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("exports", &self.export_names().collect::<Vec<_>>())
            .finish()
    }
}
