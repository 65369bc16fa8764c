//! hostbridge: expose native Rust functions, classes and iterators to a
//! dynamically-typed, garbage-collected host runtime.
//!
//! # Example
//!
//! ```ignore
//! use hostbridge::prelude::*;
//!
//! let mut bridge = Bridge::new(EnvironmentConfig::default())?;
//!
//! let mut math = Module::new("math");
//! math.function("add", |a: f64, b: f64| -> BridgeResult<f64> { Ok(a + b) });
//! bridge.install(math)?;
//!
//! assert_eq!(bridge.eval::<f64>("math.add(1, 2)")?, 3.0);
//! ```
//!
//! The workspace is split the same way the bridge is layered:
//!
//! - `hostbridge-core` - environments, contexts, handles and conversions
//! - `hostbridge-module` - modules, class builders, iterators, inspection
//! - `hostbridge-modules` - bundled modules

mod bridge;

pub use bridge::{Bridge, SetupError};

pub mod prelude {
    pub use crate::bridge::{Bridge, SetupError};
    pub use hostbridge_core::{
        BridgeError, BridgeResult, CallContext, ConversionError, Deferred, Environment, EnvironmentConfig,
        ExecutionContext, FromHost, HostException, InspectOptions, Instance, NameKey, NativeClass, NativeFn,
        ObjectBuilder, ObjectReader, Persistent, PromiseState, ToHost, ValueHandle, Wrap,
    };
    pub use hostbridge_module::{
        ClassBuilder, HostIterable, Inspector, IteratorStep, Module, Style, collect_iterable, inspect,
    };
}
