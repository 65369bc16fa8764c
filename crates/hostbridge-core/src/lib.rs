//! Core runtime for bridging native Rust code into a garbage-collected host.
//!
//! An [`Environment`] owns a heap of host objects, a symbol table and a local
//! executor. Native code reaches it through an [`ExecutionContext`], which is
//! only valid while the environment is entered on its owning thread:
//!
//! ```text
//! Environment::enter -> ExecutionContext -> ValueHandle (scope-bound)
//!                                        -> Persistent  (rooted, outlives scopes)
//! ```
//!
//! Values cross the boundary through the [`ToHost`]/[`FromHost`] protocol.
//! Native types become host classes through [`NativeClass`], and async work
//! settles host promises through [`Deferred`].

mod class;
mod config;
mod context;
mod convert;
mod deferred;
mod env;
mod error;
mod handle;
pub mod host;
mod name;
mod native_fn;
mod object_access;

pub use class::{ClassId, ClassState, ClassStats, Instance, NativeClass, Wrap};
pub use config::{EnvironmentConfig, InspectOptions};
pub use context::{ExecutionContext, MAX_ARRAY_LENGTH};
pub use convert::{FromHost, ToHost};
pub use deferred::{Deferred, PromiseState};
pub use env::{EnvId, Environment, GcStats, ThreadToken, WELL_KNOWN_SYMBOLS};
pub use error::{BridgeError, BridgeResult, ConversionError, ExceptionKind, HostException};
pub use handle::{Persistent, ValueHandle};
pub use host::object::PropertyFlags;
pub use host::{ObjectId, SymbolId, ValueType};
pub use name::{INSPECT_CUSTOM_KEY, MemberKey, NameKey, SymbolKey};
pub use native_fn::{CallContext, NativeCallable, NativeFn};
pub use object_access::{ObjectBuilder, ObjectReader};
