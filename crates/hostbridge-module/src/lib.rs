//! Registration layer for exposing native Rust code to a hostbridge
//! environment.
//!
//! # Architecture
//!
//! A [`Module`] collects exports without touching any environment. Loading
//! it registers its classes and materializes the exports object:
//!
//! ```text
//! Module (exports, ClassDescriptors) -> load(cx) -> globalThis[name]
//! ```
//!
//! Typed closures are adapted to native functions by [`native_fn`] and
//! [`native_async_fn`]. Native sequences become host iterators through
//! [`HostIterable`], and [`inspect`] renders host values the way host
//! tooling prints them.

mod builtins;
mod class_builder;
mod function;
mod inspect;
mod iterator;
mod module;

pub use builtins::ensure_builtin_classes;
pub use class_builder::{ClassBuilder, ClassDescriptor, ClassRegistration};
pub use function::{HostFn, HostMethod, HostMethodMut, native_async_fn, native_fn};
pub use inspect::{Inspector, Style, inspect, inspect_with};
pub use iterator::{HostIterable, IteratorResult, IteratorStep, NativeIterator, collect_iterable};
pub use module::Module;
