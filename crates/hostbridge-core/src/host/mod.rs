//! The host object model: values, objects, the heap and symbols.
//!
//! Everything here is owned by one environment and reached through an
//! `ExecutionContext`; nothing in this module is thread-safe.

pub(crate) mod heap;
pub mod object;
pub(crate) mod script;
pub(crate) mod symbol;
pub(crate) mod value;

pub(crate) use heap::Heap;
pub(crate) use symbol::SymbolTable;
pub use value::{HostValue, ObjectId, SymbolId, ValueType, number_to_string};
