//! Dynamically typed host values.

use std::fmt;
use std::rc::Rc;

/// Reference to a host object.
///
/// Generational: once the collector frees the slot, the generation moves on
/// and every older id for that index reads as dead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ObjectId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

/// Identity of a host symbol within one environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub(crate) u32);

/// A host value as stored in scopes, roots and object properties.
#[derive(Clone, Debug, PartialEq)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Symbol(SymbolId),
    Object(ObjectId),
}

impl HostValue {
    pub fn string(s: &str) -> Self {
        HostValue::String(Rc::from(s))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, HostValue::Undefined)
    }

    /// `undefined` or `null`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            HostValue::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Host truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            HostValue::Undefined | HostValue::Null => false,
            HostValue::Bool(b) => *b,
            HostValue::Number(n) => *n != 0.0 && !n.is_nan(),
            HostValue::String(s) => !s.is_empty(),
            HostValue::Symbol(_) | HostValue::Object(_) => true,
        }
    }

    /// Strict equality: identity for symbols and objects, IEEE for numbers.
    pub fn strict_equals(&self, other: &HostValue) -> bool {
        match (self, other) {
            (HostValue::Number(a), HostValue::Number(b)) => a == b,
            (a, b) => a == b,
        }
    }
}

/// Dynamic type of a host value, as reported in diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Symbol,
    Object,
    Function,
}

impl ValueType {
    /// Lower-case name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Undefined => "undefined",
            ValueType::Null => "null",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Symbol => "symbol",
            ValueType::Object => "object",
            ValueType::Function => "function",
        }
    }

    /// Objects and functions can carry properties.
    pub fn is_object_like(&self) -> bool {
        matches!(self, ValueType::Object | ValueType::Function)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Render a number the way the host prints it.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_rendering() {
        assert_eq!(number_to_string(100.0), "100");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn truthiness() {
        assert!(!HostValue::Undefined.is_truthy());
        assert!(!HostValue::Number(0.0).is_truthy());
        assert!(!HostValue::string("").is_truthy());
        assert!(HostValue::string("x").is_truthy());
        assert!(HostValue::Symbol(SymbolId(0)).is_truthy());
    }

    #[test]
    fn strict_equality() {
        assert!(HostValue::Number(1.0).strict_equals(&HostValue::Number(1.0)));
        assert!(!HostValue::Number(f64::NAN).strict_equals(&HostValue::Number(f64::NAN)));
        assert!(!HostValue::Undefined.strict_equals(&HostValue::Null));
        assert!(HostValue::string("a").strict_equals(&HostValue::string("a")));
    }
}
