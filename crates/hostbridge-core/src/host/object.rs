//! Host object layout: kind-specific storage plus an ordered property list.

use std::any::Any;
use std::rc::Rc;

use bitflags::bitflags;

use super::value::{HostValue, ObjectId, SymbolId};
use crate::class::ClassId;
use crate::native_fn::NativeFn;

bitflags! {
    /// Attributes of an own property.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PropertyFlags: u8 {
        const WRITABLE = 1 << 0;
        const ENUMERABLE = 1 << 1;
        const CONFIGURABLE = 1 << 2;
    }
}

impl PropertyFlags {
    /// Flags of a property created by plain assignment.
    pub const DEFAULT: Self = Self::all();
    /// Writable but skipped by enumeration, as for methods.
    pub const HIDDEN: Self = Self::WRITABLE.union(Self::CONFIGURABLE);
    pub const READ_ONLY: Self = Self::ENUMERABLE.union(Self::CONFIGURABLE);
}

/// Key of a property inside the heap.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    String(Rc<str>),
    Symbol(SymbolId),
}

impl PropertyKey {
    /// Canonical array index, if the key spells one.
    /// Array index form of the key: a canonical decimal below `u32::MAX`.
    /// Anything larger is an ordinary property name.
    pub fn as_index(&self) -> Option<usize> {
        let PropertyKey::String(s) = self else {
            return None;
        };
        if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
            return None;
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse::<u32>()
            .ok()
            .filter(|index| *index < u32::MAX)
            .map(|index| index as usize)
    }

    pub fn is_named(&self, name: &str) -> bool {
        matches!(self, PropertyKey::String(s) if &**s == name)
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        PropertyKey::String(Rc::from(s))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Data(HostValue),
    Accessor {
        getter: Option<ObjectId>,
        setter: Option<ObjectId>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub value: PropertyValue,
    pub flags: PropertyFlags,
}

impl Property {
    pub fn data(value: HostValue, flags: PropertyFlags) -> Self {
        Self {
            value: PropertyValue::Data(value),
            flags,
        }
    }
}

pub(crate) struct FunctionData {
    pub name: Rc<str>,
    pub native: NativeFn,
    pub constructor: bool,
}

/// Finalizer stored alongside a payload; receives the payload before it drops.
pub(crate) type PayloadFinalizer = Rc<dyn Fn(&Rc<dyn Any>)>;

pub(crate) struct WrappedPayload {
    pub class: ClassId,
    pub payload: Rc<dyn Any>,
    pub finalizer: Option<PayloadFinalizer>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PromiseSlot {
    Pending,
    Fulfilled(HostValue),
    Rejected(HostValue),
}

pub(crate) enum ObjectKind {
    Ordinary,
    Array(Vec<HostValue>),
    Error,
    Function(FunctionData),
    Wrapped(WrappedPayload),
    Promise(PromiseSlot),
}

pub(crate) struct HostObject {
    pub kind: ObjectKind,
    pub prototype: Option<ObjectId>,
    properties: Vec<(PropertyKey, Property)>,
}

impl HostObject {
    pub fn new(kind: ObjectKind, prototype: Option<ObjectId>) -> Self {
        Self {
            kind,
            prototype,
            properties: Vec::new(),
        }
    }

    pub fn ordinary() -> Self {
        Self::new(ObjectKind::Ordinary, None)
    }

    pub fn own(&self, key: &PropertyKey) -> Option<&Property> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, property)| property)
    }

    /// Define or replace an own property, keeping insertion order.
    pub fn define(&mut self, key: PropertyKey, property: Property) {
        match self.properties.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = property,
            None => self.properties.push((key, property)),
        }
    }

    /// Assign a data value, keeping the flags of an existing property.
    pub fn assign(&mut self, key: PropertyKey, value: HostValue) {
        match self.properties.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => existing.value = PropertyValue::Data(value),
            None => self
                .properties
                .push((key, Property::data(value, PropertyFlags::DEFAULT))),
        }
    }

    /// Remove a configurable own property. Returns false if it is not configurable.
    pub fn remove(&mut self, key: &PropertyKey) -> bool {
        match self.properties.iter().position(|(k, _)| k == key) {
            Some(pos) if !self.properties[pos].1.flags.contains(PropertyFlags::CONFIGURABLE) => {
                false
            }
            Some(pos) => {
                self.properties.remove(pos);
                true
            }
            None => true,
        }
    }

    pub fn properties(&self) -> &[(PropertyKey, Property)] {
        &self.properties
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.kind, ObjectKind::Function(_))
    }

    /// Push every object this one references onto `out`.
    pub fn trace(&self, out: &mut Vec<ObjectId>) {
        if let Some(prototype) = self.prototype {
            out.push(prototype);
        }
        for (_, property) in &self.properties {
            match &property.value {
                PropertyValue::Data(value) => out.extend(value.as_object()),
                PropertyValue::Accessor { getter, setter } => {
                    out.extend(*getter);
                    out.extend(*setter);
                }
            }
        }
        match &self.kind {
            ObjectKind::Array(elements) => {
                out.extend(elements.iter().filter_map(HostValue::as_object));
            }
            ObjectKind::Promise(PromiseSlot::Fulfilled(value) | PromiseSlot::Rejected(value)) => {
                out.extend(value.as_object());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_index_keys() {
        assert_eq!(PropertyKey::from("0").as_index(), Some(0));
        assert_eq!(PropertyKey::from("12").as_index(), Some(12));
        assert_eq!(PropertyKey::from("01").as_index(), None);
        assert_eq!(PropertyKey::from("-1").as_index(), None);
        assert_eq!(PropertyKey::from("length").as_index(), None);
        assert_eq!(PropertyKey::from("4294967294").as_index(), Some(4_294_967_294));
        assert_eq!(PropertyKey::from("4294967295").as_index(), None);
        assert_eq!(PropertyKey::from("18446744073709551615").as_index(), None);
        assert_eq!(PropertyKey::Symbol(SymbolId(3)).as_index(), None);
    }

    #[test]
    fn define_keeps_insertion_order() {
        let mut object = HostObject::ordinary();
        object.assign("b".into(), HostValue::Number(1.0));
        object.assign("a".into(), HostValue::Number(2.0));
        object.assign("b".into(), HostValue::Number(3.0));

        let keys: Vec<_> = object.properties().iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![PropertyKey::from("b"), PropertyKey::from("a")]);
        assert_eq!(
            object.own(&"b".into()).map(|p| p.value.clone()),
            Some(PropertyValue::Data(HostValue::Number(3.0)))
        );
    }

    #[test]
    fn non_configurable_properties_stay() {
        let mut object = HostObject::ordinary();
        object.define(
            "fixed".into(),
            Property::data(HostValue::Null, PropertyFlags::WRITABLE),
        );
        assert!(!object.remove(&"fixed".into()));
        assert!(object.own(&"fixed".into()).is_some());
        assert!(object.remove(&"absent".into()));
    }

    #[test]
    fn trace_collects_references() {
        let proto = ObjectId::new(1, 0);
        let getter = ObjectId::new(2, 0);
        let element = ObjectId::new(3, 0);

        let mut object = HostObject::new(ObjectKind::Array(vec![HostValue::Object(element)]), Some(proto));
        object.define(
            "x".into(),
            Property {
                value: PropertyValue::Accessor {
                    getter: Some(getter),
                    setter: None,
                },
                flags: PropertyFlags::CONFIGURABLE,
            },
        );

        let mut out = Vec::new();
        object.trace(&mut out);
        assert_eq!(out, vec![proto, getter, element]);
    }
}
