//! Property keys: plain names and symbols.

use std::fmt;
use std::rc::Rc;

use crate::context::ExecutionContext;
use crate::convert::{FromHost, ToHost};
use crate::env::EnvId;
use crate::error::{BridgeError, BridgeResult, ConversionError};
use crate::handle::ValueHandle;
use crate::host::{HostValue, SymbolId, number_to_string};

/// Registry key of the symbol host tooling looks up for custom inspection.
pub const INSPECT_CUSTOM_KEY: &str = "nodejs.util.inspect.custom";

/// A symbol of a particular environment. Equality is identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SymbolKey {
    env: EnvId,
    id: SymbolId,
}

impl SymbolKey {
    pub(crate) fn new(env: EnvId, id: SymbolId) -> Self {
        Self { env, id }
    }

    pub(crate) fn env(&self) -> EnvId {
        self.env
    }

    pub(crate) fn id(&self) -> SymbolId {
        self.id
    }
}

/// Key of a host property.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NameKey {
    String(Rc<str>),
    Symbol(SymbolKey),
}

impl NameKey {
    /// A unique symbol that is not in the global registry.
    pub fn fresh(cx: &ExecutionContext, description: Option<&str>) -> BridgeResult<Self> {
        let symbol = cx.symbol(description)?;
        Self::from_symbol_handle(cx, symbol, description.unwrap_or(""))
    }

    /// The registry symbol for `key`, obtained through the host's
    /// `Symbol.for`. Equal keys always give the identical symbol.
    pub fn global(cx: &ExecutionContext, key: &str) -> BridgeResult<Self> {
        let resolve = || -> BridgeResult<ValueHandle> {
            let global = cx.global()?;
            let symbol_ctor = cx.get(global, "Symbol")?;
            let key_handle = cx.string(key)?;
            cx.call_method(symbol_ctor, "for", &[key_handle])
        };
        let symbol = resolve().map_err(|err| {
            tracing::debug!(key, error = %err, "Symbol.for lookup failed");
            BridgeError::SymbolResolution {
                name: format!("Symbol.for({key})"),
            }
        })?;
        Self::from_symbol_handle(cx, symbol, key)
    }

    /// `globalThis.Symbol[name]`, cached on the environment after the first
    /// lookup.
    ///
    /// # Panics
    ///
    /// If the host has no such well-known symbol. Use
    /// [`try_well_known`](Self::try_well_known) to observe the failure.
    pub fn well_known(cx: &ExecutionContext, name: &str) -> Self {
        match Self::try_well_known(cx, name) {
            Ok(key) => key,
            Err(err) => panic!("well-known symbol Symbol.{name} is unavailable: {err}"),
        }
    }

    pub fn try_well_known(cx: &ExecutionContext, name: &str) -> BridgeResult<Self> {
        if let Some(id) = cx.env.well_known.borrow().get(name) {
            return Ok(NameKey::Symbol(SymbolKey::new(cx.environment_id(), *id)));
        }

        let failed = || BridgeError::SymbolResolution {
            name: format!("Symbol.{name}"),
        };
        let symbol = cx
            .global()
            .and_then(|global| cx.get(global, "Symbol"))
            .and_then(|ctor| cx.get(ctor, name))
            .map_err(|_| failed())?;
        let HostValue::Symbol(id) = cx.value(symbol)? else {
            return Err(failed());
        };
        cx.env.well_known.borrow_mut().insert(Box::from(name), id);
        Ok(NameKey::Symbol(SymbolKey::new(cx.environment_id(), id)))
    }

    /// `Symbol.iterator`.
    pub fn iterator(cx: &ExecutionContext) -> Self {
        Self::well_known(cx, "iterator")
    }

    /// The global custom-inspection symbol.
    pub fn inspect_custom(cx: &ExecutionContext) -> BridgeResult<Self> {
        Self::global(cx, INSPECT_CUSTOM_KEY)
    }

    fn from_symbol_handle(cx: &ExecutionContext, symbol: ValueHandle, name: &str) -> BridgeResult<Self> {
        match cx.value(symbol)? {
            HostValue::Symbol(id) => Ok(NameKey::Symbol(SymbolKey::new(cx.environment_id(), id))),
            _ => Err(BridgeError::SymbolResolution {
                name: name.to_string(),
            }),
        }
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, NameKey::Symbol(_))
    }

    /// The name, for string keys.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NameKey::String(name) => Some(&**name),
            NameKey::Symbol(_) => None,
        }
    }
}

impl From<&str> for NameKey {
    fn from(name: &str) -> Self {
        NameKey::String(Rc::from(name))
    }
}

impl From<String> for NameKey {
    fn from(name: String) -> Self {
        NameKey::String(Rc::from(name))
    }
}

impl From<&String> for NameKey {
    fn from(name: &String) -> Self {
        NameKey::String(Rc::from(name.as_str()))
    }
}

impl From<Rc<str>> for NameKey {
    fn from(name: Rc<str>) -> Self {
        NameKey::String(name)
    }
}

impl From<&NameKey> for NameKey {
    fn from(key: &NameKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameKey::String(name) => f.write_str(name),
            NameKey::Symbol(symbol) => write!(f, "[symbol #{}]", symbol.id.0),
        }
    }
}

impl ToHost for NameKey {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        match self {
            NameKey::String(name) => cx.alloc(HostValue::String(name.clone())),
            NameKey::Symbol(symbol) if symbol.env == cx.environment_id() => {
                cx.alloc(HostValue::Symbol(symbol.id))
            }
            NameKey::Symbol(_) => Err(BridgeError::ForeignHandle),
        }
    }
}

impl FromHost for NameKey {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        match cx.value(value)? {
            HostValue::String(name) => Ok(NameKey::String(name)),
            HostValue::Symbol(id) => Ok(NameKey::Symbol(SymbolKey::new(cx.environment_id(), id))),
            HostValue::Number(n) => Ok(NameKey::from(number_to_string(n))),
            other => Err(ConversionError::type_mismatch(
                "string or symbol",
                cx.type_of(&other).name(),
            )
            .into()),
        }
    }
}

/// Declarative property key, resolved against an environment when a class
/// or module is registered.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemberKey {
    /// A plain string name.
    Name(Rc<str>),
    /// `Symbol[name]`.
    WellKnown(&'static str),
    /// `Symbol.for(key)`.
    Global(Rc<str>),
}

impl MemberKey {
    pub fn name(name: &str) -> Self {
        MemberKey::Name(Rc::from(name))
    }

    pub fn iterator() -> Self {
        MemberKey::WellKnown("iterator")
    }

    pub fn inspect_custom() -> Self {
        MemberKey::Global(Rc::from(INSPECT_CUSTOM_KEY))
    }

    pub fn resolve(&self, cx: &ExecutionContext) -> BridgeResult<NameKey> {
        match self {
            MemberKey::Name(name) => Ok(NameKey::String(name.clone())),
            MemberKey::WellKnown(name) => NameKey::try_well_known(cx, name),
            MemberKey::Global(key) => NameKey::global(cx, key),
        }
    }
}

impl From<&str> for MemberKey {
    fn from(name: &str) -> Self {
        MemberKey::name(name)
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKey::Name(name) => f.write_str(name),
            MemberKey::WellKnown(name) => write!(f, "[Symbol.{name}]"),
            MemberKey::Global(key) => write!(f, "[Symbol.for({key})]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Environment, EnvironmentConfig};

    fn env() -> Environment {
        Environment::new(EnvironmentConfig::default()).unwrap()
    }

    #[test]
    fn global_symbols_are_identical() {
        let env = env();
        env.enter(|cx: &ExecutionContext| {
            let a = NameKey::global(cx, "hostbridge.tag")?;
            let b = NameKey::global(cx, "hostbridge.tag")?;
            let c = NameKey::global(cx, "hostbridge.other")?;
            assert_eq!(a, b);
            assert_ne!(a, c);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn fresh_symbols_differ() {
        let env = env();
        env.enter(|cx: &ExecutionContext| {
            let a = NameKey::fresh(cx, Some("x"))?;
            let b = NameKey::fresh(cx, Some("x"))?;
            assert_ne!(a, b);
            assert!(a.is_symbol());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn well_known_is_cached_and_stable() {
        let env = env();
        env.enter(|cx: &ExecutionContext| {
            let first = NameKey::iterator(cx);
            let global = cx.global()?;
            let symbol_ctor = cx.get(global, "Symbol")?;
            let raw = cx.get(symbol_ctor, "iterator")?;
            assert_eq!(NameKey::from_host(cx, raw)?, first);

            cx.delete(global, "Symbol")?;
            assert_eq!(NameKey::iterator(cx), first);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn unknown_well_known_fails() {
        let env = env();
        env.enter(|cx: &ExecutionContext| {
            assert!(matches!(
                NameKey::try_well_known(cx, "doesNotExist"),
                Err(BridgeError::SymbolResolution { ref name }) if name == "Symbol.doesNotExist"
            ));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    #[should_panic(expected = "Symbol.doesNotExist")]
    fn well_known_failure_is_fatal() {
        let env = env();
        let _ = env.enter(|cx: &ExecutionContext| {
            NameKey::well_known(cx, "doesNotExist");
            Ok(())
        });
    }

    #[test]
    fn inspect_custom_matches_registry() {
        let env = env();
        env.enter(|cx: &ExecutionContext| {
            let key = NameKey::inspect_custom(cx)?;
            let via_registry = cx.symbol_for(INSPECT_CUSTOM_KEY)?;
            assert_eq!(NameKey::from_host(cx, via_registry)?, key);
            assert_eq!(MemberKey::inspect_custom().resolve(cx)?, key);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn symbol_keys_index_properties() {
        let env = env();
        env.enter(|cx: &ExecutionContext| {
            let key = NameKey::fresh(cx, Some("secret"))?;
            let object = cx.object()?;
            cx.set_converted(object, &key, &1.0)?;
            assert!(cx.has_own(object, &key)?);
            assert!(!cx.has_own(object, "secret")?);
            assert!(cx.own_keys(object)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn number_keys_convert_to_names() {
        let env = env();
        env.enter(|cx: &ExecutionContext| {
            let n = cx.number(3.0)?;
            assert_eq!(NameKey::from_host(cx, n)?, NameKey::from("3"));
            let b = cx.boolean(true)?;
            assert!(NameKey::from_host(cx, b).is_err());
            Ok(())
        })
        .unwrap();
    }
}
