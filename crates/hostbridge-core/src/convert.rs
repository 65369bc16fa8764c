//! Conversion traits between native values and host values.
//!
//! - [`ToHost`]: produce a host value from a native one
//! - [`FromHost`]: read a native value out of a host value
//!
//! ## Supported types
//!
//! - Integers: `i8`..`i64`, `u8`..`u64`, `isize`, `usize` (host numbers must
//!   be integral and in range)
//! - Floats: `f32`, `f64`
//! - `bool`, `()` (undefined), `String`, `str`
//! - `Option<T>`: `undefined` and `null` both mean `None`
//! - `Vec<T>` and slices as host arrays, failing fast with the element index
//! - `HashMap<String, T>` and `BTreeMap<String, T>` as plain objects
//!
//! ## Example
//!
//! ```ignore
//! let handle = vec![3, 4].to_host(cx)?;
//! let back: Vec<i32> = Vec::from_host(cx, handle)?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::rc::Rc;

use crate::context::ExecutionContext;
use crate::error::{BridgeResult, ConversionError};
use crate::handle::ValueHandle;
use crate::host::HostValue;

/// Produce a host value.
///
/// Object-safe, so heterogenous values can travel as `Box<dyn ToHost>`.
/// Conversion may only fail through the context: a dead scope or an
/// exhausted heap.
pub trait ToHost {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle>;
}

/// Read a native value out of a host value.
pub trait FromHost: Sized {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self>;
}

fn mismatch(cx: &ExecutionContext, expected: &'static str, actual: &HostValue) -> ConversionError {
    ConversionError::type_mismatch(expected, cx.type_of(actual).name())
}

// ============================================================================
// Handles, unit, bool
// ============================================================================

impl ToHost for ValueHandle {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        cx.value(*self)?;
        Ok(*self)
    }
}

impl FromHost for ValueHandle {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        cx.value(value)?;
        Ok(value)
    }
}

impl ToHost for () {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        cx.undefined()
    }
}

impl FromHost for () {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        match cx.value(value)? {
            HostValue::Undefined => Ok(()),
            other => Err(mismatch(cx, "undefined", &other).into()),
        }
    }
}

impl ToHost for bool {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        cx.boolean(*self)
    }
}

impl FromHost for bool {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        match cx.value(value)? {
            HostValue::Bool(b) => Ok(b),
            other => Err(mismatch(cx, "boolean", &other).into()),
        }
    }
}

// ============================================================================
// Numbers
// ============================================================================

fn integral(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<f64> {
    match cx.value(value)? {
        HostValue::Number(n) if n.is_finite() && n.fract() == 0.0 => Ok(n),
        HostValue::Number(n) => Err(ConversionError::NotAnInteger { value: n }.into()),
        other => Err(mismatch(cx, "number", &other).into()),
    }
}

// Host numbers are f64; widths above 53 bits lose precision past 2^53.
macro_rules! impl_host_int {
    ($($ty:ty),*) => {
        $(
            impl ToHost for $ty {
                fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
                    cx.number(*self as f64)
                }
            }

            impl FromHost for $ty {
                fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
                    let n = integral(cx, value)?;
                    // MAX rounds up to a power of two for 64-bit widths, so the
                    // upper bound is exclusive.
                    if n >= <$ty>::MIN as f64 && n < <$ty>::MAX as f64 + 1.0 {
                        Ok(n as $ty)
                    } else {
                        Err(ConversionError::IntegerOverflow {
                            value: n,
                            target_type: stringify!($ty),
                        }
                        .into())
                    }
                }
            }
        )*
    };
}

impl_host_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl ToHost for f64 {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        cx.number(*self)
    }
}

impl FromHost for f64 {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        cx.as_number(value)
    }
}

impl ToHost for f32 {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        cx.number(*self as f64)
    }
}

impl FromHost for f32 {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        Ok(cx.as_number(value)? as f32)
    }
}

// ============================================================================
// Strings
// ============================================================================

impl ToHost for str {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        cx.string(self)
    }
}

impl ToHost for String {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        cx.string(self)
    }
}

impl FromHost for String {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        cx.as_string(value)
    }
}

impl ToHost for Rc<str> {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        cx.alloc(HostValue::String(self.clone()))
    }
}

impl FromHost for Rc<str> {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        match cx.value(value)? {
            HostValue::String(s) => Ok(s),
            other => Err(mismatch(cx, "string", &other).into()),
        }
    }
}

impl ToHost for char {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        cx.string(self.encode_utf8(&mut [0; 4]))
    }
}

impl FromHost for char {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        let s = cx.as_string(value)?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(ConversionError::InvalidString {
                message: format!("expected a single character, got {} characters", s.chars().count()),
            }
            .into()),
        }
    }
}

// ============================================================================
// Wrappers
// ============================================================================

impl<T: ToHost + ?Sized> ToHost for &T {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        (**self).to_host(cx)
    }
}

impl<T: ToHost + ?Sized> ToHost for Box<T> {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        (**self).to_host(cx)
    }
}

impl<T: FromHost> FromHost for Box<T> {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        T::from_host(cx, value).map(Box::new)
    }
}

impl<T: ToHost> ToHost for Option<T> {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        match self {
            Some(value) => value.to_host(cx),
            None => cx.undefined(),
        }
    }
}

impl<T: FromHost> FromHost for Option<T> {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        if cx.value(value)?.is_nullish() {
            Ok(None)
        } else {
            T::from_host(cx, value).map(Some)
        }
    }
}

// ============================================================================
// Sequences and maps
// ============================================================================

fn array_of<'a, T: ToHost + 'a>(
    cx: &ExecutionContext,
    items: impl ExactSizeIterator<Item = &'a T>,
) -> BridgeResult<ValueHandle> {
    cx.escape(|inner: &ExecutionContext| {
        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            handles.push(item.to_host(inner)?);
        }
        inner.array(&handles)
    })
}

impl<T: ToHost> ToHost for [T] {
    #[cfg_attr(feature = "profiling", profiling::function)]
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        array_of(cx, self.iter())
    }
}

impl<T: ToHost> ToHost for Vec<T> {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        array_of(cx, self.iter())
    }
}

impl<T: ToHost, const N: usize> ToHost for [T; N] {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        array_of(cx, self.iter())
    }
}

impl<T: FromHost> FromHost for Vec<T> {
    #[cfg_attr(feature = "profiling", profiling::function)]
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        if !cx.is_array(value)? {
            let actual = cx.value(value)?;
            return Err(mismatch(cx, "array", &actual).into());
        }
        let len = cx.array_length(value)?;
        let mut out = Vec::with_capacity(len);
        // Elements are read in the caller's scope so handle-bearing `T`s
        // stay valid after the conversion returns.
        for index in 0..len {
            let item = cx
                .get_index(value, index)
                .and_then(|element| T::from_host(cx, element));
            out.push(item.map_err(|err| err.at_element(index))?);
        }
        Ok(out)
    }
}

fn object_of<'a, T: ToHost + 'a>(
    cx: &ExecutionContext,
    entries: impl Iterator<Item = (&'a String, &'a T)>,
) -> BridgeResult<ValueHandle> {
    cx.escape(|inner: &ExecutionContext| {
        let object = inner.object()?;
        for (key, value) in entries {
            let value = value.to_host(inner)?;
            inner.set(object, key, value)?;
        }
        Ok(object)
    })
}

fn entries_of<T: FromHost>(
    cx: &ExecutionContext,
    value: ValueHandle,
    mut insert: impl FnMut(String, T),
) -> BridgeResult<()> {
    let actual = cx.value(value)?;
    if !cx.type_of(&actual).is_object_like() {
        return Err(mismatch(cx, "object", &actual).into());
    }
    for key in cx.own_keys(value)? {
        let Some(name) = key.as_str() else {
            continue;
        };
        let item = cx.get(value, &key).and_then(|element| T::from_host(cx, element));
        insert(name.to_string(), item.map_err(|err| err.at_property(name))?);
    }
    Ok(())
}

impl<T: ToHost, S: BuildHasher> ToHost for HashMap<String, T, S> {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        object_of(cx, self.iter())
    }
}

impl<T: FromHost, S: BuildHasher + Default> FromHost for HashMap<String, T, S> {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        let mut map = HashMap::default();
        entries_of(cx, value, |key: String, item: T| {
            map.insert(key, item);
        })?;
        Ok(map)
    }
}

impl<T: ToHost> ToHost for BTreeMap<String, T> {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        object_of(cx, self.iter())
    }
}

impl<T: FromHost> FromHost for BTreeMap<String, T> {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        let mut map = BTreeMap::new();
        entries_of(cx, value, |key: String, item: T| {
            map.insert(key, item);
        })?;
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::{Environment, EnvironmentConfig};

    fn with_cx(f: impl FnOnce(&ExecutionContext) -> BridgeResult<()>) {
        let env = Environment::new(EnvironmentConfig::default()).unwrap();
        env.enter(f).unwrap();
    }

    fn roundtrip<T: ToHost + FromHost>(cx: &ExecutionContext, value: &T) -> BridgeResult<T> {
        let handle = value.to_host(cx)?;
        T::from_host(cx, handle)
    }

    // ========================================================================
    // Scalars
    // ========================================================================

    #[test]
    fn scalar_roundtrips() {
        with_cx(|cx: &ExecutionContext| {
            assert_eq!(roundtrip(cx, &42i32)?, 42);
            assert_eq!(roundtrip(cx, &-7i64)?, -7);
            assert_eq!(roundtrip(cx, &255u8)?, 255);
            assert_eq!(roundtrip(cx, &1.25f64)?, 1.25);
            assert!(roundtrip(cx, &true)?);
            assert_eq!(roundtrip(cx, &"NodeSwift".to_string())?, "NodeSwift");
            assert_eq!(roundtrip(cx, &'x')?, 'x');
            Ok(())
        });
    }

    #[test]
    fn integer_range_checked() {
        with_cx(|cx: &ExecutionContext| {
            let big = cx.number(300.0)?;
            assert!(matches!(
                u8::from_host(cx, big),
                Err(BridgeError::Conversion(ConversionError::IntegerOverflow {
                    target_type: "u8",
                    ..
                }))
            ));

            let negative = cx.number(-1.0)?;
            assert!(u32::from_host(cx, negative).is_err());
            assert_eq!(i32::from_host(cx, negative)?, -1);
            Ok(())
        });
    }

    #[test]
    fn wide_integers_reject_rounded_bounds() {
        with_cx(|cx: &ExecutionContext| {
            let two_pow_64 = cx.number(18_446_744_073_709_551_616.0)?;
            assert!(matches!(
                u64::from_host(cx, two_pow_64),
                Err(BridgeError::Conversion(ConversionError::IntegerOverflow { target_type: "u64", .. }))
            ));
            assert!(usize::from_host(cx, two_pow_64).is_err());

            let two_pow_63 = cx.number(9_223_372_036_854_775_808.0)?;
            assert!(matches!(
                i64::from_host(cx, two_pow_63),
                Err(BridgeError::Conversion(ConversionError::IntegerOverflow { target_type: "i64", .. }))
            ));
            assert_eq!(u64::from_host(cx, two_pow_63)?, 1 << 63);

            let min = cx.number(-9_223_372_036_854_775_808.0)?;
            assert_eq!(i64::from_host(cx, min)?, i64::MIN);
            Ok(())
        });
    }

    #[test]
    fn fractions_are_not_integers() {
        with_cx(|cx: &ExecutionContext| {
            let half = cx.number(0.5)?;
            assert!(matches!(
                i32::from_host(cx, half),
                Err(BridgeError::Conversion(ConversionError::NotAnInteger { .. }))
            ));
            let nan = cx.number(f64::NAN)?;
            assert!(i32::from_host(cx, nan).is_err());
            Ok(())
        });
    }

    #[test]
    fn type_mismatch_reports_types() {
        with_cx(|cx: &ExecutionContext| {
            let s = cx.string("3")?;
            let err = f64::from_host(cx, s).unwrap_err();
            assert_eq!(
                err,
                BridgeError::Conversion(ConversionError::TypeMismatch {
                    expected: "number",
                    actual: "string"
                })
            );
            Ok(())
        });
    }

    // ========================================================================
    // Optional values
    // ========================================================================

    #[test]
    fn undefined_and_null_are_absent() {
        with_cx(|cx: &ExecutionContext| {
            let undefined = cx.undefined()?;
            let null = cx.null()?;
            assert_eq!(Option::<i32>::from_host(cx, undefined)?, None);
            assert_eq!(Option::<i32>::from_host(cx, null)?, None);

            let five = cx.number(5.0)?;
            assert_eq!(Option::<i32>::from_host(cx, five)?, Some(5));

            let none = None::<i32>.to_host(cx)?;
            assert!(cx.value(none)?.is_undefined());
            Ok(())
        });
    }

    #[test]
    fn present_but_wrong_is_not_absent() {
        with_cx(|cx: &ExecutionContext| {
            let s = cx.string("x")?;
            assert!(Option::<i32>::from_host(cx, s).is_err());
            Ok(())
        });
    }

    // ========================================================================
    // Sequences and maps
    // ========================================================================

    #[test]
    fn vec_roundtrip() {
        with_cx(|cx: &ExecutionContext| {
            assert_eq!(roundtrip(cx, &vec![3, 4])?, vec![3, 4]);
            assert_eq!(roundtrip(cx, &Vec::<String>::new())?, Vec::<String>::new());
            assert_eq!(
                roundtrip(cx, &vec![vec![1u8], vec![2, 3]])?,
                vec![vec![1u8], vec![2, 3]]
            );
            Ok(())
        });
    }

    #[test]
    fn vec_fails_fast_with_index() {
        with_cx(|cx: &ExecutionContext| {
            let array = cx.run("[1, 2, 'three', 4]")?;
            let err = Vec::<i32>::from_host(cx, array).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::Conversion(ConversionError::Element { index: 2, .. })
            ));
            Ok(())
        });
    }

    #[test]
    fn non_array_is_rejected() {
        with_cx(|cx: &ExecutionContext| {
            let object = cx.object()?;
            assert!(matches!(
                Vec::<i32>::from_host(cx, object),
                Err(BridgeError::Conversion(ConversionError::TypeMismatch {
                    expected: "array",
                    actual: "object"
                }))
            ));
            Ok(())
        });
    }

    #[test]
    fn conversion_does_not_leak_scopes() {
        with_cx(|cx: &ExecutionContext| {
            let depth = cx.scope_depth();
            let handle = vec![1.0, 2.0, 3.0].to_host(cx)?;
            let _: Vec<f64> = Vec::from_host(cx, handle)?;
            assert_eq!(cx.scope_depth(), depth);
            Ok(())
        });
    }

    #[test]
    fn element_handles_outlive_the_conversion() {
        with_cx(|cx: &ExecutionContext| {
            let array = cx.run("[1, 2]")?;
            let handles: Vec<ValueHandle> = Vec::from_host(cx, array)?;
            assert_eq!(cx.as_number(handles[0])?, 1.0);
            assert_eq!(cx.as_number(handles[1])?, 2.0);

            let optional: Vec<Option<ValueHandle>> = Vec::from_host(cx, cx.run("[null, 3]")?)?;
            assert!(optional[0].is_none());
            assert_eq!(optional[1].map(|h| cx.as_number(h)).transpose()?, Some(3.0));

            let object = cx.object()?;
            cx.set_converted(object, "name", "rect")?;
            let entries: BTreeMap<String, ValueHandle> = BTreeMap::from_host(cx, object)?;
            assert_eq!(cx.as_string(entries["name"])?, "rect");
            Ok(())
        });
    }

    #[test]
    fn maps_roundtrip() {
        with_cx(|cx: &ExecutionContext| {
            let mut map = BTreeMap::new();
            map.insert("width".to_string(), 100);
            map.insert("height".to_string(), 200);
            assert_eq!(roundtrip(cx, &map)?, map);

            let mut hashed: HashMap<String, bool> = HashMap::new();
            hashed.insert("visible".to_string(), true);
            assert_eq!(roundtrip(cx, &hashed)?, hashed);
            Ok(())
        });
    }

    #[test]
    fn map_value_errors_name_the_key() {
        with_cx(|cx: &ExecutionContext| {
            let object = cx.object()?;
            cx.set_converted(object, "ok", &1)?;
            cx.set_converted(object, "bad", "nope")?;
            let err = BTreeMap::<String, i32>::from_host(cx, object).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::Conversion(ConversionError::PropertyTypeMismatch { ref name, .. })
                    if name == "bad"
            ));
            Ok(())
        });
    }

    #[test]
    fn boxed_dyn_to_host() {
        with_cx(|cx: &ExecutionContext| {
            let items: Vec<Box<dyn ToHost>> = vec![Box::new(1), Box::new("two"), Box::new(true)];
            let array = items.to_host(cx)?;
            assert_eq!(cx.array_length(array)?, 3);
            let second = cx.get_index(array, 1)?;
            assert_eq!(cx.as_string(second)?, "two");
            Ok(())
        });
    }
}
