//! Conversion protocol, handle scopes, symbols and iteration across the
//! whole stack.

use std::collections::BTreeMap;

use hostbridge::prelude::*;
use hostbridge_modules::{Rect, Size};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn with_env(f: impl FnOnce(&ExecutionContext) -> BridgeResult<()>) {
    init_tracing();
    let env = Environment::new(EnvironmentConfig::default()).unwrap();
    env.enter(f).unwrap();
}

fn round_trip<T: ToHost + FromHost>(cx: &ExecutionContext, value: &T) -> BridgeResult<T> {
    let handle = value.to_host(cx)?;
    T::from_host(cx, handle)
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn native_values_round_trip() {
    with_env(|cx: &ExecutionContext| {
        assert_eq!(round_trip(cx, &-17i32)?, -17);
        assert_eq!(round_trip(cx, &u64::from(u32::MAX))?, u64::from(u32::MAX));
        assert_eq!(round_trip(cx, &0.25f64)?, 0.25);
        assert_eq!(round_trip(cx, &"héllo".to_string())?, "héllo");
        assert_eq!(round_trip(cx, &Some(true))?, Some(true));
        assert_eq!(round_trip(cx, &None::<String>)?, None);
        assert_eq!(round_trip(cx, &vec![vec![1u8], vec![2, 3]])?, vec![vec![1u8], vec![2, 3]]);

        let mut map = BTreeMap::new();
        map.insert("a".to_string(), 1.0);
        map.insert("b".to_string(), 2.0);
        assert_eq!(round_trip(cx, &map)?, map);

        let rect = Rect::new(1.0, -2.0, 30.0, 40.0);
        assert_eq!(round_trip(cx, &rect)?, rect);
        Ok(())
    });
}

#[test]
fn numbers_are_checked_against_the_target() {
    with_env(|cx: &ExecutionContext| {
        let big = cx.number(300.0)?;
        assert!(matches!(
            u8::from_host(cx, big),
            Err(BridgeError::Conversion(ConversionError::IntegerOverflow { target_type: "u8", .. }))
        ));

        let fraction = cx.number(1.5)?;
        assert!(matches!(
            i32::from_host(cx, fraction),
            Err(BridgeError::Conversion(ConversionError::NotAnInteger { .. }))
        ));

        let text = cx.string("12")?;
        assert!(matches!(
            f64::from_host(cx, text),
            Err(BridgeError::Conversion(ConversionError::TypeMismatch { expected: "number", actual: "string" }))
        ));
        Ok(())
    });
}

// ============================================================================
// Property errors
// ============================================================================

#[test]
fn property_errors_name_the_failing_path() {
    with_env(|cx: &ExecutionContext| {
        let size = ObjectBuilder::new(cx)?.field("width", &1.0)?.finish();
        let rect = ObjectBuilder::new(cx)?
            .field("origin", &hostbridge_modules::Point::default())?
            .field("size", &size)?
            .finish();
        assert!(matches!(
            Rect::from_host(cx, rect),
            Err(BridgeError::Conversion(ConversionError::MissingProperty { name })) if name == "size.height"
        ));

        let wrong = ObjectBuilder::new(cx)?.field("width", &true)?.field("height", &2.0)?.finish();
        let err = Size::from_host(cx, wrong).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Conversion(ConversionError::PropertyTypeMismatch { ref name, expected: "number", actual: "boolean" })
                if name == "width"
        ));
        assert_eq!(err.to_string(), "property 'width': expected number, got boolean");
        Ok(())
    });
}

#[test]
fn element_errors_carry_the_index() {
    with_env(|cx: &ExecutionContext| {
        let elements = [cx.number(1.0)?, cx.number(2.0)?, cx.null()?];
        let array = cx.array(&elements)?;
        assert!(matches!(
            Vec::<f64>::from_host(cx, array),
            Err(BridgeError::Conversion(ConversionError::Element { index: 2, .. }))
        ));
        Ok(())
    });
}

// ============================================================================
// Scopes and persistents
// ============================================================================

#[test]
fn handles_die_with_their_scope() {
    with_env(|cx: &ExecutionContext| {
        let (leaked, kept) = cx.scope(|inner: &ExecutionContext| -> BridgeResult<_> {
            let value = inner.string("scoped")?;
            Ok((value, inner.persist(value)?))
        })?;
        assert!(matches!(cx.value(leaked), Err(BridgeError::StaleHandle)));

        let revived = kept.get(cx)?;
        assert_eq!(cx.as_string(revived)?, "scoped");
        Ok(())
    });
}

#[test]
fn handles_do_not_cross_environments() {
    init_tracing();
    let first = Environment::new(EnvironmentConfig::default()).unwrap();
    let second = Environment::new(EnvironmentConfig::default()).unwrap();

    let persistent = first.enter(|cx: &ExecutionContext| cx.persist(cx.number(1.0)?)).unwrap();
    second
        .enter(|cx: &ExecutionContext| {
            assert!(matches!(persistent.get(cx), Err(BridgeError::ForeignHandle)));
            Ok(())
        })
        .unwrap();
}

#[test]
fn context_is_only_available_inside_enter() {
    init_tracing();
    assert!(matches!(ExecutionContext::current(), Err(BridgeError::NoActiveContext)));
    let env = Environment::new(EnvironmentConfig::default()).unwrap();
    env.enter(|_cx: &ExecutionContext| {
        assert!(ExecutionContext::current().is_ok());
        Ok(())
    })
    .unwrap();
    assert!(matches!(ExecutionContext::current(), Err(BridgeError::NoActiveContext)));
}

// ============================================================================
// Symbols
// ============================================================================

#[test]
fn global_symbols_are_identical() {
    with_env(|cx: &ExecutionContext| {
        let first = NameKey::global(cx, "app.tag")?;
        let second = NameKey::global(cx, "app.tag")?;
        assert_eq!(first, second);
        assert_ne!(first, NameKey::fresh(cx, Some("app.tag"))?);

        let object = cx.object()?;
        let value = cx.string("tagged")?;
        cx.set(object, &first, value)?;
        assert_eq!(cx.as_string(cx.get(object, &second)?)?, "tagged");

        let via_host = cx.run("Symbol.for('app.tag')")?;
        assert_eq!(NameKey::from_host(cx, via_host)?, first);
        Ok(())
    });
}

#[test]
fn well_known_iterator_symbol_is_stable() {
    with_env(|cx: &ExecutionContext| {
        assert_eq!(NameKey::iterator(cx), NameKey::iterator(cx));
        assert!(NameKey::try_well_known(cx, "noSuchSymbol").is_err());
        Ok(())
    });
}

// ============================================================================
// Iteration
// ============================================================================

#[test]
fn iterator_yields_one_then_two_then_stays_done() {
    with_env(|cx: &ExecutionContext| {
        let iterator = vec![1, 2].host_iterator(cx)?;
        let mut steps = Vec::new();
        let mut has_value = Vec::new();
        for _ in 0..4 {
            let result = cx.call_method(iterator, "next", &[])?;
            has_value.push(cx.has_own(result, "value")?);
            steps.push(IteratorStep::<i32>::from_host(cx, result)?);
        }
        assert_eq!(
            steps,
            vec![
                IteratorStep { value: Some(1), done: false },
                IteratorStep { value: Some(2), done: false },
                IteratorStep { value: None, done: true },
                IteratorStep { value: None, done: true },
            ]
        );
        assert_eq!(has_value, vec![true, true, false, false]);
        Ok(())
    });
}

#[test]
fn host_iterables_collect_into_native_vectors() {
    with_env(|cx: &ExecutionContext| {
        let words = ["alpha", "beta", "gamma"].map(String::from);
        let iterator = words.clone().host_iterator(cx)?;
        let collected: Vec<String> = collect_iterable(cx, iterator)?;
        assert_eq!(collected, words);
        Ok(())
    });
}
