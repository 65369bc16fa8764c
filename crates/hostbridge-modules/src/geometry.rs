//! Geometry value types and the `Rectangle` class.
//!
//! `Point`, `Size` and `Rect` travel as plain host objects
//! (`{ x, y }`, `{ width, height }`, `{ origin, size }`). `Rectangle` is a
//! bound class with mutable dimensions.

use hostbridge_core::{
    BridgeError, BridgeResult, ExecutionContext, FromHost, HostException, NativeClass, ObjectBuilder, ToHost,
    ValueHandle, Wrap,
};
use hostbridge_module::Module;

// =============================================================================
// VALUE TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            width: self.width * factor,
            height: self.height * factor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            origin: Point { x, y },
            size: Size { width, height },
        }
    }
}

impl ToHost for Point {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        Ok(ObjectBuilder::new(cx)?.field("x", &self.x)?.field("y", &self.y)?.finish())
    }
}

impl FromHost for Point {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        let reader = cx.reader(value)?;
        Ok(Self {
            x: reader.required("x")?,
            y: reader.required("y")?,
        })
    }
}

impl ToHost for Size {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        Ok(ObjectBuilder::new(cx)?
            .field("width", &self.width)?
            .field("height", &self.height)?
            .finish())
    }
}

impl FromHost for Size {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        let reader = cx.reader(value)?;
        Ok(Self {
            width: reader.required("width")?,
            height: reader.required("height")?,
        })
    }
}

impl ToHost for Rect {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        Ok(ObjectBuilder::new(cx)?
            .field("origin", &self.origin)?
            .field("size", &self.size)?
            .finish())
    }
}

impl FromHost for Rect {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        let reader = cx.reader(value)?;
        Ok(Self {
            origin: reader.required("origin")?,
            size: reader.required("size")?,
        })
    }
}

// =============================================================================
// RECTANGLE CLASS
// =============================================================================

/// A sized rectangle with non-negative dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    width: f64,
    height: f64,
}

impl NativeClass for Rectangle {
    const NAME: &'static str = "Rectangle";
}

fn dimension(name: &str, value: f64) -> BridgeResult<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(BridgeError::Thrown(HostException::range_error(format!(
            "{name} must be a finite, non-negative number"
        ))))
    }
}

impl Rectangle {
    pub fn new(width: f64, height: f64) -> BridgeResult<Self> {
        Ok(Self {
            width: dimension("width", width)?,
            height: dimension("height", height)?,
        })
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn set_width(&mut self, width: f64) -> BridgeResult<()> {
        self.width = dimension("width", width)?;
        Ok(())
    }

    pub fn set_height(&mut self, height: f64) -> BridgeResult<()> {
        self.height = dimension("height", height)?;
        Ok(())
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn scaled(&self, factor: f64) -> BridgeResult<Self> {
        dimension("factor", factor)?;
        Ok(Self {
            width: self.width * factor,
            height: self.height * factor,
        })
    }

    /// The rectangle placed at the origin.
    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }
}

/// Register the `Rectangle` class on `module`.
pub fn register_rectangle(module: &mut Module) {
    module
        .class::<Rectangle>()
        .constructor(|width: f64, height: f64| -> BridgeResult<Rectangle> { Rectangle::new(width, height) })
        .property_rw("width", Rectangle::width, Rectangle::set_width)
        .property_rw("height", Rectangle::height, Rectangle::set_height)
        .property("bounds", Rectangle::bounds)
        .method("area", |r: &Rectangle| -> BridgeResult<f64> { Ok(r.area()) })
        .method("scaled", |r: &Rectangle, factor: f64| -> BridgeResult<Wrap<Rectangle>> {
            Ok(Wrap::new(r.scaled(factor)?))
        })
        .static_method("fromSize", |size: Size| -> BridgeResult<Wrap<Rectangle>> {
            Ok(Wrap::new(Rectangle::new(size.width, size.height)?))
        })
        .inspect_fields(&["width", "height"])
        .build();
}

/// The `geometry` module: the `Rectangle` class plus `rectFromSize`.
pub fn module() -> Module {
    let mut module = Module::new("geometry");
    register_rectangle(&mut module);
    module.function("rectFromSize", |size: Size| -> BridgeResult<Rect> {
        Ok(Rect { origin: Point::default(), size })
    });
    module
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_core::{ConversionError, Environment, EnvironmentConfig, Instance};
    use hostbridge_module::inspect;

    fn with_geometry(f: impl FnOnce(&ExecutionContext, ValueHandle) -> BridgeResult<()>) {
        let env = Environment::new(EnvironmentConfig::default()).unwrap();
        env.enter(|cx: &ExecutionContext| {
            let exports = module().load(cx)?;
            f(cx, exports)
        })
        .unwrap();
    }

    fn rectangle(cx: &ExecutionContext, exports: ValueHandle, width: f64, height: f64) -> BridgeResult<ValueHandle> {
        let ctor = cx.get(exports, "Rectangle")?;
        let args = [cx.number(width)?, cx.number(height)?];
        cx.construct(ctor, &args)
    }

    // ========================================================================
    // Value types
    // ========================================================================

    #[test]
    fn rect_converts_through_nested_objects() {
        with_geometry(|cx: &ExecutionContext, _| {
            let rect = Rect::new(1.0, 2.0, 3.0, 4.0);
            let handle = rect.to_host(cx)?;
            let size = cx.get(handle, "size")?;
            assert_eq!(cx.as_number(cx.get(size, "height")?)?, 4.0);
            assert_eq!(Rect::from_host(cx, handle)?, rect);
            Ok(())
        });
    }

    #[test]
    fn nested_property_error_names_the_path() {
        with_geometry(|cx: &ExecutionContext, _| {
            let origin = ObjectBuilder::new(cx)?.field("x", &0.0)?.field("y", "up")?.finish();
            let rect = ObjectBuilder::new(cx)?
                .field("origin", &origin)?
                .field("size", &Size::default())?
                .finish();
            let err = Rect::from_host(cx, rect).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::Conversion(ConversionError::PropertyTypeMismatch { ref name, .. }) if name == "origin.y"
            ));
            Ok(())
        });
    }

    #[test]
    fn missing_property_is_reported() {
        with_geometry(|cx: &ExecutionContext, _| {
            let partial = ObjectBuilder::new(cx)?.field("width", &1.0)?.finish();
            assert!(matches!(
                Size::from_host(cx, partial),
                Err(BridgeError::Conversion(ConversionError::MissingProperty { name })) if name == "height"
            ));
            Ok(())
        });
    }

    // ========================================================================
    // Rectangle
    // ========================================================================

    #[test]
    fn rectangle_inspects_its_dimensions() {
        with_geometry(|cx: &ExecutionContext, exports| {
            let rect = rectangle(cx, exports, 100.0, 200.0)?;
            let text = inspect(cx, rect)?;
            assert_eq!(text, "Rectangle { width: 100, height: 200 }");
            assert!(text.contains("100") && text.contains("200"));
            Ok(())
        });
    }

    #[test]
    fn rectangle_properties_and_methods() {
        with_geometry(|cx: &ExecutionContext, exports| {
            let rect = rectangle(cx, exports, 3.0, 4.0)?;
            assert_eq!(cx.as_number(cx.call_method(rect, "area", &[])?)?, 12.0);

            let width = cx.number(5.0)?;
            cx.set(rect, "width", width)?;
            assert_eq!(cx.as_number(cx.call_method(rect, "area", &[])?)?, 20.0);

            let bounds: Rect = cx.reader(rect)?.required("bounds")?;
            assert_eq!(bounds, Rect::new(0.0, 0.0, 5.0, 4.0));
            Ok(())
        });
    }

    #[test]
    fn scaled_returns_a_new_instance() {
        with_geometry(|cx: &ExecutionContext, exports| {
            let rect = rectangle(cx, exports, 2.0, 3.0)?;
            let factor = cx.number(2.0)?;
            let bigger = cx.call_method(rect, "scaled", &[factor])?;
            assert!(!cx.strict_equals(rect, bigger)?);

            let bigger = Instance::<Rectangle>::from_host(cx, bigger)?;
            assert_eq!(*bigger.borrow()?, Rectangle::new(4.0, 6.0)?);
            let original = Instance::<Rectangle>::from_host(cx, rect)?;
            assert_eq!(original.borrow()?.area(), 6.0);
            Ok(())
        });
    }

    #[test]
    fn negative_width_is_rejected() {
        with_geometry(|cx: &ExecutionContext, exports| {
            assert!(matches!(
                rectangle(cx, exports, -1.0, 2.0),
                Err(BridgeError::Construction { class, .. }) if class == "Rectangle"
            ));

            let rect = rectangle(cx, exports, 1.0, 2.0)?;
            let negative = cx.number(-3.0)?;
            assert!(matches!(cx.set(rect, "height", negative), Err(BridgeError::Thrown(_))));
            assert_eq!(Instance::<Rectangle>::from_host(cx, rect)?.borrow()?.height(), 2.0);
            Ok(())
        });
    }

    #[test]
    fn static_constructor_from_size() {
        with_geometry(|cx: &ExecutionContext, exports| {
            let ctor = cx.get(exports, "Rectangle")?;
            let size = Size { width: 7.0, height: 2.0 }.to_host(cx)?;
            let rect = cx.call_method(ctor, "fromSize", &[size])?;
            assert_eq!(cx.class_name_of(rect)?, Some("Rectangle"));
            assert_eq!(cx.as_number(cx.get(rect, "width")?)?, 7.0);
            Ok(())
        });
    }

    #[test]
    fn rect_from_size_builds_plain_object() {
        with_geometry(|cx: &ExecutionContext, exports| {
            let size = Size { width: 100.0, height: 200.0 }.to_host(cx)?;
            let rect = cx.call_method(exports, "rectFromSize", &[size])?;
            assert_eq!(
                inspect(cx, rect)?,
                "{ origin: { x: 0, y: 0 }, size: { width: 100, height: 200 } }"
            );
            Ok(())
        });
    }
}
