//! The `example` module: a handful of exports covering each conversion path.

use hostbridge_core::host::number_to_string;
use hostbridge_core::BridgeError;
use hostbridge_module::Module;

use crate::geometry::Rect;

/// `"NodeSwift! "` repeated three times.
pub fn greeting() -> String {
    "NodeSwift! ".repeat(3)
}

/// `"a + b = c"`, numbers formatted the way the host prints them.
pub fn describe_sum(a: f64, b: f64) -> String {
    format!(
        "{} + {} = {}",
        number_to_string(a),
        number_to_string(b),
        number_to_string(a + b)
    )
}

pub fn module() -> Module {
    let pi = std::f64::consts::PI;
    let mut module = Module::new("example");
    module
        .export("nums", vec![pi.floor(), pi.ceil()])
        .export("str", greeting())
        .export("rect", Rect::new(0.0, 0.0, 100.0, 200.0))
        .function_async("add", |a: f64, b: f64| async move {
            tracing::debug!(a, b, "calculating");
            Ok::<_, BridgeError>(describe_sum(a, b))
        });
    module
}
