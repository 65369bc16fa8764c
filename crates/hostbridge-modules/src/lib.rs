//! Bundled modules for hostbridge.
//!
//! - **geometry** - `Point`/`Size`/`Rect` conversions and the `Rectangle` class
//! - **example** - `nums`, `str`, `rect` and the async `add`
//! - **capture** - screen-capture argument parsing; capture itself is
//!   unavailable on this platform
//!
//! # Usage
//!
//! ```ignore
//! use hostbridge_modules::default_modules;
//!
//! let mut bridge = Bridge::new(EnvironmentConfig::default())?;
//! for module in default_modules() {
//!     bridge.install(module)?;
//! }
//! ```

pub mod capture;
pub mod example;
pub mod geometry;

pub use geometry::{Point, Rect, Rectangle, Size};

use hostbridge_module::Module;

/// Every bundled module, in load order.
pub fn default_modules() -> Vec<Module> {
    vec![geometry::module(), example::module(), capture::module()]
}
