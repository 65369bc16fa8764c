//! Screen-capture bindings.
//!
//! Capturing needs a platform capture service this build does not link, so
//! every entry point validates its arguments and then fails with
//! `UnsupportedPlatform`. Argument parsing follows the capture service's
//! own precedence rules:
//!
//! * content queries: `onScreenWindowsOnlyAbove` > `onScreenWindowsOnlyBelow`
//!   > `onScreenWindowsOnly` > `includeDesktopWindows`
//! * content filters: `window` > `display`; display filters use
//!   `excludingApplications` > `includingApplications` > `windows` >
//!   `excludingWindows`

use hostbridge_core::{
    BridgeError, BridgeResult, ExecutionContext, FromHost, Instance, NativeClass, ValueHandle, Wrap,
};
use hostbridge_module::{Inspector, Module, Style};

use crate::geometry::{Rect, Size};

const CAPTURE_FEATURE: &str = "screen capture";

// =============================================================================
// CLASSES
// =============================================================================

/// A running application as reported by the capture service.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningApplication {
    pub process_id: i64,
    pub bundle_identifier: String,
    pub application_name: String,
}

impl NativeClass for RunningApplication {
    const NAME: &'static str = "RunningApplication";
}

/// A physical display.
#[derive(Debug, Clone, PartialEq)]
pub struct Display {
    pub display_id: u32,
    pub frame: Rect,
    pub width: i64,
    pub height: i64,
}

impl NativeClass for Display {
    const NAME: &'static str = "Display";
}

/// An on-screen or off-screen window.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub window_id: u32,
    pub frame: Rect,
    pub window_layer: i64,
    pub is_on_screen: bool,
    pub owning_application: Option<RunningApplication>,
}

impl NativeClass for Window {
    const NAME: &'static str = "Window";
}

fn instance_field<T: NativeClass, R>(instance: Option<Instance<T>>, read: impl Fn(&T) -> R) -> BridgeResult<Option<R>> {
    instance.map(|instance| instance.borrow().map(|value| read(&*value))).transpose()
}

fn instance_list<T: NativeClass, R>(list: Option<Vec<Instance<T>>>, read: impl Fn(&T) -> R) -> BridgeResult<Option<Vec<R>>> {
    list.map(|list| {
        list.iter()
            .map(|instance| instance.borrow().map(|value| read(&*value)))
            .collect::<BridgeResult<Vec<_>>>()
    })
    .transpose()
}

// =============================================================================
// CONTENT QUERY
// =============================================================================

/// Which shareable content to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentQuery {
    /// Everything, desktop windows included.
    Everything,
    /// On-screen windows above `window`.
    Above { window: u32, exclude_desktop: bool },
    /// On-screen windows below `window`.
    Below { window: u32, exclude_desktop: bool },
    /// All windows, optionally only those on screen.
    Windows { on_screen_only: bool, exclude_desktop: bool },
}

impl Default for ContentQuery {
    fn default() -> Self {
        ContentQuery::Windows {
            on_screen_only: false,
            exclude_desktop: true,
        }
    }
}

impl FromHost for ContentQuery {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        let reader = cx.reader(value)?;
        let exclude_desktop = !reader.optional_or("includeDesktopWindows", false)?;

        let above = instance_field(reader.optional::<Instance<Window>>("onScreenWindowsOnlyAbove")?, |w: &Window| {
            w.window_id
        })?;
        if let Some(window) = above {
            return Ok(ContentQuery::Above { window, exclude_desktop });
        }

        let below = instance_field(reader.optional::<Instance<Window>>("onScreenWindowsOnlyBelow")?, |w: &Window| {
            w.window_id
        })?;
        if let Some(window) = below {
            return Ok(ContentQuery::Below { window, exclude_desktop });
        }

        if let Some(on_screen_only) = reader.optional::<bool>("onScreenWindowsOnly")? {
            return Ok(ContentQuery::Windows {
                on_screen_only,
                exclude_desktop,
            });
        }

        Ok(if exclude_desktop {
            ContentQuery::default()
        } else {
            ContentQuery::Everything
        })
    }
}

// =============================================================================
// CONTENT FILTER
// =============================================================================

/// Arguments of `createContentFilter`, with windows, displays and
/// applications reduced to their identifiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentFilterArgs {
    pub window: Option<u32>,
    pub include_window_shadow: Option<bool>,
    pub display: Option<u32>,
    pub exclude_menu_bar: Option<bool>,
    pub windows: Option<Vec<u32>>,
    pub excluding_windows: Option<Vec<u32>>,
    pub including_applications: Option<Vec<i64>>,
    pub excluding_applications: Option<Vec<i64>>,
}

/// The filter the capture service would be asked to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterPlan {
    Window {
        window: u32,
        include_shadow: bool,
    },
    ExcludingApplications {
        display: u32,
        applications: Vec<i64>,
        excepting_windows: Vec<u32>,
    },
    IncludingApplications {
        display: u32,
        applications: Vec<i64>,
        excepting_windows: Vec<u32>,
    },
    IncludingWindows {
        display: u32,
        windows: Vec<u32>,
    },
    ExcludingWindows {
        display: u32,
        windows: Vec<u32>,
    },
}

impl ContentFilterArgs {
    pub fn plan(&self) -> BridgeResult<FilterPlan> {
        if let Some(window) = self.window {
            return Ok(FilterPlan::Window {
                window,
                include_shadow: self.include_window_shadow.unwrap_or(false),
            });
        }

        let Some(display) = self.display else {
            return Err(BridgeError::failed("must pass either a window or a display"));
        };
        let windows = self.windows.clone().unwrap_or_default();
        let excluding_windows = self.excluding_windows.clone().unwrap_or_default();

        if let Some(applications) = &self.excluding_applications {
            return Ok(FilterPlan::ExcludingApplications {
                display,
                applications: applications.clone(),
                excepting_windows: windows,
            });
        }
        if let Some(applications) = &self.including_applications {
            return Ok(FilterPlan::IncludingApplications {
                display,
                applications: applications.clone(),
                excepting_windows: excluding_windows,
            });
        }
        if self.windows.is_some() {
            return Ok(FilterPlan::IncludingWindows { display, windows });
        }
        Ok(FilterPlan::ExcludingWindows {
            display,
            windows: excluding_windows,
        })
    }

    /// Whether the menu bar is captured, when the caller chose.
    pub fn include_menu_bar(&self) -> Option<bool> {
        self.exclude_menu_bar.map(|exclude| !exclude)
    }
}

impl FromHost for ContentFilterArgs {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        let reader = cx.reader(value)?;
        let window_id = |w: &Window| w.window_id;
        let process_id = |app: &RunningApplication| app.process_id;
        Ok(Self {
            window: instance_field(reader.optional("window")?, window_id)?,
            include_window_shadow: reader.optional("includeWindowShadow")?,
            display: instance_field(reader.optional("display")?, |d: &Display| d.display_id)?,
            exclude_menu_bar: reader.optional("excludeMenuBar")?,
            windows: instance_list(reader.optional("windows")?, window_id)?,
            excluding_windows: instance_list(reader.optional("excludingWindows")?, window_id)?,
            including_applications: instance_list(reader.optional("includingApplications")?, process_id)?,
            excluding_applications: instance_list(reader.optional("excludingApplications")?, process_id)?,
        })
    }
}

// =============================================================================
// MODULE
// =============================================================================

fn inspect_display(display: &Display, inspector: &Inspector) -> BridgeResult<String> {
    Ok(format!(
        "{} {{ displayID: {} {}x{} }}",
        inspector.stylize(Display::NAME, Style::Special),
        inspector.number(f64::from(display.display_id)),
        inspector.number(display.width as f64),
        inspector.number(display.height as f64),
    ))
}

pub fn module() -> Module {
    let mut module = Module::new("capture");

    module
        .class::<RunningApplication>()
        .property("processID", |app: &RunningApplication| app.process_id)
        .property("bundleIdentifier", |app: &RunningApplication| app.bundle_identifier.clone())
        .property("applicationName", |app: &RunningApplication| app.application_name.clone())
        .inspect_fields(&["applicationName", "bundleIdentifier", "processID"])
        .build();

    module
        .class::<Display>()
        .property("displayID", |d: &Display| d.display_id)
        .property("frame", |d: &Display| d.frame)
        .property("width", |d: &Display| d.width)
        .property("height", |d: &Display| d.height)
        .inspect_with(inspect_display)
        .build();

    module
        .class::<Window>()
        .property("windowID", |w: &Window| w.window_id)
        .property("frame", |w: &Window| w.frame)
        .property("windowLayer", |w: &Window| w.window_layer)
        .property("isOnScreen", |w: &Window| w.is_on_screen)
        .property("owningApplication", |w: &Window| w.owning_application.clone().map(Wrap::new))
        .method("size", |w: &Window| -> BridgeResult<Size> { Ok(w.frame.size) })
        .inspect_fields(&["windowID", "owningApplication", "frame"])
        .build();

    module
        .function_async("getSharableContent", |query: Option<ContentQuery>| async move {
            let query = query.unwrap_or_default();
            tracing::debug!(?query, "shareable content requested");
            Err::<(), _>(BridgeError::unsupported(CAPTURE_FEATURE))
        })
        .function("createStreamConfiguration", || -> BridgeResult<()> {
            Err(BridgeError::unsupported(CAPTURE_FEATURE))
        })
        .function("createContentFilter", |args: ContentFilterArgs| -> BridgeResult<()> {
            let plan = args.plan()?;
            tracing::debug!(?plan, "content filter requested");
            Err(BridgeError::unsupported(CAPTURE_FEATURE))
        })
        .function_async("captureImage", |args: ContentFilterArgs| async move {
            let plan = args.plan()?;
            tracing::debug!(?plan, "image capture requested");
            Err::<(), _>(BridgeError::unsupported(CAPTURE_FEATURE))
        });

    module
}
