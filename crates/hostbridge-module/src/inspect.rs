//! Rendering host values for tooling, with per-class inspection hooks.
//!
//! [`inspect`] renders any host value in the familiar `{ a: 1 }` /
//! `[ 1, 2 ]` / `Name { ... }` form. An object whose prototype chain has a
//! method under the global `nodejs.util.inspect.custom` symbol renders as
//! whatever that method returns; the method receives one argument, a bound
//! [`Inspector`] instance exposing `stylize(text, style)` and
//! `inspect(value)`.

use std::fmt::Write as _;

use hostbridge_core::host::{HostValue, ObjectId, number_to_string};
use hostbridge_core::{
    BridgeResult, CallContext, ExecutionContext, InspectOptions, NameKey, NativeClass, PromiseState, ToHost,
    ValueHandle, ValueType, Wrap,
};

use crate::builtins::ensure_builtin_classes;
use crate::class_builder::{ClassBuilder, ClassDescriptor};

/// Style names understood by `stylize`, with their ANSI open/close codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Style {
    Special,
    Number,
    BigInt,
    Boolean,
    Undefined,
    Null,
    String,
    Symbol,
    Date,
    RegExp,
    Module,
    Name,
}

impl Style {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "special" => Style::Special,
            "number" => Style::Number,
            "bigint" => Style::BigInt,
            "boolean" => Style::Boolean,
            "undefined" => Style::Undefined,
            "null" => Style::Null,
            "string" => Style::String,
            "symbol" => Style::Symbol,
            "date" => Style::Date,
            "regexp" => Style::RegExp,
            "module" => Style::Module,
            "name" => Style::Name,
            _ => return None,
        })
    }

    fn ansi(self) -> Option<(u8, u8)> {
        match self {
            Style::Special => Some((36, 39)),
            Style::Number | Style::BigInt | Style::Boolean => Some((33, 39)),
            Style::Undefined => Some((90, 39)),
            Style::Null => Some((1, 22)),
            Style::String | Style::Symbol => Some((32, 39)),
            Style::Date => Some((35, 39)),
            Style::RegExp => Some((31, 39)),
            Style::Module => Some((4, 24)),
            Style::Name => None,
        }
    }
}

/// Rendering state handed to inspection hooks.
///
/// `depth` is the nesting level of values rendered through this inspector;
/// `seen` holds the objects currently being rendered, outermost first.
#[derive(Clone, Debug)]
pub struct Inspector {
    options: InspectOptions,
    depth: u32,
    seen: Vec<ObjectId>,
}

impl NativeClass for Inspector {
    const NAME: &'static str = "Inspector";
}

impl Inspector {
    pub fn new(options: InspectOptions) -> Self {
        Self {
            options,
            depth: 0,
            seen: Vec::new(),
        }
    }

    pub fn options(&self) -> InspectOptions {
        self.options
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Wrap `text` in the colour sequence for `style` when colours are on.
    pub fn stylize(&self, text: &str, style: Style) -> String {
        match style.ansi() {
            Some((open, close)) if self.options.colors => format!("\u{1b}[{open}m{text}\u{1b}[{close}m"),
            _ => text.to_string(),
        }
    }

    pub fn number(&self, value: f64) -> String {
        self.stylize(&format_number(value), Style::Number)
    }

    pub fn boolean(&self, value: bool) -> String {
        self.stylize(if value { "true" } else { "false" }, Style::Boolean)
    }

    /// A quoted, stylized string literal.
    pub fn string(&self, value: &str) -> String {
        self.stylize(&quote(value), Style::String)
    }

    /// Render `value` at this inspector's depth.
    pub fn render(&self, cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<String> {
        let mut seen = self.seen.clone();
        cx.scope(|cx: &ExecutionContext| self.render_at(cx, value, self.depth, &mut seen))
    }

    fn child(&self, depth: u32, seen: &[ObjectId]) -> Self {
        Self {
            options: self.options,
            depth,
            seen: seen.to_vec(),
        }
    }

    fn render_at(
        &self,
        cx: &ExecutionContext,
        value: ValueHandle,
        depth: u32,
        seen: &mut Vec<ObjectId>,
    ) -> BridgeResult<String> {
        let id = match cx.value(value)? {
            HostValue::Undefined => return Ok(self.stylize("undefined", Style::Undefined)),
            HostValue::Null => return Ok(self.stylize("null", Style::Null)),
            HostValue::Bool(b) => return Ok(self.boolean(b)),
            HostValue::Number(n) => return Ok(self.number(n)),
            HostValue::String(s) => return Ok(self.string(&s)),
            HostValue::Symbol(_) => {
                let description = cx.symbol_description(value)?.unwrap_or_default();
                return Ok(self.stylize(&format!("Symbol({description})"), Style::Symbol));
            }
            HostValue::Object(id) => id,
        };

        if seen.contains(&id) {
            return Ok(self.stylize("[Circular]", Style::Special));
        }

        if cx.value_type(value)? == ValueType::Function {
            let name = cx.function_name(value)?.filter(|name| !name.is_empty());
            let text = match (cx.is_constructor(value)?, name) {
                (true, Some(name)) => format!("[class {name}]"),
                (false, Some(name)) => format!("[Function: {name}]"),
                (_, None) => "[Function (anonymous)]".to_string(),
            };
            return Ok(self.stylize(&text, Style::Special));
        }

        if let Some(rendered) = self.call_hook(cx, value, id, depth, seen)? {
            return Ok(rendered);
        }

        let is_array = cx.is_array(value)?;
        let class = match cx.class_name_of(value)? {
            Some(name) => Some(name.to_string()),
            None => cx.constructor_name(value)?,
        };

        if depth > self.options.depth {
            let label = match (&class, is_array) {
                (_, true) => "[Array]".to_string(),
                (Some(name), false) => format!("[{name}]"),
                (None, false) => "[Object]".to_string(),
            };
            return Ok(self.stylize(&label, Style::Special));
        }

        if cx.is_error(value)? {
            let name = cx.get(value, "name")?;
            let message = cx.get(value, "message")?;
            return Ok(format!(
                "[{}: {}]",
                cx.as_string(name).unwrap_or_else(|_| "Error".to_string()),
                cx.as_string(message).unwrap_or_default()
            ));
        }

        seen.push(id);
        let result = self.render_container(cx, value, depth, seen, is_array, class);
        seen.pop();
        result
    }

    fn render_container(
        &self,
        cx: &ExecutionContext,
        value: ValueHandle,
        depth: u32,
        seen: &mut Vec<ObjectId>,
        is_array: bool,
        class: Option<String>,
    ) -> BridgeResult<String> {
        if cx.is_promise(value)? {
            let inner = match cx.promise_state(value)? {
                PromiseState::Pending => self.stylize("<pending>", Style::Special),
                PromiseState::Fulfilled(result) => self.render_at(cx, result, depth + 1, seen)?,
                PromiseState::Rejected(reason) => format!(
                    "{} {}",
                    self.stylize("<rejected>", Style::Special),
                    self.render_at(cx, reason, depth + 1, seen)?
                ),
            };
            return Ok(format!("Promise {{ {inner} }}"));
        }

        if is_array {
            let length = cx.array_length(value)?;
            if length == 0 {
                return Ok("[]".to_string());
            }
            let mut items = Vec::with_capacity(length);
            for index in 0..length {
                let element = cx.get_index(value, index)?;
                items.push(self.render_at(cx, element, depth + 1, seen)?);
            }
            return Ok(format!("[ {} ]", items.join(", ")));
        }

        let mut entries = Vec::new();
        for key in cx.own_keys(value)? {
            let field = cx.get(value, &key)?;
            let rendered = self.render_at(cx, field, depth + 1, seen)?;
            entries.push(format!("{}: {rendered}", format_key(&key)));
        }

        let prefix = match class.as_deref() {
            Some("Object") | None => String::new(),
            Some(name) => format!("{name} "),
        };
        if entries.is_empty() {
            Ok(format!("{prefix}{{}}"))
        } else {
            Ok(format!("{prefix}{{ {} }}", entries.join(", ")))
        }
    }

    fn call_hook(
        &self,
        cx: &ExecutionContext,
        value: ValueHandle,
        id: ObjectId,
        depth: u32,
        seen: &mut Vec<ObjectId>,
    ) -> BridgeResult<Option<String>> {
        let hook = cx.get(value, NameKey::inspect_custom(cx)?)?;
        if !cx.is_callable(hook)? {
            return Ok(None);
        }
        ensure_builtin_classes(cx)?;
        let mut path = seen.clone();
        path.push(id);
        let inspector = Wrap::new(self.child(depth + 1, &path)).to_host(cx)?;
        let result = cx.call(hook, value, &[inspector])?;
        match cx.value(result)? {
            HostValue::String(text) => Ok(Some(text.to_string())),
            _ if cx.strict_equals(result, value)? => Ok(None),
            _ => self.render_at(cx, result, depth, seen).map(Some),
        }
    }
}

/// Render `value` with the environment's default inspect options.
pub fn inspect(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<String> {
    inspect_with(cx, value, cx.config().inspect())
}

pub fn inspect_with(cx: &ExecutionContext, value: ValueHandle, options: InspectOptions) -> BridgeResult<String> {
    Inspector::new(options).render(cx, value)
}

fn format_number(value: f64) -> String {
    if value == 0.0 && value.is_sign_negative() {
        "-0".to_string()
    } else {
        number_to_string(value)
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn format_key(key: &NameKey) -> String {
    match key.as_str() {
        Some(name) if is_identifier(name) => name.to_string(),
        Some(name) => quote(name),
        None => format!("[{key}]"),
    }
}

/// Host class descriptor for [`Inspector`].
pub(crate) fn inspector_class() -> ClassDescriptor<Inspector> {
    ClassBuilder::<Inspector>::new()
        .method_raw("stylize", |call: &mut CallContext<'_>| {
            let text: String = call.arg(0)?;
            let style: String = call.arg(1)?;
            let inspector = call.this_payload::<Inspector>()?;
            let styled = match Style::from_name(&style) {
                Some(style) => inspector.borrow().stylize(&text, style),
                None => text,
            };
            call.set_return_value(&styled)
        })
        .method_raw("inspect", |call: &mut CallContext<'_>| {
            let value = call.arg_handle(0)?;
            let inspector = call.this_payload::<Inspector>()?.borrow().clone();
            let rendered = inspector.render(call.context(), value)?;
            call.set_return_value(&rendered)
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_core::{Environment, EnvironmentConfig, ObjectBuilder, PropertyFlags};
    use hostbridge_core::NativeFn;

    fn with_cx(f: impl FnOnce(&ExecutionContext) -> BridgeResult<()>) {
        let env = Environment::new(EnvironmentConfig::default()).unwrap();
        env.enter(f).unwrap();
    }

    // ========================================================================
    // Generic rendering
    // ========================================================================

    #[test]
    fn renders_primitives() {
        with_cx(|cx: &ExecutionContext| {
            assert_eq!(inspect(cx, cx.number(1.5)?)?, "1.5");
            assert_eq!(inspect(cx, cx.number(-0.0)?)?, "-0");
            assert_eq!(inspect(cx, cx.string("it's")?)?, "'it\\'s'");
            assert_eq!(inspect(cx, cx.undefined()?)?, "undefined");
            assert_eq!(inspect(cx, cx.null()?)?, "null");
            assert_eq!(inspect(cx, cx.symbol(Some("tag"))?)?, "Symbol(tag)");
            Ok(())
        });
    }

    #[test]
    fn renders_objects_and_arrays() {
        with_cx(|cx: &ExecutionContext| {
            let list = vec![1, 2].to_host(cx)?;
            let object = ObjectBuilder::new(cx)?
                .field("a", &1)?
                .field("list", &list)?
                .field("odd-key", "x")?
                .finish();
            assert_eq!(inspect(cx, object)?, "{ a: 1, list: [ 1, 2 ], 'odd-key': 'x' }");
            assert_eq!(inspect(cx, cx.object()?)?, "{}");
            assert_eq!(inspect(cx, cx.array(&[])?)?, "[]");
            Ok(())
        });
    }

    #[test]
    fn renders_functions() {
        with_cx(|cx: &ExecutionContext| {
            let f = cx.function("f", NativeFn::new(|_: &mut CallContext<'_>| Ok(())))?;
            assert_eq!(inspect(cx, f)?, "[Function: f]");
            let ctor = cx.constructor("Thing", NativeFn::new(|_: &mut CallContext<'_>| Ok(())))?;
            assert_eq!(inspect(cx, ctor)?, "[class Thing]");
            Ok(())
        });
    }

    #[test]
    fn detects_cycles() {
        with_cx(|cx: &ExecutionContext| {
            let object = cx.object()?;
            cx.set(object, "me", object)?;
            assert_eq!(inspect(cx, object)?, "{ me: [Circular] }");
            Ok(())
        });
    }

    #[test]
    fn depth_limit_collapses_objects() {
        with_cx(|cx: &ExecutionContext| {
            let inner = ObjectBuilder::new(cx)?.field("deep", &true)?.finish();
            let middle = ObjectBuilder::new(cx)?.field("inner", &inner)?.finish();
            let outer = ObjectBuilder::new(cx)?.field("middle", &middle)?.finish();
            let options = InspectOptions::new().with_depth(1);
            assert_eq!(inspect_with(cx, outer, options)?, "{ middle: { inner: [Object] } }");
            Ok(())
        });
    }

    #[test]
    fn colours_only_when_enabled() {
        with_cx(|cx: &ExecutionContext| {
            let n = cx.number(7.0)?;
            assert_eq!(inspect_with(cx, n, InspectOptions::new().with_colors(true))?, "\u{1b}[33m7\u{1b}[39m");
            assert_eq!(inspect_with(cx, n, InspectOptions::new())?, "7");
            Ok(())
        });
    }

    // ========================================================================
    // Hooks
    // ========================================================================

    #[test]
    fn custom_hook_receives_inspector() {
        with_cx(|cx: &ExecutionContext| {
            let object = cx.object()?;
            let hook = cx.function(
                "hook",
                NativeFn::new(|call: &mut CallContext<'_>| {
                    let cx = call.context();
                    let inspector = call.arg_handle(0)?;
                    let text = cx.string("custom")?;
                    let style = cx.string("special")?;
                    let styled = cx.call_method(inspector, "stylize", &[text, style])?;
                    call.set_return(styled);
                    Ok(())
                }),
            )?;
            cx.define_value(object, NameKey::inspect_custom(cx)?, hook, PropertyFlags::HIDDEN)?;
            assert_eq!(inspect(cx, object)?, "custom");

            let wrapper = ObjectBuilder::new(cx)?.field("inner", &object)?.finish();
            assert_eq!(inspect(cx, wrapper)?, "{ inner: custom }");
            Ok(())
        });
    }

    #[test]
    fn hook_can_recurse_through_inspector() {
        with_cx(|cx: &ExecutionContext| {
            let object = ObjectBuilder::new(cx)?.field("n", &5)?.finish();
            let hook = cx.function(
                "hook",
                NativeFn::new(|call: &mut CallContext<'_>| {
                    let cx = call.context();
                    let inspector = call.arg_handle(0)?;
                    let n = cx.get(call.this(), "n")?;
                    let rendered = cx.call_method(inspector, "inspect", &[n])?;
                    let text = format!("<n={}>", cx.as_string(rendered)?);
                    call.set_return_value(&text)
                }),
            )?;
            cx.define_value(object, NameKey::inspect_custom(cx)?, hook, PropertyFlags::HIDDEN)?;
            assert_eq!(inspect(cx, object)?, "<n=5>");
            Ok(())
        });
    }

    #[test]
    fn style_names() {
        assert_eq!(Style::from_name("number"), Some(Style::Number));
        assert_eq!(Style::from_name("nope"), None);
        let inspector = Inspector::new(InspectOptions::new().with_colors(true));
        assert_eq!(inspector.stylize("x", Style::Name), "x");
        assert_eq!(inspector.stylize("x", Style::Null), "\u{1b}[1mx\u{1b}[22m");
    }
}
