//! Error types for the bridge.
//!
//! Two layers, mirroring the two directions values travel:
//!
//! ```text
//! BridgeError (everything a bridge operation can report)
//! ├── Conversion(ConversionError) - FromHost failures, with property/element paths
//! ├── Thrown(HostException)       - an exception raised inside the host
//! └── context, handle, class and async failures
//! ```
//!
//! Every native failure reaching a host caller is turned into a catchable
//! host exception through [`BridgeError::to_exception`].

use std::fmt;

use thiserror::Error;

// ============================================================================
// Conversion Errors
// ============================================================================

/// Errors raised while converting a host value into a native value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    /// The host value had the wrong dynamic type.
    #[error("expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// A required property was absent or `undefined`.
    #[error("missing required property '{name}'")]
    MissingProperty { name: String },

    /// A property was present but had the wrong dynamic type.
    #[error("property '{name}': expected {expected}, got {actual}")]
    PropertyTypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A property was present but failed conversion for another reason.
    #[error("property '{name}': {source}")]
    InvalidProperty {
        name: String,
        #[source]
        source: Box<ConversionError>,
    },

    /// Number does not fit the integer target.
    #[error("value {value} out of range for {target_type}")]
    IntegerOverflow {
        value: f64,
        target_type: &'static str,
    },

    /// Number has a fractional part or is not finite.
    #[error("expected an integer, got {value}")]
    NotAnInteger { value: f64 },

    /// An element of a host array failed conversion.
    #[error("element {index}: {source}")]
    Element {
        index: usize,
        #[source]
        source: Box<ConversionError>,
    },

    /// A call argument failed conversion.
    #[error("argument {index}: {source}")]
    Argument {
        index: usize,
        #[source]
        source: Box<ConversionError>,
    },

    /// String contents were rejected by the target type.
    #[error("invalid string: {message}")]
    InvalidString { message: String },

    /// Custom conversion failure.
    #[error("{message}")]
    Failed { message: String },
}

impl ConversionError {
    /// Type mismatch helper.
    pub fn type_mismatch(expected: &'static str, actual: &'static str) -> Self {
        ConversionError::TypeMismatch { expected, actual }
    }

    /// Custom failure helper.
    pub fn failed(message: impl Into<String>) -> Self {
        ConversionError::Failed {
            message: message.into(),
        }
    }

    /// Re-root this error under the property `name`.
    ///
    /// Nested property failures accumulate a dotted path, so a missing `x`
    /// inside `origin` reports `origin.x`.
    pub fn at_property(self, name: &str) -> Self {
        match self {
            ConversionError::MissingProperty { name: inner } => ConversionError::MissingProperty {
                name: format!("{name}.{inner}"),
            },
            ConversionError::TypeMismatch { expected, actual } => {
                ConversionError::PropertyTypeMismatch {
                    name: name.to_string(),
                    expected,
                    actual,
                }
            }
            ConversionError::PropertyTypeMismatch {
                name: inner,
                expected,
                actual,
            } => ConversionError::PropertyTypeMismatch {
                name: format!("{name}.{inner}"),
                expected,
                actual,
            },
            ConversionError::InvalidProperty {
                name: inner,
                source,
            } => ConversionError::InvalidProperty {
                name: format!("{name}.{inner}"),
                source,
            },
            other => ConversionError::InvalidProperty {
                name: name.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Wrap this error as the failure of element `index`.
    pub fn at_element(self, index: usize) -> Self {
        ConversionError::Element {
            index,
            source: Box::new(self),
        }
    }

    /// Wrap this error as the failure of call argument `index`.
    pub fn at_argument(self, index: usize) -> Self {
        ConversionError::Argument {
            index,
            source: Box::new(self),
        }
    }

    /// Strip argument/element wrappers and return the innermost error.
    pub fn root_cause(&self) -> &ConversionError {
        match self {
            ConversionError::Element { source, .. }
            | ConversionError::Argument { source, .. }
            | ConversionError::InvalidProperty { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

// ============================================================================
// Host Exceptions
// ============================================================================

/// Constructor family of a host exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    Error,
    TypeError,
    RangeError,
    ReferenceError,
    SyntaxError,
}

impl ExceptionKind {
    /// The host-visible constructor name.
    pub fn name(&self) -> &'static str {
        match self {
            ExceptionKind::Error => "Error",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::RangeError => "RangeError",
            ExceptionKind::ReferenceError => "ReferenceError",
            ExceptionKind::SyntaxError => "SyntaxError",
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An exception as seen by the host: a kind, a message and an optional code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostException {
    pub kind: ExceptionKind,
    pub message: String,
    pub code: Option<String>,
}

impl HostException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Error, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::TypeError, message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::RangeError, message)
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ReferenceError, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for HostException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// ============================================================================
// Bridge Errors
// ============================================================================

/// Errors reported by bridge operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// A host operation was attempted with no execution context entered.
    #[error("no active execution context on this thread")]
    NoActiveContext,

    /// The environment was used from a thread other than its owner.
    #[error("environment used off its owning thread")]
    WrongThread,

    /// A handle outlived the scope that issued it.
    #[error("value handle used after its scope ended")]
    StaleHandle,

    /// A handle or symbol from a different environment.
    #[error("value handle belongs to a different environment")]
    ForeignHandle,

    /// An object reference no longer points at a live host object.
    #[error("host object is no longer alive")]
    InvalidObject,

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// A symbol lookup through the host failed.
    #[error("failed to resolve symbol '{name}'")]
    SymbolResolution { name: String },

    /// A native constructor reported failure.
    #[error("failed to construct {class}: {message}")]
    Construction { class: String, message: String },

    /// The capability exists only on other platforms.
    #[error("{feature} is not supported on this platform")]
    UnsupportedPlatform { feature: String },

    #[error("{name} is not a function")]
    NotCallable { name: String },

    #[error("{name} is not a constructor")]
    NotConstructor { name: String },

    /// A native type was used before its class was registered.
    #[error("class {class} is not registered in this environment")]
    ClassNotRegistered { class: String },

    /// A native type was registered twice in one environment.
    #[error("class {class} is already registered in this environment")]
    AlreadyRegistered { class: String },

    #[error("cannot assign to read only property '{name}'")]
    ReadOnlyProperty { name: String },

    /// A method or accessor was invoked on a receiver of the wrong class.
    #[error("illegal invocation: {message}")]
    InvalidThis { message: String },

    /// The native payload is already borrowed for mutation.
    #[error("{class} instance is already in use")]
    PayloadBusy { class: String },

    /// An exception raised inside the host.
    #[error("{0}")]
    Thrown(HostException),

    /// The host expression could not be parsed.
    #[error("script error at offset {offset}: {message}")]
    Script { offset: usize, message: String },

    /// A heap limit was reached: the configured object cap, or the dense
    /// array size.
    #[error("host {resource} exhausted (limit {limit})")]
    ResourceExhausted { resource: &'static str, limit: usize },

    /// The environment was torn down before a completion ran.
    #[error("environment has been torn down")]
    EnvironmentTornDown,

    /// A driver was re-entered while already running.
    #[error("{what} re-entered while running")]
    Reentrant { what: &'static str },
}

impl BridgeError {
    pub fn construction(class: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::Construction {
            class: class.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(feature: impl Into<String>) -> Self {
        BridgeError::UnsupportedPlatform {
            feature: feature.into(),
        }
    }

    pub fn invalid_this(message: impl Into<String>) -> Self {
        BridgeError::InvalidThis {
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        BridgeError::Thrown(HostException::type_error(message))
    }

    pub fn failed(message: impl Into<String>) -> Self {
        BridgeError::Conversion(ConversionError::failed(message))
    }

    /// The conversion failure, if this is one.
    pub fn conversion(&self) -> Option<&ConversionError> {
        match self {
            BridgeError::Conversion(err) => Some(err),
            _ => None,
        }
    }

    /// Re-root a conversion failure under the property `name`.
    pub fn at_property(self, name: &str) -> Self {
        match self {
            BridgeError::Conversion(err) => BridgeError::Conversion(err.at_property(name)),
            other => other,
        }
    }

    /// Wrap a conversion failure as the failure of element `index`.
    pub fn at_element(self, index: usize) -> Self {
        match self {
            BridgeError::Conversion(err) => BridgeError::Conversion(err.at_element(index)),
            other => other,
        }
    }

    /// Wrap a conversion failure as the failure of argument `index`.
    pub fn at_argument(self, index: usize) -> Self {
        match self {
            BridgeError::Conversion(err) => BridgeError::Conversion(err.at_argument(index)),
            other => other,
        }
    }

    /// Stable, host-visible error code.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::NoActiveContext => "ERR_NO_CONTEXT",
            BridgeError::WrongThread => "ERR_WRONG_THREAD",
            BridgeError::StaleHandle => "ERR_STALE_HANDLE",
            BridgeError::ForeignHandle => "ERR_FOREIGN_HANDLE",
            BridgeError::InvalidObject => "ERR_INVALID_OBJECT",
            BridgeError::Conversion(err) => match err.root_cause() {
                ConversionError::MissingProperty { .. } => "ERR_MISSING_PROPERTY",
                ConversionError::IntegerOverflow { .. } => "ERR_OUT_OF_RANGE",
                _ => "ERR_INVALID_ARG_TYPE",
            },
            BridgeError::SymbolResolution { .. } => "ERR_SYMBOL_RESOLUTION",
            BridgeError::Construction { .. } => "ERR_CONSTRUCTION",
            BridgeError::UnsupportedPlatform { .. } => "ERR_UNSUPPORTED_PLATFORM",
            BridgeError::NotCallable { .. } => "ERR_NOT_CALLABLE",
            BridgeError::NotConstructor { .. } => "ERR_NOT_CONSTRUCTOR",
            BridgeError::ClassNotRegistered { .. } => "ERR_CLASS_NOT_REGISTERED",
            BridgeError::AlreadyRegistered { .. } => "ERR_ALREADY_REGISTERED",
            BridgeError::ReadOnlyProperty { .. } => "ERR_READ_ONLY",
            BridgeError::InvalidThis { .. } => "ERR_INVALID_THIS",
            BridgeError::PayloadBusy { .. } => "ERR_PAYLOAD_BUSY",
            BridgeError::Thrown(_) => "ERR_THROWN",
            BridgeError::Script { .. } => "ERR_SCRIPT",
            BridgeError::ResourceExhausted { .. } => "ERR_RESOURCE_EXHAUSTED",
            BridgeError::EnvironmentTornDown => "ERR_TORN_DOWN",
            BridgeError::Reentrant { .. } => "ERR_REENTRANT",
        }
    }

    /// The exception a host caller observes for this error.
    pub fn to_exception(&self) -> HostException {
        let kind = match self {
            BridgeError::Thrown(exception) => return exception.clone(),
            BridgeError::Conversion(ConversionError::IntegerOverflow { .. }) => {
                ExceptionKind::RangeError
            }
            BridgeError::Conversion(_)
            | BridgeError::NotCallable { .. }
            | BridgeError::NotConstructor { .. }
            | BridgeError::ReadOnlyProperty { .. }
            | BridgeError::InvalidThis { .. } => ExceptionKind::TypeError,
            BridgeError::ResourceExhausted { .. } => ExceptionKind::RangeError,
            BridgeError::Script { .. } => ExceptionKind::SyntaxError,
            _ => ExceptionKind::Error,
        };
        HostException::new(kind, self.to_string()).with_code(self.code())
    }

    pub fn is_conversion(&self) -> bool {
        matches!(self, BridgeError::Conversion(_))
    }

    pub fn is_thrown(&self) -> bool {
        matches!(self, BridgeError::Thrown(_))
    }
}

/// Result alias used throughout the bridge.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_property_path_is_prefixed() {
        let err = ConversionError::MissingProperty {
            name: "x".to_string(),
        }
        .at_property("origin");
        assert_eq!(
            err,
            ConversionError::MissingProperty {
                name: "origin.x".to_string()
            }
        );
    }

    #[test]
    fn type_mismatch_becomes_property_mismatch() {
        let err = ConversionError::type_mismatch("number", "string").at_property("width");
        assert!(matches!(
            err,
            ConversionError::PropertyTypeMismatch { ref name, expected: "number", actual: "string" }
                if name == "width"
        ));
        assert_eq!(err.to_string(), "property 'width': expected number, got string");
    }

    #[test]
    fn overflow_under_property_keeps_source() {
        let err = ConversionError::IntegerOverflow {
            value: 300.0,
            target_type: "u8",
        }
        .at_property("level");
        assert!(matches!(
            err.root_cause(),
            ConversionError::IntegerOverflow { target_type: "u8", .. }
        ));
    }

    #[test]
    fn argument_wrapping_only_touches_conversions() {
        let err = BridgeError::StaleHandle.at_argument(2);
        assert_eq!(err, BridgeError::StaleHandle);

        let err = BridgeError::from(ConversionError::type_mismatch("string", "number")).at_argument(1);
        assert!(matches!(
            err,
            BridgeError::Conversion(ConversionError::Argument { index: 1, .. })
        ));
    }

    #[test]
    fn exception_kinds() {
        let err = BridgeError::from(ConversionError::type_mismatch("number", "string"));
        let exception = err.to_exception();
        assert_eq!(exception.kind, ExceptionKind::TypeError);
        assert_eq!(exception.code.as_deref(), Some("ERR_INVALID_ARG_TYPE"));

        let thrown = BridgeError::Thrown(HostException::range_error("too big"));
        assert_eq!(thrown.to_exception(), HostException::range_error("too big"));

        let exhausted = BridgeError::ResourceExhausted { resource: "objects", limit: 4 };
        assert_eq!(exhausted.to_exception().kind, ExceptionKind::RangeError);

        let unsupported = BridgeError::unsupported("screen capture");
        assert_eq!(unsupported.to_exception().kind, ExceptionKind::Error);
        assert_eq!(
            unsupported.to_string(),
            "screen capture is not supported on this platform"
        );
    }

    #[test]
    fn host_exception_display() {
        let exception = HostException::type_error("x is not a function");
        assert_eq!(exception.to_string(), "TypeError: x is not a function");
    }
}
